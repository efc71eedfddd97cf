//! Background timers owned by one orchestrator.
//!
//! Tasks hold a `Weak` handle so a dropped orchestrator is never kept alive
//! by its own timers. They report state; they never change the phase.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::service::Inner;
use crate::heartbeat::HeartbeatEvent;

/// Handles for every timer besides the heartbeat loop.
#[derive(Debug, Default)]
pub(crate) struct ScheduledTasks {
    autosave: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
    unload_armed: bool,
}

impl ScheduledTasks {
    pub fn set_autosave(&mut self, task: JoinHandle<()>) {
        abort(self.autosave.replace(task));
    }

    pub fn set_countdown(&mut self, task: JoinHandle<()>) {
        abort(self.countdown.replace(task));
    }

    pub fn stop_autosave(&mut self) {
        abort(self.autosave.take());
    }

    pub fn stop_countdown(&mut self) {
        abort(self.countdown.take());
    }

    pub fn arm_unload(&mut self) {
        self.unload_armed = true;
    }

    /// Returns whether the guard was armed.
    pub fn disarm_unload(&mut self) -> bool {
        std::mem::take(&mut self.unload_armed)
    }

    pub fn cancel_all(&mut self) {
        self.stop_autosave();
        self.stop_countdown();
        self.unload_armed = false;
    }
}

impl Drop for ScheduledTasks {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn abort(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}

/// Relays heartbeat events to the orchestrator. Ends once the heartbeat
/// loop that owns the sender is stopped.
pub(super) fn spawn_heartbeat_listener(
    inner: Weak<Inner>,
    mut events: mpsc::Receiver<HeartbeatEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.on_heartbeat(event).await;
        }
        debug!("heartbeat listener finished");
    });
}

/// Persists the progress snapshot every `period`, first one period from now.
pub(super) fn spawn_autosave(inner: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if let Err(err) = inner.persist_snapshot().await {
                warn!(error = %err, "autosave failed");
            }
        }
    })
}

/// Publishes the break countdown immediately and then every `period` until
/// the break ends.
pub(super) fn spawn_break_countdown(inner: Weak<Inner>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.publish_break_countdown() {
                break;
            }
        }
    })
}
