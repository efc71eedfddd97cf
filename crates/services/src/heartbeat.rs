//! Periodic heartbeat poller.
//!
//! The monitor only relays verdicts; every limit decision lives in the time
//! authority.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use compliance_core::model::{CourseId, SessionId, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::authority::{HeartbeatRequest, HeartbeatResponse, TimeAuthority};
use crate::error::AuthorityError;
use crate::retry::{RetryError, RetryExecutor};

/// Ids a heartbeat needs. Any missing id means no heartbeat is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatTarget {
    pub user_id: Option<UserId>,
    pub course_id: Option<CourseId>,
    pub session_id: Option<SessionId>,
}

impl HeartbeatTarget {
    #[must_use]
    pub fn request(&self) -> Option<HeartbeatRequest> {
        Some(HeartbeatRequest {
            user_id: self.user_id.clone()?,
            course_id: self.course_id.clone()?,
            session_id: self.session_id.clone()?,
        })
    }
}

#[derive(Debug)]
pub enum HeartbeatEvent {
    /// Any verdict, including the terminal ones.
    Verdict(HeartbeatResponse),
    /// Retries exhausted or the authority refused; the loop keeps going.
    Failed(RetryError<AuthorityError>),
}

pub struct HeartbeatMonitor {
    authority: Arc<dyn TimeAuthority>,
    retry: RetryExecutor,
    interval: Duration,
    enabled: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(authority: Arc<dyn TimeAuthority>, retry: RetryExecutor, interval: Duration) -> Self {
        Self {
            authority,
            retry,
            interval,
            enabled: AtomicBool::new(true),
            task: Mutex::new(None),
        }
    }

    /// Disabling also tears down a running loop.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.stop();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Sends one heartbeat through the retry executor.
    ///
    /// # Errors
    ///
    /// Returns `RetryError` when the authority stays unreachable or refuses.
    pub async fn beat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, RetryError<AuthorityError>> {
        send(self.authority.as_ref(), self.retry, request).await
    }

    /// Starts the interval loop; the first beat fires one interval from now.
    ///
    /// Returns `false` without scheduling anything when the monitor is
    /// disabled or an id is missing. A terminal verdict ends the loop.
    pub fn start(&self, target: &HeartbeatTarget, events: mpsc::Sender<HeartbeatEvent>) -> bool {
        self.stop();
        if !self.enabled.load(Ordering::SeqCst) {
            return false;
        }
        let Some(request) = target.request() else {
            debug!("heartbeat not started: missing ids");
            return false;
        };
        let authority = Arc::clone(&self.authority);
        let retry = self.retry;
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let event = match send(authority.as_ref(), retry, &request).await {
                    Ok(response) => HeartbeatEvent::Verdict(response),
                    Err(err) => {
                        warn!(session_id = %request.session_id, error = %err, "heartbeat failed");
                        HeartbeatEvent::Failed(err)
                    }
                };
                let terminal =
                    matches!(&event, HeartbeatEvent::Verdict(r) if r.verdict.is_terminal());
                if events.send(event).await.is_err() || terminal {
                    break;
                }
            }
        });
        *self.slot() = Some(task);
        true
    }

    pub fn stop(&self) {
        if let Some(task) = self.slot().take() {
            task.abort();
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn send(
    authority: &dyn TimeAuthority,
    retry: RetryExecutor,
    request: &HeartbeatRequest,
) -> Result<HeartbeatResponse, RetryError<AuthorityError>> {
    retry
        .execute("heartbeat", move || authority.heartbeat(request))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Verdict;
    use async_trait::async_trait;
    use compliance_core::CompliancePolicy;
    use compliance_core::time::{DateKey, fixed_now};
    use std::sync::atomic::AtomicU32;

    /// Answers `continue` until `limit_after` calls, then the daily limit.
    struct ScriptedAuthority {
        calls: AtomicU32,
        limit_after: u32,
    }

    #[async_trait]
    impl TimeAuthority for ScriptedAuthority {
        async fn heartbeat(
            &self,
            _request: &HeartbeatRequest,
        ) -> Result<HeartbeatResponse, AuthorityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let verdict = if n > self.limit_after {
                Verdict::DailyLimitReached
            } else {
                Verdict::Continue
            };
            Ok(HeartbeatResponse {
                verdict,
                minutes_completed: n.min(self.limit_after),
                remaining_minutes: self.limit_after.saturating_sub(n),
                date_key: DateKey::for_instant(fixed_now(), CompliancePolicy::default().timezone),
                is_new_day: n == 1,
                server_timestamp: fixed_now(),
            })
        }
    }

    fn target() -> HeartbeatTarget {
        HeartbeatTarget {
            user_id: Some(UserId::new("u").unwrap()),
            course_id: Some(CourseId::new("c").unwrap()),
            session_id: Some(SessionId::new("s").unwrap()),
        }
    }

    fn monitor(limit_after: u32) -> (HeartbeatMonitor, Arc<ScriptedAuthority>) {
        let authority = Arc::new(ScriptedAuthority {
            calls: AtomicU32::new(0),
            limit_after,
        });
        let monitor = HeartbeatMonitor::new(
            Arc::clone(&authority) as Arc<dyn TimeAuthority>,
            RetryExecutor::default(),
            Duration::from_secs(60),
        );
        (monitor, authority)
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_after_terminal_verdict() {
        let (monitor, authority) = monitor(2);
        let (tx, mut rx) = mpsc::channel(8);
        assert!(monitor.start(&target(), tx));

        let mut verdicts = Vec::new();
        while let Some(event) = rx.recv().await {
            if let HeartbeatEvent::Verdict(resp) = event {
                verdicts.push(resp.verdict);
            }
        }
        assert_eq!(
            verdicts,
            vec![Verdict::Continue, Verdict::Continue, Verdict::DailyLimitReached]
        );
        assert_eq!(authority.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ids_or_disabled_send_nothing() {
        let (monitor, authority) = monitor(10);
        let (tx, _rx) = mpsc::channel(8);
        let partial = HeartbeatTarget {
            session_id: None,
            ..target()
        };
        assert!(!monitor.start(&partial, tx.clone()));

        monitor.set_enabled(false);
        assert!(!monitor.start(&target(), tx));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(authority.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_down_the_loop() {
        let (monitor, authority) = monitor(100);
        let (tx, mut rx) = mpsc::channel(8);
        monitor.start(&target(), tx);
        assert!(rx.recv().await.is_some());
        monitor.stop();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(authority.calls.load(Ordering::SeqCst), 1);
    }
}
