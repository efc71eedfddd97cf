use std::fmt;

use chrono::Duration;
use compliance_core::CompliancePolicy;
use compliance_core::model::{CourseId, QuestionId, SessionMeta, UserId, default_question_pool};
use compliance_core::time::{ManualClock, format_hms};
use services::authority::Verdict;
use services::http_authority::HttpAuthorityClient;
use services::{AppServices, Clock, Phase};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidId { flag: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidId { flag, raw } => write!(f, "invalid {flag} value: {raw:?}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- reap    --user <id> --course <id> [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- daily   --user <id> [--course <id>] [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- history --user <id> --course <id> [--limit <n>] [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- enroll  --user <id> --question <pvq_id> --answer <text> [--db <sqlite_url>]");
    eprintln!("  cargo run -p app -- demo    --user <id> --course <id> [--minutes <n>] [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://compliance.sqlite3");
    eprintln!("  --limit 20, --minutes 5");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  COMPLIANCE_DB_URL, COMPLIANCE_AUTHORITY_URL, COMPLIANCE_AUTHORITY_TOKEN,");
    eprintln!("  COMPLIANCE_* policy overrides, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reap,
    Daily,
    History,
    Enroll,
    Demo,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "reap" => Some(Self::Reap),
            "daily" => Some(Self::Daily),
            "history" => Some(Self::History),
            "enroll" => Some(Self::Enroll),
            "demo" => Some(Self::Demo),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Args {
    db_url: String,
    user: Option<String>,
    course: Option<String>,
    question: Option<String>,
    answer: Option<String>,
    limit: u32,
    minutes: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("COMPLIANCE_DB_URL")
                .ok()
                .map_or_else(|| "sqlite://compliance.sqlite3".into(), normalize_sqlite_url),
            limit: 20,
            minutes: 5,
            ..Self::default()
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--user" => parsed.user = Some(require_value(args, "--user")?),
                "--course" => parsed.course = Some(require_value(args, "--course")?),
                "--question" => parsed.question = Some(require_value(args, "--question")?),
                "--answer" => parsed.answer = Some(require_value(args, "--answer")?),
                "--limit" => parsed.limit = parse_number(args, "--limit")?,
                "--minutes" => parsed.minutes = parse_number(args, "--minutes")?,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn user(&self) -> Result<UserId, ArgsError> {
        let raw = self
            .user
            .as_deref()
            .ok_or(ArgsError::MissingFlag { flag: "--user" })?;
        UserId::new(raw).map_err(|_| ArgsError::InvalidId {
            flag: "--user",
            raw: raw.to_owned(),
        })
    }

    fn course(&self) -> Result<CourseId, ArgsError> {
        let raw = self
            .course
            .as_deref()
            .ok_or(ArgsError::MissingFlag { flag: "--course" })?;
        CourseId::new(raw).map_err(|_| ArgsError::InvalidId {
            flag: "--course",
            raw: raw.to_owned(),
        })
    }
}

fn parse_number(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<u32, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let policy = CompliancePolicy::from_env()?;
    prepare_sqlite_file(&parsed.db_url)?;

    match cmd {
        Command::Reap => {
            let app = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), policy).await?;
            let report = app
                .sessions()
                .reap_orphans(&parsed.user()?, &parsed.course()?)
                .await?;
            println!(
                "closed {} orphaned session(s), {} failed",
                report.closed_count,
                report.failed.len()
            );
        }
        Command::Daily => {
            let app = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), policy).await?;
            let user = parsed.user()?;
            let status = app.time_authority().check_daily_lockout(&user).await?;
            println!(
                "{}: {} min completed, {} min remaining{}",
                status.date_key,
                status.minutes_completed,
                status.remaining_minutes,
                if status.is_locked { " (locked)" } else { "" }
            );
            if parsed.course.is_some() {
                let seconds = app.sessions().get_daily_time(&user, &parsed.course()?).await?;
                println!("completed sessions today: {}", format_hms(seconds));
            }
        }
        Command::History => {
            let app = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), policy).await?;
            let sessions = app.sessions();
            let (user, course) = (parsed.user()?, parsed.course()?);
            for session in sessions.session_history(&user, &course, parsed.limit).await? {
                println!(
                    "{}  {}  {:<9}  {}",
                    session.session_id,
                    session.start_timestamp.format("%Y-%m-%d %H:%M"),
                    session.status,
                    format_hms(session.duration_seconds.unwrap_or_default())
                );
            }
            let total = sessions.total_session_minutes(&user, &course).await?;
            println!("total completed: {total} min");
        }
        Command::Enroll => {
            let app = AppServices::new_sqlite(&parsed.db_url, Clock::default_clock(), policy).await?;
            let raw = parsed
                .question
                .as_deref()
                .ok_or(ArgsError::MissingFlag { flag: "--question" })?;
            let question_id = QuestionId::new(raw).map_err(|_| ArgsError::InvalidId {
                flag: "--question",
                raw: raw.to_owned(),
            })?;
            let question = default_question_pool()
                .into_iter()
                .find(|q| q.id == question_id)
                .ok_or_else(|| ArgsError::InvalidId {
                    flag: "--question",
                    raw: raw.to_owned(),
                })?;
            let answer = parsed
                .answer
                .as_deref()
                .ok_or(ArgsError::MissingFlag { flag: "--answer" })?;
            let enrolled = app
                .identity()
                .enroll_security_answer(&parsed.user()?, question, answer)
                .await?;
            println!("enrolled {}: {}", enrolled.question.id, enrolled.question.prompt);
        }
        Command::Demo => run_demo(&parsed, policy).await?,
    }
    Ok(())
}

/// Drives one session on a simulated clock, one heartbeat per minute.
async fn run_demo(
    parsed: &Args,
    policy: CompliancePolicy,
) -> Result<(), Box<dyn std::error::Error>> {
    let clock = ManualClock::new(chrono::Utc::now());
    let app = AppServices::new_sqlite(&parsed.db_url, Clock::manual(&clock), policy)
        .await?
        .with_remote_authority(HttpAuthorityClient::from_env());
    let orchestrator = app.orchestrator(parsed.user()?, parsed.course()?).await?;
    let session_id = orchestrator.start(SessionMeta::default()).await?;
    info!(session_id = %session_id, minutes = parsed.minutes, "demo session started");

    for _ in 0..parsed.minutes {
        clock.advance(Duration::seconds(60));
        let response = orchestrator.heartbeat_now().await?;
        println!(
            "{}  verdict={:?}  today={} min  remaining={} min",
            orchestrator.formatted_session_time(),
            response.verdict,
            response.minutes_completed,
            response.remaining_minutes
        );
        if response.verdict != Verdict::Continue {
            break;
        }
        if orchestrator.phase() == Phase::AwaitingPvq {
            if let Some(question) = orchestrator.pending_pvq() {
                println!("identity check due: {}", question.prompt);
            }
            break;
        }
    }

    let total = orchestrator.formatted_total_time();
    orchestrator.stop().await;
    println!("session {session_id} closed, {total} today");
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
