//! Logging initialization.
//!
//! - **Production**: JSON logs to daily rolling files, compact logs to stdout
//! - **Development**: pretty logs to stdout with span events
//!
//! The filter comes from `RUST_LOG`, then `CHECKIN_LOG_LEVEL`, then `info`.

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the fallback log filter.
pub const LOG_LEVEL_ENV: &str = "CHECKIN_LOG_LEVEL";

const DEFAULT_LEVEL: &str = "info";
const LOG_FILE_PREFIX: &str = "checkin-agent";

/// Keep the non-blocking writers alive for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber.
///
/// # Production Mode
///
/// - One JSON object per event in `checkin-agent.<date>` files, rotated
///   daily, under `/var/log/checkin/` on Linux or the platform data dir
///   elsewhere
/// - Events carry target, thread id, file and line, plus the `namespace`
///   span of the pipeline that emitted them
/// - A compact copy goes to stdout without ANSI colors, for the service
///   manager's journal
///
/// # Development Mode
///
/// - Pretty stdout only, with file and line
/// - Span open/close events, so each pipeline's start-up and shutdown show up
///
/// # Errors
///
/// Returns an error if the fallback filter cannot be parsed or the log
/// directory cannot be created.
pub fn init(is_production: bool) -> anyhow::Result<()> {
    let env_filter = resolve_filter(
        std::env::var("RUST_LOG").ok().as_deref(),
        std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
    )?;

    if is_production {
        init_production(env_filter)?;
    } else {
        init_development(env_filter);
    }

    Ok(())
}

/// Pick the filter: a valid `rust_log` wins, otherwise `level`, otherwise `info`.
fn resolve_filter(rust_log: Option<&str>, level: Option<&str>) -> Result<EnvFilter, ParseError> {
    if let Some(filter) = rust_log.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(level.unwrap_or(DEFAULT_LEVEL))
}

fn init_production(env_filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // journald adds its own timestamps and colors
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/checkin")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "checkin")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}
