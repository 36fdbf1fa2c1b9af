use std::backtrace::{Backtrace, BacktraceStatus};
use std::io::Error;
use std::panic::PanicHookInfo;
use std::sync::Once;

use ldr_config::Environment;
use thiserror::Error;
use tracing::Subscriber;
use tracing::field::display;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Directory production log files are written to.
const LOG_DIR: &str = "logs";

/// Number of daily log files kept around.
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to load the environment: {0}")]
    Environment(#[from] Error),
}

/// Keeps the background log writer alive, flushing buffered lines when dropped.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line colored output for terminals.
    Pretty,
    /// One JSON object per line, carrying the fields of the enclosing spans. Ingestion jobs run
    /// inside an `ingestion_job` span, so every line of a job is tagged with its `job_id`.
    Json,
}

impl LogFormat {
    pub fn for_environment(environment: Environment) -> Self {
        if environment.is_prod() {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Builds the JSON subscriber used in production, writing to `writer`.
pub fn json_subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    Registry::default().with(filter).with(
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(false)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer),
    )
}

fn pretty_subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync {
    Registry::default().with(filter).with(
        fmt::layer()
            .pretty()
            .with_ansi(true)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Installs the global subscriber for the environment in `APP_ENVIRONMENT`.
///
/// The filter comes from `RUST_LOG`, `info` by default. Records of the `log` crate and panics are
/// routed through tracing as well.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let flusher = match LogFormat::for_environment(Environment::load()?) {
        LogFormat::Json => {
            let appender = rolling::Builder::new()
                .filename_prefix(app_name)
                .filename_suffix("log")
                .rotation(rolling::Rotation::DAILY)
                .max_log_files(MAX_LOG_FILES)
                .build(LOG_DIR)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            set_global_default(json_subscriber(filter, writer))?;
            LogFlusher::Flusher(guard)
        }
        LogFormat::Pretty => {
            set_global_default(pretty_subscriber(filter))?;
            LogFlusher::NullFlusher
        }
    };

    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_panic(info);
        prev_hook(info);
    }));

    Ok(flusher)
}

static INIT_TEST_TRACING: Once = Once::new();

/// Initializes tracing once per test binary, only if `ENABLE_TRACING` is set:
/// ```bash
/// ENABLE_TRACING=1 cargo test test_name
/// ```
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            Environment::Dev.set();
            let _flusher = init_tracing("test").expect("Failed to initialize tracing for tests");
        }
    });
}

fn log_panic(info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (None, Some("run with RUST_BACKTRACE=1 to display backtraces")),
        _ => (None, Some("backtrace not available")),
    };

    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");

    tracing::error!(
        panic.payload = payload,
        panic.location = info.location().map(|location| location.to_string()),
        panic.backtrace = backtrace.map(display),
        panic.note = note,
        "a panic occurred",
    );
}
