use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

pub const TIMING_TARGET: &str = "imagegen.timing";

const LOGS_DIR: &str = "logs";
const NOISY_TARGETS: [&str; 4] = ["hyper", "hyper_util", "reqwest", "teloxide"];

/// Keeps the non-blocking writers flushing until dropped at shutdown.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

pub fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

/// Application events at `log_level`, with HTTP and Telegram internals held
/// at WARN and timing lines excluded. Extra `target=level` directives are
/// appended from `RUST_LOG`.
fn general_targets(log_level: &str, directives: Option<&str>) -> Targets {
    let mut targets = Targets::new()
        .with_default(parse_log_level(log_level))
        .with_target(TIMING_TARGET, LevelFilter::OFF);
    for target in NOISY_TARGETS {
        targets = targets.with_target(target, LevelFilter::WARN);
    }
    if let Some(extra) = directives.and_then(|value| value.parse::<Targets>().ok()) {
        targets = targets.with_targets(extra);
    }
    targets
}

fn timing_targets() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target(TIMING_TARGET, LevelFilter::INFO)
}

fn rolling_writer(file_name: &str, guards: &mut Vec<WorkerGuard>) -> NonBlocking {
    let appender = tracing_appender::rolling::daily(Path::new(LOGS_DIR), file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    writer
}

/// Installs stdout plus daily-rolling `imagegen.log`/`.jsonl` and
/// `timing.log`/`.jsonl` files under `logs/`.
pub fn init_logging(log_level: &str) -> LoggingGuards {
    if let Err(err) = fs::create_dir_all(LOGS_DIR) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let mut guards = Vec::with_capacity(4);
    let general = general_targets(log_level, std::env::var("RUST_LOG").ok().as_deref());
    let timing = timing_targets();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(general.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(rolling_writer("imagegen.log", &mut guards))
        .with_ansi(false)
        .with_filter(general.clone());
    let json_file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(rolling_writer("imagegen.jsonl", &mut guards))
        .with_filter(general);
    let timing_layer = tracing_subscriber::fmt::layer()
        .with_writer(rolling_writer("timing.log", &mut guards))
        .with_ansi(false)
        .with_filter(timing.clone());
    let json_timing_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(rolling_writer("timing.jsonl", &mut guards))
        .with_filter(timing);

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .with(json_file_layer)
        .with(timing_layer)
        .with(json_timing_layer)
        .init();

    LoggingGuards { _guards: guards }
}
