use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_TARGET: &str = "harvest_orchestrator";

/// `RUST_LOG` directives plus this crate at info (debug when verbose) and
/// everything else at warn
pub fn log_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { "debug" } else { "info" };
    Ok(EnvFilter::from_default_env()
        .add_directive(format!("{}={}", LOG_TARGET, level).parse()?)
        .add_directive("warn".parse()?))
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::File::create(path).context(format!("Cannot open log file {}", path.display()))
}

/// Install the global subscriber: console output, and a plain-text copy in
/// `log_file` when one is given
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let console = fmt::layer().with_target(true).with_span_events(FmtSpan::CLOSE);

    let file = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(open_log_file(&path)?),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(log_filter(verbose)?)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

/// Log file used by `--log-to-file` when no `--log-file` is given
pub fn default_log_file() -> PathBuf {
    directories::ProjectDirs::from("info", "lblod", "harvest-orchestrator")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./logs"))
        .join("harvest-orchestrator.log")
}
