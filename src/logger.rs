use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Rotate once the log file grows past this size (10MB)
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the logging system
///
/// Console logging goes to stdout and is controlled by `RUST_LOG`
/// (`error`, `warn`, `info` (default), `debug`, `trace`, `off`).
///
/// The audit trail in `log_path` is independent of the console level:
/// every mutating operation appends one line to it through [`log_to_file`].
///
/// ## Examples
///
/// ```bash
/// # Show every git invocation
/// RUST_LOG=debug device-config-sync serve
///
/// # Only show errors on console
/// RUST_LOG=error device-config-sync sync
/// ```
pub fn init_logger(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    let _ = LOG_FILE.set(log_path.to_path_buf());

    // By default, use Info level unless RUST_LOG is set
    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .target(env_logger::Target::Stdout)
        .try_init()
        .ok(); // Ignore error if logger is already initialized

    rotate_log_if_needed(log_path)?;
    log_to_file(&format!("Logger initialized with level: {default_level:?}"))?;

    Ok(())
}

/// Append a line to the audit log. A no-op until [`init_logger`] has run.
pub fn log_to_file(message: &str) -> Result<()> {
    match LOG_FILE.get() {
        Some(path) => append_line(path, message),
        None => Ok(()),
    }
}

fn append_line(log_path: &Path, message: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )?;

    Ok(())
}

/// Record a mutating operation in the audit log, downgrading failures to a warning.
pub fn audit(message: &str) {
    if let Err(e) = log_to_file(message) {
        log::warn!("Failed to write audit log: {e:#}");
    }
}

/// Rotate log file if it exceeds the size limit
pub fn rotate_log_if_needed(log_path: &Path) -> Result<()> {
    if log_path.exists() {
        let metadata = std::fs::metadata(log_path)?;

        if metadata.len() > MAX_LOG_SIZE {
            // Rotate: rename current log to .old and start fresh
            let old_log_path = log_path.with_extension("log.old");

            if old_log_path.exists() {
                std::fs::remove_file(&old_log_path)?;
            }

            std::fs::rename(log_path, &old_log_path)?;

            log::info!("Log file rotated to {}", old_log_path.display());
        }
    }

    Ok(())
}
