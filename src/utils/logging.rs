//! Diagnostic logging setup for the binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to whoever embeds the crate. The CLI calls [`init_logging`].

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Checked before `RUST_LOG`.
pub const LOG_ENV_VAR: &str = "PALAVER_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Resolve the filter from `PALAVER_LOG`, then `RUST_LOG`, then `default`.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber, writing to stderr or appending to
/// `log_file`.
pub fn init_logging(log_file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_target(true);

    let installed = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| err as Box<dyn std::error::Error>)
}

fn open_log_file(path: &Path) -> Result<File, std::io::Error> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    // Surface permission problems before the first event is written.
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn log_file_is_created_with_missing_parents() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("logs").join("palaver.log");
        open_log_file(&path).expect("log file should open");
        assert!(path.exists());
    }

    #[test]
    fn log_file_under_a_regular_file_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").expect("write blocker");
        assert!(open_log_file(&blocker.join("palaver.log")).is_err());
    }

    #[test]
    fn second_install_is_reported_not_panicked() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("palaver.log");
        // The second call always finds a subscriber already installed.
        let _ = init_logging(Some(&path));
        let second = init_logging(Some(&path));
        assert!(second.is_err());
        assert!(path.exists());
    }
}
