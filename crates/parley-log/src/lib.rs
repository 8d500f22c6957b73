// ABOUTME: Shared logging setup for the parley binary
// ABOUTME: init() for one-shot commands, init_file() for interactive chat, init_for() for scoped output

use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Directory name under the platform config dir.
const APP_DIR: &str = "parley";

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .try_init();
}

/// File-based logging for the interactive chat, where stderr would interleave
/// with streamed output. Default: WARN level, RUST_LOG override.
///
/// Returns the log file path on success. On failure prints a warning and
/// continues without logging.
pub fn init_file(app_name: &str) -> Option<PathBuf> {
    let base = dirs::config_dir()?;
    match init_file_in(&base, app_name) {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("Warning: failed to set up file logging: {e}");
            None
        }
    }
}

fn init_file_in(base: &Path, app_name: &str) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let path = log_path(base, app_name);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_ansi(false)
        .try_init()?;

    Ok(path)
}

/// Where `init_file` writes for a given base config dir.
pub fn log_path(base: &Path, app_name: &str) -> PathBuf {
    base.join(APP_DIR)
        .join("logs")
        .join(format!("{app_name}.log"))
}

/// Crate-filtered logging to stderr. Default: INFO for the named crate, WARN
/// for everything else.
pub fn init_for(crate_name: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(crate_name))
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter_for(crate_name: &str) -> EnvFilter {
    // Crate names use dashes, tracing targets use underscores.
    let target = crate_name.replace('-', "_");
    let directive = format!("{target}=info");
    EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into())
        .add_directive(
            directive
                .parse()
                .unwrap_or_else(|_| tracing::Level::INFO.into()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exports_init() {
        let _ = super::init as fn();
    }

    #[test]
    fn exports_init_for() {
        let _ = super::init_for as fn(&str);
    }

    #[test]
    fn log_path_is_namespaced() {
        let base = Path::new("/tmp/cfg");
        assert_eq!(
            log_path(base, "chat"),
            PathBuf::from("/tmp/cfg/parley/logs/chat.log")
        );
    }

    #[test]
    fn filter_for_accepts_dashed_names() {
        let filter = filter_for("parley-chat");
        assert!(filter.to_string().contains("parley_chat=info"));
    }

    #[test]
    fn init_file_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        // A global subscriber may already be set by another test; the file
        // must exist either way.
        let result = init_file_in(dir.path(), "test");
        let path = log_path(dir.path(), "test");
        assert!(path.exists());
        if let Ok(p) = result {
            assert_eq!(p, path);
        }
    }
}
