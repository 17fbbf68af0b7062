use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const FILTER_ENV: &str = "NATSDASH_LOG";

pub fn diagnostics_path(log_dir: &Path) -> PathBuf {
    log_dir.join("natsdash-debug.log")
}

/// Install the global subscriber. Diagnostics go to a file so they never
/// mix with the console output; if the file cannot be opened they go to
/// stderr instead. Returns the file path when one is in use.
pub fn init(log_dir: &Path) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let path = diagnostics_path(log_dir);
    let file = std::fs::create_dir_all(log_dir)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));

    match file {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
            Some(path)
        }
        Err(e) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            tracing::warn!(path = %path.display(), error = %e, "diagnostics file unavailable");
            None
        }
    }
}
