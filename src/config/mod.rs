pub mod profile;
pub mod stream_draft;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

pub use profile::{AuthMethod, Profile};
pub use stream_draft::{StreamDraft, parse_duration};

const PROFILE_EXT: &str = "json";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid duration '{0}'")]
    Duration(String),
    #[error("profile not found: {0}")]
    UnknownProfile(String),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Connection profiles, one JSON record per file in a directory.
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{PROFILE_EXT}"))
    }

    /// Load every profile in the directory, sorted by name. A missing
    /// directory is an empty store.
    pub fn list(&self) -> Result<Vec<Profile>, ConfigError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir)(e)),
        };

        let mut profiles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error(&self.dir))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXT) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            profiles.push(self.read_record(name, &path)?);
        }
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(dir = %self.dir.display(), count = profiles.len(), "profiles loaded");
        Ok(profiles)
    }

    pub fn load(&self, name: &str) -> Result<Profile, ConfigError> {
        let path = self.record_path(name);
        if !path.is_file() {
            return Err(ConfigError::UnknownProfile(name.to_string()));
        }
        self.read_record(name, &path)
    }

    fn read_record(&self, name: &str, path: &Path) -> Result<Profile, ConfigError> {
        let content = fs::read_to_string(path).map_err(io_error(path))?;
        let mut profile: Profile =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        profile.name = name.to_string();
        Ok(profile)
    }

    pub fn save(&self, profile: &Profile) -> Result<PathBuf, ConfigError> {
        validate_profile_name(&profile.name)?;
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let path = self.record_path(&profile.name);
        let content = serde_json::to_string_pretty(profile)?;
        fs::write(&path, content).map_err(io_error(&path))?;
        Ok(path)
    }

    pub fn remove(&self, name: &str) -> Result<(), ConfigError> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ConfigError::UnknownProfile(name.to_string()))
            }
            Err(e) => Err(io_error(&path)(e)),
        }
    }
}

fn validate_profile_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        || name.starts_with('.')
    {
        return Err(ConfigError::Invalid {
            field: "profile name",
            reason: format!("'{name}' must be non-empty and use [A-Za-z0-9._-]"),
        });
    }
    Ok(())
}

/// Runtime settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    pub profile_dir: PathBuf,
    pub log_dir: PathBuf,
    pub fetch_wait: Duration,
    pub poll_interval: Duration,
    pub demo: bool,
}

impl ConsoleConfig {
    pub const DEFAULT_FETCH_WAIT: Duration = Duration::from_secs(1);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn from_env() -> Self {
        let profile_dir = std::env::var_os("NATSDASH_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_profile_dir);
        let log_dir = std::env::var_os("NATSDASH_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_log_dir);
        Self {
            profile_dir,
            log_dir,
            fetch_wait: env_millis("NATSDASH_FETCH_WAIT_MS").unwrap_or(Self::DEFAULT_FETCH_WAIT),
            poll_interval: env_millis("NATSDASH_POLL_MS").unwrap_or(Self::DEFAULT_POLL_INTERVAL),
            demo: false,
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            warn!(key, value = %raw, "ignoring invalid millisecond setting");
            None
        }
    }
}

/// `<config dir>/natsdash`
pub fn default_profile_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("natsdash")
}

/// `<tmp>/natsdash`, shared by activity logs and diagnostics.
pub fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("natsdash")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn save_then_list() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("profiles"));
        let mut prod = Profile::new("prod", "nats://prod:4222");
        prod.token = "abc".into();
        store.save(&prod).unwrap();
        store.save(&Profile::new("demo", "memory://demo")).unwrap();
        std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let profiles = store.list().unwrap();
        let names: Vec<&str> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["demo", "prod"]);
        assert_eq!(profiles[1].auth(), AuthMethod::Token("abc".into()));
        assert_eq!(store.load("prod").unwrap(), prod);
    }

    #[test]
    fn malformed_record_names_path() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        let store = ConfigStore::new(tmp.path().to_path_buf());
        let err = store.list().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn remove_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().to_path_buf());
        store.save(&Profile::new("gone", "memory://")).unwrap();
        store.remove("gone").unwrap();
        assert!(matches!(
            store.remove("gone"),
            Err(ConfigError::UnknownProfile(_))
        ));
        assert!(matches!(
            store.load("gone"),
            Err(ConfigError::UnknownProfile(_))
        ));
    }

    #[test]
    fn rejects_path_like_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().to_path_buf());
        let err = store.save(&Profile::new("../escape", "memory://")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
