use std::fmt;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::activity_log::ActivityLog;
use crate::broker::{BrokerError, BrokerHandle, ConnectionProvider, ServerInfo};
use crate::config::Profile;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] BrokerError),
    #[error("cannot open activity log: {0}")]
    Log(#[from] io::Error),
}

/// One connection: the broker handle plus the activity log every
/// interaction is written to. Passed explicitly to whatever needs it.
#[derive(Clone)]
pub struct Session {
    profile: String,
    broker: BrokerHandle,
    log: ActivityLog,
    /// Log offset before this session wrote anything.
    log_start: u64,
    server: ServerInfo,
}

impl Session {
    /// Connect with `profile` and open its per-day activity log under
    /// `log_dir`.
    pub fn open(
        provider: &dyn ConnectionProvider,
        profile: &Profile,
        log_dir: &Path,
    ) -> Result<Self, SessionError> {
        let broker = provider.connect(profile).inspect_err(|e| {
            warn!(profile = %profile.name, error = %e, "connect failed");
        })?;
        let log = ActivityLog::open_for_profile(log_dir, &profile.name)?;
        let server = broker.server_info();
        let log_start = log.offset();
        log.note(&format!(
            "Connected to NATS. ClusterName: {} ServerID: {}",
            server.cluster, server.server_id
        ))?;
        info!(
            profile = %profile.name,
            server = %server.server_id,
            log = %log.path().display(),
            "session opened"
        );
        Ok(Self {
            profile: profile.name.clone(),
            broker,
            log,
            log_start,
            server,
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// Where a tail should start to show everything this session logged.
    pub fn log_start(&self) -> u64 {
        self.log_start
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub fn close(self) {
        if let Err(e) = self.log.note("Disconnected") {
            warn!(error = %e, "activity log write failed");
        }
        info!(profile = %self.profile, "session closed");
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("profile", &self.profile)
            .field("server", &self.server)
            .field("log", &self.log.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, MemoryProvider};
    use std::sync::Arc;

    #[test]
    fn open_writes_connected_line() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new(Arc::new(MemoryBroker::new()));
        let session =
            Session::open(&provider, &Profile::new("local", "memory://"), tmp.path()).unwrap();
        assert_eq!(session.profile(), "local");
        let text = std::fs::read_to_string(session.log().path()).unwrap();
        assert!(text.contains("Connected to NATS. ClusterName: local ServerID: MEMORY"));
        let name = session.log().path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_local.log"));
    }

    #[test]
    fn reopening_the_same_day_starts_after_earlier_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new(Arc::new(MemoryBroker::new()));
        let profile = Profile::new("local", "memory://");
        let first = Session::open(&provider, &profile, tmp.path()).unwrap();
        assert_eq!(first.log_start(), 0);
        first.close();

        let second = Session::open(&provider, &profile, tmp.path()).unwrap();
        let text = std::fs::read_to_string(second.log().path()).unwrap();
        let own = &text[second.log_start() as usize..];
        assert!(own.contains("Connected to NATS."));
        assert!(!own.contains("Disconnected"));
        assert!(text[..second.log_start() as usize].ends_with("Disconnected\n"));
    }

    #[test]
    fn connect_failure_creates_no_log() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = MemoryProvider::new(Arc::new(MemoryBroker::new()));
        let err = Session::open(
            &provider,
            &Profile::new("remote", "nats://demo.nats.io:4222"),
            tmp.path(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Connect(BrokerError::Connection(_))));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
