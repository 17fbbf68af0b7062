use std::sync::Arc;

use tracing::{info, warn};

use super::{BrokerError, BrokerHandle, MemoryBroker};
use crate::config::{AuthMethod, Profile};

/// Turns a connection profile into a live broker handle.
pub trait ConnectionProvider: Send + Sync {
    fn connect(&self, profile: &Profile) -> Result<BrokerHandle, BrokerError>;
}

pub const MEMORY_SCHEME: &str = "memory://";

/// Serves every `memory://` profile from one shared in-process broker.
///
/// Network schemes are refused with a connection error; there is no wire
/// client behind this provider.
pub struct MemoryProvider {
    broker: Arc<MemoryBroker>,
}

impl MemoryProvider {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> Arc<MemoryBroker> {
        self.broker.clone()
    }
}

impl ConnectionProvider for MemoryProvider {
    fn connect(&self, profile: &Profile) -> Result<BrokerHandle, BrokerError> {
        let url = profile.url.trim();
        if url.is_empty() {
            return Err(BrokerError::Connection("profile has no url".to_string()));
        }
        if !url.starts_with(MEMORY_SCHEME) {
            let scheme = url.split("://").next().unwrap_or(url);
            warn!(url, "no client available for scheme");
            return Err(BrokerError::Connection(format!(
                "no client available for scheme '{scheme}' ({url})"
            )));
        }
        let auth = profile.auth();
        if auth != AuthMethod::None {
            info!(url, auth = auth.label(), "memory broker ignores credentials");
        }
        let handle: BrokerHandle = self.broker.clone();
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(url: &str) -> Profile {
        Profile {
            url: url.to_string(),
            ..Profile::default()
        }
    }

    #[test]
    fn memory_urls_connect_to_shared_broker() {
        let broker = Arc::new(MemoryBroker::new());
        let provider = MemoryProvider::new(broker.clone());
        let a = provider.connect(&profile("memory://demo")).unwrap();
        a.add_stream(crate::broker::StreamConfig::new("orders", &["orders.>"]))
            .unwrap();
        let b = provider.connect(&profile("memory://other")).unwrap();
        assert_eq!(b.stream_names().unwrap(), vec!["orders".to_string()]);
    }

    #[test]
    fn network_urls_are_refused() {
        let provider = MemoryProvider::new(Arc::new(MemoryBroker::new()));
        let err = provider
            .connect(&profile("nats://localhost:4222"))
            .err()
            .unwrap();
        assert!(matches!(err, BrokerError::Connection(msg) if msg.contains("'nats'")));
    }

    #[test]
    fn empty_url_is_refused() {
        let provider = MemoryProvider::new(Arc::new(MemoryBroker::new()));
        assert!(provider.connect(&profile("  ")).is_err());
    }
}
