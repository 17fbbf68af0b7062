pub mod memory;
pub mod provider;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;

pub use memory::MemoryBroker;
pub use provider::{ConnectionProvider, MemoryProvider};

/// Shared handle to a connected broker.
pub type BrokerHandle = Arc<dyn Broker>;

/// Errors returned by broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("stream not found: {0}")]
    StreamNotFound(String),
    #[error("stream already exists: {0}")]
    StreamExists(String),
    #[error("consumer not found: {0}")]
    CursorNotFound(String),
    #[error("invalid filter subject '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
    #[error("no stream is bound to subject {0}")]
    NoStreamForSubject(String),
    #[error("stream {0} is full")]
    StreamFull(String),
    #[error("previous message on {0} not acknowledged")]
    AckPending(String),
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),
}

impl BrokerError {
    /// Resource errors reset local state to "no cursor".
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            BrokerError::StreamNotFound(_) | BrokerError::CursorNotFound(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscardPolicy {
    #[default]
    Old,
    New,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    #[default]
    File,
    Memory,
}

/// Declared configuration of a stream. Limits of `-1` (or `None` for
/// durations) mean unlimited.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub name: String,
    pub description: String,
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub max_consumers: i64,
    pub max_msgs: i64,
    pub max_bytes: i64,
    pub discard: DiscardPolicy,
    pub max_age: Option<Duration>,
    pub max_msgs_per_subject: i64,
    pub max_msg_size: i32,
    pub storage: StorageType,
    pub replicas: u32,
}

impl StreamConfig {
    pub fn new(name: &str, subjects: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            retention: RetentionPolicy::Limits,
            max_consumers: -1,
            max_msgs: -1,
            max_bytes: -1,
            discard: DiscardPolicy::Old,
            max_age: None,
            max_msgs_per_subject: -1,
            max_msg_size: -1,
            storage: StorageType::File,
            replicas: 1,
        }
    }
}

/// Sequence bounds of a stream at the time of the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamState {
    pub messages: u64,
    pub bytes: u64,
    /// First retained sequence; `last_seq + 1` when the stream is empty.
    pub first_seq: u64,
    pub last_seq: u64,
    pub consumer_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub config: StreamConfig,
    pub state: StreamState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_id: String,
    pub cluster: String,
    pub version: String,
}

/// Acknowledgement of a stored publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubAck {
    pub stream: String,
    pub sequence: u64,
}

/// A message as stored in a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub sequence: u64,
    pub published: SystemTime,
}

/// Where a new cursor begins delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Broker default: everything retained that matches the filter.
    #[default]
    Default,
    /// Only messages stored after the cursor is created.
    NewOnly,
    /// The first matching message at or after this sequence.
    Sequence(u64),
    /// The last matching message currently stored.
    Latest,
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPosition::Default => write!(f, "default"),
            StartPosition::NewOnly => write!(f, "new"),
            StartPosition::Sequence(seq) => write!(f, "seq {seq}"),
            StartPosition::Latest => write!(f, "latest"),
        }
    }
}

/// Broker-side identity of a pull cursor (a consumer, in broker terms).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorId {
    pub stream: String,
    pub name: String,
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stream, self.name)
    }
}

/// Returned when a cursor is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorInfo {
    pub id: CursorId,
    /// Stream sequence the cursor counts as already delivered.
    pub delivered: u64,
}

/// Delivery state of one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub stream: String,
    pub name: String,
    pub filter: String,
    /// Stream sequence of the last acknowledged message.
    pub delivered: u64,
    /// Delivered but not yet acknowledged.
    pub ack_pending: u64,
    /// Matching messages still waiting to be delivered.
    pub num_pending: u64,
}

/// Client surface of the broker used by the console.
///
/// Calls are blocking; `fetch` waits at most `max_wait`.
pub trait Broker: Send + Sync {
    fn server_info(&self) -> ServerInfo;

    fn stream_names(&self) -> Result<Vec<String>, BrokerError>;

    fn stream_info(&self, stream: &str) -> Result<StreamInfo, BrokerError>;

    fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo, BrokerError>;

    fn delete_stream(&self, stream: &str) -> Result<(), BrokerError>;

    fn publish(&self, subject: &str, payload: &[u8]) -> Result<PubAck, BrokerError>;

    /// Create an ephemeral filtered pull cursor on `stream`.
    fn create_cursor(
        &self,
        stream: &str,
        filter: &str,
        start: StartPosition,
    ) -> Result<CursorInfo, BrokerError>;

    /// Request exactly one message. `Ok(None)` when nothing arrived in time.
    fn fetch(
        &self,
        cursor: &CursorId,
        max_wait: Duration,
    ) -> Result<Option<StoredMessage>, BrokerError>;

    fn ack(&self, cursor: &CursorId, sequence: u64) -> Result<(), BrokerError>;

    fn delete_cursor(&self, cursor: &CursorId) -> Result<(), BrokerError>;

    fn consumer_names(&self, stream: &str) -> Result<Vec<String>, BrokerError>;

    fn consumer_info(&self, stream: &str, name: &str) -> Result<ConsumerInfo, BrokerError>;

    fn delete_consumer(&self, stream: &str, name: &str) -> Result<(), BrokerError>;
}
