//! In-process broker with stream storage and filtered pull cursors.
//!
//! Serves `memory://` profiles and the demo mode, and backs the engine tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info};

use super::{
    Broker, BrokerError, ConsumerInfo, CursorId, CursorInfo, DiscardPolicy, PubAck, ServerInfo, StartPosition,
    StoredMessage, StreamConfig, StreamInfo, StreamState,
};
use crate::subject::{is_literal, is_valid_subject, subject_matches, subjects_collide};

struct CursorData {
    filter: String,
    next_seq: u64,
    delivered: u64,
    /// Sequence handed out by `fetch` and not yet acknowledged.
    pending: Option<u64>,
}

struct StreamData {
    config: StreamConfig,
    messages: VecDeque<StoredMessage>,
    last_seq: u64,
    bytes: u64,
    cursors: BTreeMap<String, CursorData>,
}

impl StreamData {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            last_seq: 0,
            bytes: 0,
            cursors: BTreeMap::new(),
        }
    }

    fn first_seq(&self) -> u64 {
        self.messages
            .front()
            .map_or(self.last_seq + 1, |m| m.sequence)
    }

    fn state(&self) -> StreamState {
        StreamState {
            messages: self.messages.len() as u64,
            bytes: self.bytes,
            first_seq: self.first_seq(),
            last_seq: self.last_seq,
            consumer_count: self.cursors.len(),
        }
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            config: self.config.clone(),
            state: self.state(),
        }
    }

    fn pop_oldest(&mut self) {
        if let Some(old) = self.messages.pop_front() {
            self.bytes = self.bytes.saturating_sub(old.payload.len() as u64);
        }
    }

    fn expire(&mut self) {
        let Some(max_age) = self.config.max_age else {
            return;
        };
        while let Some(front) = self.messages.front() {
            let age = front.published.elapsed().unwrap_or(Duration::ZERO);
            if age <= max_age {
                break;
            }
            self.pop_oldest();
        }
    }

    fn over_limits(&self, incoming_subject: &str, incoming_len: u64) -> bool {
        let cfg = &self.config;
        if cfg.max_msgs >= 0 && (self.messages.len() as i64) + 1 > cfg.max_msgs {
            return true;
        }
        if cfg.max_bytes >= 0 && (self.bytes + incoming_len) as i64 > cfg.max_bytes {
            return true;
        }
        if cfg.max_msgs_per_subject >= 0 {
            let same = self
                .messages
                .iter()
                .filter(|m| m.subject == incoming_subject)
                .count() as i64;
            if same + 1 > cfg.max_msgs_per_subject {
                return true;
            }
        }
        false
    }

    /// Drop the oldest messages until the incoming one fits.
    fn make_room(&mut self, incoming_subject: &str, incoming_len: u64) {
        while !self.messages.is_empty() && self.over_limits(incoming_subject, incoming_len) {
            if self.config.max_msgs_per_subject >= 0 {
                let same = self
                    .messages
                    .iter()
                    .filter(|m| m.subject == incoming_subject)
                    .count() as i64;
                if same + 1 > self.config.max_msgs_per_subject {
                    if let Some(pos) = self
                        .messages
                        .iter()
                        .position(|m| m.subject == incoming_subject)
                    {
                        if let Some(old) = self.messages.remove(pos) {
                            self.bytes = self.bytes.saturating_sub(old.payload.len() as u64);
                        }
                        continue;
                    }
                }
            }
            self.pop_oldest();
        }
    }
}

#[derive(Default)]
struct Inner {
    streams: BTreeMap<String, StreamData>,
    cursor_counter: u64,
    live_cursors: usize,
    peak_cursors: usize,
}

/// A broker that keeps every stream in process memory.
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    arrived: Condvar,
    server: ServerInfo,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            arrived: Condvar::new(),
            server: ServerInfo {
                server_id: "MEMORY".to_string(),
                cluster: "local".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cursors currently alive across all streams.
    #[cfg(test)]
    pub fn live_cursors(&self) -> usize {
        self.lock().live_cursors
    }

    /// Highest number of simultaneously alive cursors ever observed.
    #[cfg(test)]
    pub fn peak_cursors(&self) -> usize {
        self.lock().peak_cursors
    }

    /// Drop every message with a sequence below `seq`, as retention would.
    #[cfg(test)]
    pub fn trim_before(&self, stream: &str, seq: u64) -> Result<(), BrokerError> {
        let mut inner = self.lock();
        let data = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        while data.messages.front().is_some_and(|m| m.sequence < seq) {
            data.pop_oldest();
        }
        Ok(())
    }
}

fn validate_stream_config(config: &mut StreamConfig) -> Result<(), BrokerError> {
    if config.name.is_empty()
        || config
            .name
            .chars()
            .any(|c| matches!(c, '.' | '*' | '>' | ' ' | '/' | '\\'))
    {
        return Err(BrokerError::InvalidConfig(format!(
            "invalid stream name '{}'",
            config.name
        )));
    }
    if config.subjects.is_empty() {
        config.subjects = vec![config.name.clone()];
    }
    if let Some(bad) = config.subjects.iter().find(|s| !is_valid_subject(s)) {
        return Err(BrokerError::InvalidConfig(format!("invalid subject '{bad}'")));
    }
    if config.replicas == 0 {
        config.replicas = 1;
    }
    Ok(())
}

impl Broker for MemoryBroker {
    fn server_info(&self) -> ServerInfo {
        self.server.clone()
    }

    fn stream_names(&self) -> Result<Vec<String>, BrokerError> {
        Ok(self.lock().streams.keys().cloned().collect())
    }

    fn stream_info(&self, stream: &str) -> Result<StreamInfo, BrokerError> {
        let mut inner = self.lock();
        let data = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        data.expire();
        Ok(data.info())
    }

    fn add_stream(&self, mut config: StreamConfig) -> Result<StreamInfo, BrokerError> {
        validate_stream_config(&mut config)?;
        let mut inner = self.lock();
        if inner.streams.contains_key(&config.name) {
            return Err(BrokerError::StreamExists(config.name));
        }
        for (name, other) in &inner.streams {
            let overlap = config.subjects.iter().any(|s| {
                other
                    .config
                    .subjects
                    .iter()
                    .any(|o| subjects_collide(s, o))
            });
            if overlap {
                return Err(BrokerError::InvalidConfig(format!(
                    "subjects overlap with stream {name}"
                )));
            }
        }
        info!(stream = %config.name, subjects = ?config.subjects, "stream added");
        let data = StreamData::new(config);
        let stream_info = data.info();
        inner.streams.insert(stream_info.config.name.clone(), data);
        Ok(stream_info)
    }

    fn delete_stream(&self, stream: &str) -> Result<(), BrokerError> {
        let mut inner = self.lock();
        let data = inner
            .streams
            .remove(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        inner.live_cursors = inner.live_cursors.saturating_sub(data.cursors.len());
        info!(stream, "stream deleted");
        self.arrived.notify_all();
        Ok(())
    }

    fn publish(&self, subject: &str, payload: &[u8]) -> Result<PubAck, BrokerError> {
        if !is_valid_subject(subject) || !is_literal(subject) {
            return Err(BrokerError::InvalidSubject(subject.to_string()));
        }
        let mut inner = self.lock();
        let data = inner
            .streams
            .values_mut()
            .find(|d| d.config.subjects.iter().any(|p| subject_matches(p, subject)))
            .ok_or_else(|| BrokerError::NoStreamForSubject(subject.to_string()))?;

        if data.config.max_msg_size >= 0
            && (payload.len() as i64) > i64::from(data.config.max_msg_size)
        {
            return Err(BrokerError::InvalidConfig(format!(
                "message size {} exceeds maximum {}",
                payload.len(),
                data.config.max_msg_size
            )));
        }

        data.expire();
        let len = payload.len() as u64;
        if data.over_limits(subject, len) {
            match data.config.discard {
                DiscardPolicy::New => return Err(BrokerError::StreamFull(data.config.name.clone())),
                DiscardPolicy::Old => data.make_room(subject, len),
            }
        }

        data.last_seq += 1;
        data.bytes += len;
        data.messages.push_back(StoredMessage {
            subject: subject.to_string(),
            payload: payload.to_vec(),
            sequence: data.last_seq,
            published: SystemTime::now(),
        });
        let ack = PubAck {
            stream: data.config.name.clone(),
            sequence: data.last_seq,
        };
        debug!(subject, stream = %ack.stream, seq = ack.sequence, "stored");
        self.arrived.notify_all();
        Ok(ack)
    }

    fn create_cursor(
        &self,
        stream: &str,
        filter: &str,
        start: StartPosition,
    ) -> Result<CursorInfo, BrokerError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let data = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;

        if !is_valid_subject(filter) {
            return Err(BrokerError::InvalidFilter {
                filter: filter.to_string(),
                reason: "malformed subject".to_string(),
            });
        }
        if !data
            .config
            .subjects
            .iter()
            .any(|s| subjects_collide(s, filter))
        {
            return Err(BrokerError::InvalidFilter {
                filter: filter.to_string(),
                reason: "not a subset of the stream subjects".to_string(),
            });
        }
        if data.config.max_consumers >= 0
            && (data.cursors.len() as i64) >= data.config.max_consumers
        {
            return Err(BrokerError::InvalidConfig(
                "maximum consumers limit reached".to_string(),
            ));
        }

        data.expire();
        let first = data.first_seq();
        let last = data.last_seq;
        let next_seq = match start {
            StartPosition::Default => first,
            StartPosition::NewOnly => last + 1,
            StartPosition::Sequence(seq) => seq.max(1),
            StartPosition::Latest => data
                .messages
                .iter()
                .rev()
                .find(|m| subject_matches(filter, &m.subject))
                .map_or(last + 1, |m| m.sequence),
        };
        let delivered = next_seq.saturating_sub(1);

        inner.cursor_counter += 1;
        let name = format!("ephemeral-{:04}", inner.cursor_counter);
        data.cursors.insert(
            name.clone(),
            CursorData {
                filter: filter.to_string(),
                next_seq,
                delivered,
                pending: None,
            },
        );
        inner.live_cursors += 1;
        inner.peak_cursors = inner.peak_cursors.max(inner.live_cursors);
        debug!(stream, filter, %start, cursor = %name, delivered, "cursor created");

        Ok(CursorInfo {
            id: CursorId {
                stream: stream.to_string(),
                name,
            },
            delivered,
        })
    }

    fn fetch(
        &self,
        cursor: &CursorId,
        max_wait: Duration,
    ) -> Result<Option<StoredMessage>, BrokerError> {
        let deadline = Instant::now() + max_wait;
        let mut inner = self.lock();
        loop {
            let data = inner
                .streams
                .get_mut(&cursor.stream)
                .ok_or_else(|| BrokerError::CursorNotFound(cursor.to_string()))?;
            data.expire();
            let StreamData {
                messages, cursors, ..
            } = data;
            let state = cursors
                .get_mut(&cursor.name)
                .ok_or_else(|| BrokerError::CursorNotFound(cursor.to_string()))?;
            if state.pending.is_some() {
                return Err(BrokerError::AckPending(cursor.to_string()));
            }
            let found = messages
                .iter()
                .find(|m| m.sequence >= state.next_seq && subject_matches(&state.filter, &m.subject));
            if let Some(msg) = found {
                state.pending = Some(msg.sequence);
                state.next_seq = msg.sequence + 1;
                return Ok(Some(msg.clone()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            inner = self
                .arrived
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn ack(&self, cursor: &CursorId, sequence: u64) -> Result<(), BrokerError> {
        let mut inner = self.lock();
        let state = inner
            .streams
            .get_mut(&cursor.stream)
            .and_then(|d| d.cursors.get_mut(&cursor.name))
            .ok_or_else(|| BrokerError::CursorNotFound(cursor.to_string()))?;
        if state.pending == Some(sequence) {
            state.pending = None;
            state.delivered = sequence;
        }
        Ok(())
    }

    fn delete_cursor(&self, cursor: &CursorId) -> Result<(), BrokerError> {
        self.delete_consumer(&cursor.stream, &cursor.name)
    }

    fn consumer_names(&self, stream: &str) -> Result<Vec<String>, BrokerError> {
        let inner = self.lock();
        let data = inner
            .streams
            .get(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        Ok(data.cursors.keys().cloned().collect())
    }

    fn consumer_info(&self, stream: &str, name: &str) -> Result<ConsumerInfo, BrokerError> {
        let mut inner = self.lock();
        let data = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound(stream.to_string()))?;
        data.expire();
        let StreamData {
            messages, cursors, ..
        } = data;
        let state = cursors
            .get(name)
            .ok_or_else(|| BrokerError::CursorNotFound(format!("{stream}/{name}")))?;
        let num_pending = messages
            .iter()
            .filter(|m| m.sequence >= state.next_seq && subject_matches(&state.filter, &m.subject))
            .count() as u64;
        Ok(ConsumerInfo {
            stream: stream.to_string(),
            name: name.to_string(),
            filter: state.filter.clone(),
            delivered: state.delivered,
            ack_pending: u64::from(state.pending.is_some()),
            num_pending,
        })
    }

    fn delete_consumer(&self, stream: &str, name: &str) -> Result<(), BrokerError> {
        let mut inner = self.lock();
        let removed = inner
            .streams
            .get_mut(stream)
            .and_then(|d| d.cursors.remove(name));
        if removed.is_none() {
            return Err(BrokerError::CursorNotFound(format!("{stream}/{name}")));
        }
        inner.live_cursors = inner.live_cursors.saturating_sub(1);
        debug!(stream, cursor = name, "cursor deleted");
        // wake fetches parked on the removed cursor
        self.arrived.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_with_orders() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker
            .add_stream(StreamConfig::new("orders", &["orders.>"]))
            .unwrap();
        broker
    }

    #[test]
    fn publish_assigns_sequences() {
        let broker = broker_with_orders();
        let a = broker.publish("orders.new", b"a").unwrap();
        let b = broker.publish("orders.new", b"b").unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        let state = broker.stream_info("orders").unwrap().state;
        assert_eq!((state.first_seq, state.last_seq, state.messages), (1, 2, 2));
    }

    #[test]
    fn empty_stream_bounds() {
        let broker = broker_with_orders();
        let state = broker.stream_info("orders").unwrap().state;
        assert_eq!(state.last_seq, 0);
        assert_eq!(state.first_seq, 1);
    }

    #[test]
    fn publish_without_stream_fails() {
        let broker = broker_with_orders();
        assert_eq!(
            broker.publish("shipping.out", b"x"),
            Err(BrokerError::NoStreamForSubject("shipping.out".into()))
        );
        assert!(matches!(
            broker.publish("orders.*", b"x"),
            Err(BrokerError::InvalidSubject(_))
        ));
    }

    #[test]
    fn max_msgs_discards_oldest() {
        let broker = MemoryBroker::new();
        let mut cfg = StreamConfig::new("events", &["events.*"]);
        cfg.max_msgs = 2;
        broker.add_stream(cfg).unwrap();
        for body in ["1", "2", "3"] {
            broker.publish("events.click", body.as_bytes()).unwrap();
        }
        let state = broker.stream_info("events").unwrap().state;
        assert_eq!((state.first_seq, state.last_seq), (2, 3));
    }

    #[test]
    fn discard_new_rejects_when_full() {
        let broker = MemoryBroker::new();
        let mut cfg = StreamConfig::new("events", &["events.*"]);
        cfg.max_msgs = 1;
        cfg.discard = DiscardPolicy::New;
        broker.add_stream(cfg).unwrap();
        broker.publish("events.click", b"1").unwrap();
        assert_eq!(
            broker.publish("events.click", b"2"),
            Err(BrokerError::StreamFull("events".into()))
        );
    }

    #[test]
    fn overlapping_streams_rejected() {
        let broker = broker_with_orders();
        let err = broker
            .add_stream(StreamConfig::new("more", &["orders.eu"]))
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfig(_)));
    }

    #[test]
    fn cursor_filters_and_acks() {
        let broker = broker_with_orders();
        broker.publish("orders.new", b"a").unwrap();
        broker.publish("orders.eu.new", b"b").unwrap();
        broker.publish("orders.paid", b"c").unwrap();

        let info = broker
            .create_cursor("orders", "orders.*", StartPosition::Default)
            .unwrap();
        assert_eq!(info.delivered, 0);

        let first = broker.fetch(&info.id, Duration::ZERO).unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(
            broker.fetch(&info.id, Duration::ZERO),
            Err(BrokerError::AckPending(info.id.to_string()))
        );
        broker.ack(&info.id, 1).unwrap();
        let second = broker.fetch(&info.id, Duration::ZERO).unwrap().unwrap();
        assert_eq!(second.subject, "orders.paid");
        broker.ack(&info.id, second.sequence).unwrap();
        assert_eq!(broker.fetch(&info.id, Duration::ZERO).unwrap(), None);
    }

    #[test]
    fn start_positions() {
        let broker = broker_with_orders();
        for body in ["1", "2", "3"] {
            broker.publish("orders.new", body.as_bytes()).unwrap();
        }
        let new_only = broker
            .create_cursor("orders", ">", StartPosition::NewOnly)
            .unwrap();
        assert_eq!(new_only.delivered, 3);
        let latest = broker
            .create_cursor("orders", ">", StartPosition::Latest)
            .unwrap();
        assert_eq!(latest.delivered, 2);
        let by_seq = broker
            .create_cursor("orders", ">", StartPosition::Sequence(2))
            .unwrap();
        let msg = broker.fetch(&by_seq.id, Duration::ZERO).unwrap().unwrap();
        assert_eq!(msg.sequence, 2);
    }

    #[test]
    fn invalid_filters_rejected() {
        let broker = broker_with_orders();
        assert!(matches!(
            broker.create_cursor("orders", "shipping.*", StartPosition::Default),
            Err(BrokerError::InvalidFilter { .. })
        ));
        assert!(matches!(
            broker.create_cursor("orders", "orders..x", StartPosition::Default),
            Err(BrokerError::InvalidFilter { .. })
        ));
        assert_eq!(
            broker.create_cursor("nope", ">", StartPosition::Default),
            Err(BrokerError::StreamNotFound("nope".into()))
        );
    }

    #[test]
    fn fetch_waits_for_new_message() {
        let broker = std::sync::Arc::new(broker_with_orders());
        let info = broker
            .create_cursor("orders", ">", StartPosition::NewOnly)
            .unwrap();
        let publisher = {
            let broker = broker.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                broker.publish("orders.new", b"late").unwrap();
            })
        };
        let msg = broker.fetch(&info.id, Duration::from_secs(2)).unwrap();
        publisher.join().unwrap();
        assert_eq!(msg.map(|m| m.payload), Some(b"late".to_vec()));
    }

    #[test]
    fn deleting_cursor_wakes_fetch() {
        let broker = std::sync::Arc::new(broker_with_orders());
        let info = broker
            .create_cursor("orders", ">", StartPosition::NewOnly)
            .unwrap();
        let fetcher = {
            let broker = broker.clone();
            let id = info.id.clone();
            std::thread::spawn(move || broker.fetch(&id, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(50));
        broker.delete_cursor(&info.id).unwrap();
        let started = Instant::now();
        let result = fetcher.join().unwrap();
        assert!(matches!(result, Err(BrokerError::CursorNotFound(_))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(broker.live_cursors(), 0);
    }

    #[test]
    fn delete_stream_releases_cursors() {
        let broker = broker_with_orders();
        broker
            .create_cursor("orders", ">", StartPosition::Default)
            .unwrap();
        assert_eq!(broker.live_cursors(), 1);
        broker.delete_stream("orders").unwrap();
        assert_eq!(broker.live_cursors(), 0);
        assert!(broker.stream_names().unwrap().is_empty());
    }

    #[test]
    fn consumer_info_tracks_delivery() {
        let broker = broker_with_orders();
        for subject in ["orders.a", "orders.b", "orders.a"] {
            broker.publish(subject, b"x").unwrap();
        }
        let info = broker
            .create_cursor("orders", "orders.a", StartPosition::Default)
            .unwrap();
        let before = broker.consumer_info("orders", &info.id.name).unwrap();
        assert_eq!(before.filter, "orders.a");
        assert_eq!((before.delivered, before.ack_pending, before.num_pending), (0, 0, 2));

        let msg = broker.fetch(&info.id, Duration::from_millis(10)).unwrap().unwrap();
        let pending = broker.consumer_info("orders", &info.id.name).unwrap();
        assert_eq!((pending.ack_pending, pending.num_pending), (1, 1));

        broker.ack(&info.id, msg.sequence).unwrap();
        let acked = broker.consumer_info("orders", &info.id.name).unwrap();
        assert_eq!((acked.delivered, acked.ack_pending), (1, 0));

        assert!(matches!(
            broker.consumer_info("orders", "nope"),
            Err(BrokerError::CursorNotFound(_))
        ));
        assert!(matches!(
            broker.consumer_info("missing", "nope"),
            Err(BrokerError::StreamNotFound(_))
        ));
    }
}
