//! Filtered, revocable cursor over one stream.
//!
//! Holds at most one broker-side cursor at a time. Replacement and
//! revocation bump an epoch under the state lock; a fetch runs outside the
//! lock and its result is dropped as [`Step::Stale`] when the epoch moved
//! while it was in flight. Fetches themselves are serialized so at most one
//! message is ever unacknowledged.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::broker::{BrokerError, BrokerHandle, CursorId, StartPosition, StoredMessage};

pub const MATCH_ALL: &str = ">";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

/// Result of one navigation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Message(StoredMessage),
    /// Retention removed the current message and everything before it
    /// while stepping back; the oldest remaining match was delivered
    /// instead. `first_seq` is always above the previous position.
    Trimmed {
        message: StoredMessage,
        first_seq: u64,
    },
    /// Already at a boundary; no fetch was issued.
    Empty(Boundary),
    /// The fetch timed out without a matching message.
    NoMessages,
    /// The cursor was replaced while the fetch was in flight.
    Stale,
}

struct Live {
    id: CursorId,
    filter: String,
    delivered: u64,
}

#[derive(Default)]
struct State {
    live: Option<Live>,
    epoch: u64,
}

enum Landed {
    Stale,
    Nothing,
    Got(StoredMessage),
}

pub struct MessageCursor {
    broker: BrokerHandle,
    fetch_wait: Duration,
    state: Mutex<State>,
    fetching: Mutex<()>,
}

impl MessageCursor {
    pub fn new(broker: BrokerHandle, fetch_wait: Duration) -> Self {
        Self {
            broker,
            fetch_wait,
            state: Mutex::new(State::default()),
            fetching: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn is_live(&self) -> bool {
        self.lock().live.is_some()
    }

    #[cfg(test)]
    pub fn filter(&self) -> Option<String> {
        self.lock().live.as_ref().map(|l| l.filter.clone())
    }

    /// Stream sequence of the last acknowledged message.
    #[cfg(test)]
    pub fn delivered(&self) -> Option<u64> {
        self.lock().live.as_ref().map(|l| l.delivered)
    }

    /// Revoke the current broker cursor (if any) and create a new one.
    /// On failure the cursor is left revoked.
    pub fn anchor(
        &self,
        stream: &str,
        filter: &str,
        start: StartPosition,
    ) -> Result<u64, BrokerError> {
        let mut state = self.lock();
        self.replace(&mut state, stream, filter, start)?;
        Ok(state.live.as_ref().map_or(0, |l| l.delivered))
    }

    /// Idempotent.
    pub fn revoke(&self) -> Result<(), BrokerError> {
        let mut state = self.lock();
        self.release(&mut state)
    }

    /// Deliver the next matching message.
    pub fn next(&self) -> Result<Step, BrokerError> {
        let _serial = self.fetching.lock().unwrap_or_else(PoisonError::into_inner);

        let (id, epoch) = {
            let mut state = self.lock();
            let live = state.live.as_ref().ok_or_else(no_cursor)?;
            let (id, delivered) = (live.id.clone(), live.delivered);
            let info = match self.broker.stream_info(&id.stream) {
                Ok(info) => info,
                Err(e) => return Err(self.fail(&mut state, e)),
            };
            if delivered >= info.state.last_seq {
                return Ok(Step::Empty(Boundary::End));
            }
            (id, state.epoch)
        };

        debug!(cursor = %id, "fetching next");
        let fetched = self.broker.fetch(&id, self.fetch_wait);
        match self.settle(epoch, fetched)? {
            Landed::Stale => Ok(Step::Stale),
            Landed::Nothing => Ok(Step::NoMessages),
            Landed::Got(msg) => Ok(Step::Message(msg)),
        }
    }

    /// Deliver the closest earlier matching message by re-anchoring below
    /// the current one. Walks back one sequence per anchor while the filter
    /// skips the sequences in between.
    pub fn previous(&self) -> Result<Step, BrokerError> {
        let _serial = self.fetching.lock().unwrap_or_else(PoisonError::into_inner);

        let mut state = self.lock();
        let live = state.live.as_ref().ok_or_else(no_cursor)?;
        let stream = live.id.stream.clone();
        let filter = live.filter.clone();
        let current = live.delivered;

        let first = match self.broker.stream_info(&stream) {
            Ok(info) => info.state.first_seq,
            Err(e) => return Err(self.fail(&mut state, e)),
        };
        if current <= first {
            return Ok(Step::Empty(Boundary::Start));
        }

        let mut target = current - 1;
        loop {
            let id = self.replace(&mut state, &stream, &filter, StartPosition::Sequence(target))?;
            let epoch = state.epoch;
            drop(state);

            debug!(cursor = %id, target, "fetching previous");
            let fetched = self.broker.fetch(&id, self.fetch_wait);
            let msg = match self.settle(epoch, fetched)? {
                Landed::Stale => return Ok(Step::Stale),
                Landed::Nothing => return Ok(Step::NoMessages),
                Landed::Got(msg) => msg,
            };
            if msg.sequence < current {
                return Ok(Step::Message(msg));
            }

            state = self.lock();
            if state.epoch != epoch {
                return Ok(Step::Stale);
            }
            let first = match self.broker.stream_info(&stream) {
                Ok(info) => info.state.first_seq,
                Err(e) => return Err(self.fail(&mut state, e)),
            };
            if msg.sequence > current && first > current {
                warn!(
                    stream = %stream,
                    current,
                    landed = msg.sequence,
                    first,
                    "current message trimmed while stepping back"
                );
                return Ok(Step::Trimmed {
                    message: msg,
                    first_seq: first,
                });
            }
            // nothing in [target, current) matches the filter
            if target <= first {
                if msg.sequence != current {
                    // the current message is gone; park just after it again
                    self.replace(
                        &mut state,
                        &stream,
                        &filter,
                        StartPosition::Sequence(current + 1),
                    )?;
                }
                return Ok(Step::Empty(Boundary::Start));
            }
            target -= 1;
        }
    }

    /// Delete the live cursor then create a replacement. Called with the
    /// state lock held so two replacements never overlap.
    fn replace(
        &self,
        state: &mut State,
        stream: &str,
        filter: &str,
        start: StartPosition,
    ) -> Result<CursorId, BrokerError> {
        self.release(state)?;
        let info = self.broker.create_cursor(stream, filter, start)?;
        debug!(cursor = %info.id, filter, %start, delivered = info.delivered, "anchored");
        state.live = Some(Live {
            id: info.id.clone(),
            filter: filter.to_string(),
            delivered: info.delivered,
        });
        Ok(info.id)
    }

    fn release(&self, state: &mut State) -> Result<(), BrokerError> {
        let Some(live) = state.live.take() else {
            return Ok(());
        };
        state.epoch += 1;
        match self.broker.delete_cursor(&live.id) {
            Ok(()) | Err(BrokerError::CursorNotFound(_)) | Err(BrokerError::StreamNotFound(_)) => {
                debug!(cursor = %live.id, "revoked");
                Ok(())
            }
            Err(e) => {
                warn!(cursor = %live.id, error = %e, "revoke failed");
                state.live = Some(live);
                Err(e)
            }
        }
    }

    /// Apply a finished fetch unless the cursor moved on meanwhile.
    fn settle(
        &self,
        epoch: u64,
        fetched: Result<Option<StoredMessage>, BrokerError>,
    ) -> Result<Landed, BrokerError> {
        let mut state = self.lock();
        if state.epoch != epoch {
            debug!("discarding stale fetch");
            return Ok(Landed::Stale);
        }
        let msg = match fetched {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(Landed::Nothing),
            Err(e) => return Err(self.fail(&mut state, e)),
        };
        let Some(live) = state.live.as_mut() else {
            return Ok(Landed::Stale);
        };
        let id = live.id.clone();
        if let Err(e) = self.broker.ack(&id, msg.sequence) {
            return Err(self.fail(&mut state, e));
        }
        if let Some(live) = state.live.as_mut() {
            live.delivered = msg.sequence;
        }
        Ok(Landed::Got(msg))
    }

    /// Resource errors drop local state back to "no cursor".
    fn fail(&self, state: &mut State, err: BrokerError) -> BrokerError {
        if err.is_resource() {
            if let Some(live) = state.live.take() {
                state.epoch += 1;
                warn!(cursor = %live.id, error = %err, "cursor reset");
            }
        }
        err
    }
}

impl Drop for MessageCursor {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = state.live.take() {
            let _ = self.broker.delete_cursor(&live.id);
        }
    }
}

fn no_cursor() -> BrokerError {
    BrokerError::CursorNotFound("no cursor is open".to_string())
}
