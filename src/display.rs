use std::sync::{Arc, Mutex};

use futures::channel::mpsc::UnboundedSender;

use crate::events::UiEvent;

/// Passive text surface. The engine only ever writes to it.
pub trait DisplaySink: Send {
    fn write(&mut self, bytes: &[u8]);
    fn scroll_to_end(&mut self);
}

/// A sink shared between the UI and at most one tail loop at a time.
pub type SharedSink = Arc<Mutex<dyn DisplaySink>>;

pub fn shared<S: DisplaySink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Forwards writes to the UI thread as events.
pub struct ChannelSink {
    tx: UnboundedSender<UiEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }
}

impl DisplaySink for ChannelSink {
    fn write(&mut self, bytes: &[u8]) {
        // UI gone: nothing left to draw on
        let _ = self.tx.unbounded_send(UiEvent::Display(bytes.to_vec()));
    }

    fn scroll_to_end(&mut self) {
        let _ = self.tx.unbounded_send(UiEvent::ScrollToEnd);
    }
}

/// In-memory sink; clones share the buffer.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct BufferSink {
    bytes: Arc<Mutex<Vec<u8>>>,
    scrolls: Arc<Mutex<usize>>,
}

#[cfg(test)]
impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }

    pub fn scrolls(&self) -> usize {
        *self.scrolls.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
impl DisplaySink for BufferSink {
    fn write(&mut self, bytes: &[u8]) {
        self.bytes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    fn scroll_to_end(&mut self) {
        *self.scrolls.lock().unwrap_or_else(std::sync::PoisonError::into_inner) += 1;
    }
}
