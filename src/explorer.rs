//! Live message explorer for one stream.
//!
//! Every outcome lands in the activity log (which the tail shows) and, when
//! the operator should see it in the status line, comes back as a [`Notice`].
//! [`ExplorerHandle`] runs an explorer on its own thread so the UI thread
//! never waits on a fetch.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::activity_log::ActivityLog;
use crate::broker::{BrokerError, BrokerHandle, StartPosition};
use crate::cursor::{Boundary, MATCH_ALL, MessageCursor, Step};
use crate::notice::Notice;
use crate::session::Session;
use crate::subject::{is_valid_subject, subjects_collide, validate_publish};

struct View {
    stream: String,
    filter: String,
    /// Subject patterns the stream declared when the view opened.
    subjects: Vec<String>,
}

pub struct Explorer {
    broker: BrokerHandle,
    log: ActivityLog,
    cursor: MessageCursor,
    view: Option<View>,
}

impl Explorer {
    pub fn new(session: &Session, fetch_wait: Duration) -> Self {
        let broker = session.broker().clone();
        Self {
            cursor: MessageCursor::new(broker.clone(), fetch_wait),
            broker,
            log: session.log().clone(),
            view: None,
        }
    }

    #[cfg(test)]
    pub fn stream(&self) -> Option<&str> {
        self.view.as_ref().map(|v| v.stream.as_str())
    }

    #[cfg(test)]
    pub fn filter(&self) -> Option<&str> {
        self.view.as_ref().map(|v| v.filter.as_str())
    }

    #[cfg(test)]
    pub fn cursor(&self) -> &MessageCursor {
        &self.cursor
    }

    /// Open `stream` with `filter` (match-all when empty), positioned before
    /// the first retained message.
    pub fn open(&mut self, stream: &str, filter: &str) -> Option<Notice> {
        self.close_quietly();
        let info = match self.broker.stream_info(stream) {
            Ok(info) => info,
            Err(e) => return self.report(Notice::error(format!("Failed to open {stream}: {e}"))),
        };
        let filter = normalize_filter(filter);
        let subjects = info.config.subjects;
        if let Some(rejected) = check_filter(&subjects, &filter) {
            return self.report(rejected);
        }
        if let Err(e) = self.cursor.anchor(stream, &filter, StartPosition::Default) {
            return self.report(Notice::error(format!("Failed to create consumer: {e}")));
        }
        info!(stream, filter = %filter, "explorer opened");
        self.view = Some(View {
            stream: stream.to_string(),
            filter: filter.clone(),
            subjects,
        });
        self.report(Notice::info(format!(
            "Exploring {stream} ({} messages) with filter {filter}",
            info.state.messages
        )))
    }

    pub fn close(&mut self) -> Option<Notice> {
        let stream = self.view.as_ref()?.stream.clone();
        self.close_quietly();
        self.report(Notice::info(format!("Closed {stream}")))
    }

    fn close_quietly(&mut self) {
        if self.view.take().is_some() {
            if let Err(e) = self.cursor.revoke() {
                warn!(error = %e, "revoke on close failed");
            }
        }
    }

    /// Replace the cursor with one for `pattern`. A pattern the stream can
    /// never match is rejected without touching the current cursor.
    pub fn set_filter(&mut self, pattern: &str) -> Option<Notice> {
        let Some(view) = &self.view else {
            return Some(no_view());
        };
        let filter = normalize_filter(pattern);
        if let Some(rejected) = check_filter(&view.subjects, &filter) {
            return self.report(rejected);
        }
        let stream = view.stream.clone();
        match self.cursor.anchor(&stream, &filter, StartPosition::Default) {
            Ok(_) => {
                if let Some(view) = self.view.as_mut() {
                    view.filter = filter.clone();
                }
                debug!(stream = %stream, filter = %filter, "filter changed");
                self.report(Notice::info(format!("Filter set to {filter}")))
            }
            Err(e) => self.broker_failure("Failed to create consumer", e),
        }
    }

    pub fn forward(&mut self) -> Option<Notice> {
        if self.view.is_none() {
            return Some(no_view());
        }
        self.note("→ Fetching next message");
        let step = self.cursor.next();
        self.land(step)
    }

    pub fn backward(&mut self) -> Option<Notice> {
        if self.view.is_none() {
            return Some(no_view());
        }
        self.note("← Fetching previous message");
        let step = self.cursor.previous();
        self.land(step)
    }

    /// Check the publish against the stream subjects, publish, then
    /// re-anchor at the latest message and step forward onto it.
    pub fn publish(&mut self, subject: &str, body: &str) -> Option<Notice> {
        let Some(view) = &self.view else {
            return Some(no_view());
        };
        if let Err(rejection) = validate_publish(&view.subjects, subject, body) {
            debug!(subject, reason = %rejection, "publish rejected");
            return self.report(Notice::warn(rejection.to_string()));
        }
        let (stream, filter) = (view.stream.clone(), view.filter.clone());

        let ack = match self.broker.publish(subject, body.as_bytes()) {
            Ok(ack) => ack,
            Err(e) => return self.broker_failure("Failed to publish message", e),
        };
        self.note(&format!("PUB[{subject}] {body}"));
        info!(subject, stream = %ack.stream, seq = ack.sequence, "published");

        if let Err(e) = self.cursor.anchor(&stream, &filter, StartPosition::Latest) {
            return self.broker_failure("Failed to create consumer", e);
        }
        let step = self.cursor.next();
        self.land(step).or_else(|| {
            Some(Notice::info(format!(
                "Published to {subject} (seq {})",
                ack.sequence
            )))
        })
    }

    fn land(&mut self, step: Result<Step, BrokerError>) -> Option<Notice> {
        match step {
            Ok(Step::Message(msg)) => {
                if let Err(e) = self.log.message(&msg) {
                    warn!(error = %e, "activity log write failed");
                    return Some(Notice::error(format!("Failed to write activity log: {e}")));
                }
                None
            }
            Ok(Step::Trimmed { message, first_seq }) => {
                if let Err(e) = self.log.message(&message) {
                    warn!(error = %e, "activity log write failed");
                }
                self.report(Notice::warn(format!(
                    "Messages before sequence {first_seq} were removed; showing sequence {}",
                    message.sequence
                )))
            }
            Ok(Step::Empty(Boundary::End)) => {
                self.report(Notice::info("Already at the end of the stream"))
            }
            Ok(Step::Empty(Boundary::Start)) => {
                self.report(Notice::info("Already at the beginning of the stream"))
            }
            Ok(Step::NoMessages) => {
                self.report(Notice::info("No more messages available currently"))
            }
            Ok(Step::Stale) => None,
            Err(e) => self.broker_failure("Failed to fetch message", e),
        }
    }

    fn broker_failure(&mut self, what: &str, err: BrokerError) -> Option<Notice> {
        if err.is_resource() {
            // cursor already dropped its state; the view goes with it
            self.close_quietly();
        }
        self.report(Notice::error(format!("{what}: {err}")))
    }

    fn note(&self, text: &str) {
        if let Err(e) = self.log.note(text) {
            warn!(error = %e, "activity log write failed");
        }
    }

    fn report(&self, notice: Notice) -> Option<Notice> {
        self.note(&notice.to_string());
        Some(notice)
    }
}

fn normalize_filter(pattern: &str) -> String {
    match pattern.trim() {
        "" => MATCH_ALL.to_string(),
        p => p.to_string(),
    }
}

fn check_filter(stream_subjects: &[String], filter: &str) -> Option<Notice> {
    if !is_valid_subject(filter) {
        return Some(Notice::warn(format!("Invalid filter subject '{filter}'")));
    }
    if !stream_subjects.iter().any(|s| subjects_collide(s, filter)) {
        return Some(Notice::warn(format!(
            "Filter {filter} matches none of {}",
            stream_subjects.join(", ")
        )));
    }
    None
}

fn no_view() -> Notice {
    Notice::info("No stream is open")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorerCommand {
    Open { stream: String, filter: String },
    Close,
    SetFilter(String),
    Forward,
    Backward,
    Publish { subject: String, body: String },
}

/// Runs an [`Explorer`] on a worker thread, one command at a time.
pub struct ExplorerHandle {
    tx: Option<mpsc::Sender<ExplorerCommand>>,
    thread: Option<JoinHandle<()>>,
}

impl ExplorerHandle {
    /// `report` is called on the worker thread with every notice.
    pub fn spawn(
        session: &Session,
        fetch_wait: Duration,
        report: impl Fn(Notice) + Send + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<ExplorerCommand>();
        let mut explorer = Explorer::new(session, fetch_wait);
        let thread = thread::spawn(move || {
            for cmd in rx {
                debug!(?cmd, "explorer command");
                let notice = match cmd {
                    ExplorerCommand::Open { stream, filter } => explorer.open(&stream, &filter),
                    ExplorerCommand::Close => explorer.close(),
                    ExplorerCommand::SetFilter(pattern) => explorer.set_filter(&pattern),
                    ExplorerCommand::Forward => explorer.forward(),
                    ExplorerCommand::Backward => explorer.backward(),
                    ExplorerCommand::Publish { subject, body } => {
                        explorer.publish(&subject, &body)
                    }
                };
                if let Some(notice) = notice {
                    report(notice);
                }
            }
            explorer.close_quietly();
            debug!("explorer worker stopped");
        });
        Self {
            tx: Some(tx),
            thread: Some(thread),
        }
    }

    /// Queue a command. Returns false once the worker is gone.
    pub fn send(&self, cmd: ExplorerCommand) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(cmd).is_ok())
    }

    /// Finish queued commands, revoke the cursor and wait for the worker.
    #[cfg(test)]
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Like [`shutdown`](Self::shutdown) without waiting; the worker wraps
    /// up on its own thread.
    pub fn detach(mut self) {
        self.tx.take();
        self.thread.take();
    }

    fn stop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ExplorerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
