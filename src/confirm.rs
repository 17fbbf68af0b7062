//! Two-step confirmation for destructive list actions.
//!
//! The first request for a target arms it; a second request for the same
//! target inside the window executes. Each arm starts its own timer thread
//! tagged with a generation number, and re-arming cancels the previous
//! timer, so a late timer can never reset a newer arm.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cancel::CancelToken;

pub const CONFIRM_WINDOW: Duration = Duration::from_secs(10);

/// What to delete from the list views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Stream(String),
    Consumer { stream: String, name: String },
}

impl fmt::Display for DeleteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteTarget::Stream(name) => write!(f, "stream {name}"),
            DeleteTarget::Consumer { stream, name } => write!(f, "consumer {stream}/{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    /// Confirmed; the caller performs the deletion now.
    Execute(T),
    /// First request; nothing happened yet.
    Armed { target: T, window: Duration },
}

struct Armed<T> {
    target: T,
    deadline: Instant,
    generation: u64,
    timer: CancelToken,
}

struct Inner<T> {
    armed: Option<Armed<T>>,
    generation: u64,
}

type TimeoutHook<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct DeleteConfirmation<T> {
    inner: Arc<Mutex<Inner<T>>>,
    window: Duration,
    on_timeout: TimeoutHook<T>,
}

impl<T> DeleteConfirmation<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// `on_timeout` runs on the timer thread with the target that expired.
    pub fn new(window: Duration, on_timeout: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                armed: None,
                generation: 0,
            })),
            window,
            on_timeout: Arc::new(on_timeout),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn armed_target(&self) -> Option<T> {
        self.lock().armed.as_ref().map(|a| a.target.clone())
    }

    pub fn request(&self, target: T) -> Decision<T> {
        let mut inner = self.lock();
        let now = Instant::now();

        if let Some(armed) = inner.armed.take() {
            armed.timer.cancel();
            if armed.target == target && now < armed.deadline {
                debug!(generation = armed.generation, "delete confirmed");
                return Decision::Execute(target);
            }
        }

        inner.generation += 1;
        let generation = inner.generation;
        let timer = CancelToken::new();
        inner.armed = Some(Armed {
            target: target.clone(),
            deadline: now + self.window,
            generation,
            timer: timer.clone(),
        });
        drop(inner);

        self.spawn_timer(generation, timer);
        debug!(generation, "delete armed");
        Decision::Armed {
            target,
            window: self.window,
        }
    }

    /// Forget any armed target without executing it.
    pub fn disarm(&self) {
        if let Some(armed) = self.lock().armed.take() {
            armed.timer.cancel();
        }
    }

    fn spawn_timer(&self, generation: u64, timer: CancelToken) {
        let inner = self.inner.clone();
        let hook = self.on_timeout.clone();
        let window = self.window;
        thread::spawn(move || {
            if timer.wait_timeout(window) {
                return;
            }
            let expired = {
                let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
                if inner.armed.as_ref().map(|a| a.generation) == Some(generation) {
                    inner.armed.take().map(|a| a.target)
                } else {
                    None
                }
            };
            if let Some(target) = expired {
                debug!(generation, "delete confirmation timed out");
                hook(target);
            }
        });
    }
}

impl<T> Drop for DeleteConfirmation<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(armed) = inner.armed.take() {
            armed.timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const WINDOW: Duration = Duration::from_millis(200);

    fn confirmation() -> (DeleteConfirmation<String>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let confirm = DeleteConfirmation::new(WINDOW, move |target| {
            let _ = tx.lock().unwrap().send(target);
        });
        (confirm, rx)
    }

    #[test]
    fn double_request_executes() {
        let (confirm, rx) = confirmation();
        assert!(matches!(
            confirm.request("orders".to_string()),
            Decision::Armed { .. }
        ));
        assert_eq!(
            confirm.request("orders".to_string()),
            Decision::Execute("orders".to_string())
        );
        assert_eq!(confirm.armed_target(), None);
        assert!(rx.recv_timeout(WINDOW * 3).is_err());
    }

    #[test]
    fn request_after_window_only_arms() {
        let (confirm, rx) = confirmation();
        confirm.request("orders".to_string());
        assert_eq!(rx.recv_timeout(WINDOW * 5).unwrap(), "orders");
        assert_eq!(confirm.armed_target(), None);
        assert!(matches!(
            confirm.request("orders".to_string()),
            Decision::Armed { .. }
        ));
    }

    #[test]
    fn other_target_replaces_armed_one() {
        let (confirm, rx) = confirmation();
        confirm.request("x".to_string());
        let decision = confirm.request("y".to_string());
        assert_eq!(
            decision,
            Decision::Armed {
                target: "y".to_string(),
                window: WINDOW
            }
        );
        assert_eq!(confirm.armed_target().as_deref(), Some("y"));
        // only y's timer may fire
        assert_eq!(rx.recv_timeout(WINDOW * 5).unwrap(), "y");
        assert!(rx.recv_timeout(WINDOW * 2).is_err());
    }

    #[test]
    fn stale_timer_does_not_reset_newer_arm() {
        let (confirm, rx) = confirmation();
        confirm.request("x".to_string());
        thread::sleep(WINDOW / 2);
        confirm.request("y".to_string());
        thread::sleep(WINDOW * 3 / 4);
        // x's deadline has passed; y must still be armed
        assert_eq!(confirm.armed_target().as_deref(), Some("y"));
        assert_eq!(
            confirm.request("y".to_string()),
            Decision::Execute("y".to_string())
        );
        assert!(rx.recv_timeout(WINDOW * 2).is_err());
    }

    #[test]
    fn disarm_cancels_timer() {
        let (confirm, rx) = confirmation();
        confirm.request("x".to_string());
        confirm.disarm();
        assert_eq!(confirm.armed_target(), None);
        assert!(rx.recv_timeout(WINDOW * 3).is_err());
    }

    #[test]
    fn targets_display() {
        assert_eq!(DeleteTarget::Stream("orders".into()).to_string(), "stream orders");
        assert_eq!(
            DeleteTarget::Consumer {
                stream: "orders".into(),
                name: "c1".into()
            }
            .to_string(),
            "consumer orders/c1"
        );
    }
}
