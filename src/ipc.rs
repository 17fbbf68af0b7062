use std::io::{BufRead, BufReader};
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use futures::channel::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::events::UiEvent;

pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

pub fn socket_path() -> PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(runtime_dir).join("natsdash.sock")
}

/// Accept one command line per connection on the control socket.
pub fn spawn_socket_listener(tx: UnboundedSender<UiEvent>) {
    thread::spawn(move || {
        let path = socket_path();
        let _ = std::fs::remove_file(&path);
        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to bind control socket");
                return;
            }
        };
        info!(path = %path.display(), "listening for control commands");
        for stream in listener.incoming().flatten() {
            let mut line = String::new();
            if BufReader::new(stream).read_line(&mut line).is_ok() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                info!(command = line, "control command");
                if tx.unbounded_send(UiEvent::Input(line.to_string())).is_err() {
                    break;
                }
            }
        }
    });
}

pub fn spawn_stdin_reader(tx: UnboundedSender<UiEvent>) {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.unbounded_send(UiEvent::Input(line)).is_err() {
                return;
            }
        }
        let _ = tx.unbounded_send(UiEvent::InputClosed);
    });
}

pub fn spawn_ticker(tx: UnboundedSender<UiEvent>, interval: Duration) {
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            if tx.unbounded_send(UiEvent::Tick).is_err() {
                break;
            }
        }
    });
}
