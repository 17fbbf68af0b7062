//! Live tail of the activity log into a display sink.
//!
//! One thread per session polls the file for growth and forwards new bytes.
//! Every write to the sink happens under the sink lock after re-checking the
//! session's cancel token, and `cancel` flips the token under that same lock,
//! so once `cancel` returns the old loop can no longer reach the sink.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::display::SharedSink;

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Largest chunk forwarded to the sink in one write.
const READ_CHUNK: usize = 64 * 1024;

/// Handle to a running tail loop.
pub struct TailSession {
    path: PathBuf,
    token: CancelToken,
    sink: SharedSink,
    offset: Arc<Mutex<u64>>,
    thread: Option<JoinHandle<()>>,
}

impl TailSession {
    /// Start tailing `path` at byte `from`, or at its current end when
    /// `from` is `None`. Offsets past the end are clamped to it.
    ///
    /// A file that cannot be opened is reported once to the sink and the
    /// returned session is already finished.
    pub fn start(
        path: &Path,
        sink: SharedSink,
        poll_interval: Duration,
        from: Option<u64>,
    ) -> Self {
        let token = CancelToken::new();
        let offset = Arc::new(Mutex::new(0));

        let opened = File::open(path).and_then(|mut f| {
            let len = f.seek(SeekFrom::End(0))?;
            let start = from.map_or(len, |at| at.min(len));
            let start = f.seek(SeekFrom::Start(start))?;
            Ok((f, start))
        });

        let thread = match opened {
            Ok((file, end)) => {
                *offset.lock().unwrap_or_else(PoisonError::into_inner) = end;
                debug!(path = %path.display(), offset = end, "tail started");
                let worker = TailLoop {
                    path: path.to_path_buf(),
                    file,
                    token: token.clone(),
                    sink: sink.clone(),
                    offset: offset.clone(),
                    poll_interval,
                };
                Some(thread::spawn(move || worker.run()))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "tail could not open log");
                gated_write(
                    &sink,
                    &token,
                    format!("ERROR: cannot tail {}: {e}\n", path.display()).as_bytes(),
                );
                None
            }
        };

        Self {
            path: path.to_path_buf(),
            token,
            sink,
            offset,
            thread,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset up to which the file has been forwarded.
    pub fn offset(&self) -> u64 {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once the loop has exited (cancelled or failed).
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stop the loop. Returns without waiting for the thread; no sink write
    /// from this session happens after the call.
    pub fn cancel(&self) {
        let _guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        self.token.cancel();
    }

    /// Cancel and wait for the thread to exit.
    #[cfg(test)]
    pub fn join(mut self) {
        self.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TailSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Write unless cancelled, deciding under the sink lock.
fn gated_write(sink: &SharedSink, token: &CancelToken, bytes: &[u8]) -> bool {
    let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
    if token.is_cancelled() {
        return false;
    }
    sink.write(bytes);
    sink.scroll_to_end();
    true
}

struct TailLoop {
    path: PathBuf,
    file: File,
    token: CancelToken,
    sink: SharedSink,
    offset: Arc<Mutex<u64>>,
    poll_interval: Duration,
}

impl TailLoop {
    fn run(mut self) {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            if self.token.wait_timeout(self.poll_interval) {
                break;
            }
            match self.drain(&mut buf) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "tail read failed");
                    gated_write(
                        &self.sink,
                        &self.token,
                        format!("ERROR: reading {} failed: {e}\n", self.path.display())
                            .as_bytes(),
                    );
                    break;
                }
            }
        }
        debug!(path = %self.path.display(), "tail stopped");
    }

    /// Forward everything appended since the last offset. `Ok(false)` when
    /// cancelled mid-drain.
    fn drain(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        loop {
            let n = match self.file.read(buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                // caught up, or the writer has not flushed yet
                return Ok(true);
            }
            if !gated_write(&self.sink, &self.token, &buf[..n]) {
                return Ok(false);
            }
            *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += n as u64;
        }
    }
}

/// Keeps at most one tail per sink, replacing it when the path changes.
pub struct Tailer {
    sink: SharedSink,
    poll_interval: Duration,
    current: Option<TailSession>,
}

impl Tailer {
    pub fn new(sink: SharedSink, poll_interval: Duration) -> Self {
        Self {
            sink,
            poll_interval,
            current: None,
        }
    }

    /// Tail `path` from `from` (see [`TailSession::start`]), cancelling the
    /// previous session first. Re-targeting the path already tailed by a
    /// live session is a no-op.
    pub fn retarget(&mut self, path: &Path, from: Option<u64>) {
        if let Some(current) = &self.current {
            if current.path() == path && !current.is_finished() {
                return;
            }
            current.cancel();
        }
        self.current = Some(TailSession::start(
            path,
            self.sink.clone(),
            self.poll_interval,
            from,
        ));
    }

    pub fn stop(&mut self) {
        if let Some(current) = self.current.take() {
            current.cancel();
            debug!(
                path = %current.path().display(),
                offset = current.offset(),
                "tail released"
            );
        }
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&TailSession> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{BufferSink, shared};
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Instant;

    const FAST: Duration = Duration::from_millis(10);

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn starts_at_end_of_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.log");
        std::fs::write(&path, "history\n").unwrap();
        let buffer = BufferSink::new();
        let tail = TailSession::start(&path, shared(buffer.clone()), FAST, None);
        assert_eq!(tail.offset(), 8);

        append(&path, b"fresh\n");
        assert!(wait_for(|| buffer.text() == "fresh\n"));
        assert!(buffer.scrolls() >= 1);
        tail.join();
    }

    #[test]
    fn delivers_every_appended_byte_once() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("b.log");
        std::fs::write(&path, "").unwrap();
        let buffer = BufferSink::new();
        let tail = TailSession::start(&path, shared(buffer.clone()), FAST, None);

        let mut expected = Vec::new();
        let mut offsets = Vec::new();
        for i in 0..50 {
            let line = format!("line {i} {}\n", "x".repeat(i * 7));
            append(&path, line.as_bytes());
            expected.extend_from_slice(line.as_bytes());
            if i % 10 == 0 {
                thread::sleep(Duration::from_millis(15));
            }
            offsets.push(tail.offset());
        }
        assert!(wait_for(|| buffer.contents().len() >= expected.len()));
        assert_eq!(buffer.contents(), expected);
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(tail.offset(), expected.len() as u64);
        tail.join();
    }

    #[test]
    fn nothing_written_after_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("c.log");
        std::fs::write(&path, "").unwrap();
        let buffer = BufferSink::new();
        let tail = TailSession::start(&path, shared(buffer.clone()), FAST, None);
        append(&path, b"before\n");
        assert!(wait_for(|| buffer.text() == "before\n"));

        tail.cancel();
        append(&path, b"after\n");
        thread::sleep(FAST * 5);
        assert_eq!(buffer.text(), "before\n");
        assert!(wait_for(|| tail.is_finished()));
    }

    #[test]
    fn open_failure_reported_once() {
        let tmp = tempfile::tempdir().unwrap();
        let buffer = BufferSink::new();
        let missing = tmp.path().join("missing.log");
        let tail = TailSession::start(&missing, shared(buffer.clone()), FAST, None);
        assert!(tail.is_finished());
        thread::sleep(FAST * 5);
        let text = buffer.text();
        assert_eq!(text.matches("ERROR: cannot tail").count(), 1);
    }

    #[test]
    fn retarget_switches_files_without_interleaving() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("first.log");
        let second = tmp.path().join("second.log");
        std::fs::write(&first, "").unwrap();
        std::fs::write(&second, "").unwrap();

        let buffer = BufferSink::new();
        let mut tailer = Tailer::new(shared(buffer.clone()), FAST);
        tailer.retarget(&first, None);
        append(&first, b"one\n");
        assert!(wait_for(|| buffer.text() == "one\n"));

        tailer.retarget(&second, None);
        append(&first, b"stale\n");
        append(&second, b"two\n");
        assert!(wait_for(|| buffer.text() == "one\ntwo\n"));
        thread::sleep(FAST * 5);
        assert_eq!(buffer.text(), "one\ntwo\n");
        assert_eq!(tailer.current().map(|t| t.path().to_path_buf()), Some(second));
        tailer.stop();
        assert!(tailer.current().is_none());
    }

    #[test]
    fn retarget_same_path_keeps_session() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("same.log");
        std::fs::write(&path, "").unwrap();
        let buffer = BufferSink::new();
        let mut tailer = Tailer::new(shared(buffer.clone()), FAST);
        tailer.retarget(&path, None);
        tailer.retarget(&path, None);
        append(&path, b"once\n");
        assert!(wait_for(|| buffer.text() == "once\n"));
        thread::sleep(FAST * 5);
        assert_eq!(buffer.text(), "once\n");
    }

    #[test]
    fn starts_at_given_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("d.log");
        std::fs::write(&path, "old\nconnected\n").unwrap();
        let buffer = BufferSink::new();
        let tail = TailSession::start(&path, shared(buffer.clone()), FAST, Some(4));
        assert_eq!(tail.offset(), 4);
        assert!(wait_for(|| buffer.text() == "connected\n"));

        append(&path, b"next\n");
        assert!(wait_for(|| buffer.text() == "connected\nnext\n"));
        tail.join();

        let clamped = TailSession::start(&path, shared(BufferSink::new()), FAST, Some(999));
        assert_eq!(clamped.offset(), 19);
    }
}
