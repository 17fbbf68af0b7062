use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, Timelike};

use crate::broker::StoredMessage;

struct LogFile {
    file: File,
    offset: u64,
}

/// Append-only per-session log of every broker interaction. The console
/// shows it through a tail; nothing ever rewrites it.
///
/// Cloning shares the same file handle.
#[derive(Clone)]
pub struct ActivityLog {
    path: PathBuf,
    inner: Arc<Mutex<LogFile>>,
}

impl ActivityLog {
    /// Open (append + create) the log at `path`, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(LogFile { file, offset })),
        })
    }

    /// Open the per-day, per-profile log under `dir`.
    pub fn open_for_profile(dir: &Path, profile: &str) -> io::Result<Self> {
        Self::open(&session_log_path(dir, profile, Local::now()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written through any handle, including what the file held
    /// when it was opened.
    pub fn offset(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offset
    }

    /// Append one line as-is (a trailing newline is added).
    pub fn append_raw(&self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.file.write_all(buf.as_bytes())?;
        inner.file.flush()?;
        inner.offset += buf.len() as u64;
        Ok(())
    }

    /// Append `HH:MM:SS.fffff <text>`.
    pub fn note(&self, text: &str) -> io::Result<()> {
        self.append_raw(&format!("{} {text}", timestamp(Local::now())))
    }

    /// Append `HH:MM:SS.fffff [subject] body` and return the line.
    pub fn message(&self, msg: &StoredMessage) -> io::Result<String> {
        let line = format_message_line(Local::now(), msg);
        self.append_raw(&line)?;
        Ok(line)
    }
}

/// `<dir>/<YYYY-MM-DD>_<profile>.log`, profile reduced to file-safe chars.
pub fn session_log_path(dir: &Path, profile: &str, now: DateTime<Local>) -> PathBuf {
    let safe: String = profile
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() { "default".to_string() } else { safe };
    dir.join(format!("{}_{safe}.log", now.format("%Y-%m-%d")))
}

/// `HH:MM:SS.fffff`, five fractional digits.
pub fn timestamp(now: DateTime<Local>) -> String {
    let tenths_of_micros = now.nanosecond() % 1_000_000_000 / 10_000;
    format!("{}.{tenths_of_micros:05}", now.format("%H:%M:%S"))
}

pub fn format_message_line(now: DateTime<Local>, msg: &StoredMessage) -> String {
    format!(
        "{} [{}] {}",
        timestamp(now),
        msg.subject,
        String::from_utf8_lossy(&msg.payload)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::SystemTime;

    fn at(h: u32, m: u32, s: u32, nanos: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, h, m, s)
            .unwrap()
            .with_nanosecond(nanos)
            .unwrap()
    }

    #[test]
    fn timestamp_has_five_fraction_digits() {
        assert_eq!(timestamp(at(9, 5, 7, 123_456_789)), "09:05:07.12345");
        assert_eq!(timestamp(at(23, 59, 59, 0)), "23:59:59.00000");
    }

    #[test]
    fn message_line_format() {
        let msg = StoredMessage {
            subject: "orders.received".into(),
            payload: b"hi".to_vec(),
            sequence: 4,
            published: SystemTime::now(),
        };
        assert_eq!(
            format_message_line(at(12, 0, 1, 500_000_000), &msg),
            "12:00:01.50000 [orders.received] hi"
        );
    }

    #[test]
    fn path_is_per_day_and_profile() {
        let path = session_log_path(Path::new("/logs"), "prod/eu 1", at(1, 2, 3, 0));
        assert_eq!(path, PathBuf::from("/logs/2024-03-09_prod_eu_1.log"));
        let path = session_log_path(Path::new("/logs"), "", at(1, 2, 3, 0));
        assert_eq!(path, PathBuf::from("/logs/2024-03-09_default.log"));
    }

    #[test]
    fn appends_and_tracks_offset() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/session.log");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "old line\n").unwrap();

        let log = ActivityLog::open(&path).unwrap();
        assert_eq!(log.offset(), 9);
        log.append_raw("first").unwrap();
        let clone = log.clone();
        clone.note("INFO: second").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("old line\nfirst\n"));
        assert!(content.ends_with(" INFO: second\n"));
        assert_eq!(log.offset(), content.len() as u64);
    }

    #[test]
    fn open_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let log = ActivityLog::open_for_profile(&tmp.path().join("a/b"), "demo").unwrap();
        assert!(log.path().exists());
        assert_eq!(log.offset(), 0);
    }
}
