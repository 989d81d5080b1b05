//! Append-only event log (WAL)
//!
//! One canonical-JSON record per line in `events.log`. Appends assign the
//! next sequence id, rewrite the checksum, then write + flush + fsync before
//! returning; the in-memory sequence only advances after the bytes are
//! durable, so a failed append leaves no gap.
//!
//! On open, the log is scanned to recover the last sequence id. A torn final
//! line (partial write from a crash mid-append) is healed by truncating the
//! file back to the last complete record; a complete record that fails its
//! checksum is an integrity error and aborts instead.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::Event;

/// Log file name inside the event directory
pub const EVENT_LOG_FILE: &str = "events.log";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("event log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("event record encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("corrupt event record on line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("event {id} failed checksum verification")]
    ChecksumMismatch { id: u64 },

    #[error("event store is closed")]
    Closed,
}

struct StoreInner {
    writer: BufWriter<File>,
    sequence: u64,
    closed: bool,
}

/// Append-only store with a single writer mutex
pub struct EventStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

impl EventStore {
    /// Open (or create) the log under `dir`, recovering the last sequence id
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(EVENT_LOG_FILE);

        let sequence = recover_log(&path)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), last_sequence = sequence, "event store opened");

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                writer: BufWriter::new(file),
                sequence,
                closed: false,
            }),
        })
    }

    /// Append an event: assigns the next id, fsyncs, then returns the id
    pub fn append(&self, event: &mut Event) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Err(StoreError::Closed);
        }

        let id = inner.sequence + 1;
        event.assign_id(id);

        let mut line = serde_json::to_vec(event).map_err(StoreError::Encode)?;
        line.push(b'\n');

        inner.writer.write_all(&line)?;
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;

        // Only advance once the record is durable.
        inner.sequence = id;
        Ok(id)
    }

    /// All events, in id order
    pub fn read_all(&self) -> Result<Vec<Event>, StoreError> {
        self.read_from(0)
    }

    /// Events with `id > after_id`, in id order
    ///
    /// Every record's checksum is verified; a mismatch is fatal. A torn
    /// final line (concurrent append or crash) is tolerated and ends the
    /// scan.
    pub fn read_from(&self, after_id: u64) -> Result<Vec<Event>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut lines = reader.lines().enumerate().peekable();

        while let Some((line_no, line)) = lines.next() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) if lines.peek().is_none() => {
                    // Torn tail: the final line never finished writing.
                    warn!(line = line_no + 1, error = %e, "ignoring torn final record");
                    break;
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        line: line_no + 1,
                        reason: e.to_string(),
                    });
                }
            };
            if !event.verify() {
                return Err(StoreError::ChecksumMismatch { id: event.id });
            }
            if event.id > after_id {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Highest sequence id handed out so far
    pub fn last_sequence_id(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and refuse further appends
    pub fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.closed {
            return Ok(());
        }
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        inner.closed = true;
        Ok(())
    }
}

/// Scan the log, truncating a torn final line, and return the max id seen.
fn recover_log(path: &Path) -> Result<u64, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    #[derive(serde::Deserialize)]
    struct SeqProbe {
        id: u64,
    }

    let mut last_id = 0u64;
    let mut valid_end = 0usize;
    let mut cursor = 0usize;
    let mut line_no = 0usize;

    while cursor < bytes.len() {
        line_no += 1;
        let newline = bytes[cursor..].iter().position(|b| *b == b'\n');
        let (line_end, next) = match newline {
            Some(off) => (cursor + off, cursor + off + 1),
            // Unterminated tail: a write that never completed.
            None => (bytes.len(), bytes.len()),
        };
        let line = &bytes[cursor..line_end];
        let is_last = next >= bytes.len();

        if line.iter().all(|b| b.is_ascii_whitespace()) {
            valid_end = next.min(bytes.len());
            cursor = next;
            continue;
        }

        match serde_json::from_slice::<SeqProbe>(line) {
            Ok(probe) => {
                if newline.is_none() {
                    // Parsed but unterminated: treat as torn, do not trust it.
                    warn!(line = line_no, "dropping unterminated final record");
                    break;
                }
                last_id = last_id.max(probe.id);
                valid_end = next;
            }
            Err(e) if is_last => {
                warn!(line = line_no, error = %e, "truncating torn final record");
                break;
            }
            Err(e) => {
                return Err(StoreError::Corrupt {
                    line: line_no,
                    reason: e.to_string(),
                });
            }
        }
        cursor = next;
    }

    if valid_end < bytes.len() {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(valid_end as u64)?;
        file.sync_all()?;
    }

    Ok(last_id)
}
