// src/events/file_log.rs

//! JSON-lines event log on disk.
//!
//! One serialized [`JobEvent`] per line. The reader keeps a byte offset and
//! only ever moves forward, except for [`EventLog::rewind`] which recovery
//! uses to replay the whole history. A shrinking file indicates corruption
//! and is reported as a read error.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::{DagError, Result};
use crate::events::{EventLog, EventOutcome, JobEvent};

#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    /// Byte offset of the next unread record.
    offset: u64,
}

impl FileEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), offset: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether unread data exists past the current offset.
    pub fn grew(&self) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() > self.offset,
            Err(_) => false,
        }
    }

    fn open_reader(&self) -> std::io::Result<Option<BufReader<File>>> {
        match File::open(&self.path) {
            Ok(mut f) => {
                let len = f.metadata()?.len();
                if len < self.offset {
                    // Log shrank underneath us.
                    return Err(std::io::Error::other("event log shrank"));
                }
                f.seek(SeekFrom::Start(self.offset))?;
                Ok(Some(BufReader::new(f)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl EventLog for FileEventLog {
    fn append(&mut self, event: &JobEvent) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)
            .map_err(|e| DagError::EventLog(format!("encoding event: {e}")))?;
        writeln!(f, "{line}")?;
        debug!(job = %event.job, kind = event.kind_name(), "appended event to log");
        Ok(())
    }

    fn poll(&mut self) -> EventOutcome {
        let mut reader = match self.open_reader() {
            Ok(Some(r)) => r,
            Ok(None) => return EventOutcome::NoEvent,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to open event log");
                return EventOutcome::ReadError;
            }
        };

        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => EventOutcome::NoEvent,
            Ok(n) => {
                // Don't consume a partial trailing line; the writer may
                // still be mid-append.
                if !line.ends_with('\n') {
                    return EventOutcome::NoEvent;
                }
                self.offset += n as u64;
                match serde_json::from_str::<JobEvent>(line.trim_end()) {
                    Ok(ev) => EventOutcome::Event(ev),
                    Err(e) => {
                        warn!(error = %e, "undecodable event record");
                        EventOutcome::UnknownError
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "error reading event log");
                EventOutcome::ReadError
            }
        }
    }

    fn rewind(&mut self) {
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventDetail, ExitOutcome, JobId};

    fn sample(cluster: i64) -> JobEvent {
        JobEvent::new(
            JobId::new(cluster, 0, 0),
            EventDetail::Terminated { exit: ExitOutcome::Code(0) },
        )
    }

    #[test]
    fn append_then_poll_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileEventLog::new(dir.path().join("wf.events"));

        log.append(&sample(1)).unwrap();
        log.append(&sample(2)).unwrap();

        assert!(log.grew());
        match log.poll() {
            EventOutcome::Event(ev) => assert_eq!(ev.job.cluster, 1),
            other => panic!("expected event, got {other:?}"),
        }
        match log.poll() {
            EventOutcome::Event(ev) => assert_eq!(ev.job.cluster, 2),
            other => panic!("expected event, got {other:?}"),
        }
        assert_eq!(log.poll(), EventOutcome::NoEvent);
    }

    #[test]
    fn rewind_replays_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileEventLog::new(dir.path().join("wf.events"));
        log.append(&sample(7)).unwrap();
        assert!(matches!(log.poll(), EventOutcome::Event(_)));
        assert_eq!(log.poll(), EventOutcome::NoEvent);

        log.rewind();
        match log.poll() {
            EventOutcome::Event(ev) => assert_eq!(ev.job.cluster, 7),
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_no_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileEventLog::new(dir.path().join("absent.events"));
        assert_eq!(log.poll(), EventOutcome::NoEvent);
        assert!(!log.grew());
    }

    #[test]
    fn corrupt_record_is_unknown_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.events");
        std::fs::write(&path, "not json\n").unwrap();
        let mut log = FileEventLog::new(&path);
        assert_eq!(log.poll(), EventOutcome::UnknownError);
    }

    #[test]
    fn shrunken_log_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.events");
        let mut log = FileEventLog::new(&path);
        log.append(&sample(1)).unwrap();
        assert!(matches!(log.poll(), EventOutcome::Event(_)));

        std::fs::write(&path, "").unwrap();
        assert_eq!(log.poll(), EventOutcome::ReadError);
    }
}
