// src/jobstate.rs

//! Machine-readable state log for external dashboards.
//!
//! Strictly write-only from the engine's point of view: one JSON line per
//! state change, never read back, and failures to write are logged but
//! never fail the workflow.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::warn;

use crate::events::JobId;

#[derive(Debug, Serialize)]
struct Record<'a> {
    timestamp: u64,
    seq: u64,
    node: &'a str,
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

#[derive(Debug)]
pub struct JobstateLog {
    path: Option<PathBuf>,
    seq: u64,
}

impl JobstateLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: Some(path.as_ref().to_path_buf()), seq: 0 }
    }

    /// A log that drops everything; used by tests and dry runs.
    pub fn disabled() -> Self {
        Self { path: None, seq: 0 }
    }

    fn write(&mut self, node: &str, event: &str, job: Option<JobId>, detail: Option<&str>) {
        let Some(path) = &self.path else { return };
        self.seq += 1;
        let record = Record {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            seq: self.seq,
            node,
            event,
            job,
            detail,
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| {
                let line = serde_json::to_string(&record).unwrap_or_default();
                writeln!(f, "{line}")
            });
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "jobstate log write failed");
        }
    }

    pub fn workflow_started(&mut self) {
        self.write("*", "WORKFLOW_STARTED", None, None);
    }

    pub fn workflow_finished(&mut self, exit_code: i32) {
        let detail = exit_code.to_string();
        self.write("*", "WORKFLOW_FINISHED", None, Some(&detail));
    }

    pub fn job_event(&mut self, node: &str, event: &str, job: JobId) {
        self.write(node, event, Some(job), None);
    }

    pub fn script_event(&mut self, node: &str, event: &str, exit_code: i32) {
        let detail = exit_code.to_string();
        self.write(node, event, None, Some(&detail));
    }

    pub fn node_event(&mut self, node: &str, event: &str) {
        self.write(node, event, None, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_json_lines_with_increasing_seq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.log");
        let mut log = JobstateLog::new(&path);

        log.workflow_started();
        log.job_event("A", "SUBMITTED", JobId::new(5, 0, 0));
        log.workflow_finished(0);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["seq"], 1);
        assert_eq!(second["seq"], 2);
        assert_eq!(second["node"], "A");
        assert_eq!(second["job"]["cluster"], 5);
    }

    #[test]
    fn disabled_log_writes_nothing() {
        let mut log = JobstateLog::disabled();
        log.workflow_started();
        log.node_event("A", "DONE");
    }
}
