// src/events/mod.rs

//! Typed job-lifecycle events.
//!
//! The external batch queue reports job progress through an append-only
//! event log. Events are decoded once at this boundary into a closed
//! [`JobEvent`] sum type; the engine never sees raw log records.
//!
//! [`EventLog`] is the boundary trait: the real implementation is the
//! JSON-lines file log in [`file_log`], tests use an in-memory fake.

pub mod file_log;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use file_log::FileEventLog;

/// Three-part identifier the batch queue uses for one job proc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId {
    pub cluster: i64,
    pub proc: i32,
    pub subproc: i32,
}

impl JobId {
    pub const UNSET: JobId = JobId { cluster: -1, proc: -1, subproc: -1 };

    pub fn new(cluster: i64, proc: i32, subproc: i32) -> Self {
        Self { cluster, proc, subproc }
    }

    pub fn is_set(&self) -> bool {
        self.cluster >= 0 || self.is_noop()
    }

    /// No-op jobs (join nodes, dry runs) use locally generated negative
    /// cluster numbers below the unset sentinel, so they can never collide
    /// with real queue clusters.
    pub fn is_noop(&self) -> bool {
        self.cluster < -1
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.cluster, self.proc, self.subproc)
    }
}

/// How a process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
}

impl ExitOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }

    /// The value recorded as the node's return value: the exit code, or the
    /// negated signal number for a signal death.
    pub fn node_return(&self) -> i32 {
        match *self {
            ExitOutcome::Code(c) => c,
            ExitOutcome::Signal(s) => -s,
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Code(c) => write!(f, "status {c}"),
            ExitOutcome::Signal(s) => write!(f, "signal {s}"),
        }
    }
}

/// Event payload, one variant per event kind, carrying exactly the fields
/// that kind needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    /// First submit-type event for a job carries the owning node's name,
    /// since the engine may not know the job id yet.
    Submitted { node: String },
    /// Start of a multi-proc (factory) cluster.
    ClusterSubmitted { node: String },
    /// The whole factory cluster has left the queue.
    ClusterRemoved,
    Executing,
    Terminated { exit: ExitOutcome },
    Aborted { reason: String },
    Held { reason: String },
    Released,
    Suspended,
    Unsuspended,
    Evicted,
    ShadowException { message: String },
    /// Synthetic event written by the engine when a post script finishes,
    /// so recovery replay observes the same outcome. Routed by node name:
    /// a POST can run for a node that never got a job id (PRE or submit
    /// failure).
    PostScriptTerminated { node: String, exit: ExitOutcome },
    /// Synthetic event recorded when a PRE script exits with the configured
    /// skip code.
    PreSkip { node: String },
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job: JobId,
    pub timestamp: u64,
    #[serde(flatten)]
    pub detail: EventDetail,
}

impl JobEvent {
    pub fn new(job: JobId, detail: EventDetail) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { job, timestamp, detail }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.detail {
            EventDetail::Submitted { .. } => "SUBMITTED",
            EventDetail::ClusterSubmitted { .. } => "CLUSTER_SUBMITTED",
            EventDetail::ClusterRemoved => "CLUSTER_REMOVED",
            EventDetail::Executing => "EXECUTING",
            EventDetail::Terminated { .. } => "TERMINATED",
            EventDetail::Aborted { .. } => "ABORTED",
            EventDetail::Held { .. } => "HELD",
            EventDetail::Released => "RELEASED",
            EventDetail::Suspended => "SUSPENDED",
            EventDetail::Unsuspended => "UNSUSPENDED",
            EventDetail::Evicted => "EVICTED",
            EventDetail::ShadowException { .. } => "SHADOW_EXCEPTION",
            EventDetail::PostScriptTerminated { .. } => "POST_SCRIPT_TERMINATED",
            EventDetail::PreSkip { .. } => "PRE_SKIP",
            EventDetail::Generic => "GENERIC",
        }
    }
}

/// Outcome of one read attempt against the event log.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Event(JobEvent),
    /// Nothing more to read right now; end this pass.
    NoEvent,
    /// A record could not be read; bounded tolerance applies.
    ReadError,
    /// A record was read but could not be decoded.
    UnknownError,
}

/// The event-log boundary: append synthetic events, poll for the next
/// unconsumed event, rewind for full recovery replay.
pub trait EventLog: Send {
    fn append(&mut self, event: &JobEvent) -> Result<()>;
    fn poll(&mut self) -> EventOutcome;
    /// Restart reading from the beginning of history.
    fn rewind(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_outcome_node_return() {
        assert_eq!(ExitOutcome::Code(3).node_return(), 3);
        assert_eq!(ExitOutcome::Signal(9).node_return(), -9);
        assert!(ExitOutcome::Code(0).succeeded());
        assert!(!ExitOutcome::Signal(15).succeeded());
    }

    #[test]
    fn job_event_round_trips_through_json() {
        let ev = JobEvent::new(
            JobId::new(12, 0, 0),
            EventDetail::Terminated { exit: ExitOutcome::Code(0) },
        );
        let line = serde_json::to_string(&ev).unwrap();
        let back: JobEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn noop_ids_are_distinct_from_unset() {
        assert!(!JobId::UNSET.is_noop());
        assert!(JobId::new(-2, 0, 0).is_noop());
        assert!(JobId::new(-2, 0, 0).is_set());
        assert!(!JobId::UNSET.is_set());
    }
}
