// src/queue/mod.rs

//! The external batch queue boundary.
//!
//! The engine never talks to a scheduler directly; it goes through
//! [`BatchQueue`], which covers exactly the three interactions the engine
//! needs: submit a node's jobs, remove a cluster, and enumerate what is
//! still queued. Job *progress* never comes back through this trait; it
//! arrives via the event log.

use crate::dag::node::NodeVar;
use crate::errors::Result;
use crate::events::JobId;

/// Outcome of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// Submitted; the queue assigned this job id.
    Submitted(JobId),
    /// The attempt failed; the engine applies backoff and retry-attempt
    /// accounting.
    Failed,
    /// The collaborator declined without error; try again later.
    Deferred,
}

pub trait BatchQueue: Send {
    /// Hand a node's submit description to the queue.
    fn submit(
        &mut self,
        node_name: &str,
        submit_desc: &str,
        priority: i32,
        vars: &[NodeVar],
    ) -> SubmitResult;

    /// Remove every proc of a cluster from the queue.
    fn remove(&mut self, cluster: i64, reason: &str) -> Result<()>;

    /// Enumerate (cluster, queued proc count) pairs this workflow still has
    /// in the queue. Used by lost-job verification.
    fn query(&mut self) -> Result<Vec<(i64, i32)>>;

    /// Hint that newly submitted work is waiting; default is a no-op.
    fn reschedule(&mut self) {}
}

/// Placeholder queue for runs without an external scheduler attached.
/// Every submission fails, so only no-op and dry-run nodes make progress.
#[derive(Debug, Default)]
pub struct NullQueue;

impl BatchQueue for NullQueue {
    fn submit(
        &mut self,
        _node_name: &str,
        _submit_desc: &str,
        _priority: i32,
        _vars: &[NodeVar],
    ) -> SubmitResult {
        SubmitResult::Failed
    }

    fn remove(&mut self, _cluster: i64, _reason: &str) -> Result<()> {
        Ok(())
    }

    fn query(&mut self) -> Result<Vec<(i64, i32)>> {
        Ok(Vec::new())
    }
}
