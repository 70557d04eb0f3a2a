//! In-memory fakes for the engine's collaborator traits.

use std::collections::VecDeque;

use dagrun::dag::node::NodeVar;
use dagrun::errors::Result;
use dagrun::events::{EventLog, EventOutcome, JobEvent, JobId};
use dagrun::exec::{ScriptExec, ScriptLauncher};
use dagrun::queue::{BatchQueue, SubmitResult};

/// Scripted batch queue: hands out sequential cluster ids and records every
/// interaction.
#[derive(Debug)]
pub struct FakeQueue {
    next_cluster: i64,
    /// (node name, assigned cluster) per successful submission.
    pub submissions: Vec<(String, i64)>,
    /// (cluster, reason) per removal.
    pub removed: Vec<(i64, String)>,
    /// Fail this many submissions before succeeding again.
    pub fail_next: usize,
    /// What `query` reports as still queued.
    pub queued: Vec<(i64, i32)>,
    /// Makes `query` fail, simulating an unreachable scheduler.
    pub query_broken: bool,
    pub reschedules: usize,
}

impl Default for FakeQueue {
    fn default() -> Self {
        Self {
            next_cluster: 100,
            submissions: Vec::new(),
            removed: Vec::new(),
            fail_next: 0,
            queued: Vec::new(),
            query_broken: false,
            reschedules: 0,
        }
    }
}

impl FakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster assigned to the n-th successful submission of `node`.
    pub fn cluster_for(&self, node: &str) -> Option<i64> {
        self.submissions
            .iter()
            .rev()
            .find(|(name, _)| name == node)
            .map(|(_, cluster)| *cluster)
    }
}

impl BatchQueue for FakeQueue {
    fn submit(
        &mut self,
        node_name: &str,
        _submit_desc: &str,
        _priority: i32,
        _vars: &[NodeVar],
    ) -> SubmitResult {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return SubmitResult::Failed;
        }
        let cluster = self.next_cluster;
        self.next_cluster += 1;
        self.submissions.push((node_name.to_string(), cluster));
        SubmitResult::Submitted(JobId::new(cluster, 0, 0))
    }

    fn remove(&mut self, cluster: i64, reason: &str) -> Result<()> {
        self.removed.push((cluster, reason.to_string()));
        Ok(())
    }

    fn query(&mut self) -> Result<Vec<(i64, i32)>> {
        if self.query_broken {
            return Err(dagrun::errors::DagError::EventLog(
                "queue unreachable".to_string(),
            ));
        }
        Ok(self.queued.clone())
    }

    fn reschedule(&mut self) {
        self.reschedules += 1;
    }
}

/// In-memory event log. Appended events are immediately readable, exactly
/// like the file log after a flush, and outcomes (read errors etc.) can be
/// injected ahead of real events.
#[derive(Debug, Default)]
pub struct VecEventLog {
    pub events: Vec<JobEvent>,
    cursor: usize,
    pub injected: VecDeque<EventOutcome>,
}

impl VecEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: JobEvent) {
        self.events.push(event);
    }

    pub fn inject(&mut self, outcome: EventOutcome) {
        self.injected.push_back(outcome);
    }
}

impl EventLog for VecEventLog {
    fn append(&mut self, event: &JobEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn poll(&mut self) -> EventOutcome {
        if let Some(outcome) = self.injected.pop_front() {
            return outcome;
        }
        if self.cursor < self.events.len() {
            let ev = self.events[self.cursor].clone();
            self.cursor += 1;
            EventOutcome::Event(ev)
        } else {
            EventOutcome::NoEvent
        }
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }
}

/// Records script launches instead of spawning processes; tests complete
/// them explicitly.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    pub launched: Vec<ScriptExec>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn launched_for(&self, node: &str) -> Vec<&ScriptExec> {
        self.launched.iter().filter(|e| e.node == node).collect()
    }
}

impl ScriptLauncher for RecordingLauncher {
    fn launch(&mut self, exec: ScriptExec) {
        self.launched.push(exec);
    }
}
