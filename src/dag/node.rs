// src/dag/node.rs

//! The Node: one DAG vertex bundling a PRE script, a batch job (possibly
//! multi-proc), and a POST script, plus its edges and retry bookkeeping.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::config::model::{NodeConfig, NodeKind};
use crate::events::JobId;
use crate::exec::script::Script;
use crate::types::ScriptKind;

/// Dense, array-indexable node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index into the throttle-category registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryId(pub usize);

// Per-proc event bit masks.
pub const EXEC_MASK: u8 = 1 << 0;
pub const ABORT_TERM_MASK: u8 = 1 << 1;
pub const IDLE_MASK: u8 = 1 << 2;
pub const HOLD_MASK: u8 = 1 << 3;

/// Exactly one status holds at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    NotReady,
    Ready,
    PreRun,
    Submitted,
    PostRun,
    Done,
    Error,
    /// An ancestor permanently failed; this node can never run.
    Futile,
}

impl NodeStatus {
    pub fn name(self) -> &'static str {
        match self {
            NodeStatus::NotReady => "NOT_READY",
            NodeStatus::Ready => "READY",
            NodeStatus::PreRun => "PRERUN",
            NodeStatus::Submitted => "SUBMITTED",
            NodeStatus::PostRun => "POSTRUN",
            NodeStatus::Done => "DONE",
            NodeStatus::Error => "ERROR",
            NodeStatus::Futile => "FUTILE",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Error | NodeStatus::Futile)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AbortDagOn {
    pub value: i32,
    /// Pinned daemon exit status, if any.
    pub status: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NodeVar {
    pub name: String,
    pub value: String,
    pub prepend: bool,
}

/// Synthetic return value recorded when a submission attempt limit is
/// exhausted (distinct from any real exit code).
pub const RET_SUBMIT_FAILED: i32 = -1001;
/// Synthetic return value recorded when the batch queue aborts a job.
pub const RET_JOB_ABORTED: i32 = -1002;

#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub status: NodeStatus,

    /// Submit description handed to the batch-queue collaborator.
    pub submit_desc: String,
    pub dir: Option<PathBuf>,

    pub parents: BTreeSet<NodeId>,
    pub children: BTreeSet<NodeId>,
    /// Parents not yet DONE. Empty iff all parents are DONE.
    pub waiting: BTreeSet<NodeId>,

    /// Current job binding; `JobId::UNSET` until submitted.
    pub job: JobId,
    /// Procs of the current cluster still in the queue.
    pub queued_procs: i64,
    /// Procs ever submitted for the current cluster.
    pub submitted_procs: usize,
    /// Procs that got an abort event.
    pub aborted_procs: usize,
    /// Per-proc event bitmask (EXEC/ABORT_TERM/IDLE/HOLD).
    proc_events: Vec<u8>,
    pub is_factory: bool,
    /// A submit-type event has already been seen for the current attempt.
    pub seen_first_proc: bool,

    pub retries: usize,
    pub retry_max: usize,
    /// Exit value that short-circuits remaining retries (UNLESS-EXIT).
    pub retry_abort_val: Option<i32>,

    pub times_held: usize,
    pub held_procs: i64,

    /// Node return value: job exit code, negated signal, or a synthetic
    /// DAG error value.
    pub retval: Option<i32>,
    pub error_text: String,

    pub abort_dag_on: Option<AbortDagOn>,

    pub pre: Option<Script>,
    pub post: Option<Script>,
    pub hold: Option<Script>,
    pub pre_skip: Option<i32>,

    pub category: Option<CategoryId>,

    pub explicit_priority: i32,
    pub effective_priority: i32,

    /// Node completes without touching the external queue.
    pub noop: bool,
    /// Premarked DONE in the workflow definition.
    pub pre_done: bool,

    /// Guard against double-counting a terminal node.
    pub counted_as_done: bool,
    pub is_successful: bool,
    /// Flagged when a queue check couldn't find this node's jobs; verified
    /// again on the next periodic check before escalating.
    pub missing_jobs: bool,

    pub submit_tries: usize,

    pub exit_code_counts: BTreeMap<i32, usize>,
    pub vars: Vec<NodeVar>,
    pub save_file: Option<PathBuf>,
}

impl Node {
    pub fn from_config(id: NodeId, name: &str, cfg: &NodeConfig) -> Self {
        let pre = cfg.pre.as_ref().map(|s| Script::from_config(ScriptKind::Pre, s));
        let post = cfg.post.as_ref().map(|s| Script::from_config(ScriptKind::Post, s));
        let hold = cfg.hold.as_ref().map(|s| Script::from_config(ScriptKind::Hold, s));

        Self {
            id,
            name: name.to_string(),
            kind: cfg.kind,
            status: NodeStatus::NotReady,
            submit_desc: cfg.submit.clone(),
            dir: cfg.dir.clone(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            waiting: BTreeSet::new(),
            job: JobId::UNSET,
            queued_procs: 0,
            submitted_procs: 0,
            aborted_procs: 0,
            proc_events: Vec::new(),
            is_factory: false,
            seen_first_proc: false,
            retries: 0,
            retry_max: cfg.retry,
            retry_abort_val: cfg.unless_exit,
            times_held: 0,
            held_procs: 0,
            retval: None,
            error_text: String::new(),
            abort_dag_on: cfg.abort_dag_on.map(|a| AbortDagOn { value: a.value, status: a.status }),
            pre,
            post,
            hold,
            pre_skip: cfg.pre_skip,
            category: None,
            explicit_priority: cfg.priority,
            effective_priority: cfg.priority,
            noop: cfg.noop,
            pre_done: cfg.done,
            counted_as_done: false,
            is_successful: true,
            missing_jobs: false,
            submit_tries: 0,
            exit_code_counts: BTreeMap::new(),
            vars: cfg
                .vars
                .iter()
                .map(|v| NodeVar {
                    name: v.name.clone(),
                    value: v.value.clone(),
                    prepend: v.prepend,
                })
                .collect(),
            save_file: cfg.save_file.clone(),
        }
    }

    /// Synthesized no-op node (join-node optimization).
    pub fn new_noop(id: NodeId, name: String) -> Self {
        let cfg = NodeConfig {
            submit: String::new(),
            dir: None,
            kind: NodeKind::Job,
            parents: Vec::new(),
            pre: None,
            post: None,
            hold: None,
            pre_skip: None,
            retry: 0,
            unless_exit: None,
            abort_dag_on: None,
            priority: 0,
            category: None,
            noop: true,
            done: false,
            save_file: None,
            vars: Vec::new(),
        };
        Node::from_config(id, &name, &cfg)
    }

    pub fn is_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// Ready to place jobs to the queue: READY and nothing left to wait on.
    pub fn can_submit(&self) -> bool {
        self.status == NodeStatus::Ready && !self.is_waiting()
    }

    /// Running a PRE script, job(s), or POST script right now.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            NodeStatus::PreRun | NodeStatus::Submitted | NodeStatus::PostRun
        )
    }

    /// Whether the node should cause the whole workflow to abort.
    pub fn do_abort(&self) -> bool {
        match (self.abort_dag_on, self.retval) {
            (Some(a), Some(r)) => a.value == r,
            _ => false,
        }
    }

    /// Whether a retry should be attempted after a failure.
    pub fn do_retry(&self) -> bool {
        !self.do_abort() && !self.abort_retry() && self.retries < self.retry_max
    }

    /// UNLESS-EXIT matched: fail permanently without consuming a retry.
    pub fn abort_retry(&self) -> bool {
        matches!((self.retry_abort_val, self.retval), (Some(v), Some(r)) if v == r)
    }

    /// Short-circuit remaining retries (used when submission attempts are
    /// exhausted: submission failure consumes no node retries).
    pub fn poison_retries(&mut self) {
        self.retries = self.retry_max;
    }

    /// All procs of the current cluster have left the queue. Factory
    /// clusters additionally need a cluster-remove event.
    pub fn all_procs_done(&self) -> bool {
        !self.is_factory && self.queued_procs == 0
    }

    pub fn record_exit_code(&mut self, code: i32) {
        *self.exit_code_counts.entry(code).or_insert(0) += 1;
    }

    fn proc_slot(&mut self, proc: i32) -> &mut u8 {
        let idx = proc.max(0) as usize;
        if idx >= self.proc_events.len() {
            self.proc_events.resize(idx + 1, 0);
        }
        &mut self.proc_events[idx]
    }

    pub fn proc_event_mask(&self, proc: i32) -> u8 {
        self.proc_events.get(proc.max(0) as usize).copied().unwrap_or(0)
    }

    pub fn set_proc_event(&mut self, proc: i32, mask: u8) {
        *self.proc_slot(proc) |= mask;
    }

    pub fn proc_is_idle(&self, proc: i32) -> bool {
        self.proc_event_mask(proc) & IDLE_MASK != 0
    }

    /// Returns true if the idle bit actually changed.
    pub fn set_proc_idle(&mut self, proc: i32, idle: bool) -> bool {
        let slot = self.proc_slot(proc);
        let was = *slot & IDLE_MASK != 0;
        if idle {
            *slot |= IDLE_MASK;
        } else {
            *slot &= !IDLE_MASK;
        }
        was != idle
    }

    /// Mark a proc held. Returns false if it was already in hold state.
    pub fn hold_proc(&mut self, proc: i32) -> bool {
        let slot = self.proc_slot(proc);
        if *slot & HOLD_MASK != 0 {
            return false;
        }
        *slot |= HOLD_MASK;
        self.held_procs += 1;
        self.times_held += 1;
        true
    }

    /// Mark a proc released. Returns false if it wasn't held.
    pub fn release_proc(&mut self, proc: i32) -> bool {
        let slot = self.proc_slot(proc);
        if *slot & HOLD_MASK == 0 {
            return false;
        }
        *slot &= !HOLD_MASK;
        self.held_procs -= 1;
        true
    }

    /// Reset per-attempt bookkeeping when the node is retried.
    pub fn reset_for_retry(&mut self) {
        self.job = JobId::UNSET;
        self.queued_procs = 0;
        self.submitted_procs = 0;
        self.aborted_procs = 0;
        self.proc_events.clear();
        self.is_factory = false;
        self.seen_first_proc = false;
        self.held_procs = 0;
        self.is_successful = true;
        self.exit_code_counts.clear();
        self.error_text.clear();
        if let Some(pre) = &mut self.pre {
            pre.done = false;
        }
    }

    /// Whether the PRE script still needs to run before submission.
    pub fn pre_script_pending(&self) -> bool {
        matches!(&self.pre, Some(pre) if !pre.done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::NodeConfig;

    fn node(retry: usize, unless_exit: Option<i32>) -> Node {
        let cfg = NodeConfig {
            submit: "x.sub".into(),
            dir: None,
            kind: NodeKind::Job,
            parents: vec![],
            pre: None,
            post: None,
            hold: None,
            pre_skip: None,
            retry,
            unless_exit,
            abort_dag_on: None,
            priority: 0,
            category: None,
            noop: false,
            done: false,
            save_file: None,
            vars: vec![],
        };
        Node::from_config(NodeId(0), "X", &cfg)
    }

    #[test]
    fn retry_policy_respects_unless_exit() {
        let mut n = node(3, Some(42));
        n.retval = Some(1);
        assert!(n.do_retry());

        n.retval = Some(42);
        assert!(n.abort_retry());
        assert!(!n.do_retry());
    }

    #[test]
    fn poisoned_retries_never_retry() {
        let mut n = node(5, None);
        n.retval = Some(1);
        assert!(n.do_retry());
        n.poison_retries();
        assert!(!n.do_retry());
        assert_eq!(n.retries, n.retry_max);
    }

    #[test]
    fn hold_release_counting() {
        let mut n = node(0, None);
        assert!(n.hold_proc(0));
        assert!(!n.hold_proc(0));
        assert_eq!(n.held_procs, 1);
        assert_eq!(n.times_held, 1);

        assert!(n.release_proc(0));
        assert!(!n.release_proc(0));
        assert_eq!(n.held_procs, 0);

        // A second hold of the same proc counts again.
        assert!(n.hold_proc(0));
        assert_eq!(n.times_held, 2);
    }

    #[test]
    fn idle_bit_tracks_changes() {
        let mut n = node(0, None);
        assert!(n.set_proc_idle(2, true));
        assert!(!n.set_proc_idle(2, true));
        assert!(n.proc_is_idle(2));
        assert!(!n.proc_is_idle(0));
        assert!(n.set_proc_idle(2, false));
    }

    #[test]
    fn reset_for_retry_clears_attempt_state() {
        let mut n = node(1, None);
        n.queued_procs = 3;
        n.submitted_procs = 3;
        n.is_factory = true;
        n.seen_first_proc = true;
        n.error_text = "boom".into();
        n.is_successful = false;
        n.record_exit_code(2);

        n.reset_for_retry();
        assert_eq!(n.queued_procs, 0);
        assert_eq!(n.submitted_procs, 0);
        assert!(!n.is_factory);
        assert!(!n.seen_first_proc);
        assert!(n.error_text.is_empty());
        assert!(n.is_successful);
        assert!(n.exit_code_counts.is_empty());
        assert_eq!(n.job, JobId::UNSET);
    }

    #[test]
    fn factory_nodes_need_cluster_remove() {
        let mut n = node(0, None);
        n.is_factory = true;
        n.queued_procs = 0;
        assert!(!n.all_procs_done());
        n.is_factory = false;
        assert!(n.all_procs_done());
    }
}
