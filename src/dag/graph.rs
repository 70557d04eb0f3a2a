// src/dag/graph.rs

//! The workflow graph and its bookkeeping.
//!
//! `Dag` owns the node arena, the ready queue, the category throttles and
//! the script pools, plus every counter the submit cycle and the event
//! dispatcher consult. It performs no IO itself; collaborators are passed
//! in through [`Services`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::Write;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::model::{NodeKind, OptionsSection, WorkflowFile};
use crate::dag::cycle::{self, GraphShape};
use crate::dag::node::{AbortDagOn, Node, NodeId, NodeStatus};
use crate::dag::ready_queue::ReadyQueue;
use crate::dag::throttle::ThrottleByCategory;
use crate::engine::Services;
use crate::errors::{DagError, Result};
use crate::events::JobId;
use crate::exec::{ScriptExec, ScriptRunners};
use crate::types::{ScriptKind, Strictness, SubmitOrder, WorkflowExit};

pub struct Dag {
    pub nodes: Vec<Node>,
    name_index: HashMap<String, NodeId>,
    /// Cluster -> node, covering both real clusters (>= 0) and locally
    /// generated no-op clusters (< -1).
    cluster_index: HashMap<i64, NodeId>,

    pub opts: OptionsSection,
    pub throttles: ThrottleByCategory,
    pub ready: ReadyQueue,
    pub scripts: ScriptRunners,

    pub final_node: Option<NodeId>,
    pub provisioner: Option<NodeId>,
    pub service_nodes: Vec<NodeId>,

    // Node accounting (managed nodes only; SERVICE nodes are excluded).
    pub nodes_done: usize,
    pub nodes_failed: usize,
    pub nodes_futile: usize,
    /// Nodes currently in SUBMITTED.
    pub submitted_count: usize,
    /// Idle job procs across the whole workflow.
    pub idle_procs: i64,
    /// Successfully completed job procs, workflow lifetime.
    pub procs_completed: u64,

    // Deferral counters, reported in the status summary.
    pub deferrals_max_jobs: u64,
    pub deferrals_max_idle: u64,
    pub deferrals_category: u64,

    /// FIFO of nodes submitted but not yet matched to a submit event
    /// (single-log submission order sanity check).
    pub expected_submits: VecDeque<NodeId>,

    /// Event-log read tolerance counters.
    pub read_errors: usize,
    pub unknown_errors: usize,

    next_noop_cluster: i64,

    /// Replaying history rather than driving live jobs.
    pub in_recovery: bool,
    /// Only the FINAL node may run from here on.
    pub final_run: bool,
    /// The provisioner (if any) has reported ready.
    pub provisioner_ready: bool,
    /// Submissions paused by the halt file.
    pub halted: bool,
    /// The status summary needs rewriting.
    pub status_dirty: bool,

    // Submission failure backoff.
    pub next_submit_time: Option<Instant>,
    pub submit_delay: Duration,
}

impl Dag {
    pub fn from_workflow(wf: &WorkflowFile) -> Result<Self> {
        let mut throttles = ThrottleByCategory::new();
        for (name, cat) in &wf.category {
            throttles.define(name, Some(cat.max_jobs));
        }

        let mut nodes = Vec::with_capacity(wf.node.len());
        let mut name_index = HashMap::new();
        for (name, cfg) in &wf.node {
            let id = NodeId(nodes.len());
            let mut node = Node::from_config(id, name, cfg);
            if let Some(cat) = &cfg.category {
                node.category = Some(throttles.define(cat, None));
            }
            name_index.insert(name.clone(), id);
            nodes.push(node);
        }

        let mut dag = Self {
            nodes,
            name_index,
            cluster_index: HashMap::new(),
            opts: wf.options.clone(),
            throttles,
            ready: ReadyQueue::new(),
            scripts: ScriptRunners::from_options(&wf.options),
            final_node: None,
            provisioner: None,
            service_nodes: Vec::new(),
            nodes_done: 0,
            nodes_failed: 0,
            nodes_futile: 0,
            submitted_count: 0,
            idle_procs: 0,
            procs_completed: 0,
            deferrals_max_jobs: 0,
            deferrals_max_idle: 0,
            deferrals_category: 0,
            expected_submits: VecDeque::new(),
            read_errors: 0,
            unknown_errors: 0,
            next_noop_cluster: -2,
            in_recovery: false,
            final_run: false,
            provisioner_ready: false,
            halted: false,
            status_dirty: true,
            next_submit_time: None,
            submit_delay: Duration::from_secs(wf.options.submit_retry_delay_secs.max(1)),
        };

        for (idx, node) in dag.nodes.iter().enumerate() {
            match node.kind {
                NodeKind::Final => dag.final_node = Some(NodeId(idx)),
                NodeKind::Provisioner => dag.provisioner = Some(NodeId(idx)),
                NodeKind::Service => dag.service_nodes.push(NodeId(idx)),
                NodeKind::Job => {}
            }
        }

        dag.wire_edges(wf)?;
        dag.propagate_priorities();
        Ok(dag)
    }

    /// Connect edges from the per-node parent lists, collapsing each
    /// many-parents -> many-children pattern into a single no-op join node
    /// so the edge count stays M + N instead of M * N.
    fn wire_edges(&mut self, wf: &WorkflowFile) -> Result<()> {
        // Group children by their full parent set.
        let mut groups: BTreeMap<Vec<NodeId>, Vec<NodeId>> = BTreeMap::new();
        for (name, cfg) in &wf.node {
            if cfg.parents.is_empty() {
                continue;
            }
            let child = self.name_index[name];
            let mut parents = Vec::with_capacity(cfg.parents.len());
            for pname in &cfg.parents {
                let pid = *self
                    .name_index
                    .get(pname)
                    .ok_or_else(|| DagError::NodeNotFound(pname.clone()))?;
                parents.push(pid);
            }
            parents.sort();
            parents.dedup();
            groups.entry(parents).or_default().push(child);
        }

        let mut join_seq = 0usize;
        for (parents, children) in groups {
            if parents.len() > 1 && children.len() > 1 {
                let join = self.new_join_node(&mut join_seq);
                for &p in &parents {
                    self.add_edge(p, join)?;
                }
                for &c in &children {
                    self.add_edge(join, c)?;
                }
            } else {
                for &p in &parents {
                    for &c in &children {
                        self.add_edge(p, c)?;
                    }
                }
            }
        }

        for node in &mut self.nodes {
            node.waiting = node.parents.clone();
        }
        Ok(())
    }

    fn new_join_node(&mut self, seq: &mut usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        let name = format!("_join{}", *seq);
        *seq += 1;
        debug!(node = %name, "synthesizing join node");
        self.nodes.push(Node::new_noop(id, name.clone()));
        self.name_index.insert(name, id);
        id
    }

    fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        if parent == child {
            return Err(DagError::Semantics(format!(
                "node {} depends on itself",
                self.nodes[parent.0].name
            )));
        }
        self.nodes[parent.0].children.insert(child);
        self.nodes[child.0].parents.insert(parent);
        Ok(())
    }

    /// A child inherits the highest effective priority among its parents
    /// unless its own explicit priority is higher.
    fn propagate_priorities(&mut self) {
        let n = self.nodes.len();
        let mut indegree: Vec<usize> = self.nodes.iter().map(|nd| nd.parents.len()).collect();
        let mut queue: VecDeque<usize> =
            (0..n).filter(|&i| indegree[i] == 0).collect();
        while let Some(idx) = queue.pop_front() {
            let prio = self.nodes[idx].effective_priority;
            let children: Vec<NodeId> = self.nodes[idx].children.iter().copied().collect();
            for NodeId(c) in children {
                let child = &mut self.nodes[c];
                child.effective_priority = child.effective_priority.max(prio);
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    queue.push_back(c);
                }
            }
        }
    }

    pub fn shape(&self) -> GraphShape {
        cycle::analyze(&self.nodes)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.name_index.get(name).copied()
    }

    pub fn find_by_cluster(&self, cluster: i64) -> Option<NodeId> {
        self.cluster_index.get(&cluster).copied()
    }

    /// Bind a job id to a node for event routing. A replayed no-op cluster
    /// advances the local counter so it is never handed out again.
    pub fn register_job(&mut self, id: NodeId, job: JobId) {
        if job.cluster <= self.next_noop_cluster {
            self.next_noop_cluster = job.cluster - 1;
        }
        self.nodes[id.0].job = job;
        self.cluster_index.insert(job.cluster, id);
    }

    /// Locally generated cluster id for a no-op or dry-run job.
    pub fn next_noop_job(&mut self) -> JobId {
        let cluster = self.next_noop_cluster;
        self.next_noop_cluster -= 1;
        JobId::new(cluster, 0, 0)
    }

    /// Nodes that participate in done/failed accounting.
    pub fn managed_total(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !matches!(n.kind, NodeKind::Service))
            .count()
    }

    pub fn all_nodes_resolved(&self) -> bool {
        self.nodes_done + self.nodes_failed + self.nodes_futile >= self.managed_total()
    }

    pub fn succeeded(&self) -> bool {
        self.nodes_failed == 0 && self.nodes_futile == 0
    }

    /// Move a node into the running pipeline: launch its PRE script, or
    /// enqueue it for submission if there is none (or it already ran).
    pub fn start_node(
        &mut self,
        id: NodeId,
        is_retry: bool,
        services: &mut Services<'_>,
    ) -> Result<()> {
        if !self.nodes[id.0].can_submit() {
            let node = &self.nodes[id.0];
            return Err(DagError::Semantics(format!(
                "cannot start node {} in status {}",
                node.name,
                node.status.name()
            )));
        }

        if self.nodes[id.0].pre_script_pending() {
            let exec = self.script_exec(id, ScriptKind::Pre);
            let node = &mut self.nodes[id.0];
            node.status = NodeStatus::PreRun;
            services.jobstate.script_event(&node.name, "PRE_SCRIPT_STARTED", 0);
            self.scripts.pre.run(exec, services.launcher);
            return Ok(());
        }

        self.enqueue_ready(id, is_retry);
        Ok(())
    }

    /// Place a READY node into the ready queue per the configured ordering.
    pub fn enqueue_ready(&mut self, id: NodeId, is_retry: bool) {
        let node = &self.nodes[id.0];
        let priority = node.effective_priority;
        let front = (is_retry && self.opts.retry_node_first)
            || self.opts.submit_order == SubmitOrder::DepthFirst;
        if front {
            self.ready.push_front(id, priority);
        } else {
            self.ready.push_back(id, priority);
        }
    }

    pub fn script_exec(&self, id: NodeId, kind: ScriptKind) -> ScriptExec {
        let node = &self.nodes[id.0];
        let script = match kind {
            ScriptKind::Pre => node.pre.as_ref(),
            ScriptKind::Post => node.post.as_ref(),
            ScriptKind::Hold => node.hold.as_ref(),
        };
        ScriptExec {
            node: node.name.clone(),
            kind,
            cmd: script.map(|s| s.cmd.clone()).unwrap_or_default(),
            dir: node.dir.clone(),
            job_return: node.retval,
            retry: node.retries,
        }
    }

    /// Mark a node successfully finished and notify its children. Idempotent:
    /// a second call for the same node changes nothing.
    pub fn terminate_node(
        &mut self,
        id: NodeId,
        start_children: bool,
        services: &mut Services<'_>,
    ) -> Result<()> {
        let node = &mut self.nodes[id.0];
        node.status = NodeStatus::Done;
        if node.counted_as_done {
            return Ok(());
        }
        node.counted_as_done = true;
        if node.retval.is_none() {
            node.retval = Some(0);
        }
        if !matches!(node.kind, NodeKind::Service) {
            self.nodes_done += 1;
        }
        let name = node.name.clone();
        let save_file = node.save_file.clone();
        services.jobstate.node_event(&name, "NODE_DONE");
        info!(node = %name, done = self.nodes_done, total = self.managed_total(), "node finished");
        self.status_dirty = true;

        let children: Vec<NodeId> = self.nodes[id.0].children.iter().copied().collect();
        for child_id in children {
            let child = &mut self.nodes[child_id.0];
            child.waiting.remove(&id);
            if child.waiting.is_empty() && child.status == NodeStatus::NotReady {
                child.status = NodeStatus::Ready;
                if start_children {
                    self.start_node(child_id, false, services)?;
                }
            }
        }

        if let Some(path) = save_file {
            crate::rescue::write_rescue(self, &path, "save point")?;
        }
        Ok(())
    }

    /// Requeue a failed node for another attempt, or fail it permanently if
    /// retries are exhausted or forbidden.
    pub fn restart_node(
        &mut self,
        id: NodeId,
        start: bool,
        services: &mut Services<'_>,
    ) -> Result<()> {
        let node = &self.nodes[id.0];
        debug_assert_eq!(node.status, NodeStatus::Error);

        if self.final_run || node.abort_retry() || !node.do_retry() {
            if node.abort_retry() {
                let retval = node.retval.unwrap_or(0);
                let node = &mut self.nodes[id.0];
                node.error_text = format!(
                    "{} (retries abandoned: exit value {retval} short-circuits)",
                    node.error_text
                );
            }
            self.fail_node(id, services);
            return Ok(());
        }

        let node = &mut self.nodes[id.0];
        node.retries += 1;
        node.reset_for_retry();
        node.status = NodeStatus::Ready;
        let name = node.name.clone();
        let retries = node.retries;
        let retry_max = node.retry_max;
        info!(node = %name, retry = retries, max = retry_max, "retrying node");
        services.jobstate.node_event(&name, "NODE_RETRY");
        self.status_dirty = true;
        if start {
            self.start_node(id, true, services)?;
        }
        Ok(())
    }

    /// Permanent failure: count it once and poison every descendant.
    pub fn fail_node(&mut self, id: NodeId, services: &mut Services<'_>) {
        let node = &mut self.nodes[id.0];
        node.status = NodeStatus::Error;
        if node.counted_as_done {
            return;
        }
        node.counted_as_done = true;
        if node.retry_max > 0 {
            node.error_text = format!("{} (after {} node retries)", node.error_text, node.retries);
        }
        let name = node.name.clone();
        let error_text = node.error_text.clone();
        if !matches!(node.kind, NodeKind::Service) {
            self.nodes_failed += 1;
        }
        warn!(node = %name, error = %error_text, "node failed permanently");
        services.jobstate.node_event(&name, "NODE_FAILED");
        self.status_dirty = true;
        self.set_descendants_futile(id);
    }

    /// Every descendant that has not already resolved can no longer run.
    pub fn set_descendants_futile(&mut self, id: NodeId) -> usize {
        let mut marked = 0;
        let mut stack: Vec<NodeId> = self.nodes[id.0].children.iter().copied().collect();
        while let Some(cur) = stack.pop() {
            let node = &mut self.nodes[cur.0];
            if node.status.is_terminal() {
                continue;
            }
            node.status = NodeStatus::Futile;
            marked += 1;
            if !matches!(node.kind, NodeKind::Service) {
                self.nodes_futile += 1;
            }
            stack.extend(self.nodes[cur.0].children.iter().copied());
        }
        if marked > 0 {
            debug!(node = %self.nodes[id.0].name, marked, "descendants marked futile");
            self.status_dirty = true;
        }
        marked
    }

    /// Whether this node's completion demands a whole-workflow abort.
    pub fn check_abort(&self, id: NodeId) -> Option<WorkflowExit> {
        let node = &self.nodes[id.0];
        if !node.do_abort() {
            return None;
        }
        let AbortDagOn { value, status } = node.abort_dag_on?;
        let code = status.unwrap_or_else(|| node.retval.unwrap_or(value));
        warn!(node = %node.name, value, exit = code, "node requested workflow abort");
        Some(WorkflowExit::Abort(code))
    }

    /// Bookkeeping when a node enters SUBMITTED.
    pub fn mark_submitted(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.status = NodeStatus::Submitted;
        self.submitted_count += 1;
        if let Some(cat) = self.nodes[id.0].category {
            self.throttles.incr(cat);
        }
        self.status_dirty = true;
    }

    /// One proc left the queue; returns true when it was the last one.
    pub fn decrement_queued(&mut self, id: NodeId) -> bool {
        let node = &mut self.nodes[id.0];
        if node.queued_procs == 0 {
            warn!(node = %node.name, "proc-end event with no procs queued");
            return false;
        }
        node.queued_procs -= 1;
        if node.queued_procs > 0 {
            return false;
        }
        self.submitted_count = self.submitted_count.saturating_sub(1);
        if let Some(cat) = self.nodes[id.0].category {
            self.throttles.decr(cat);
        }
        true
    }

    /// Flip a proc's idle bit and keep the workflow-wide count consistent.
    /// The count is clamped at zero; under `Strictness::Fatal` a clamp is an
    /// error instead.
    pub fn set_proc_idle(&mut self, id: NodeId, proc: i32, idle: bool) -> Result<()> {
        if !self.nodes[id.0].set_proc_idle(proc, idle) {
            return Ok(());
        }
        if idle {
            self.idle_procs += 1;
            return Ok(());
        }
        if self.idle_procs == 0 {
            let name = &self.nodes[id.0].name;
            if self.opts.strictness >= Strictness::Fatal {
                return Err(DagError::Semantics(format!(
                    "idle proc count underflow at node {name}"
                )));
            }
            warn!(node = %name, "idle proc count underflow; clamping to zero");
            return Ok(());
        }
        self.idle_procs -= 1;
        Ok(())
    }

    /// Evict everything except the FINAL node from the ready queue and
    /// switch into final-node-only mode.
    pub fn enter_final_run(&mut self) {
        self.final_run = true;
        let final_node = self.final_node;
        let evicted = self.ready.retain(|id| Some(id) == final_node);
        for id in &evicted {
            debug!(node = %self.nodes[id.0].name, "evicted from ready queue for final node");
        }
    }

    /// Human-readable status summary, rewritten whenever state changes.
    pub fn write_status_summary(&self, mut out: impl Write) -> std::io::Result<()> {
        let mut by_status: BTreeMap<&'static str, usize> = BTreeMap::new();
        for node in &self.nodes {
            *by_status.entry(node.status.name()).or_insert(0) += 1;
        }
        writeln!(out, "nodes total:     {}", self.nodes.len())?;
        for (status, count) in &by_status {
            writeln!(out, "  {status:<12} {count}")?;
        }
        writeln!(out, "done:            {}", self.nodes_done)?;
        writeln!(out, "failed:          {}", self.nodes_failed)?;
        writeln!(out, "futile:          {}", self.nodes_futile)?;
        writeln!(out, "idle procs:      {}", self.idle_procs)?;
        writeln!(out, "procs completed: {}", self.procs_completed)?;
        writeln!(
            out,
            "deferrals:       max_jobs={} max_idle={} category={}",
            self.deferrals_max_jobs, self.deferrals_max_idle, self.deferrals_category
        )?;
        for node in &self.nodes {
            if node.status == NodeStatus::Error {
                writeln!(
                    out,
                    "failed node {}: retval={} {}",
                    node.name,
                    node.retval.map_or_else(|| "?".into(), |r| r.to_string()),
                    node.error_text
                )?;
            }
        }
        let mut tallies: BTreeMap<i32, usize> = BTreeMap::new();
        for node in &self.nodes {
            for (&code, &count) in &node.exit_code_counts {
                *tallies.entry(code).or_insert(0) += count;
            }
        }
        if !tallies.is_empty() {
            writeln!(out, "exit code tallies:")?;
            for (code, count) in tallies {
                writeln!(out, "  {code}: {count}")?;
            }
        }
        Ok(())
    }

    /// Nodes currently bound to a real (non no-op) cluster in the queue.
    pub fn submitted_real_clusters(&self) -> BTreeSet<i64> {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Submitted && !n.job.is_noop() && n.job.is_set())
            .map(|n| n.job.cluster)
            .collect()
    }
}
