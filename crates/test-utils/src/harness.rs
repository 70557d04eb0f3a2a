//! Engine test harness: a graph plus fake collaborators, with helpers that
//! play the role of the batch queue reporting progress through the log.

use dagrun::dag::node::Node;
use dagrun::dag::{Dag, NodeId, NodeStatus};
use dagrun::engine::{dispatch, recovery, submit, Services};
use dagrun::events::{EventDetail, ExitOutcome, JobEvent, JobId};
use dagrun::jobstate::JobstateLog;
use dagrun::types::WorkflowExit;

use crate::builders;
use crate::fakes::{FakeQueue, RecordingLauncher, VecEventLog};

pub struct Harness {
    pub dag: Dag,
    pub queue: FakeQueue,
    pub log: VecEventLog,
    pub jobstate: JobstateLog,
    pub launcher: RecordingLauncher,
    delivered_submits: usize,
}

impl Harness {
    pub fn new(toml_src: &str) -> Self {
        Self {
            dag: builders::dag(toml_src),
            queue: FakeQueue::new(),
            log: VecEventLog::new(),
            jobstate: JobstateLog::disabled(),
            launcher: RecordingLauncher::new(),
            delivered_submits: 0,
        }
    }

    pub fn split(&mut self) -> (&mut Dag, Services<'_>) {
        (
            &mut self.dag,
            Services {
                queue: &mut self.queue,
                log: &mut self.log,
                jobstate: &mut self.jobstate,
                launcher: &mut self.launcher,
            },
        )
    }

    /// Fresh start: premarked DONE handling plus the initial ready pass.
    pub fn bootstrap(&mut self) {
        let (dag, mut services) = self.split();
        recovery::bootstrap(dag, &mut services, false).expect("bootstrap should succeed");
    }

    /// Start with a full replay of whatever is already in the log.
    pub fn recover(&mut self) -> Option<WorkflowExit> {
        let (dag, mut services) = self.split();
        recovery::bootstrap(dag, &mut services, true).expect("recovery should succeed")
    }

    pub fn submit(&mut self) -> usize {
        let (dag, mut services) = self.split();
        submit::submit_ready_nodes(dag, &mut services, false)
            .expect("submit cycle should succeed")
    }

    pub fn drain(&mut self) -> Option<WorkflowExit> {
        let (dag, mut services) = self.split();
        dispatch::drain_log(dag, &mut services).expect("event dispatch should succeed")
    }

    /// One engine step: process events, submit ready work, acknowledge the
    /// submissions through the log, process again.
    pub fn cycle(&mut self) -> Option<WorkflowExit> {
        if let Some(exit) = self.drain() {
            return Some(exit);
        }
        self.submit();
        self.deliver_submits();
        self.drain()
    }

    /// Write a submit event for every queue submission not yet acknowledged.
    pub fn deliver_submits(&mut self) {
        while self.delivered_submits < self.queue.submissions.len() {
            let (name, cluster) = self.queue.submissions[self.delivered_submits].clone();
            self.delivered_submits += 1;
            self.log.push(JobEvent::new(
                JobId::new(cluster, 0, 0),
                EventDetail::Submitted { node: name },
            ));
        }
    }

    pub fn id(&self, name: &str) -> NodeId {
        self.dag
            .find_by_name(name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    pub fn node(&self, name: &str) -> &Node {
        self.dag.node(self.id(name))
    }

    pub fn status(&self, name: &str) -> NodeStatus {
        self.node(name).status
    }

    pub fn job(&self, name: &str) -> JobId {
        self.node(name).job
    }

    pub fn push_event(&mut self, name: &str, detail: EventDetail) {
        let job = self.job(name);
        self.log.push(JobEvent::new(job, detail));
    }

    pub fn execute(&mut self, name: &str) {
        self.push_event(name, EventDetail::Executing);
    }

    pub fn terminate(&mut self, name: &str, code: i32) {
        self.push_event(name, EventDetail::Terminated { exit: ExitOutcome::Code(code) });
    }

    pub fn abort_job(&mut self, name: &str, reason: &str) {
        self.push_event(name, EventDetail::Aborted { reason: reason.to_string() });
    }

    /// Simulate a PRE script finishing (pool bookkeeping plus dispatch).
    pub fn pre_exit(&mut self, name: &str, exit: ExitOutcome) -> Option<WorkflowExit> {
        let id = self.id(name);
        let (dag, mut services) = self.split();
        dag.scripts.pre.on_exit(services.launcher);
        dispatch::pre_script_exited(dag, &mut services, id, exit)
            .expect("pre script dispatch should succeed")
    }

    /// Simulate a POST script finishing: its result is recorded in the log,
    /// as the runtime does, and applied on the next drain.
    pub fn post_exit(&mut self, name: &str, exit: ExitOutcome) {
        let job = self.job(name);
        let (dag, services) = self.split();
        dag.scripts.post.on_exit(services.launcher);
        self.log.push(JobEvent::new(
            job,
            EventDetail::PostScriptTerminated { node: name.to_string(), exit },
        ));
    }
}
