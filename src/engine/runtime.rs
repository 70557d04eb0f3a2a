// src/engine/runtime.rs

//! The daemon loop: a timer tick drives log draining and submission, an
//! event channel carries script completions and operator shutdown.

use std::fs;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::model::{NodeKind, PathsSection};
use crate::dag::graph::Dag;
use crate::dag::node::{NodeId, NodeStatus};
use crate::engine::{dispatch, recovery, submit, EngineEvent, Services};
use crate::errors::{DagError, Result};
use crate::events::{EventDetail, EventLog, ExitOutcome, JobEvent};
use crate::exec::ScriptLauncher;
use crate::jobstate::JobstateLog;
use crate::queue::BatchQueue;
use crate::rescue;
use crate::types::{ScriptKind, WorkflowExit};

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Replay event history before going live, even without a crash marker.
    pub recover: bool,
    /// Complete every node locally instead of submitting real jobs.
    pub dry_run: bool,
}

pub struct Runtime {
    dag: Dag,
    paths: PathsSection,
    opts: RuntimeOptions,

    queue: Box<dyn BatchQueue>,
    log: Box<dyn EventLog>,
    jobstate: JobstateLog,
    launcher: Box<dyn ScriptLauncher>,
    rx: mpsc::UnboundedReceiver<EngineEvent>,

    /// Exit decided by an abort that is waiting for the FINAL node.
    pending_exit: Option<WorkflowExit>,
    final_started: bool,
    last_verify: Instant,
    verify_cooldown_until: Option<Instant>,
}

/// Field-precise split so graph mutation and collaborator IO can happen in
/// one call.
fn split<'a>(rt: &'a mut Runtime) -> (&'a mut Dag, Services<'a>) {
    (
        &mut rt.dag,
        Services {
            queue: &mut *rt.queue,
            log: &mut *rt.log,
            jobstate: &mut rt.jobstate,
            launcher: &mut *rt.launcher,
        },
    )
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dag: Dag,
        paths: PathsSection,
        opts: RuntimeOptions,
        queue: Box<dyn BatchQueue>,
        log: Box<dyn EventLog>,
        jobstate: JobstateLog,
        launcher: Box<dyn ScriptLauncher>,
        rx: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        Self {
            dag,
            paths,
            opts,
            queue,
            log,
            jobstate,
            launcher,
            rx,
            pending_exit: None,
            final_started: false,
            last_verify: Instant::now(),
            verify_cooldown_until: None,
        }
    }

    pub async fn run(mut self) -> Result<WorkflowExit> {
        let crashed = self.paths.lock_file.exists();
        if crashed {
            info!(lock = %self.paths.lock_file.display(), "crash marker found, forcing recovery");
        }
        let recover = self.opts.recover || crashed;
        fs::write(&self.paths.lock_file, std::process::id().to_string())?;
        self.jobstate.workflow_started();

        let exit = match self.run_inner(recover).await {
            Ok(exit) => exit,
            Err(err) => {
                error!(error = %err, "fatal error, writing rescue file");
                let rescue_path = self.paths.rescue_file.clone();
                {
                    let (dag, mut services) = split(&mut self);
                    let _ = rescue::write_rescue(dag, &rescue_path, &err.to_string());
                    remove_outstanding_jobs(dag, &mut services);
                }
                self.run_final_after_failure().await
            }
        };

        self.write_status();
        self.jobstate.workflow_finished(exit.code());
        if let Err(err) = fs::remove_file(&self.paths.lock_file) {
            warn!(error = %err, "could not remove lock file");
        }
        info!(code = exit.code(), "workflow finished");
        Ok(exit)
    }

    async fn run_inner(&mut self, recover: bool) -> Result<WorkflowExit> {
        {
            let (dag, mut services) = split(self);
            if let Some(abort) = recovery::bootstrap(dag, &mut services, recover)? {
                if let Some(exit) = self.begin_abort(abort, "workflow abort")? {
                    return Ok(exit);
                }
            }
        }
        self.event_loop().await
    }

    /// A fatal error still gives the FINAL node its run before the process
    /// exits with an error code.
    async fn run_final_after_failure(&mut self) -> WorkflowExit {
        if self.dag.final_node.is_none() || self.final_started {
            return WorkflowExit::Error;
        }
        self.pending_exit = Some(WorkflowExit::Error);
        self.dag.enter_final_run();
        match self.event_loop().await {
            Ok(exit) => exit,
            Err(err) => {
                error!(error = %err, "FINAL node run abandoned");
                WorkflowExit::Error
            }
        }
    }

    async fn event_loop(&mut self) -> Result<WorkflowExit> {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.dag.opts.tick_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(exit) = self.on_tick()? {
                        return Ok(exit);
                    }
                }
                ev = self.rx.recv() => {
                    let Some(ev) = ev else {
                        return Err(DagError::Semantics(
                            "engine event channel closed".to_string(),
                        ));
                    };
                    if let Some(exit) = self.on_event(ev)? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    fn on_tick(&mut self) -> Result<Option<WorkflowExit>> {
        let halted = self.paths.halt_file.exists();
        if halted != self.dag.halted {
            if halted {
                info!(halt = %self.paths.halt_file.display(), "halt file present, pausing submissions");
            } else {
                info!("halt file removed, resuming submissions");
            }
            self.dag.halted = halted;
        }

        {
            let (dag, mut services) = split(self);
            let abort = dispatch::drain_log(dag, &mut services)?;
            dag.scripts.poll_parked(Instant::now(), services.launcher);
            if let Some(exit) = abort
                && let Some(exit) = self.begin_abort(exit, "workflow abort")?
            {
                return Ok(Some(exit));
            }
        }

        self.maybe_verify_queue()?;
        self.maybe_start_final()?;

        // The halt file pauses regular submissions; the FINAL node is exempt.
        if !self.dag.halted || self.dag.final_run {
            let dry_run = self.opts.dry_run;
            let (dag, mut services) = split(self);
            submit::submit_ready_nodes(dag, &mut services, dry_run)?;
        }

        if let Some(exit) = self.check_completion()? {
            return Ok(Some(exit));
        }

        // A halted workflow does not wait forever: once nothing is in
        // flight it records a rescue and exits with an error.
        if self.dag.halted && self.pending_exit.is_none() && nothing_in_flight(&self.dag) {
            warn!("halted with nothing in flight, shutting down");
            if let Some(exit) = self.begin_abort(WorkflowExit::Error, "workflow halted")? {
                return Ok(Some(exit));
            }
        }
        self.write_status();
        Ok(None)
    }

    fn on_event(&mut self, ev: EngineEvent) -> Result<Option<WorkflowExit>> {
        match ev {
            EngineEvent::ShutdownRequested => {
                warn!("shutdown requested, writing rescue file");
                if self.pending_exit.is_some() {
                    // Second request: the FINAL node forfeits its run.
                    return Ok(Some(WorkflowExit::Error));
                }
                self.begin_abort(WorkflowExit::Error, "operator shutdown")
            }
            EngineEvent::ScriptExited { node, kind, exit } => {
                self.on_script_exited(&node, kind, exit)
            }
        }
    }

    fn on_script_exited(
        &mut self,
        name: &str,
        kind: ScriptKind,
        exit: ExitOutcome,
    ) -> Result<Option<WorkflowExit>> {
        let Some(id) = self.dag.find_by_name(name) else {
            warn!(node = %name, "script exit for unknown node");
            return Ok(None);
        };

        let (dag, mut services) = split(self);
        dag.scripts.for_kind(kind).on_exit(services.launcher);
        services
            .jobstate
            .script_event(name, kind_exit_label(kind), exit.node_return());

        // A defer-status exit means "not finished, try again later".
        if let ExitOutcome::Code(code) = exit {
            let script = match kind {
                ScriptKind::Pre => dag.node(id).pre.as_ref(),
                ScriptKind::Post => dag.node(id).post.as_ref(),
                ScriptKind::Hold => dag.node(id).hold.as_ref(),
            };
            if let Some(script) = script
                && script.wants_defer(code)
            {
                let delay = script.defer_time;
                debug!(node = %name, kind = kind.label(), code, "script deferred");
                let exec = dag.script_exec(id, kind);
                dag.scripts.for_kind(kind).defer(exec, delay);
                return Ok(None);
            }
        }

        match kind {
            ScriptKind::Pre => {
                let abort = dispatch::pre_script_exited(dag, &mut services, id, exit)?;
                drop(services);
                match abort {
                    Some(exit) => self.begin_abort(exit, "workflow abort"),
                    None => Ok(None),
                }
            }
            ScriptKind::Post => {
                // The result goes through the log so recovery replay sees it.
                let job = dag.node(id).job;
                services.log.append(&JobEvent::new(
                    job,
                    EventDetail::PostScriptTerminated { node: name.to_string(), exit },
                ))?;
                Ok(None)
            }
            ScriptKind::Hold => {
                info!(node = %name, exit = %exit, "hold script finished");
                Ok(None)
            }
        }
    }

    /// Periodic cross-check that submitted jobs still exist in the queue.
    fn maybe_verify_queue(&mut self) -> Result<()> {
        let now = Instant::now();
        if let Some(until) = self.verify_cooldown_until {
            if now < until {
                return Ok(());
            }
            self.verify_cooldown_until = None;
        }
        let interval = Duration::from_secs(self.dag.opts.verify_interval_secs.max(1));
        if now.duration_since(self.last_verify) < interval {
            return Ok(());
        }
        self.last_verify = now;

        let result = {
            let (dag, mut services) = split(self);
            if dag.submitted_real_clusters().is_empty() {
                return Ok(());
            }
            recovery::verify_queue(dag, &mut services)
        };
        match result {
            Ok(()) => Ok(()),
            Err(err @ DagError::LostJobs(_)) => Err(err),
            Err(err) => {
                warn!(error = %err, "queue query failed, backing off");
                self.verify_cooldown_until = Some(now + interval);
                Ok(())
            }
        }
    }

    /// Once every regular node has resolved, the FINAL node (if any) gets
    /// its one run. After an abort it only waits for in-flight work to
    /// drain; the rest of the graph no longer runs.
    fn maybe_start_final(&mut self) -> Result<()> {
        let Some(final_id) = self.dag.final_node else {
            return Ok(());
        };
        if self.final_started {
            return Ok(());
        }
        let ready = if self.pending_exit.is_some() {
            nothing_in_flight(&self.dag)
        } else {
            job_nodes_resolved(&self.dag) && self.dag.scripts.outstanding() == 0
        };
        if !ready {
            return Ok(());
        }

        self.final_started = true;
        info!(node = %self.dag.node(final_id).name, "starting FINAL node");
        let (dag, mut services) = split(self);
        dag.enter_final_run();
        dag.node_mut(final_id).status = NodeStatus::Ready;
        dag.start_node(final_id, false, &mut services)?;
        Ok(())
    }

    fn check_completion(&mut self) -> Result<Option<WorkflowExit>> {
        if self.pending_exit.is_some() {
            if !nothing_in_flight(&self.dag) {
                return Ok(None);
            }
        } else if !job_nodes_resolved(&self.dag) || self.dag.scripts.outstanding() > 0 {
            return Ok(None);
        }
        if let Some(final_id) = self.dag.final_node
            && !self.dag.node(final_id).status.is_terminal()
        {
            return Ok(None);
        }

        let exit = match self.pending_exit {
            Some(exit) => exit,
            None if self.dag.succeeded() => WorkflowExit::Okay,
            None => {
                let reason = format!(
                    "{} node(s) failed, {} futile",
                    self.dag.nodes_failed, self.dag.nodes_futile
                );
                rescue::write_rescue(&self.dag, &self.paths.rescue_file, &reason)?;
                WorkflowExit::Error
            }
        };

        // SERVICE and provisioner jobs don't outlive the workflow.
        let (dag, mut services) = split(self);
        remove_unmanaged_jobs(dag, &mut services);
        Ok(Some(exit))
    }

    /// Abort the workflow: rescue file, job removal, then either the FINAL
    /// node's last run or an immediate exit. A deferred abort switches into
    /// final-node-only mode so nothing else gets submitted.
    fn begin_abort(&mut self, exit: WorkflowExit, reason: &str) -> Result<Option<WorkflowExit>> {
        {
            let rescue_path = self.paths.rescue_file.clone();
            let (dag, mut services) = split(self);
            rescue::write_rescue(dag, &rescue_path, reason)?;
            remove_outstanding_jobs(dag, &mut services);
        }
        if self.dag.final_node.is_some() && !self.final_started {
            self.pending_exit = Some(exit);
            self.dag.enter_final_run();
            info!("abort deferred until the FINAL node has run");
            return Ok(None);
        }
        Ok(Some(exit))
    }

    fn write_status(&mut self) {
        if !self.dag.status_dirty {
            return;
        }
        let mut buf = Vec::new();
        if self.dag.write_status_summary(&mut buf).is_ok() {
            if let Err(err) = fs::write(&self.paths.status_file, &buf) {
                warn!(error = %err, "could not write status file");
            }
        }
        self.dag.status_dirty = false;
    }
}

/// Every node that participates in the dependency graph has resolved.
fn job_nodes_resolved(dag: &Dag) -> bool {
    dag.nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Job)
        .all(|n| n.status.is_terminal())
}

/// No job procs queued and no helper scripts running.
fn nothing_in_flight(dag: &Dag) -> bool {
    dag.scripts.outstanding() == 0 && dag.nodes.iter().all(|n| !n.is_active())
}

fn kind_exit_label(kind: ScriptKind) -> &'static str {
    match kind {
        ScriptKind::Pre => "PRE_SCRIPT_TERMINATED",
        ScriptKind::Post => "POST_SCRIPT_TERMINATED",
        ScriptKind::Hold => "HOLD_SCRIPT_TERMINATED",
    }
}

fn remove_outstanding_jobs(dag: &mut Dag, services: &mut Services<'_>) {
    for cluster in dag.submitted_real_clusters() {
        if let Err(err) = services.queue.remove(cluster, "workflow shutting down") {
            warn!(cluster, error = %err, "job removal failed");
        }
    }
}

fn remove_unmanaged_jobs(dag: &mut Dag, services: &mut Services<'_>) {
    let unmanaged: Vec<NodeId> = dag
        .service_nodes
        .iter()
        .copied()
        .chain(dag.provisioner)
        .collect();
    for id in unmanaged {
        let node = dag.node(id);
        if node.status == NodeStatus::Submitted && node.job.is_set() && !node.job.is_noop() {
            let cluster = node.job.cluster;
            if let Err(err) = services.queue.remove(cluster, "workflow finished") {
                warn!(cluster, error = %err, "service job removal failed");
            }
        }
    }
}
