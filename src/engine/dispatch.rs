// src/engine/dispatch.rs

//! Event-log dispatch: the single place job state changes enter the graph.
//!
//! Every handler works for both live processing and recovery replay; the
//! mode only controls side effects (child starts, script launches, queue
//! removals), never the state transition itself. That is what makes a
//! recovery replay land in the same state a live run would have.

use tracing::{debug, warn};

use crate::dag::graph::Dag;
use crate::dag::node::{NodeId, NodeStatus, ABORT_TERM_MASK, EXEC_MASK, RET_JOB_ABORTED};
use crate::engine::Services;
use crate::errors::{DagError, Result};
use crate::events::{EventDetail, EventOutcome, ExitOutcome, JobEvent};
use crate::types::{ScriptKind, WorkflowExit};

/// Unreadable records tolerated before the log is declared broken.
const MAX_READ_ERRORS: usize = 10;
/// Undecodable records tolerated in live mode. In recovery any such record
/// is fatal: replayed history must be complete to be trusted.
const MAX_UNKNOWN_ERRORS: usize = 5;

/// Drain every available event from the log. Returns a requested workflow
/// abort, if some node's completion demanded one.
pub fn drain_log(dag: &mut Dag, services: &mut Services<'_>) -> Result<Option<WorkflowExit>> {
    loop {
        match services.log.poll() {
            EventOutcome::NoEvent => return Ok(None),
            EventOutcome::Event(ev) => {
                if let Some(exit) = process_one(dag, services, &ev)? {
                    return Ok(Some(exit));
                }
            }
            EventOutcome::ReadError => {
                dag.read_errors += 1;
                warn!(count = dag.read_errors, "event log read error");
                if dag.read_errors > MAX_READ_ERRORS {
                    return Err(DagError::EventLog(format!(
                        "giving up after {} read errors",
                        dag.read_errors
                    )));
                }
                return Ok(None);
            }
            EventOutcome::UnknownError => {
                dag.unknown_errors += 1;
                if dag.in_recovery {
                    return Err(DagError::EventLog(
                        "undecodable event during recovery; history is incomplete".to_string(),
                    ));
                }
                warn!(count = dag.unknown_errors, "undecodable event in log");
                if dag.unknown_errors > MAX_UNKNOWN_ERRORS {
                    return Err(DagError::EventLog(format!(
                        "giving up after {} undecodable events",
                        dag.unknown_errors
                    )));
                }
            }
        }
    }
}

/// Apply one event to the graph.
pub fn process_one(
    dag: &mut Dag,
    services: &mut Services<'_>,
    ev: &JobEvent,
) -> Result<Option<WorkflowExit>> {
    let id = match &ev.detail {
        EventDetail::Submitted { node }
        | EventDetail::ClusterSubmitted { node }
        | EventDetail::PreSkip { node }
        | EventDetail::PostScriptTerminated { node, .. } => dag.find_by_name(node),
        _ => dag.find_by_cluster(ev.job.cluster),
    };
    let Some(id) = id else {
        debug!(job = %ev.job, kind = ev.kind_name(), "event for unknown job, ignoring");
        return Ok(None);
    };

    let name = dag.node(id).name.clone();
    services.jobstate.job_event(&name, ev.kind_name(), ev.job);
    dag.status_dirty = true;

    let exit = match &ev.detail {
        EventDetail::Submitted { .. } => {
            handle_submit(dag, id, ev, false)?;
            None
        }
        EventDetail::ClusterSubmitted { .. } => {
            handle_submit(dag, id, ev, true)?;
            None
        }
        EventDetail::ClusterRemoved => handle_cluster_removed(dag, services, id)?,
        EventDetail::Executing => {
            dag.node_mut(id).set_proc_event(ev.job.proc, EXEC_MASK);
            dag.set_proc_idle(id, ev.job.proc, false)?;
            None
        }
        EventDetail::Terminated { exit } => handle_terminated(dag, services, id, ev, *exit)?,
        EventDetail::Aborted { reason } => handle_aborted(dag, services, id, ev, reason)?,
        EventDetail::Held { reason } => {
            handle_held(dag, services, id, ev, reason)?;
            None
        }
        EventDetail::Released => {
            dag.node_mut(id).release_proc(ev.job.proc);
            None
        }
        EventDetail::Suspended | EventDetail::Evicted => {
            dag.set_proc_idle(id, ev.job.proc, true)?;
            None
        }
        EventDetail::Unsuspended => {
            dag.set_proc_idle(id, ev.job.proc, false)?;
            None
        }
        EventDetail::ShadowException { message } => {
            warn!(node = %name, message = %message, "shadow exception");
            dag.set_proc_idle(id, ev.job.proc, true)?;
            None
        }
        EventDetail::PostScriptTerminated { exit, .. } => {
            handle_post_term(dag, services, id, *exit)?
        }
        EventDetail::PreSkip { .. } => {
            handle_pre_skip(dag, services, id)?;
            None
        }
        EventDetail::Generic => None,
    };
    Ok(exit)
}

fn handle_submit(dag: &mut Dag, id: NodeId, ev: &JobEvent, is_cluster: bool) -> Result<()> {
    if dag.node(id).is_waiting() {
        return Err(DagError::Semantics(format!(
            "submit event for node {} whose dependencies are unfinished",
            dag.node(id).name
        )));
    }

    if is_cluster {
        dag.node_mut(id).is_factory = true;
    }

    let first = !dag.node(id).seen_first_proc;
    if first {
        dag.node_mut(id).seen_first_proc = true;

        if dag.in_recovery {
            // Replay: the submission itself never ran this session, so the
            // binding and counters are reconstructed from the event.
            dag.register_job(id, ev.job);
            dag.mark_submitted(id);
        } else {
            check_submit_order(dag, id)?;
        }
    }

    if !dag.in_recovery && dag.node(id).job.is_set() && dag.node(id).job.cluster != ev.job.cluster
    {
        warn!(
            node = %dag.node(id).name,
            expected = dag.node(id).job.cluster,
            got = ev.job.cluster,
            "submit event for a different cluster, ignoring"
        );
        return Ok(());
    }

    let node = dag.node_mut(id);
    node.queued_procs += 1;
    node.submitted_procs += 1;
    dag.set_proc_idle(id, ev.job.proc, true)?;
    Ok(())
}

/// With a single event log, submit events must arrive in the order the
/// engine performed the submissions.
fn check_submit_order(dag: &mut Dag, id: NodeId) -> Result<()> {
    match dag.expected_submits.pop_front() {
        Some(expected) if expected == id => Ok(()),
        Some(expected) => {
            let msg = format!(
                "submit event for node {} but node {} was submitted first",
                dag.node(id).name,
                dag.node(expected).name
            );
            if dag.opts.abort_on_scary_submit {
                return Err(DagError::Semantics(msg));
            }
            warn!("{msg}");
            Ok(())
        }
        None => {
            warn!(node = %dag.node(id).name, "submit event with no submission outstanding");
            Ok(())
        }
    }
}

fn handle_terminated(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
    ev: &JobEvent,
    exit: ExitOutcome,
) -> Result<Option<WorkflowExit>> {
    let proc = ev.job.proc;
    if dag.node(id).proc_event_mask(proc) & ABORT_TERM_MASK != 0 {
        warn!(node = %dag.node(id).name, proc, "duplicate terminate/abort event, ignoring");
        return Ok(None);
    }
    dag.node_mut(id).set_proc_event(proc, ABORT_TERM_MASK);
    dag.set_proc_idle(id, proc, false)?;

    let ret = exit.node_return();
    dag.node_mut(id).record_exit_code(ret);

    if exit.succeeded() {
        dag.procs_completed += 1;
        let node = dag.node_mut(id);
        if node.is_successful {
            node.retval = Some(0);
        }
    } else {
        let node = dag.node_mut(id);
        if node.is_successful {
            node.is_successful = false;
            node.retval = Some(ret);
            node.status = NodeStatus::Error;
            node.error_text = format!("job proc {proc} failed with {exit}");
        }
        // Other procs of the cluster are pointless now.
        if !dag.in_recovery && dag.node(id).queued_procs > 1 && !ev.job.is_noop() {
            services.queue.remove(ev.job.cluster, "sibling proc failed")?;
        }
    }

    dag.decrement_queued(id);
    if dag.node(id).all_procs_done() {
        node_procs_finished(dag, services, id)?;
    }
    Ok(dag.check_abort(id))
}

fn handle_aborted(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
    ev: &JobEvent,
    reason: &str,
) -> Result<Option<WorkflowExit>> {
    let proc = ev.job.proc;
    if dag.node(id).proc_event_mask(proc) & ABORT_TERM_MASK != 0 {
        warn!(node = %dag.node(id).name, proc, "duplicate terminate/abort event, ignoring");
        return Ok(None);
    }
    dag.node_mut(id).set_proc_event(proc, ABORT_TERM_MASK);
    dag.set_proc_idle(id, proc, false)?;

    let node = dag.node_mut(id);
    node.aborted_procs += 1;
    if node.is_successful {
        node.is_successful = false;
        node.retval = Some(RET_JOB_ABORTED);
        node.status = NodeStatus::Error;
        node.error_text = format!("job proc {proc} aborted: {reason}");
    }
    // Other procs of the cluster are pointless now.
    if !dag.in_recovery && dag.node(id).queued_procs > 1 && !ev.job.is_noop() {
        services.queue.remove(ev.job.cluster, "sibling proc aborted")?;
    }

    dag.decrement_queued(id);
    if dag.node(id).all_procs_done() {
        node_procs_finished(dag, services, id)?;
    }
    Ok(dag.check_abort(id))
}

/// All procs of the node's current cluster have left the queue: move to the
/// POST script, a retry, success, or permanent failure.
fn node_procs_finished(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
) -> Result<()> {
    if dag.node(id).post.is_some() {
        run_post_script(dag, services, id);
        return Ok(());
    }
    if dag.node(id).is_successful {
        dag.terminate_node(id, !dag.in_recovery, services)
    } else if dag.node(id).do_retry() {
        dag.restart_node(id, !dag.in_recovery, services)
    } else {
        dag.fail_node(id, services);
        Ok(())
    }
}

pub(crate) fn run_post_script(dag: &mut Dag, services: &mut Services<'_>, id: NodeId) {
    let retval = dag.node(id).retval;
    let node = dag.node_mut(id);
    node.status = NodeStatus::PostRun;
    if let Some(post) = &mut node.post {
        post.job_return = retval;
    }
    if !dag.in_recovery {
        let name = dag.node(id).name.clone();
        let exec = dag.script_exec(id, ScriptKind::Post);
        services.jobstate.script_event(&name, "POST_SCRIPT_STARTED", 0);
        dag.scripts.post.run(exec, services.launcher);
    }
}

fn handle_post_term(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
    exit: ExitOutcome,
) -> Result<Option<WorkflowExit>> {
    if dag.node(id).status != NodeStatus::PostRun {
        warn!(
            node = %dag.node(id).name,
            status = dag.node(id).status.name(),
            "post script result for node not in POSTRUN"
        );
    }

    if exit.succeeded() {
        let node = dag.node_mut(id);
        node.retval = Some(0);
        node.is_successful = true;
        dag.terminate_node(id, !dag.in_recovery, services)?;
    } else {
        let ret = exit.node_return();
        let node = dag.node_mut(id);
        let job_text = match node.retval {
            Some(r) if !node.is_successful => format!(" (job result: {r})"),
            _ => String::new(),
        };
        node.is_successful = false;
        node.retval = Some(ret);
        node.status = NodeStatus::Error;
        node.error_text = format!("POST script failed with {exit}{job_text}");
        if dag.node(id).do_retry() {
            dag.restart_node(id, !dag.in_recovery, services)?;
        } else {
            dag.fail_node(id, services);
        }
    }
    Ok(dag.check_abort(id))
}

/// The PRE script exited with the configured skip code: the node completes
/// without running its job or POST script.
fn handle_pre_skip(dag: &mut Dag, services: &mut Services<'_>, id: NodeId) -> Result<()> {
    let node = dag.node_mut(id);
    node.retval = Some(0);
    if let Some(pre) = &mut node.pre {
        pre.done = true;
    }
    if node.status == NodeStatus::NotReady || node.status == NodeStatus::PreRun {
        node.status = NodeStatus::Ready;
    }
    dag.terminate_node(id, !dag.in_recovery, services)
}

/// PRE script result: queue the node, skip it, or fail/retry it. Not an
/// event-log handler (PRE results are not logged); the runtime routes
/// script completions here directly.
pub fn pre_script_exited(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
    exit: ExitOutcome,
) -> Result<Option<WorkflowExit>> {
    if dag.node(id).status != NodeStatus::PreRun {
        warn!(
            node = %dag.node(id).name,
            status = dag.node(id).status.name(),
            "PRE script result for node not in PRERUN"
        );
        return Ok(None);
    }

    if exit.succeeded() {
        let node = dag.node_mut(id);
        if let Some(pre) = &mut node.pre {
            pre.done = true;
        }
        node.status = NodeStatus::Ready;
        let is_retry = node.retries > 0;
        dag.start_node(id, is_retry, services)?;
        return Ok(None);
    }

    if let ExitOutcome::Code(code) = exit
        && dag.node(id).pre_skip == Some(code)
    {
        let name = dag.node(id).name.clone();
        debug!(node = %name, code, "PRE script skip: node completes without running");
        services.log.append(&JobEvent::new(
            dag.node(id).job,
            EventDetail::PreSkip { node: name },
        ))?;
        return Ok(None);
    }

    let ret = exit.node_return();
    let node = dag.node_mut(id);
    node.is_successful = false;
    node.retval = Some(ret);
    node.error_text = format!("PRE script failed with {exit}");

    // A POST script still runs (with the PRE failure as the job result) so
    // cleanup and notification happen; it decides the node's fate.
    if dag.node(id).post.is_some() {
        run_post_script(dag, services, id);
        return Ok(None);
    }

    dag.node_mut(id).status = NodeStatus::Error;
    if dag.node(id).do_retry() {
        dag.restart_node(id, true, services)?;
    } else {
        dag.fail_node(id, services);
    }
    Ok(dag.check_abort(id))
}

fn handle_held(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
    ev: &JobEvent,
    reason: &str,
) -> Result<()> {
    let proc = ev.job.proc;
    dag.set_proc_idle(id, proc, true)?;
    if !dag.node_mut(id).hold_proc(proc) {
        return Ok(());
    }
    let name = dag.node(id).name.clone();
    let times_held = dag.node(id).times_held;
    warn!(node = %name, proc, times_held, reason = %reason, "job proc held");

    if !dag.in_recovery && dag.node(id).hold.is_some() {
        let exec = dag.script_exec(id, ScriptKind::Hold);
        services.jobstate.script_event(&name, "HOLD_SCRIPT_STARTED", 0);
        dag.scripts.hold.run(exec, services.launcher);
    }

    let max_holds = dag.opts.max_holds_per_node;
    if !dag.in_recovery && max_holds > 0 && times_held >= max_holds {
        warn!(node = %name, max_holds, "hold limit reached, removing job");
        services
            .queue
            .remove(ev.job.cluster, "node exceeded its hold limit")?;
    }
    Ok(())
}

fn handle_cluster_removed(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
) -> Result<Option<WorkflowExit>> {
    dag.node_mut(id).is_factory = false;

    if dag.node(id).queued_procs > 0 {
        let name = dag.node(id).name.clone();
        let queued = dag.node(id).queued_procs;
        warn!(node = %name, queued, "cluster removed with procs still queued");
        while dag.node(id).queued_procs > 0 {
            dag.decrement_queued(id);
        }
        let node = dag.node_mut(id);
        if node.is_successful {
            node.is_successful = false;
            node.retval = Some(RET_JOB_ABORTED);
            node.status = NodeStatus::Error;
            node.error_text = format!("cluster removed with {queued} procs still queued");
        }
    }

    if dag.node(id).all_procs_done() {
        node_procs_finished(dag, services, id)?;
    }
    Ok(dag.check_abort(id))
}
