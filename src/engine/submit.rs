// src/engine/submit.rs

//! The submit cycle: move nodes from the ready queue into the batch queue,
//! subject to the global, idle, and per-category limits.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::dag::graph::Dag;
use crate::dag::node::{NodeId, NodeStatus, RET_SUBMIT_FAILED};
use crate::engine::{dispatch, Services};
use crate::errors::{DagError, Result};
use crate::events::{EventDetail, ExitOutcome, JobEvent};
use crate::queue::SubmitResult;

/// Backoff after a failed submission never grows beyond this.
const MAX_SUBMIT_DELAY: Duration = Duration::from_secs(600);

/// One pass over the ready queue. Returns how many nodes were handed to
/// the queue (or synthesized, for no-op and dry-run nodes).
pub fn submit_ready_nodes(
    dag: &mut Dag,
    services: &mut Services<'_>,
    dry_run: bool,
) -> Result<usize> {
    if let Some(next) = dag.next_submit_time
        && Instant::now() < next
    {
        debug!("submission backoff in effect, skipping cycle");
        return Ok(0);
    }
    if dag.provisioner.is_some() && !dag.provisioner_ready {
        debug!("waiting for provisioner to report ready");
        return Ok(0);
    }

    let started = Instant::now();
    let budget = Duration::from_secs(dag.opts.submit_cycle_budget_secs);
    let mut submitted = 0usize;
    let mut throttled: Vec<NodeId> = Vec::new();

    while submitted < dag.opts.max_submits_per_interval {
        if dag.ready.is_empty() {
            break;
        }
        if dag.opts.max_jobs > 0 && dag.submitted_count >= dag.opts.max_jobs {
            dag.deferrals_max_jobs += dag.ready.len() as u64;
            debug!(
                max_jobs = dag.opts.max_jobs,
                waiting = dag.ready.len(),
                "global job limit reached"
            );
            break;
        }
        if dag.opts.max_idle > 0 && dag.idle_procs >= dag.opts.max_idle as i64 {
            dag.deferrals_max_idle += dag.ready.len() as u64;
            debug!(
                max_idle = dag.opts.max_idle,
                idle = dag.idle_procs,
                "idle proc limit reached"
            );
            break;
        }
        if !dag.opts.aggressive_submit && started.elapsed() > budget {
            debug!("submit cycle time budget spent");
            break;
        }

        let Some(id) = dag.ready.pop() else { break };

        if dag.final_run && Some(id) != dag.final_node {
            debug!(node = %dag.node(id).name, "dropping ready node in final-node mode");
            continue;
        }
        if dag.node(id).status != NodeStatus::Ready {
            return Err(DagError::Semantics(format!(
                "node {} in ready queue has status {}",
                dag.node(id).name,
                dag.node(id).status.name()
            )));
        }

        if let Some(cat) = dag.node(id).category
            && dag.throttles.get(cat).at_capacity()
        {
            dag.deferrals_category += 1;
            throttled.push(id);
            continue;
        }

        if dag.node(id).noop || dry_run {
            synthesize_noop_run(dag, services, id)?;
            submitted += 1;
            continue;
        }

        match try_submit(dag, services, id) {
            SubmitResult::Submitted(job) => {
                record_successful_submit(dag, id, job);
                submitted += 1;
            }
            SubmitResult::Failed => {
                record_failed_submit(dag, services, id);
                break;
            }
            SubmitResult::Deferred => {
                debug!(node = %dag.node(id).name, "queue declined submission, retrying later");
                dag.enqueue_ready(id, false);
                break;
            }
        }
    }

    // Throttled nodes go back to the front so a freed category slot reaches
    // them before newly ready work.
    for &id in throttled.iter().rev() {
        let priority = dag.node(id).effective_priority;
        dag.ready.push_front(id, priority);
    }

    if submitted > 0 {
        dag.status_dirty = true;
        services.queue.reschedule();
    }
    Ok(submitted)
}

fn try_submit(dag: &mut Dag, services: &mut Services<'_>, id: NodeId) -> SubmitResult {
    let node = dag.node(id);
    services.queue.submit(
        &node.name,
        &node.submit_desc,
        node.effective_priority,
        &node.vars,
    )
}

fn record_successful_submit(dag: &mut Dag, id: NodeId, job: crate::events::JobId) {
    dag.register_job(id, job);
    dag.mark_submitted(id);
    dag.expected_submits.push_back(id);
    let node = dag.node_mut(id);
    node.submit_tries = 0;
    info!(node = %node.name, job = %job, "submitted");
    dag.next_submit_time = None;
    dag.submit_delay = Duration::from_secs(dag.opts.submit_retry_delay_secs.max(1));
}

/// Apply attempt accounting and exponential backoff to a failed submission.
/// Exhausting the attempts is a permanent node failure that short-circuits
/// the node's own retries.
fn record_failed_submit(dag: &mut Dag, services: &mut Services<'_>, id: NodeId) {
    let node = dag.node_mut(id);
    node.submit_tries += 1;
    let tries = node.submit_tries;
    let max = dag.opts.max_submit_attempts;
    if tries >= max {
        let node = dag.node_mut(id);
        node.is_successful = false;
        node.retval = Some(RET_SUBMIT_FAILED);
        node.error_text = format!("job submission failed {tries} times");
        node.poison_retries();
        // Exhaustion is a terminal job failure: the POST script (if any)
        // still runs, with the synthetic submit-failure code as the result.
        if dag.node(id).post.is_some() {
            dispatch::run_post_script(dag, services, id);
        } else {
            dag.node_mut(id).status = NodeStatus::Error;
            dag.fail_node(id, services);
        }
        return;
    }

    warn!(
        node = %dag.node(id).name,
        tries,
        max,
        delay_secs = dag.submit_delay.as_secs(),
        "submission failed, backing off"
    );
    // Failed node goes back to the front; nothing else submits until the
    // backoff expires.
    let priority = dag.node(id).effective_priority;
    dag.ready.push_front(id, priority);
    dag.next_submit_time = Some(Instant::now() + dag.submit_delay);
    dag.submit_delay = (dag.submit_delay * 2).min(MAX_SUBMIT_DELAY);
}

/// No-op and dry-run nodes never touch the external queue: a locally
/// generated job id plus synthetic submit and terminate events take the
/// node through the normal event path.
fn synthesize_noop_run(dag: &mut Dag, services: &mut Services<'_>, id: NodeId) -> Result<()> {
    let job = dag.next_noop_job();
    dag.register_job(id, job);
    dag.mark_submitted(id);
    dag.expected_submits.push_back(id);
    let name = dag.node(id).name.clone();
    debug!(node = %name, job = %job, "completing no-op node through the log");

    services
        .log
        .append(&JobEvent::new(job, EventDetail::Submitted { node: name }))?;
    services.log.append(&JobEvent::new(
        job,
        EventDetail::Terminated { exit: ExitOutcome::Code(0) },
    ))?;
    Ok(())
}

/// Direct submission outside the ready queue, used for SERVICE and
/// PROVISIONER nodes at startup.
pub fn submit_unmanaged_node(
    dag: &mut Dag,
    services: &mut Services<'_>,
    id: NodeId,
) -> Result<()> {
    dag.node_mut(id).status = NodeStatus::Ready;
    match try_submit(dag, services, id) {
        SubmitResult::Submitted(job) => {
            record_successful_submit(dag, id, job);
            Ok(())
        }
        SubmitResult::Failed | SubmitResult::Deferred => Err(DagError::Semantics(format!(
            "could not submit {:?} node {}",
            dag.node(id).kind,
            dag.node(id).name
        ))),
    }
}
