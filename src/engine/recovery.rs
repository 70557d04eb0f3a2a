// src/engine/recovery.rs

//! Startup and crash recovery.
//!
//! Recovery rebuilds in-memory state purely by replaying the event log
//! through the normal dispatch path, so a recovered workflow is
//! indistinguishable from one that processed those events live. After the
//! replay, jobs the log says are queued are cross-checked against the
//! batch queue itself.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::model::NodeKind;
use crate::dag::graph::Dag;
use crate::dag::node::{NodeId, NodeStatus};
use crate::engine::{dispatch, submit, Services};
use crate::errors::{DagError, Result};
use crate::types::{ScriptKind, WorkflowExit};

/// Bring a fresh or recovering workflow to its running state. Returns a
/// workflow abort if replayed history contains one.
pub fn bootstrap(
    dag: &mut Dag,
    services: &mut Services<'_>,
    recover: bool,
) -> Result<Option<WorkflowExit>> {
    // Nodes premarked DONE complete before anything runs; children are
    // notified but not started until the ready pass below.
    let premarked: Vec<NodeId> = dag
        .nodes
        .iter()
        .filter(|n| n.pre_done)
        .map(|n| n.id)
        .collect();
    for id in premarked {
        dag.node_mut(id).retval = Some(0);
        dag.terminate_node(id, false, services)?;
    }

    if recover {
        info!("recovery: replaying event history");
        dag.in_recovery = true;
        services.log.rewind();
        let abort = dispatch::drain_log(dag, services);
        dag.in_recovery = false;
        if let Some(exit) = abort? {
            return Ok(Some(exit));
        }

        relaunch_post_scripts(dag, services);
        verify_queue(dag, services)?;
        info!(
            done = dag.nodes_done,
            failed = dag.nodes_failed,
            submitted = dag.submitted_count,
            "recovery complete"
        );
    }

    // SERVICE nodes and the provisioner run outside the dependency graph.
    let unmanaged: Vec<NodeId> = dag
        .service_nodes
        .iter()
        .copied()
        .chain(dag.provisioner)
        .collect();
    for id in unmanaged {
        if dag.node(id).status == NodeStatus::NotReady {
            submit::submit_unmanaged_node(dag, services, id)?;
        }
    }
    if dag.provisioner.is_none() {
        dag.provisioner_ready = true;
    }

    start_ready_nodes(dag, services)?;
    Ok(None)
}

/// Nodes that were in POSTRUN when the previous instance died: the job
/// finished but the POST result was never recorded, so the script runs
/// again this session.
fn relaunch_post_scripts(dag: &mut Dag, services: &mut Services<'_>) {
    let postrun: Vec<NodeId> = dag
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::PostRun)
        .map(|n| n.id)
        .collect();
    for id in postrun {
        let name = dag.node(id).name.clone();
        info!(node = %name, "re-running POST script after recovery");
        let exec = dag.script_exec(id, ScriptKind::Post);
        services.jobstate.script_event(&name, "POST_SCRIPT_STARTED", 0);
        dag.scripts.post.run(exec, services.launcher);
    }
}

/// Queue every managed node whose dependencies are already satisfied.
fn start_ready_nodes(dag: &mut Dag, services: &mut Services<'_>) -> Result<()> {
    for node in &mut dag.nodes {
        if node.kind == NodeKind::Job
            && node.status == NodeStatus::NotReady
            && node.waiting.is_empty()
        {
            node.status = NodeStatus::Ready;
        }
    }
    let startable: Vec<NodeId> = dag
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Job && n.can_submit() && !dag.ready.contains(n.id))
        .map(|n| n.id)
        .collect();
    for id in startable {
        dag.start_node(id, false, services)?;
    }
    Ok(())
}

/// Cross-check SUBMITTED nodes against what the batch queue actually holds.
/// First miss is flagged as a possible race and re-checked next time; a
/// second consecutive miss means the jobs are gone for good.
pub fn verify_queue(dag: &mut Dag, services: &mut Services<'_>) -> Result<()> {
    let queued: HashSet<i64> = services
        .queue
        .query()?
        .into_iter()
        .map(|(cluster, _)| cluster)
        .collect();

    let mut lost: Vec<String> = Vec::new();
    for node in &mut dag.nodes {
        if node.status != NodeStatus::Submitted || !node.job.is_set() || node.job.is_noop() {
            continue;
        }
        if queued.contains(&node.job.cluster) {
            node.missing_jobs = false;
            continue;
        }
        if node.missing_jobs {
            lost.push(format!("{} (cluster {})", node.name, node.job.cluster));
        } else {
            node.missing_jobs = true;
            warn!(
                node = %node.name,
                cluster = node.job.cluster,
                "submitted job not found in queue; re-checking next pass"
            );
        }
    }
    if !lost.is_empty() {
        return Err(DagError::LostJobs(lost.join(", ")));
    }
    Ok(())
}
