// src/rescue.rs

//! Rescue files.
//!
//! A rescue file is a textual workflow description with completed nodes
//! marked DONE, written on failure, on abort, and at save points. Feeding
//! it (converted back into node tables) to a fresh run resumes the
//! workflow without redoing finished work.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::config::model::NodeKind;
use crate::dag::graph::Dag;
use crate::dag::node::NodeStatus;
use crate::errors::Result;

pub fn write_rescue(dag: &Dag, path: &Path, reason: &str) -> Result<()> {
    let text = render_rescue(dag, reason);
    fs::write(path, text)?;
    info!(path = %path.display(), reason, "rescue file written");
    Ok(())
}

pub fn render_rescue(dag: &Dag, reason: &str) -> String {
    let mut out = String::new();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let _ = writeln!(out, "# Rescue written at unix time {now}");
    let _ = writeln!(out, "# Reason: {reason}");
    let _ = writeln!(out, "# Total nodes: {}", dag.nodes.len());
    let _ = writeln!(out, "# Nodes done: {}", dag.nodes_done);
    let _ = writeln!(out, "# Nodes failed: {}", dag.nodes_failed);
    out.push('\n');

    for node in &dag.nodes {
        let keyword = match node.kind {
            NodeKind::Job => "JOB",
            NodeKind::Final => "FINAL",
            NodeKind::Service => "SERVICE",
            NodeKind::Provisioner => "PROVISIONER",
        };
        let _ = write!(out, "{keyword} {} {}", node.name, node.submit_desc);
        if let Some(dir) = &node.dir {
            let _ = write!(out, " DIR {}", dir.display());
        }
        if node.noop {
            out.push_str(" NOOP");
        }
        out.push('\n');

        for (script, label) in [(&node.pre, "PRE"), (&node.post, "POST"), (&node.hold, "HOLD")] {
            if let Some(s) = script {
                let _ = writeln!(out, "SCRIPT {label} {} {}", node.name, s.cmd);
            }
        }
        if let Some(skip) = node.pre_skip {
            let _ = writeln!(out, "PRE_SKIP {} {skip}", node.name);
        }
        if node.retry_max > 0 {
            let left = node.retry_max.saturating_sub(node.retries);
            let _ = write!(out, "RETRY {} {left}", node.name);
            if let Some(v) = node.retry_abort_val {
                let _ = write!(out, " UNLESS-EXIT {v}");
            }
            out.push('\n');
        }
        if let Some(abort) = node.abort_dag_on {
            let _ = write!(out, "ABORT-DAG-ON {} {}", node.name, abort.value);
            if let Some(status) = abort.status {
                let _ = write!(out, " RETURN {status}");
            }
            out.push('\n');
        }
        if !node.vars.is_empty() {
            let _ = write!(out, "VARS {}", node.name);
            for var in &node.vars {
                if var.prepend {
                    let _ = write!(out, " PREPEND {}=\"{}\"", var.name, var.value);
                } else {
                    let _ = write!(out, " {}=\"{}\"", var.name, var.value);
                }
            }
            out.push('\n');
        }
        if node.explicit_priority != 0 {
            let _ = writeln!(out, "PRIORITY {} {}", node.name, node.explicit_priority);
        }
        if let Some(cat) = node.category {
            let _ = writeln!(out, "CATEGORY {} {}", node.name, dag.throttles.get(cat).name);
        }
        if node.status == NodeStatus::Done && node.counted_as_done {
            let _ = writeln!(out, "DONE {}", node.name);
        }
        out.push('\n');
    }

    for info in dag.throttles.iter() {
        if info.is_set() {
            let _ = writeln!(out, "MAXJOBS {} {}", info.name, info.max_jobs);
        }
    }

    for node in &dag.nodes {
        if node.children.is_empty() {
            continue;
        }
        let _ = write!(out, "PARENT {} CHILD", node.name);
        for &child in &node.children {
            let _ = write!(out, " {}", dag.node(child).name);
        }
        out.push('\n');
    }
    out
}
