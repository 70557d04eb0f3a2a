// src/types.rs

use std::str::FromStr;

use serde::Deserialize;

/// Order in which ready nodes are submitted.
///
/// - `BreadthFirst`: nodes that became ready earlier are submitted first
///   (append to the ready queue; default).
/// - `DepthFirst`: newly ready nodes jump the queue (prepend), so one branch
///   of the DAG tends to run to completion before siblings start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitOrder {
    #[default]
    BreadthFirst,
    DepthFirst,
}

impl FromStr for SubmitOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "breadth-first" | "breadthfirst" => Ok(SubmitOrder::BreadthFirst),
            "depth-first" | "depthfirst" => Ok(SubmitOrder::DepthFirst),
            other => Err(format!(
                "invalid submit_order: {other} (expected \"breadth-first\" or \"depth-first\")"
            )),
        }
    }
}

/// How "this looks wrong but we can probably continue" conditions are
/// handled. Conditions carry a severity; severities at or above the
/// configured threshold become fatal, the rest are logged as warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Never escalate; warn on everything questionable.
    Lenient,
    /// Escalate severe anomalies only (default).
    #[default]
    Normal,
    /// Escalate everything, including tolerated bookkeeping anomalies such
    /// as the idle-count clamp.
    Fatal,
}

/// The three kinds of helper script a node may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Pre,
    Post,
    Hold,
}

impl ScriptKind {
    pub fn label(self) -> &'static str {
        match self {
            ScriptKind::Pre => "PRE",
            ScriptKind::Post => "POST",
            ScriptKind::Hold => "HOLD",
        }
    }
}

/// Process exit statuses, caller-distinguishable per the error design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowExit {
    Okay,
    Error,
    Abort(i32),
    Restart,
}

impl WorkflowExit {
    pub fn code(self) -> i32 {
        match self {
            WorkflowExit::Okay => 0,
            WorkflowExit::Error => 1,
            // ABORT-DAG-ON may pin a specific value; clamp into u8 range
            // like any process exit status.
            WorkflowExit::Abort(v) => v.clamp(0, 255),
            WorkflowExit::Restart => 3,
        }
    }
}
