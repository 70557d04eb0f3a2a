// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{Strictness, SubmitOrder};

/// Top-level workflow file as read from TOML.
///
/// ```toml
/// [options]
/// max_jobs = 100
/// submit_order = "depth-first"
///
/// [category.io]
/// max_jobs = 4
///
/// [node.A]
/// submit = "a.sub"
///
/// [node.B]
/// submit = "b.sub"
/// parents = ["A"]
/// retry = 2
/// ```
///
/// The `[node.<name>]` tables are the programmatic stand-in for the external
/// DAG-file parser: they carry the same per-node directives (scripts, retry,
/// category, priority, DONE, ...) in already-parsed form.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    #[serde(default)]
    pub options: OptionsSection,

    #[serde(default)]
    pub paths: PathsSection,

    /// Throttle categories from `[category.<name>]`.
    #[serde(default)]
    pub category: BTreeMap<String, CategoryConfig>,

    /// All nodes from `[node.<name>]`; keys are the node names.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,
}

/// Validated workflow file. Constructed via `TryFrom<RawWorkflowFile>`
/// (see `config::validate`).
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub options: OptionsSection,
    pub paths: PathsSection,
    pub category: BTreeMap<String, CategoryConfig>,
    pub node: BTreeMap<String, NodeConfig>,
}

impl WorkflowFile {
    /// Only `config::validate` should call this.
    pub(crate) fn new_unchecked(raw: RawWorkflowFile) -> Self {
        Self {
            options: raw.options,
            paths: raw.paths,
            category: raw.category,
            node: raw.node,
        }
    }
}

/// `[options]` section: the resolved daemon options object.
///
/// A `0` for any of the `max_*` limits means "unlimited".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OptionsSection {
    /// Global cap on concurrently submitted nodes.
    pub max_jobs: usize,
    /// Global cap on idle job procs across the whole workflow.
    pub max_idle: usize,

    /// Concurrency caps for the three script pools.
    pub max_pre_scripts: usize,
    pub max_post_scripts: usize,
    pub max_hold_scripts: usize,

    /// Maximum submissions attempted in one timer tick.
    pub max_submits_per_interval: usize,
    /// Wall-clock budget for one submit cycle, in seconds.
    pub submit_cycle_budget_secs: u64,
    /// Skip the cycle time-budget check and submit as fast as possible.
    pub aggressive_submit: bool,

    /// Initial delay after a failed submission, doubled per consecutive
    /// failure.
    pub submit_retry_delay_secs: u64,
    /// Attempts before a failing submission becomes a permanent node failure.
    pub max_submit_attempts: usize,

    /// Ready-queue ordering for newly ready nodes.
    pub submit_order: SubmitOrder,
    /// Retried nodes go to the front of the ready queue.
    pub retry_node_first: bool,

    /// Escalation threshold for recoverable anomalies.
    pub strictness: Strictness,

    /// Abort the workflow when a submit event arrives out of the expected
    /// submission order (single-log sanity check).
    pub abort_on_scary_submit: bool,

    /// Remove a node's jobs after this many hold events (0 = unlimited).
    pub max_holds_per_node: usize,

    /// Run the cycle check before starting.
    pub detect_cycles: bool,

    /// Seconds between periodic lost-job queue verifications, and the
    /// cooldown applied after a failed query.
    pub verify_interval_secs: u64,

    /// Main loop tick interval in seconds.
    pub tick_interval_secs: u64,
}

impl Default for OptionsSection {
    fn default() -> Self {
        Self {
            max_jobs: 0,
            max_idle: 0,
            max_pre_scripts: 20,
            max_post_scripts: 20,
            max_hold_scripts: 20,
            max_submits_per_interval: 100,
            submit_cycle_budget_secs: 5,
            aggressive_submit: false,
            submit_retry_delay_secs: 1,
            max_submit_attempts: 6,
            submit_order: SubmitOrder::BreadthFirst,
            retry_node_first: false,
            strictness: Strictness::Normal,
            abort_on_scary_submit: false,
            max_holds_per_node: 0,
            detect_cycles: true,
            verify_interval_secs: 300,
            tick_interval_secs: 5,
        }
    }
}

/// `[paths]` section: on-disk artifacts the engine reads and writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    /// The append-only job event log (single source of truth).
    pub event_log: PathBuf,
    /// Observability log for external dashboards; never read back.
    pub jobstate_log: PathBuf,
    /// Where the rescue file is written on abort or save point.
    pub rescue_file: PathBuf,
    /// Crash marker; its presence at startup forces recovery.
    pub lock_file: PathBuf,
    /// Human-readable node status summary.
    pub status_file: PathBuf,
    /// Touch this file to halt submissions.
    pub halt_file: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            event_log: PathBuf::from("workflow.events"),
            jobstate_log: PathBuf::from("workflow.jobstate"),
            rescue_file: PathBuf::from("workflow.rescue"),
            lock_file: PathBuf::from("workflow.lock"),
            status_file: PathBuf::from("workflow.status"),
            halt_file: PathBuf::from("workflow.halt"),
        }
    }
}

/// `[category.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryConfig {
    /// Max concurrently submitted nodes in this category.
    pub max_jobs: usize,
}

/// Role of a node within the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Job,
    Final,
    Service,
    Provisioner,
}

/// One helper script attached to a node.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    /// Shell command line.
    pub cmd: String,
    /// Exit status that means "try again later" rather than done.
    #[serde(default)]
    pub defer_status: Option<i32>,
    /// Seconds to wait before re-queueing a deferred script.
    #[serde(default)]
    pub defer_time_secs: u64,
}

/// One VARS entry for a node.
#[derive(Debug, Clone, Deserialize)]
pub struct VarConfig {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub prepend: bool,
}

/// `[node.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Submit description handed to the batch-queue collaborator.
    pub submit: String,

    /// Working directory for the node's job and scripts.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default, rename = "type")]
    pub kind: NodeKind,

    /// Names of parent nodes that must finish first.
    #[serde(default)]
    pub parents: Vec<String>,

    #[serde(default)]
    pub pre: Option<ScriptConfig>,
    #[serde(default)]
    pub post: Option<ScriptConfig>,
    #[serde(default)]
    pub hold: Option<ScriptConfig>,

    /// PRE script exit code that skips the job and post script entirely.
    #[serde(default)]
    pub pre_skip: Option<i32>,

    /// Maximum retry attempts after failure.
    #[serde(default)]
    pub retry: usize,
    /// Exit value that short-circuits remaining retries.
    #[serde(default)]
    pub unless_exit: Option<i32>,

    /// Abort the whole workflow when the node exits with `value`;
    /// `status` optionally pins the daemon exit status.
    #[serde(default)]
    pub abort_dag_on: Option<AbortDagOnConfig>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub category: Option<String>,

    /// Node completes without touching the external queue.
    #[serde(default)]
    pub noop: bool,

    /// Premarked done (e.g. carried over from a rescue file).
    #[serde(default)]
    pub done: bool,

    /// Write a rescue save point when this node completes.
    #[serde(default)]
    pub save_file: Option<PathBuf>,

    #[serde(default)]
    pub vars: Vec<VarConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AbortDagOnConfig {
    pub value: i32,
    #[serde(default)]
    pub status: Option<i32>,
}
