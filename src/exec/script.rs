// src/exec/script.rs

//! Helper-script model.

use std::time::Duration;

use crate::config::model::ScriptConfig;
use crate::types::ScriptKind;

/// One PRE/POST/HOLD script bound to a node.
#[derive(Debug, Clone)]
pub struct Script {
    pub kind: ScriptKind,
    pub cmd: String,
    /// Exit status meaning "not ready yet; run me again after `defer_time`".
    pub defer_status: Option<i32>,
    pub defer_time: Duration,
    /// PRE only: completed successfully for the current attempt.
    pub done: bool,
    /// POST/HOLD: exit status of the main job, exported to the script.
    pub job_return: Option<i32>,
}

impl Script {
    pub fn from_config(kind: ScriptKind, cfg: &ScriptConfig) -> Self {
        Self {
            kind,
            cmd: cfg.cmd.clone(),
            defer_status: cfg.defer_status,
            defer_time: Duration::from_secs(cfg.defer_time_secs),
            done: false,
            job_return: None,
        }
    }

    /// Whether this exit status means the script should be re-queued
    /// rather than treated as finished.
    pub fn wants_defer(&self, exit_code: i32) -> bool {
        self.defer_status == Some(exit_code)
    }
}

/// Everything the launcher needs to start one script process.
#[derive(Debug, Clone)]
pub struct ScriptExec {
    pub node: String,
    pub kind: ScriptKind,
    pub cmd: String,
    pub dir: Option<std::path::PathBuf>,
    /// Exit status of the main job, if known (POST/HOLD scripts).
    pub job_return: Option<i32>,
    /// Current retry attempt of the owning node.
    pub retry: usize,
}
