// src/exec/launcher.rs

//! Spawning helper-script processes.
//!
//! The engine stays single-threaded; a launcher starts the process on the
//! tokio runtime and reports completion back through the engine's event
//! channel as [`EngineEvent::ScriptExited`].

use std::process::Stdio;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::EngineEvent;
use crate::events::ExitOutcome;
use crate::exec::script::ScriptExec;

/// Boundary trait so tests can record launches without spawning processes.
pub trait ScriptLauncher: Send {
    fn launch(&mut self, exec: ScriptExec);
}

/// Real launcher: runs the script under `sh -c` with the node context
/// exported in the environment.
pub struct TokioLauncher {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl TokioLauncher {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl ScriptLauncher for TokioLauncher {
    fn launch(&mut self, exec: ScriptExec) {
        let tx = self.tx.clone();
        debug!(node = %exec.node, kind = exec.kind.label(), cmd = %exec.cmd, "launching script");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&exec.cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .env("DAGRUN_NODE", &exec.node)
            .env("DAGRUN_RETRY", exec.retry.to_string())
            .kill_on_drop(true);
        if let Some(dir) = &exec.dir {
            cmd.current_dir(dir);
        }
        if let Some(ret) = exec.job_return {
            cmd.env("DAGRUN_JOB_RETURN", ret.to_string());
        }

        let node = exec.node.clone();
        let kind = exec.kind;
        tokio::spawn(async move {
            let exit = match cmd.status().await {
                Ok(status) => match status.code() {
                    Some(code) => ExitOutcome::Code(code),
                    // Unix: no exit code means signal death.
                    None => {
                        #[cfg(unix)]
                        {
                            use std::os::unix::process::ExitStatusExt;
                            ExitOutcome::Signal(status.signal().unwrap_or(0))
                        }
                        #[cfg(not(unix))]
                        {
                            ExitOutcome::Code(1)
                        }
                    }
                },
                Err(err) => {
                    warn!(node = %node, error = %err, "failed to spawn script");
                    ExitOutcome::Code(127)
                }
            };
            let _ = tx.send(EngineEvent::ScriptExited { node, kind, exit });
        });
    }
}
