// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod jobstate;
pub mod logging;
pub mod queue;
pub mod rescue;
pub mod types;

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::dag::Dag;
use crate::engine::{EngineEvent, Runtime, RuntimeOptions};
use crate::errors::{DagError, Result};
use crate::events::FileEventLog;
use crate::exec::TokioLauncher;
use crate::jobstate::JobstateLog;
use crate::queue::NullQueue;
use crate::types::WorkflowExit;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - the workflow graph and cycle check
/// - event log, jobstate log, batch queue, script launcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<WorkflowExit> {
    let config_path = PathBuf::from(&args.config);
    let wf = load_and_validate(&config_path)?;
    let paths = wf.paths.clone();

    let dag = Dag::from_workflow(&wf)?;

    if dag.opts.detect_cycles {
        let shape = dag.shape();
        if shape.has_cycle {
            return Err(DagError::DagCycle(
                "workflow dependencies form a cycle".to_string(),
            ));
        }
        info!(
            nodes = dag.nodes.len(),
            height = shape.height,
            width = shape.width,
            "workflow graph is acyclic"
        );
    }

    let (tx, rx) = mpsc::unbounded_channel::<EngineEvent>();

    // Ctrl-C → rescue file and clean shutdown.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(EngineEvent::ShutdownRequested);
        });
    }

    let log = FileEventLog::new(&paths.event_log);
    let jobstate = JobstateLog::new(&paths.jobstate_log);
    let launcher = TokioLauncher::new(tx);

    let options = RuntimeOptions {
        recover: args.recover,
        dry_run: args.dry_run,
    };

    let runtime = Runtime::new(
        dag,
        paths,
        options,
        Box::new(NullQueue),
        Box::new(log),
        jobstate,
        Box::new(launcher),
        rx,
    );
    runtime.run().await
}
