// src/engine/mod.rs

//! The execution engine.
//!
//! State transitions live in pure-ish functions over `Dag` plus a
//! [`Services`] bundle of collaborator handles; the async shell in
//! [`runtime`] owns the tokio loop and feeds them events.

pub mod dispatch;
pub mod recovery;
pub mod runtime;
pub mod submit;

use crate::events::{EventLog, ExitOutcome};
use crate::exec::ScriptLauncher;
use crate::jobstate::JobstateLog;
use crate::queue::BatchQueue;
use crate::types::ScriptKind;

pub use runtime::{Runtime, RuntimeOptions};

/// Everything that crosses the engine boundary besides the timer tick.
#[derive(Debug)]
pub enum EngineEvent {
    ScriptExited {
        node: String,
        kind: ScriptKind,
        exit: ExitOutcome,
    },
    /// Operator interrupt (ctrl-c / SIGTERM).
    ShutdownRequested,
}

/// Borrowed collaborator handles threaded through the transition functions,
/// so `Dag` itself stays free of IO.
pub struct Services<'a> {
    pub queue: &'a mut dyn BatchQueue,
    pub log: &'a mut dyn EventLog,
    pub jobstate: &'a mut JobstateLog,
    pub launcher: &'a mut dyn ScriptLauncher,
}
