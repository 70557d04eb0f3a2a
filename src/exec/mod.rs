// src/exec/mod.rs

//! Helper-script execution: the script model, bounded per-kind pools, and
//! the process launcher.

pub mod launcher;
pub mod script;
pub mod script_runner;

pub use launcher::{ScriptLauncher, TokioLauncher};
pub use script::{Script, ScriptExec};
pub use script_runner::{ScriptRunner, ScriptRunners};
