// src/config/mod.rs

//! Workflow configuration: TOML model, loading, and validation.
//!
//! The engine itself never parses anything; it receives the validated
//! [`model::WorkflowFile`] (the "already-resolved configuration object" of
//! the external-interface contract) built here.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::load_and_validate;
pub use model::{NodeConfig, NodeKind, OptionsSection, PathsSection, WorkflowFile};
