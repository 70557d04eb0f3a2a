// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::Result;

/// Load a workflow file from the given path, returning the raw model.
///
/// This only performs TOML deserialization; semantic validation (unknown
/// parents, type restrictions, singletons) lives in [`crate::config::validate`].
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let raw: RawWorkflowFile = toml::from_str(&contents)?;

    Ok(raw)
}

/// Load a workflow file and run validation. The recommended entry point.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    let raw = load_from_path(&path)?;
    let wf = WorkflowFile::try_from(raw)?;
    Ok(wf)
}
