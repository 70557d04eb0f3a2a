//! Builders for workflow fixtures used across tests.

use dagrun::config::model::{RawWorkflowFile, WorkflowFile};
use dagrun::dag::Dag;

/// Parse and validate a workflow from inline TOML.
pub fn workflow(toml_src: &str) -> WorkflowFile {
    let raw: RawWorkflowFile =
        toml::from_str(toml_src).expect("fixture TOML should parse");
    WorkflowFile::try_from(raw).expect("fixture workflow should validate")
}

/// Build a graph straight from inline TOML.
pub fn dag(toml_src: &str) -> Dag {
    Dag::from_workflow(&workflow(toml_src)).expect("fixture graph should build")
}

/// A linear chain `N0 -> N1 -> ... -> N(len-1)` with trivial submit files.
pub fn chain_toml(len: usize) -> String {
    let mut out = String::new();
    for i in 0..len {
        out.push_str(&format!("[node.N{i}]\nsubmit = \"n{i}.sub\"\n"));
        if i > 0 {
            out.push_str(&format!("parents = [\"N{}\"]\n", i - 1));
        }
    }
    out
}

/// A diamond: A -> (B, C) -> D.
pub fn diamond_toml() -> &'static str {
    r#"
    [node.A]
    submit = "a.sub"
    [node.B]
    submit = "b.sub"
    parents = ["A"]
    [node.C]
    submit = "c.sub"
    parents = ["A"]
    [node.D]
    submit = "d.sub"
    parents = ["B", "C"]
    "#
}
