// src/config/validate.rs

use crate::config::model::{NodeKind, RawWorkflowFile, WorkflowFile};
use crate::errors::{DagError, Result};

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = DagError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        validate_raw(&raw)?;
        Ok(WorkflowFile::new_unchecked(raw))
    }
}

fn validate_raw(raw: &RawWorkflowFile) -> Result<()> {
    ensure_has_nodes(raw)?;
    validate_options(raw)?;
    validate_singletons(raw)?;
    validate_parents(raw)?;
    validate_type_restrictions(raw)?;
    validate_categories(raw)?;
    Ok(())
}

fn ensure_has_nodes(raw: &RawWorkflowFile) -> Result<()> {
    if raw.node.is_empty() {
        return Err(DagError::ConfigError(
            "workflow must contain at least one [node.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_options(raw: &RawWorkflowFile) -> Result<()> {
    let opts = &raw.options;
    if opts.max_submits_per_interval == 0 {
        return Err(DagError::ConfigError(
            "[options].max_submits_per_interval must be >= 1 (got 0)".to_string(),
        ));
    }
    if opts.max_submit_attempts == 0 {
        return Err(DagError::ConfigError(
            "[options].max_submit_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

/// At most one FINAL and at most one PROVISIONER node per workflow.
fn validate_singletons(raw: &RawWorkflowFile) -> Result<()> {
    for kind in [NodeKind::Final, NodeKind::Provisioner] {
        let named: Vec<&str> = raw
            .node
            .iter()
            .filter(|(_, n)| n.kind == kind)
            .map(|(name, _)| name.as_str())
            .collect();
        if named.len() > 1 {
            return Err(DagError::ConfigError(format!(
                "at most one {kind:?} node is allowed; found {}: {}",
                named.len(),
                named.join(", ")
            )));
        }
    }
    Ok(())
}

fn validate_parents(raw: &RawWorkflowFile) -> Result<()> {
    for (name, node) in raw.node.iter() {
        for parent in node.parents.iter() {
            if !raw.node.contains_key(parent) {
                return Err(DagError::ConfigError(format!(
                    "node '{name}' has unknown parent '{parent}'"
                )));
            }
            if parent == name {
                return Err(DagError::ConfigError(format!(
                    "node '{name}' cannot be its own parent"
                )));
            }
            let parent_kind = raw.node[parent].kind;
            if parent_kind != NodeKind::Job {
                return Err(DagError::ConfigError(format!(
                    "node '{name}' lists {parent_kind:?} node '{parent}' as a parent; \
                     only regular job nodes may have edges"
                )));
            }
        }
    }
    Ok(())
}

/// FINAL and SERVICE nodes cannot carry RETRY, PRIORITY, CATEGORY, or
/// ABORT-DAG-ON settings, and cannot have dependencies.
fn validate_type_restrictions(raw: &RawWorkflowFile) -> Result<()> {
    for (name, node) in raw.node.iter() {
        if matches!(node.kind, NodeKind::Job) {
            continue;
        }
        if !node.parents.is_empty() {
            return Err(DagError::ConfigError(format!(
                "{:?} node '{name}' cannot have parents",
                node.kind
            )));
        }
        if matches!(node.kind, NodeKind::Final | NodeKind::Service) {
            let mut illegal = Vec::new();
            if node.retry > 0 {
                illegal.push("retry");
            }
            if node.priority != 0 {
                illegal.push("priority");
            }
            if node.category.is_some() {
                illegal.push("category");
            }
            if node.abort_dag_on.is_some() {
                illegal.push("abort_dag_on");
            }
            if !illegal.is_empty() {
                return Err(DagError::ConfigError(format!(
                    "{:?} node '{name}' cannot specify: {}",
                    node.kind,
                    illegal.join(", ")
                )));
            }
        }
    }
    Ok(())
}

fn validate_categories(raw: &RawWorkflowFile) -> Result<()> {
    for (name, node) in raw.node.iter() {
        if let Some(cat) = &node.category {
            if !raw.category.contains_key(cat) {
                return Err(DagError::ConfigError(format!(
                    "node '{name}' references undefined category '{cat}'"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::model::WorkflowFile;
    use crate::errors::DagError;

    fn parse(toml: &str) -> Result<WorkflowFile, DagError> {
        let raw: super::RawWorkflowFile = toml::from_str(toml).map_err(DagError::from)?;
        WorkflowFile::try_from(raw)
    }

    #[test]
    fn minimal_workflow_validates() {
        let wf = parse(
            r#"
            [node.A]
            submit = "a.sub"
            "#,
        )
        .unwrap();
        assert_eq!(wf.node.len(), 1);
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(parse("[options]\nmax_jobs = 1\n").is_err());
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = parse(
            r#"
            [node.B]
            submit = "b.sub"
            parents = ["A"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown parent"));
    }

    #[test]
    fn self_parent_is_rejected() {
        let err = parse(
            r#"
            [node.A]
            submit = "a.sub"
            parents = ["A"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("own parent"));
    }

    #[test]
    fn two_final_nodes_are_rejected() {
        let err = parse(
            r#"
            [node.F1]
            submit = "f1.sub"
            type = "final"
            [node.F2]
            submit = "f2.sub"
            type = "final"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("at most one Final"));
    }

    #[test]
    fn final_node_cannot_retry() {
        let err = parse(
            r#"
            [node.F]
            submit = "f.sub"
            type = "final"
            retry = 2
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("retry"));
    }

    #[test]
    fn undefined_category_is_rejected() {
        let err = parse(
            r#"
            [node.A]
            submit = "a.sub"
            category = "io"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("undefined category"));
    }
}
