//! Workflow model loading.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

use crate::core::workflow::Workflow;
use crate::core::workflow_rules::validate_workflow;

/// Parse and validate a workflow TOML file.
///
/// Any violation rejects the whole model; the error lists all of them.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_workflow(path: &Path) -> Result<Workflow> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_workflow(&contents).with_context(|| format!("load workflow {}", path.display()))
}

pub fn parse_workflow(contents: &str) -> Result<Workflow> {
    let workflow: Workflow = toml::from_str(contents).context("parse workflow toml")?;
    let violations = validate_workflow(&workflow);
    if !violations.is_empty() {
        bail!("invalid workflow:\n- {}", violations.join("\n- "));
    }
    debug!(
        states = workflow.states.len(),
        issue_types = workflow.issue_types.len(),
        "workflow loaded"
    );
    Ok(workflow)
}
