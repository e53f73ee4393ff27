//! Explicit context shared by selection, execution and transitions.

use std::collections::HashSet;

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use crate::core::types::{Ticket, TicketId};
use crate::core::workflow::Workflow;
use crate::io::config::{EngineConfig, ProjectConfig};
use crate::io::git::Git;
use crate::io::llm::Llm;
use crate::io::process::CommandRunner;
use crate::io::prompt::PromptBuilder;
use crate::io::tracker::Tracker;

/// Configuration, workflow model and collaborators, built once at startup
/// and passed by reference.
pub struct Engine<'a> {
    pub config: EngineConfig,
    pub workflow: Workflow,
    pub tracker: &'a dyn Tracker,
    pub llm: &'a dyn Llm,
    pub runner: &'a dyn CommandRunner,
}

impl<'a> Engine<'a> {
    pub fn new(
        config: EngineConfig,
        workflow: Workflow,
        tracker: &'a dyn Tracker,
        llm: &'a dyn Llm,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            workflow,
            tracker,
            llm,
            runner,
        }
    }

    pub fn project(&self, id: &str) -> Result<&ProjectConfig> {
        self.config
            .project(id)
            .ok_or_else(|| anyhow!("project '{id}' is not configured"))
    }

    /// Git bound to the project's checkout.
    pub fn git(&self, project: &ProjectConfig) -> Git<'a> {
        Git::new(
            &project.path,
            self.runner,
            self.config.engine.command_timeout(),
        )
    }

    pub fn branch_prefix(&self) -> &str {
        &self.config.engine.branch_prefix
    }

    pub fn prompt_builder(&self) -> PromptBuilder {
        PromptBuilder::new(self.config.engine.prompt_budget_bytes)
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, ticket: &Ticket) -> Result<Vec<Ticket>> {
        let mut seen: HashSet<TicketId> = HashSet::from([ticket.id]);
        let mut ancestors = Vec::new();
        let mut next = ticket.parent;
        while let Some(id) = next {
            if !seen.insert(id) {
                bail!("parent cycle at ticket {id}");
            }
            let parent = self
                .tracker
                .ticket(id)
                .with_context(|| format!("load ancestor {id} of ticket {}", ticket.id))?;
            next = parent.parent;
            ancestors.push(parent);
        }
        Ok(ancestors)
    }

    /// Post a comment; blank bodies are skipped.
    pub fn comment(&self, ticket: TicketId, body: &str) -> Result<()> {
        let body = body.trim();
        if body.is_empty() {
            debug!(ticket, "skipping empty comment");
            return Ok(());
        }
        self.tracker.add_comment(ticket, body)
    }
}
