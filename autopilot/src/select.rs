//! Ticket selection across configured projects.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::selector::{ProjectTickets, select_next};
use crate::core::types::Ticket;
use crate::engine::Engine;

/// Fetch open tickets of every configured project and pick the next one.
///
/// Projects are consulted in configuration order; the first project with an
/// unblocked, prioritized ticket wins.
#[instrument(skip_all, fields(projects = engine.config.projects.len()))]
pub fn select_next_ticket(engine: &Engine<'_>) -> Result<Option<Ticket>> {
    let mut projects = Vec::with_capacity(engine.config.projects.len());
    let mut ids = Vec::new();
    for project in &engine.config.projects {
        let open = engine
            .tracker
            .open_tickets(&project.id)
            .with_context(|| format!("load open tickets of project {}", project.id))?;
        ids.extend(open.iter().map(|t| t.id));
        projects.push(ProjectTickets {
            project: project.id.clone(),
            open,
        });
    }
    let relations = engine
        .tracker
        .blocking_relations(&ids)
        .context("load blocking relations")?;

    let selected = select_next(&projects, &relations, &engine.workflow.priorities).cloned();
    match &selected {
        Some(ticket) => info!(
            ticket = ticket.id,
            project = %ticket.project,
            issue_type = %ticket.issue_type,
            state = %ticket.state,
            "ticket selected"
        ),
        None => debug!(open = ids.len(), "nothing to select"),
    }
    Ok(selected)
}
