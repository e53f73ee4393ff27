//! `commit` and `merge-into-parent` steps.

use anyhow::Result;
use tracing::{info, instrument};

use crate::branches;
use crate::core::types::TicketAttr;
use crate::engine::Engine;
use crate::knowledge::RunState;

/// Stage everything, commit, and report commits not yet reported.
#[instrument(skip_all, fields(ticket = run.ticket.id))]
pub fn commit(engine: &Engine<'_>, run: &mut RunState, prefix: Option<&str>) -> Result<String> {
    let ticket = &run.ticket;
    let project = engine.project(&ticket.project)?;
    let git = engine.git(project);

    git.add_all()?;
    let subject = format!("#{} {}", ticket.id, ticket.subject);
    let message = match prefix {
        Some(prefix) => format!("{prefix} {subject}"),
        None => subject,
    };
    let committed = git.commit_staged(&message)?;
    let head = git.head_sha()?;

    let since = ticket
        .attribute(TicketAttr::LastCommit)
        .or_else(|| ticket.attribute(TicketAttr::ParentCommit))
        .map(str::to_string);
    if since.as_deref() == Some(head.as_str()) {
        info!(committed, "no new commits to report");
        return Ok("No new commits.".to_string());
    }
    let log = match &since {
        Some(since) => git.log_since(since)?,
        None => head.clone(),
    };
    let log = log.trim().to_string();
    engine.comment(ticket.id, &format!("New commits:\n\n```\n{log}\n```"))?;
    engine
        .tracker
        .set_attribute(ticket.id, TicketAttr::LastCommit, &head)?;
    run.ticket
        .attributes
        .insert(TicketAttr::LastCommit.key().to_string(), head);
    info!(committed, "commits reported");
    Ok(log)
}

pub fn merge_into_parent(engine: &Engine<'_>, run: &RunState, delete_branch: bool) -> Result<String> {
    Ok(branches::merge_into_parent(engine, &run.ticket, delete_branch)?.describe())
}
