//! Branch lifecycle: mirror the ticket hierarchy onto git branches.

use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::branch::{ancestor_chain, branch_name, diff_link, merge_target};
use crate::core::types::{Ticket, TicketAttr};
use crate::engine::Engine;

/// Result of `merge-into-parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeReport {
    /// Skip-merge flag set; git untouched.
    Skipped { branch: String },
    Merged {
        branch: String,
        target: String,
        deleted: bool,
        diff_link: Option<String>,
    },
}

impl MergeReport {
    pub fn describe(&self) -> String {
        match self {
            MergeReport::Skipped { branch } => {
                format!("Merge of `{branch}` skipped: the ticket is marked skip_merge.")
            }
            MergeReport::Merged {
                branch,
                target,
                deleted,
                diff_link,
            } => {
                let mut text = format!("Merged `{branch}` into `{target}`.");
                if *deleted {
                    text.push_str(&format!(" Branch `{branch}` deleted."));
                }
                if let Some(link) = diff_link {
                    text.push_str(&format!("\n\nDiff: {link}"));
                }
                text
            }
        }
    }
}

/// Check out the ancestor chain root first, then the ticket branch.
///
/// Returns `true` when the ticket branch was created; its fork point is then
/// stored in the `parent_commit` attribute.
#[instrument(skip_all, fields(ticket = ticket.id))]
pub fn prepare_workplace(engine: &Engine<'_>, ticket: &Ticket) -> Result<bool> {
    let project = engine.project(&ticket.project)?;
    let git = engine.git(project);
    let prefix = engine.branch_prefix();
    git.ensure_no_unmerged()?;

    let mut ancestors = engine.ancestors(ticket)?;
    ancestors.reverse();
    let chain = ancestor_chain(&ancestors, &project.final_branch, prefix);
    for (idx, branch) in chain.iter().enumerate() {
        if idx == 0 || git.branch_exists(branch)? {
            git.checkout_branch(branch)
                .with_context(|| format!("check out chain branch {branch}"))?;
        } else {
            info!(branch = %branch, "creating missing ancestor branch");
            git.checkout_new_branch(branch)?;
        }
    }

    let own = branch_name(ticket, prefix);
    if git.branch_exists(&own)? {
        git.checkout_branch(&own)?;
        return Ok(false);
    }
    let fork_point = git.head_sha()?;
    git.checkout_new_branch(&own)?;
    engine
        .tracker
        .set_attribute(ticket.id, TicketAttr::ParentCommit, &fork_point)?;
    info!(branch = %own, fork_point = %fork_point, "ticket branch created");
    Ok(true)
}

/// Merge the ticket branch into the nearest existing ancestor branch, or the
/// final branch when none exists.
#[instrument(skip_all, fields(ticket = ticket.id, delete_after_merge))]
pub fn merge_into_parent(
    engine: &Engine<'_>,
    ticket: &Ticket,
    delete_after_merge: bool,
) -> Result<MergeReport> {
    let project = engine.project(&ticket.project)?;
    let prefix = engine.branch_prefix();
    let branch = branch_name(ticket, prefix);

    if ticket.flag(TicketAttr::SkipMerge) {
        let report = MergeReport::Skipped { branch };
        info!("skip_merge set, leaving branches untouched");
        engine.comment(ticket.id, &report.describe())?;
        return Ok(report);
    }

    let git = engine.git(project);
    git.ensure_no_unmerged()?;
    let ancestors = engine.ancestors(ticket)?;
    let mut existing = HashSet::new();
    for ancestor in &ancestors {
        let name = branch_name(ancestor, prefix);
        if git.branch_exists(&name)? {
            existing.insert(name);
        }
    }
    let target = merge_target(&ancestors, &project.final_branch, prefix, |name| {
        existing.contains(name)
    });

    git.checkout_branch(&target)
        .with_context(|| format!("check out merge target {target}"))?;
    git.merge_no_ff(&branch)
        .with_context(|| format!("merge {branch} into {target}"))?;
    if delete_after_merge {
        git.delete_branch(&branch)?;
    }

    let report = MergeReport::Merged {
        diff_link: diff_link(project.diff_url.as_deref(), &target, &branch),
        branch,
        target,
        deleted: delete_after_merge,
    };
    let text = report.describe();
    engine.comment(ticket.id, &text)?;
    if let Some(parent) = ancestors.first() {
        engine.comment(
            parent.id,
            &format!("Subtask #{} ({}): {text}", ticket.id, ticket.subject),
        )?;
    }
    info!(report = ?report, "merge finished");
    Ok(report)
}
