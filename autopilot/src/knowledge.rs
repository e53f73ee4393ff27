//! Knowledge bundle assembly for a step.

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::history::ExecutionHistory;
use crate::core::types::{Ticket, TicketAttr, TicketId};
use crate::core::workflow::{ContextSource, Step};
use crate::engine::Engine;
use crate::io::prompt::{CommitPatch, FileSnippet, GlossaryEntry, KnowledgeBundle, TicketSummary};

/// State carried between the steps of one job run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub ticket: Ticket,
    pub history: ExecutionHistory,
    /// Files collected by `context-files`.
    pub extra_files: Vec<FileSnippet>,
    /// Patches collected by `context-commits`.
    pub commits: Vec<CommitPatch>,
    /// Output of the previous step.
    pub last_output: String,
}

impl RunState {
    pub fn new(ticket: Ticket) -> Self {
        Self {
            ticket,
            history: ExecutionHistory::default(),
            extra_files: Vec::new(),
            commits: Vec::new(),
            last_output: String::new(),
        }
    }
}

/// Gather the step's context sources plus history and carried extras.
pub fn build_bundle(engine: &Engine<'_>, run: &RunState, step: &Step) -> Result<KnowledgeBundle> {
    let ticket = &run.ticket;
    let tracker = engine.tracker;
    let limit = engine.config.engine.comments_limit;
    let mut bundle = KnowledgeBundle {
        instructions: step.prompt.trim().to_string(),
        history: (!run.history.is_empty()).then(|| run.history.render()),
        extra_files: run.extra_files.clone(),
        commits: run.commits.clone(),
        ..KnowledgeBundle::default()
    };

    for source in &step.context {
        match source {
            ContextSource::Issue => bundle.task = Some(TicketSummary::from(ticket)),
            ContextSource::Comments => {
                bundle.comments = comment_bodies(engine, ticket.id, limit)?;
            }
            ContextSource::LastComment => {
                bundle.last_comment = comment_bodies(engine, ticket.id, 1)?.pop();
            }
            ContextSource::Parent => {
                bundle.parent = tracker.parent(ticket)?.as_ref().map(TicketSummary::from);
            }
            ContextSource::Parents => {
                let mut ancestors = engine.ancestors(ticket)?;
                ancestors.reverse();
                bundle.parents = ancestors.iter().map(TicketSummary::from).collect();
            }
            ContextSource::Siblings => {
                bundle.siblings = summaries(&tracker.siblings(ticket)?);
            }
            ContextSource::Children => {
                bundle.children = summaries(&tracker.children(ticket.id)?);
            }
            ContextSource::Project => {
                let info = tracker.project(&ticket.project)?;
                bundle.project = non_empty(&format!("{}\n\n{}", info.name, info.description));
            }
            ContextSource::Wiki => {
                bundle.wiki = non_empty(&tracker.project(&ticket.project)?.wiki);
            }
            ContextSource::Files => bundle.affected_files = affected_files(engine, ticket)?,
            ContextSource::Glossary => {
                bundle.glossary = engine
                    .workflow
                    .issue_types
                    .iter()
                    .filter(|t| !t.description.trim().is_empty())
                    .map(|t| GlossaryEntry {
                        name: t.name.clone(),
                        description: t.description.trim().to_string(),
                    })
                    .collect();
            }
            ContextSource::ParentComments => {
                if let Some(parent) = ticket.parent {
                    bundle.parent_comments = comment_bodies(engine, parent, limit)?;
                }
            }
        }
    }
    debug!(
        ticket = ticket.id,
        sources = step.context.len(),
        extra_files = bundle.extra_files.len(),
        commits = bundle.commits.len(),
        "knowledge bundle assembled"
    );
    Ok(bundle)
}

fn comment_bodies(engine: &Engine<'_>, ticket: TicketId, limit: usize) -> Result<Vec<String>> {
    Ok(engine
        .tracker
        .comments(ticket, limit)?
        .into_iter()
        .map(|c| c.body)
        .collect())
}

fn summaries(tickets: &[Ticket]) -> Vec<TicketSummary> {
    tickets.iter().map(TicketSummary::from).collect()
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Files changed on the ticket branch since it forked.
fn affected_files(engine: &Engine<'_>, ticket: &Ticket) -> Result<Vec<String>> {
    let Some(fork_point) = ticket.attribute(TicketAttr::ParentCommit) else {
        return Ok(Vec::new());
    };
    let project = engine.project(&ticket.project)?;
    match engine.git(project).diff_names_since(fork_point) {
        Ok(files) => Ok(files),
        Err(err) => {
            warn!(ticket = ticket.id, err = %err, "cannot list affected files");
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tracker::{LocalTracker, Tracker};
    use crate::test_support::{
        SHA_A, ScriptedLlm, ScriptedRunner, child_ticket, sample_tracker_doc, test_engine, ticket,
    };

    fn step_with(context: &[&str]) -> Step {
        let list = context
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        toml::from_str(&format!(
            "command = \"ai\"\nprompt = \"Do it.\"\ncontext = [{list}]\n"
        ))
        .expect("step")
    }

    #[test]
    fn gathers_requested_sources_only() {
        let mut doc = sample_tracker_doc();
        let mut task = child_ticket(2, 1, "Task", "InProgress");
        task.attributes
            .insert("parent_commit".to_string(), SHA_A.to_string());
        doc.tickets = vec![
            ticket(1, "Epic", "InProgress"),
            task,
            child_ticket(3, 1, "Task", "Todo"),
        ];
        let tracker = LocalTracker::in_memory(doc);
        for body in ["first", "second", "third", "fourth", "fifth", "sixth"] {
            tracker.add_comment(2, body).expect("comment");
        }
        tracker.add_comment(1, "epic note").expect("comment");
        let runner = ScriptedRunner::new();
        runner.on("git diff --name-only", ScriptedRunner::ok("src/a.rs\nsrc/b.rs\n"));
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        let mut run = RunState::new(tracker.ticket(2).expect("ticket"));
        run.history.push(0, "aider", "the plan");
        let step = step_with(&[
            "issue",
            "comments",
            "last-comment",
            "parent",
            "siblings",
            "files",
            "glossary",
            "parent-comments",
            "wiki",
        ]);
        let bundle = build_bundle(&engine, &run, &step).expect("bundle");

        assert_eq!(bundle.instructions, "Do it.");
        assert_eq!(bundle.task.as_ref().map(|t| t.id), Some(2));
        assert_eq!(bundle.comments.len(), 5);
        assert_eq!(bundle.comments[0], "second");
        assert_eq!(bundle.last_comment.as_deref(), Some("sixth"));
        assert_eq!(bundle.parent.as_ref().map(|t| t.id), Some(1));
        assert_eq!(bundle.siblings.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3]);
        assert_eq!(bundle.affected_files, vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(bundle.glossary.len(), 2);
        assert_eq!(bundle.parent_comments, vec!["epic note"]);
        assert!(bundle.wiki.is_some());
        assert!(bundle.project.is_none());
        assert!(bundle.children.is_empty());
        assert!(bundle.history.as_deref().is_some_and(|h| h.contains("the plan")));
        assert_eq!(
            runner.calls_matching("git diff"),
            vec![format!("git diff --name-only {SHA_A}..HEAD")]
        );
    }

    #[test]
    fn affected_files_need_a_fork_point() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(2, "Task", "InProgress")];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        let run = RunState::new(tracker.ticket(2).expect("ticket"));
        let bundle = build_bundle(&engine, &run, &step_with(&["files"])).expect("bundle");
        assert!(bundle.affected_files.is_empty());
        assert!(runner.calls().is_empty());
    }
}
