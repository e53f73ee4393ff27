//! Knowledge bundle rendering under a byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::Ticket;

const STEP_TEMPLATE: &str = include_str!("prompts/step.md");

/// Ticket fields shown in prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketSummary {
    pub id: u64,
    pub subject: String,
    pub description: String,
    pub state: String,
    pub issue_type: String,
}

impl From<&Ticket> for TicketSummary {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id,
            subject: ticket.subject.clone(),
            description: ticket.description.trim().to_string(),
            state: ticket.state.clone(),
            issue_type: ticket.issue_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlossaryEntry {
    pub name: String,
    pub description: String,
}

/// File content carried by a `context-files` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSnippet {
    pub path: String,
    pub content: String,
}

/// Commit patch carried by a `context-commits` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitPatch {
    pub sha: String,
    pub patch: String,
}

/// Everything a step prompt may contain. Empty fields render nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeBundle {
    pub instructions: String,
    pub task: Option<TicketSummary>,
    pub glossary: Vec<GlossaryEntry>,
    pub parent: Option<TicketSummary>,
    /// Root first.
    pub parents: Vec<TicketSummary>,
    pub siblings: Vec<TicketSummary>,
    pub children: Vec<TicketSummary>,
    pub project: Option<String>,
    pub wiki: Option<String>,
    pub last_comment: Option<String>,
    pub comments: Vec<String>,
    pub parent_comments: Vec<String>,
    pub affected_files: Vec<String>,
    pub history: Option<String>,
    pub extra_files: Vec<FileSnippet>,
    pub commits: Vec<CommitPatch>,
}

/// Droppable sections, least valuable first.
const DROP_ORDER: [&str; 11] = [
    "extra_files",
    "commits",
    "affected_files",
    "wiki",
    "project",
    "children",
    "siblings",
    "parents",
    "parent_comments",
    "comments",
    "history",
];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex")
});

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Renders knowledge bundles, dropping less critical sections to fit the budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn render(&self, bundle: &KnowledgeBundle) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("step", STEP_TEMPLATE)
            .context("load step template")?;
        let rendered = env
            .get_template("step")
            .and_then(|template| template.render(bundle))
            .context("render step template")?;

        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

/// Parse sections using `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, body_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|next| next.0)
            .unwrap_or(rendered.len());
        let content = rendered[*body_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let Some((last, rest)) = sections.split_last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total_len(rest));
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARKER.len() {
        truncate_at_char_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_at_char_boundary(&mut last.content, allowed);
    }
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
