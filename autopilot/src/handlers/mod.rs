//! One handler per [`StepCommand`] variant.
//!
//! Handlers return the step output on success. A handler that judges the
//! ticket's work unsuccessful returns a [`crate::error::NegativeOutcome`];
//! anything else is an execution error.

mod coding;
mod completion;
mod scrape;
mod shell;
mod vcs;

use std::path::PathBuf;

use anyhow::Result;

use crate::core::workflow::{Step, StepCommand};
use crate::engine::Engine;
use crate::io::prompt::KnowledgeBundle;
use crate::knowledge::RunState;

pub use completion::Verdict;

/// Everything prepared for a step before its handler runs.
#[derive(Debug, Clone)]
pub struct StepInput<'s> {
    /// 0-based position within the job.
    pub index: usize,
    pub step: &'s Step,
    pub bundle: KnowledgeBundle,
    /// Rendered prompt (also on disk at `prompt_file`).
    pub prompt: String,
    pub prompt_file: PathBuf,
}

pub fn dispatch(engine: &Engine<'_>, run: &mut RunState, input: &StepInput<'_>) -> Result<String> {
    match &input.step.command {
        StepCommand::Next => Ok(String::new()),
        StepCommand::Git(args) => shell::git(engine, run, args),
        StepCommand::Bash(script) => shell::bash(engine, run, script),
        StepCommand::ProjectCmd(name) => shell::project_cmd(engine, run, name),
        StepCommand::Commit { message } => vcs::commit(engine, run, message.as_deref()),
        StepCommand::MergeIntoParent { delete_branch } => {
            vcs::merge_into_parent(engine, run, *delete_branch)
        }
        StepCommand::ContextFiles => scrape::context_files(engine, run),
        StepCommand::ContextCommits => scrape::context_commits(engine, run),
        StepCommand::Ai => completion::ai(engine, input),
        StepCommand::Evaluate => completion::evaluate(engine, input),
        StepCommand::SummarizeTask => completion::summarize_task(engine, input),
        StepCommand::CreateIssues { issue_type } => {
            completion::create_issues(engine, run, input, issue_type.as_deref())
        }
        StepCommand::Aider(mode) => coding::aider(engine, run, input, *mode),
    }
}
