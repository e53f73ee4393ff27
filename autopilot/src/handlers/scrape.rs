//! `context-files` and `context-commits`: collect referenced material for
//! later steps.

use std::fs;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::refs::{commit_shas, file_references};
use crate::engine::Engine;
use crate::io::prompt::{CommitPatch, FileSnippet};
use crate::knowledge::RunState;

/// Read files named in the previous output that exist under a project root.
pub fn context_files(engine: &Engine<'_>, run: &mut RunState) -> Result<String> {
    let project = engine.project(&run.ticket.project)?;
    let mut added = Vec::new();
    for path in file_references(&run.last_output, &project.roots) {
        if run.extra_files.iter().any(|f| f.path == path) {
            continue;
        }
        let full = project.path.join(&path);
        if !full.is_file() {
            debug!(path = %path, "referenced file does not exist");
            continue;
        }
        match fs::read_to_string(&full) {
            Ok(content) => {
                run.extra_files.push(FileSnippet {
                    path: path.clone(),
                    content,
                });
                added.push(path);
            }
            Err(err) => warn!(path = %path, err = %err, "cannot read referenced file"),
        }
    }
    info!(added = added.len(), total = run.extra_files.len(), "context files collected");
    Ok(added.join("\n"))
}

/// Fetch patches for commit SHAs found in the previous output, the ticket
/// description and recent comments.
pub fn context_commits(engine: &Engine<'_>, run: &mut RunState) -> Result<String> {
    let project = engine.project(&run.ticket.project)?;
    let git = engine.git(project);
    let comments = engine
        .tracker
        .comments(run.ticket.id, engine.config.engine.comments_limit)?;
    let mut text = format!("{}\n{}", run.last_output, run.ticket.description);
    for comment in &comments {
        text.push('\n');
        text.push_str(&comment.body);
    }

    let mut added = Vec::new();
    for sha in commit_shas(&text) {
        if run.commits.iter().any(|c| c.sha == sha) {
            continue;
        }
        if let Some(patch) = git.show_patch(&sha)? {
            run.commits.push(CommitPatch {
                sha: sha.clone(),
                patch,
            });
            added.push(sha);
        }
    }
    info!(added = added.len(), total = run.commits.len(), "commit patches collected");
    Ok(added.join("\n"))
}
