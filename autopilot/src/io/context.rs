//! Prompt artifacts under `<artifact_dir>/ticket-<id>/` (ephemeral per run).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::TicketId;

/// Artifact directory for one job run.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    dir: PathBuf,
}

impl ArtifactDir {
    /// Clear and recreate the ticket's artifact directory.
    pub fn prepare(root: &Path, ticket: TicketId) -> Result<Self> {
        let dir = root.join(format!("ticket-{ticket}"));
        if dir.exists() {
            debug!(dir = %dir.display(), "clearing artifact dir");
            fs::remove_dir_all(&dir)
                .with_context(|| format!("remove artifact dir {}", dir.display()))?;
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("create artifact dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the prompt for step `index` (0-based) as `step-<index+1>.md`.
    pub fn write_step(&self, index: usize, prompt: &str) -> Result<PathBuf> {
        let path = self.dir.join(format!("step-{}.md", index + 1));
        let mut body = prompt.trim_end().to_string();
        body.push('\n');
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), bytes = prompt.len(), "prompt artifact written");
        Ok(path)
    }
}
