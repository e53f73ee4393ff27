//! Per-run memory of step outputs flagged `remember`.

/// One remembered step output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Step index within the job (0-based).
    pub step: usize,
    /// Step command keyword.
    pub command: String,
    pub output: String,
}

/// Ephemeral history for one job execution; dropped when the job ends.
#[derive(Debug, Clone, Default)]
pub struct ExecutionHistory {
    entries: Vec<HistoryEntry>,
}

impl ExecutionHistory {
    pub fn push(&mut self, step: usize, command: &str, output: &str) {
        let output = output.trim();
        if output.is_empty() {
            return;
        }
        self.entries.push(HistoryEntry {
            step,
            command: command.to_string(),
            output: output.to_string(),
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Markdown rendering used in prompts.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("### Step {} ({})\n\n{}", e.step + 1, e.command, e.output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
