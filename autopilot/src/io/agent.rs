//! Coding-agent (aider) invocation.
//!
//! One retry is allowed after a token-limit failure: chat history files are
//! truncated and the fallback model is used. Credential failures are never
//! retried.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::core::workflow::AiderMode;
use crate::error::HardFailure;
use crate::io::config::AgentConfig;
use crate::io::process::{CommandRunner, CommandSpec, ProcessOutput};

/// Error forms printed by aider and litellm when the prompt does not fit;
/// bare mentions of "context window" or "token limit" do not count.
static TOKEN_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)ContextWindowExceededError|context window (?:has been )?exceeded|larger than the context window|exceeds the [\d,]+ token limit|exceeds [\d,]+ tokens",
    )
    .expect("token limit regex")
});

static BAD_CREDENTIALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)AuthenticationError|invalid api key|401 Unauthorized")
        .expect("credentials regex")
});

/// One agent run.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub mode: AiderMode,
    pub workdir: PathBuf,
    /// Rendered prompt artifact passed as the message file.
    pub prompt_file: PathBuf,
    /// Files added to the agent's chat.
    pub files: Vec<String>,
}

/// Runs the configured coding agent through a [`CommandRunner`].
pub struct Aider<'a> {
    config: &'a AgentConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> Aider<'a> {
    pub fn new(config: &'a AgentConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Run the agent; returns its combined output.
    #[instrument(skip_all, fields(mode = request.mode.as_str()))]
    pub fn run(&self, request: &AgentRequest) -> Result<String> {
        let output = self.invoke(request, &self.config.model)?;
        if !hit_token_limit(&output) {
            return finish(output);
        }

        warn!(
            fallback_model = %self.config.fallback_model,
            "agent hit token limit, retrying once"
        );
        self.truncate_chat_history(&request.workdir)?;
        let retry = self.invoke(request, &self.config.fallback_model)?;
        if hit_token_limit(&retry) {
            return Err(anyhow!(
                "agent hit the token limit again with fallback model {}",
                self.config.fallback_model
            ));
        }
        finish(retry)
    }

    fn invoke(&self, request: &AgentRequest, model: &str) -> Result<ProcessOutput> {
        let spec = CommandSpec::new(
            self.config.program.as_str(),
            &request.workdir,
            Duration::from_secs(self.config.timeout_secs),
        )
        .args(agent_args(self.config, request, model));
        info!(model, files = request.files.len(), "starting agent");
        let output = self.runner.run(&spec)?;
        let combined = output.combined();
        if let Some(found) = BAD_CREDENTIALS_RE.find(&combined) {
            return Err(HardFailure::BadCredentials {
                tool: self.config.program.clone(),
                detail: found.as_str().to_string(),
            }
            .into());
        }
        Ok(output)
    }

    fn truncate_chat_history(&self, workdir: &Path) -> Result<()> {
        for name in &self.config.chat_history_files {
            let path = workdir.join(name);
            if path.exists() {
                fs::write(&path, "")
                    .with_context(|| format!("truncate chat history {}", path.display()))?;
            }
        }
        Ok(())
    }
}

fn hit_token_limit(output: &ProcessOutput) -> bool {
    TOKEN_LIMIT_RE.is_match(&output.combined())
}

fn finish(output: ProcessOutput) -> Result<String> {
    if output.timed_out {
        return Err(anyhow!("agent timed out"));
    }
    if !output.success() {
        return Err(anyhow!(
            "agent exited with {:?}: {}",
            output.exit_code,
            output.combined()
        ));
    }
    Ok(output.combined())
}

fn agent_args(config: &AgentConfig, request: &AgentRequest, model: &str) -> Vec<String> {
    let mut args = vec![
        "--yes-always".to_string(),
        "--no-pretty".to_string(),
        "--model".to_string(),
        model.to_string(),
    ];
    match request.mode {
        AiderMode::Commit => args.push("--commit".to_string()),
        mode => {
            let chat_mode = match mode {
                AiderMode::Architect => "ask",
                AiderMode::ArchitectCode => "architect",
                _ => "code",
            };
            args.extend(["--chat-mode".to_string(), chat_mode.to_string()]);
            for file in &request.files {
                args.extend(["--file".to_string(), file.clone()]);
            }
            args.extend([
                "--message-file".to_string(),
                request.prompt_file.display().to_string(),
            ]);
        }
    }
    args.extend(config.extra_args.iter().cloned());
    args
}
