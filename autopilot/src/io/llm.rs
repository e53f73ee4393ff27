//! LLM interface and a subprocess-backed implementation.
//!
//! [`CommandLlm`] pipes the prompt into a configured CLI (for example
//! `llm -m <model>`) and reads the completion from stdout.

use std::path::PathBuf;
use std::time::Duration;

use jsonschema::validator_for;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::config::LlmConfig;
use crate::io::process::{CommandRunner, CommandSpec};

/// LLM failures, split so callers can react to each class.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// Prompt rejected before sending; shrink it and retry.
    #[error("prompt needs ~{estimated} tokens, limit is {limit}")]
    TokenBudget { estimated: usize, limit: usize },
    #[error("llm transport failed: {0}")]
    Transport(String),
    /// Reply contained no parsable JSON object.
    #[error("llm reply is not valid JSON: {0}")]
    Parse(String),
    /// Reply parsed but violates the schema.
    #[error("llm reply violates schema: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Completion backend.
pub trait Llm {
    fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Multi-turn completion over a role-tagged history.
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.complete(&flatten_chat(messages))
    }

    /// Completion constrained to a JSON schema.
    fn complete_json(&self, prompt: &str, schema: &Value) -> Result<Value, LlmError> {
        let reply = self.complete(&json_prompt(prompt, schema))?;
        parse_json_response(&reply, schema)
    }

    /// Fail fast when `prompt` would not fit the model.
    fn check_budget(&self, prompt: &str) -> Result<(), LlmError>;
}

/// Rough token estimate: four bytes per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Role-tagged transcript for backends that only take a single prompt.
pub fn flatten_chat(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("## {}\n\n{}", m.role.as_str(), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn json_prompt(prompt: &str, schema: &Value) -> String {
    format!(
        "{}\n\nReply with a single JSON object that matches this JSON Schema and nothing else:\n\n{}",
        prompt.trim_end(),
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string())
    )
}

/// Extract the first JSON object from `reply` and validate it against `schema`.
pub fn parse_json_response(reply: &str, schema: &Value) -> Result<Value, LlmError> {
    let raw = first_json_object(reply)
        .ok_or_else(|| LlmError::Parse("no JSON object in reply".to_string()))?;
    let value: Value = serde_json::from_str(raw).map_err(|e| LlmError::Parse(e.to_string()))?;
    let validator =
        validator_for(schema).map_err(|e| LlmError::Validation(format!("invalid schema: {e}")))?;
    let messages: Vec<String> = validator.iter_errors(&value).map(|e| e.to_string()).collect();
    if !messages.is_empty() {
        return Err(LlmError::Validation(messages.join("; ")));
    }
    Ok(value)
}

/// Balanced `{…}` span starting at the first `{`, honoring JSON strings.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// LLM reached through a command-line client.
pub struct CommandLlm<R> {
    runner: R,
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    max_prompt_tokens: usize,
}

impl<R: CommandRunner> CommandLlm<R> {
    pub fn new(runner: R, config: &LlmConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            command: config.command.clone(),
            workdir: workdir.into(),
            timeout: Duration::from_secs(config.timeout_secs),
            max_prompt_tokens: config.max_prompt_tokens,
        }
    }
}

impl<R: CommandRunner> Llm for CommandLlm<R> {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.check_budget(prompt)?;
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| LlmError::Transport("empty llm command".to_string()))?;
        let spec = CommandSpec::new(program.as_str(), &self.workdir, self.timeout)
            .args(args.iter().cloned())
            .stdin(prompt.as_bytes());
        let output = self
            .runner
            .run(&spec)
            .map_err(|e| LlmError::Transport(format!("{e:#}")))?;
        if output.timed_out {
            warn!("llm command timed out");
            return Err(LlmError::Transport(format!(
                "timed out after {:?}",
                self.timeout
            )));
        }
        if !output.success() {
            return Err(LlmError::Transport(format!(
                "exit {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        debug!(reply_bytes = output.stdout.len(), "llm replied");
        Ok(output.stdout.trim().to_string())
    }

    fn check_budget(&self, prompt: &str) -> Result<(), LlmError> {
        let estimated = estimate_tokens(prompt);
        if estimated > self.max_prompt_tokens {
            return Err(LlmError::TokenBudget {
                estimated,
                limit: self.max_prompt_tokens,
            });
        }
        Ok(())
    }
}
