//! Test-only fakes and fixtures.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use anyhow::Result;

use crate::core::types::{ProjectInfo, StatusSpec, Ticket, TicketId};
use crate::core::workflow::Workflow;
use crate::engine::Engine;
use crate::io::config::{EngineConfig, ProjectCommand, ProjectConfig};
use crate::io::llm::{Llm, LlmError, estimate_tokens};
use crate::io::process::{CommandRunner, CommandSpec, ProcessOutput};
use crate::io::tracker::{Tracker, TrackerDoc};

/// Workflow used across tests: Epic and Task types over five states.
pub const SAMPLE_WORKFLOW_TOML: &str = include_str!("../tests/fixtures/workflow.toml");

pub const SHA_A: &str = "1111111111111111111111111111111111111111";
pub const SHA_B: &str = "2222222222222222222222222222222222222222";

pub fn sample_workflow() -> Workflow {
    toml::from_str(SAMPLE_WORKFLOW_TOML).expect("sample workflow parses")
}

/// Ticket in project `demo` with no parent and no attributes.
pub fn ticket(id: TicketId, issue_type: &str, state: &str) -> Ticket {
    Ticket {
        id,
        subject: format!("Ticket {id}"),
        description: format!("Description of ticket {id}"),
        state: state.to_string(),
        issue_type: issue_type.to_string(),
        project: "demo".to_string(),
        parent: None,
        attributes: BTreeMap::new(),
    }
}

pub fn child_ticket(id: TicketId, parent: TicketId, issue_type: &str, state: &str) -> Ticket {
    Ticket {
        parent: Some(parent),
        ..ticket(id, issue_type, state)
    }
}

/// Tracker document with the sample workflow's statuses and project `demo`.
pub fn sample_tracker_doc() -> TrackerDoc {
    let workflow = sample_workflow();
    TrackerDoc {
        projects: vec![ProjectInfo {
            id: "demo".to_string(),
            name: "Demo".to_string(),
            description: "A demo web application.".to_string(),
            wiki: "Run `cargo test` before committing.".to_string(),
        }],
        statuses: workflow
            .states
            .iter()
            .map(|s| StatusSpec {
                name: s.name.clone(),
                is_closed: s.is_closed,
            })
            .collect(),
        next_id: 1,
        ..TrackerDoc::default()
    }
}

/// Config with a single `demo` project at `project_path`.
pub fn test_config(project_path: &Path, artifact_dir: &Path) -> EngineConfig {
    let mut commands = BTreeMap::new();
    commands.insert(
        "test".to_string(),
        ProjectCommand {
            argv: vec!["cargo".to_string(), "test".to_string()],
            ignore_error: false,
            success_if_no_output: false,
            hard_failures: vec!["command not found".to_string()],
        },
    );
    EngineConfig {
        artifact_dir: artifact_dir.to_path_buf(),
        projects: vec![ProjectConfig {
            id: "demo".to_string(),
            path: project_path.to_path_buf(),
            final_branch: "main".to_string(),
            roots: vec!["src".to_string()],
            diff_url: Some("https://git.example/demo/compare/{base}...{head}".to_string()),
            commands,
        }],
        ..EngineConfig::default()
    }
}

/// Engine over the sample workflow with the project checkout at `/repo`.
pub fn test_engine<'a>(
    tracker: &'a dyn Tracker,
    llm: &'a dyn Llm,
    runner: &'a dyn CommandRunner,
) -> Engine<'a> {
    test_engine_at(Path::new("/repo"), Path::new("/tmp/autopilot-artifacts"), tracker, llm, runner)
}

pub fn test_engine_at<'a>(
    project_path: &Path,
    artifact_dir: &Path,
    tracker: &'a dyn Tracker,
    llm: &'a dyn Llm,
    runner: &'a dyn CommandRunner,
) -> Engine<'a> {
    Engine::new(
        test_config(project_path, artifact_dir),
        sample_workflow(),
        tracker,
        llm,
        runner,
    )
}

struct Rule {
    prefix: String,
    output: ProcessOutput,
}

/// Recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: String,
    pub stdin: Option<String>,
}

/// Command runner answering from prefix rules and recording every call.
///
/// One-shot rules are consulted first, oldest first, and are consumed on
/// match; persistent rules follow in insertion order. Unmatched commands
/// succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    once: RefCell<Vec<Rule>>,
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<RecordedCall>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(stdout: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            ..ProcessOutput::default()
        }
    }

    pub fn fail(code: i32, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code: Some(code),
            stderr: stderr.to_string(),
            ..ProcessOutput::default()
        }
    }

    /// Answer every command starting with `prefix`.
    pub fn on(&self, prefix: &str, output: ProcessOutput) {
        self.rules.borrow_mut().push(Rule {
            prefix: prefix.to_string(),
            output,
        });
    }

    /// Answer the next command starting with `prefix`, once.
    pub fn on_once(&self, prefix: &str, output: ProcessOutput) {
        self.once.borrow_mut().push(Rule {
            prefix: prefix.to_string(),
            output,
        });
    }

    /// Display strings of all calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|c| c.command.clone())
            .collect()
    }

    /// Calls whose display string starts with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn stdin_of(&self, index: usize) -> Option<String> {
        self.calls.borrow().get(index).and_then(|c| c.stdin.clone())
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        let command = spec.display();
        self.calls.borrow_mut().push(RecordedCall {
            command: command.clone(),
            stdin: spec
                .stdin
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).to_string()),
        });

        let mut once = self.once.borrow_mut();
        if let Some(idx) = once.iter().position(|r| command.starts_with(&r.prefix)) {
            return Ok(once.remove(idx).output);
        }
        drop(once);
        let output = self
            .rules
            .borrow()
            .iter()
            .find(|r| command.starts_with(&r.prefix))
            .map(|r| r.output.clone())
            .unwrap_or_else(|| Self::ok(""));
        Ok(output)
    }
}

/// LLM returning queued replies and recording prompts.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
    token_limit: Option<usize>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: RefCell::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn with_token_limit(mut self, limit: usize) -> Self {
        self.token_limit = Some(limit);
        self
    }

    pub fn push_reply(&self, reply: &str) {
        self.replies.borrow_mut().push_back(reply.to_string());
    }

    /// Prompts received by `complete`, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Llm for ScriptedLlm {
    fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.check_budget(prompt)?;
        self.prompts.borrow_mut().push(prompt.to_string());
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| LlmError::Transport("no scripted reply left".to_string()))
    }

    fn check_budget(&self, prompt: &str) -> Result<(), LlmError> {
        match self.token_limit {
            Some(limit) if estimate_tokens(prompt) > limit => Err(LlmError::TokenBudget {
                estimated: estimate_tokens(prompt),
                limit,
            }),
            _ => Ok(()),
        }
    }
}
