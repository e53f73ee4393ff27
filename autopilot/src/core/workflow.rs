//! Workflow model: states, transitions, triggers, priorities and jobs.
//!
//! The model is plain data read from `workflow.toml`. Steps are parsed into a
//! closed [`StepCommand`] enum while deserializing, so an unknown command,
//! action or context keyword rejects the whole file. Cross-cutting invariants
//! live in [`crate::core::workflow_rules`].

use serde::Deserialize;

/// Validated, read-only workflow configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    pub states: Vec<State>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub priorities: Vec<PriorityEntry>,
    #[serde(default)]
    pub issue_types: Vec<IssueType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct State {
    pub name: String,
    #[serde(default)]
    pub is_first: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_closed: bool,
    /// Issue types for which this state is worked by the engine.
    #[serde(default)]
    pub use_ai: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transition {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub fail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trigger {
    pub issue_type: String,
    pub rules: Vec<TriggerRule>,
}

/// Cascade fired when a ticket enters `moved_to`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerRule {
    pub moved_to: String,
    /// Required state of every sibling; unset means no sibling condition.
    #[serde(default)]
    pub all_siblings_status: Option<String>,
    pub transition: TriggerTransition,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerTransition {
    pub who: TriggerTarget,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerTarget {
    Parent,
    Children,
}

/// Ranked `(issue type, state)` pair; rank is the list position.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriorityEntry {
    pub issue_type: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueType {
    pub name: String,
    /// Glossary text offered to steps with the `glossary` context source.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

/// Ordered steps executed while a ticket of the owning type sits in `state`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    pub state: String,
    pub steps: Vec<Step>,
}

impl Job {
    /// A job made of a single `next` step needs no workplace.
    pub fn is_trivial_next(&self) -> bool {
        matches!(self.steps.as_slice(), [step] if step.command == StepCommand::Next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "StepSpec")]
pub struct Step {
    pub command: StepCommand,
    pub context: Vec<ContextSource>,
    pub prompt: String,
    pub comment: bool,
    pub remember: bool,
    pub summarize: bool,
    pub comment_summary: bool,
}

/// Step as written in TOML, before keyword parsing.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepSpec {
    command: String,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    context: Vec<String>,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    comment: bool,
    #[serde(default)]
    remember: bool,
    #[serde(default)]
    summarize: bool,
    #[serde(default)]
    comment_summary: bool,
}

impl TryFrom<StepSpec> for Step {
    type Error = String;

    fn try_from(spec: StepSpec) -> Result<Self, Self::Error> {
        let command = StepCommand::parse(&spec.command, spec.action.as_deref())?;
        let context = spec
            .context
            .iter()
            .map(|keyword| ContextSource::parse(keyword))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Step {
            command,
            context,
            prompt: spec.prompt,
            comment: spec.comment,
            remember: spec.remember,
            summarize: spec.summarize,
            comment_summary: spec.comment_summary,
        })
    }
}

/// Closed set of step commands; one handler exists per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCommand {
    Next,
    /// Literal git arguments.
    Git(Vec<String>),
    /// Script text run with `bash -c`.
    Bash(String),
    /// Named command from the project configuration.
    ProjectCmd(String),
    Commit { message: Option<String> },
    ContextFiles,
    ContextCommits,
    Ai,
    Evaluate,
    SummarizeTask,
    /// Child issue type for created tickets (defaults to the parent's type).
    CreateIssues { issue_type: Option<String> },
    MergeIntoParent { delete_branch: bool },
    Aider(AiderMode),
}

impl StepCommand {
    pub fn parse(command: &str, action: Option<&str>) -> Result<Self, String> {
        let action = action.map(str::trim).filter(|a| !a.is_empty());
        let no_action = |cmd: StepCommand| match action {
            None => Ok(cmd),
            Some(a) => Err(format!("command '{command}' takes no action (got '{a}')")),
        };
        let required = || {
            action
                .map(str::to_string)
                .ok_or_else(|| format!("command '{command}' requires an action"))
        };
        match command.trim() {
            "next" => no_action(StepCommand::Next),
            "git" => Ok(StepCommand::Git(
                required()?.split_whitespace().map(str::to_string).collect(),
            )),
            "bash" => Ok(StepCommand::Bash(required()?)),
            "project-cmd" => Ok(StepCommand::ProjectCmd(required()?)),
            "commit" => Ok(StepCommand::Commit {
                message: action.map(str::to_string),
            }),
            "context-files" => no_action(StepCommand::ContextFiles),
            "context-commits" => no_action(StepCommand::ContextCommits),
            "ai" => no_action(StepCommand::Ai),
            "evaluate" => no_action(StepCommand::Evaluate),
            "summarize-task" => no_action(StepCommand::SummarizeTask),
            "create-issues" => Ok(StepCommand::CreateIssues {
                issue_type: action.map(str::to_string),
            }),
            "merge-into-parent" => match action {
                None => Ok(StepCommand::MergeIntoParent {
                    delete_branch: false,
                }),
                Some("delete") => Ok(StepCommand::MergeIntoParent {
                    delete_branch: true,
                }),
                Some(other) => Err(format!("unknown merge-into-parent action '{other}'")),
            },
            "aider" => Ok(StepCommand::Aider(AiderMode::parse(&required()?)?)),
            other => Err(format!("unknown step command '{other}'")),
        }
    }

    /// Stable keyword used in logs and comments.
    pub fn name(&self) -> &'static str {
        match self {
            StepCommand::Next => "next",
            StepCommand::Git(_) => "git",
            StepCommand::Bash(_) => "bash",
            StepCommand::ProjectCmd(_) => "project-cmd",
            StepCommand::Commit { .. } => "commit",
            StepCommand::ContextFiles => "context-files",
            StepCommand::ContextCommits => "context-commits",
            StepCommand::Ai => "ai",
            StepCommand::Evaluate => "evaluate",
            StepCommand::SummarizeTask => "summarize-task",
            StepCommand::CreateIssues { .. } => "create-issues",
            StepCommand::MergeIntoParent { .. } => "merge-into-parent",
            StepCommand::Aider(_) => "aider",
        }
    }
}

/// Coding-agent run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiderMode {
    Architect,
    Code,
    ArchitectCode,
    Commit,
}

impl AiderMode {
    fn parse(action: &str) -> Result<Self, String> {
        match action {
            "architect" => Ok(AiderMode::Architect),
            "code" => Ok(AiderMode::Code),
            "architect-code" => Ok(AiderMode::ArchitectCode),
            "commit" => Ok(AiderMode::Commit),
            other => Err(format!("unknown aider action '{other}'")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AiderMode::Architect => "architect",
            AiderMode::Code => "code",
            AiderMode::ArchitectCode => "architect-code",
            AiderMode::Commit => "commit",
        }
    }

    /// Modes expected to leave new commits behind.
    pub fn is_code_class(self) -> bool {
        matches!(self, AiderMode::Code | AiderMode::ArchitectCode)
    }
}

/// Knowledge sources a step may include in its prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    Issue,
    Comments,
    LastComment,
    Parent,
    Parents,
    Siblings,
    Children,
    Project,
    Wiki,
    Files,
    Glossary,
    ParentComments,
}

impl ContextSource {
    fn parse(keyword: &str) -> Result<Self, String> {
        match keyword.trim() {
            "issue" => Ok(ContextSource::Issue),
            "comments" => Ok(ContextSource::Comments),
            "last-comment" => Ok(ContextSource::LastComment),
            "parent" => Ok(ContextSource::Parent),
            "parents" => Ok(ContextSource::Parents),
            "siblings" => Ok(ContextSource::Siblings),
            "children" => Ok(ContextSource::Children),
            "project" => Ok(ContextSource::Project),
            "wiki" => Ok(ContextSource::Wiki),
            "files" => Ok(ContextSource::Files),
            "glossary" => Ok(ContextSource::Glossary),
            "parent-comments" => Ok(ContextSource::ParentComments),
            other => Err(format!("unknown context source '{other}'")),
        }
    }
}

impl Workflow {
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn first_state(&self) -> Option<&State> {
        self.states.iter().find(|s| s.is_first)
    }

    pub fn is_closed(&self, state: &str) -> bool {
        self.state(state).is_some_and(|s| s.is_closed)
    }

    pub fn issue_type(&self, name: &str) -> Option<&IssueType> {
        self.issue_types.iter().find(|t| t.name == name)
    }

    pub fn job(&self, issue_type: &str, state: &str) -> Option<&Job> {
        self.issue_type(issue_type)?
            .jobs
            .iter()
            .find(|job| job.state == state)
    }

    /// True if tickets of `issue_type` in `state` are worked by the engine.
    pub fn uses_ai(&self, issue_type: &str, state: &str) -> bool {
        self.state(state)
            .is_some_and(|s| s.use_ai.iter().any(|t| t == issue_type))
    }

    /// Outgoing transition for the given outcome.
    ///
    /// A source state with a single transition uses it for both outcomes.
    pub fn transition_for(&self, from: &str, success: bool) -> Option<&Transition> {
        let outgoing: Vec<&Transition> =
            self.transitions.iter().filter(|t| t.from == from).collect();
        if let [only] = outgoing.as_slice() {
            return Some(only);
        }
        outgoing
            .into_iter()
            .find(|t| if success { t.success } else { t.fail })
    }

    /// Trigger rules configured for `issue_type` that fire on entering `state`.
    pub fn triggers_for<'a>(
        &'a self,
        issue_type: &'a str,
        state: &'a str,
    ) -> impl Iterator<Item = &'a TriggerRule> + 'a {
        self.triggers
            .iter()
            .filter(move |t| t.issue_type == issue_type)
            .flat_map(|t| t.rules.iter())
            .filter(move |rule| rule.moved_to == state)
    }
}
