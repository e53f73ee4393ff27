//! Engine configuration stored in `.autopilot/config.toml`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Edited by humans. Missing fields default; relative paths resolve against
/// the directory holding the config file (see [`load_config`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Workflow model file.
    pub workflow: PathBuf,
    /// Local tracker document.
    pub tracker: PathBuf,
    /// Directory for transient prompt artifacts.
    pub artifact_dir: PathBuf,
    pub engine: EngineSection,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub branch_prefix: String,
    /// How many recent comments the `comments` context includes.
    pub comments_limit: usize,
    /// Upper bound for a rendered knowledge bundle.
    pub prompt_budget_bytes: usize,
    /// Wall-clock limit for git, bash and project commands.
    pub command_timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Tell the tracker to re-read the repository after a successful job.
    pub notify_repository_sync: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            branch_prefix: "AI".to_string(),
            comments_limit: 5,
            prompt_budget_bytes: 60_000,
            command_timeout_secs: 30 * 60,
            output_limit_bytes: 200_000,
            notify_repository_sync: true,
        }
    }
}

impl EngineSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Program + args; the prompt is written to stdin.
    pub command: Vec<String>,
    pub max_prompt_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            max_prompt_tokens: 100_000,
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub program: String,
    pub model: String,
    /// Model for the single retry after a token-limit failure.
    pub fallback_model: String,
    pub extra_args: Vec<String>,
    /// Chat history files truncated before the retry, relative to the project.
    pub chat_history_files: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "aider".to_string(),
            model: "sonnet".to_string(),
            fallback_model: "haiku".to_string(),
            extra_args: Vec::new(),
            chat_history_files: vec![
                ".aider.chat.history.md".to_string(),
                ".aider.input.history".to_string(),
            ],
            timeout_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub id: String,
    /// Repository checkout.
    pub path: PathBuf,
    #[serde(default = "default_final_branch")]
    pub final_branch: String,
    /// Path prefixes `context-files` accepts.
    #[serde(default)]
    pub roots: Vec<String>,
    /// Compare URL with `{base}` and `{head}` placeholders.
    #[serde(default)]
    pub diff_url: Option<String>,
    #[serde(default)]
    pub commands: BTreeMap<String, ProjectCommand>,
}

fn default_final_branch() -> String {
    "main".to_string()
}

/// Named command for `project-cmd` steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectCommand {
    pub argv: Vec<String>,
    #[serde(default)]
    pub ignore_error: bool,
    /// A failing run with empty output counts as success.
    #[serde(default)]
    pub success_if_no_output: bool,
    /// Output substrings that fail the step even when errors are ignored.
    #[serde(default)]
    pub hard_failures: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflow: PathBuf::from("workflow.toml"),
            tracker: PathBuf::from("tracker.json"),
            artifact_dir: PathBuf::from("context"),
            engine: EngineSection::default(),
            llm: LlmConfig::default(),
            agent: AgentConfig::default(),
            projects: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.engine.branch_prefix.trim().is_empty() {
            errors.push("engine.branch_prefix must not be empty".to_string());
        }
        if self.engine.command_timeout_secs == 0 {
            errors.push("engine.command_timeout_secs must be > 0".to_string());
        }
        if self.engine.output_limit_bytes == 0 {
            errors.push("engine.output_limit_bytes must be > 0".to_string());
        }
        if self.engine.prompt_budget_bytes == 0 {
            errors.push("engine.prompt_budget_bytes must be > 0".to_string());
        }
        if is_blank_argv(&self.llm.command) {
            errors.push("llm.command must be a non-empty array".to_string());
        }
        if self.llm.timeout_secs == 0 {
            errors.push("llm.timeout_secs must be > 0".to_string());
        }
        if self.llm.max_prompt_tokens == 0 {
            errors.push("llm.max_prompt_tokens must be > 0".to_string());
        }
        if self.agent.program.trim().is_empty() {
            errors.push("agent.program must not be empty".to_string());
        }
        if self.agent.timeout_secs == 0 {
            errors.push("agent.timeout_secs must be > 0".to_string());
        }

        let mut ids = HashSet::new();
        for project in &self.projects {
            if project.id.trim().is_empty() {
                errors.push("project id must not be empty".to_string());
            } else if !ids.insert(project.id.as_str()) {
                errors.push(format!("duplicate project id '{}'", project.id));
            }
            if project.path.as_os_str().is_empty() {
                errors.push(format!("project '{}': path must not be empty", project.id));
            }
            if project.final_branch.trim().is_empty() {
                errors.push(format!(
                    "project '{}': final_branch must not be empty",
                    project.id
                ));
            }
            for (name, command) in &project.commands {
                if is_blank_argv(&command.argv) {
                    errors.push(format!(
                        "project '{}': command '{name}' needs a non-empty argv",
                        project.id
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid config:\n- {}", errors.join("\n- ")))
        }
    }

    pub fn project(&self, id: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.id == id)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.workflow,
            &mut self.tracker,
            &mut self.artifact_dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        for project in &mut self.projects {
            if project.path.is_relative() && !project.path.as_os_str().is_empty() {
                project.path = base.join(&project.path);
            }
        }
    }
}

fn is_blank_argv(argv: &[String]) -> bool {
    argv.first().is_none_or(|program| program.trim().is_empty())
}

/// Load and validate config from a TOML file.
///
/// Relative paths inside the file are resolved against its directory.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    cfg.resolve_paths(base);
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
workflow = "wf.toml"
artifact_dir = "/tmp/ctx"

[engine]
branch_prefix = "AP"

[[projects]]
id = "demo"
path = "checkout"
roots = ["src"]

[projects.commands.test]
argv = ["cargo", "test"]
hard_failures = ["command not found"]
"#;

    #[test]
    fn loads_defaults_and_resolves_relative_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, SAMPLE).expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.workflow, temp.path().join("wf.toml"));
        assert_eq!(cfg.tracker, temp.path().join("tracker.json"));
        assert_eq!(cfg.artifact_dir, PathBuf::from("/tmp/ctx"));
        assert_eq!(cfg.engine.branch_prefix, "AP");
        assert_eq!(cfg.engine.comments_limit, 5);

        let project = cfg.project("demo").expect("project");
        assert_eq!(project.path, temp.path().join("checkout"));
        assert_eq!(project.final_branch, "main");
        let test = &project.commands["test"];
        assert!(!test.ignore_error);
        assert_eq!(test.hard_failures, vec!["command not found"]);
    }

    #[test]
    fn validate_lists_every_problem() {
        let mut cfg = EngineConfig::default();
        cfg.engine.command_timeout_secs = 0;
        cfg.llm.command = vec![" ".to_string()];
        let project = ProjectConfig {
            id: "demo".to_string(),
            path: PathBuf::from("/srv/demo"),
            final_branch: "main".to_string(),
            roots: Vec::new(),
            diff_url: None,
            commands: BTreeMap::new(),
        };
        cfg.projects = vec![project.clone(), project];

        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("command_timeout_secs"), "{msg}");
        assert!(msg.contains("llm.command"), "{msg}");
        assert!(msg.contains("duplicate project id 'demo'"), "{msg}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<EngineConfig>("[engine]\nbranch_prefx = \"AI\"\n").unwrap_err();
        assert!(err.to_string().contains("branch_prefx"));
    }
}
