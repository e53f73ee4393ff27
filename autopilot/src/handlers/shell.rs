//! `git`, `bash` and `project-cmd` steps.

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::engine::Engine;
use crate::error::HardFailure;
use crate::io::config::ProjectCommand;
use crate::io::process::{CommandSpec, ProcessOutput};
use crate::knowledge::RunState;

pub fn git(engine: &Engine<'_>, run: &RunState, args: &[String]) -> Result<String> {
    let project = engine.project(&run.ticket.project)?;
    Ok(engine.git(project).run_raw(args)?.combined())
}

#[instrument(skip_all, fields(ticket = run.ticket.id))]
pub fn bash(engine: &Engine<'_>, run: &RunState, script: &str) -> Result<String> {
    let project = engine.project(&run.ticket.project)?;
    let spec = CommandSpec::new("bash", &project.path, engine.config.engine.command_timeout())
        .arg("-c")
        .arg(script);
    Ok(engine.runner.run_checked(&spec)?.combined())
}

#[instrument(skip_all, fields(ticket = run.ticket.id, command = name))]
pub fn project_cmd(engine: &Engine<'_>, run: &RunState, name: &str) -> Result<String> {
    let project = engine.project(&run.ticket.project)?;
    let command = project
        .commands
        .get(name)
        .ok_or_else(|| anyhow!("project '{}' has no command '{name}'", project.id))?;
    let (program, args) = command
        .argv
        .split_first()
        .ok_or_else(|| anyhow!("command '{name}' has an empty argv"))?;
    let spec = CommandSpec::new(
        program.as_str(),
        &project.path,
        engine.config.engine.command_timeout(),
    )
    .args(args);
    let output = engine.runner.run(&spec)?;
    info!(exit_code = ?output.exit_code, timed_out = output.timed_out, "project command finished");
    judge_output(name, command, &output)
}

/// Map a finished project command onto the step result.
fn judge_output(name: &str, command: &ProjectCommand, output: &ProcessOutput) -> Result<String> {
    let text = output.combined();
    if output.success() {
        return Ok(text);
    }
    let lowered = text.to_lowercase();
    if let Some(pattern) = command
        .hard_failures
        .iter()
        .find(|p| lowered.contains(&p.to_lowercase()))
    {
        return Err(HardFailure::Tooling {
            command: name.to_string(),
            pattern: pattern.clone(),
            detail: text,
        }
        .into());
    }
    if command.success_if_no_output && text.is_empty() {
        return Ok(text);
    }
    if command.ignore_error {
        warn!(command = name, exit_code = ?output.exit_code, "ignoring command failure");
        return Ok(text);
    }
    let status = if output.timed_out {
        "timed out".to_string()
    } else {
        format!("exited with {:?}", output.exit_code)
    };
    Err(anyhow!("command '{name}' {status}:\n{text}"))
}
