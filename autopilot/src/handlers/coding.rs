//! `aider` steps.

use anyhow::Result;
use tracing::{info, instrument};

use crate::core::workflow::AiderMode;
use crate::engine::Engine;
use crate::error::NegativeOutcome;
use crate::io::agent::{Aider, AgentRequest};
use crate::knowledge::RunState;

use super::StepInput;
use super::completion::ask_verdict;

#[instrument(skip_all, fields(ticket = run.ticket.id, mode = mode.as_str()))]
pub fn aider(
    engine: &Engine<'_>,
    run: &RunState,
    input: &StepInput<'_>,
    mode: AiderMode,
) -> Result<String> {
    let project = engine.project(&run.ticket.project)?;
    let git = engine.git(project);
    let before = git.head_sha()?;

    let request = AgentRequest {
        mode,
        workdir: project.path.clone(),
        prompt_file: input.prompt_file.clone(),
        files: run.extra_files.iter().map(|f| f.path.clone()).collect(),
    };
    let output = Aider::new(&engine.config.agent, engine.runner).run(&request)?;
    if !mode.is_code_class() || git.head_sha()? != before {
        return Ok(output);
    }

    info!("agent left HEAD unchanged, asking whether that is acceptable");
    let verdict = ask_verdict(engine, &no_change_prompt(&input.prompt, &output))?;
    if verdict.is_positive() {
        Ok(format!(
            "{output}\n\nNo changes were needed: {}",
            verdict.reason.trim()
        ))
    } else {
        Err(NegativeOutcome::new(format!(
            "agent made no changes: {}",
            verdict.reason.trim()
        ))
        .into())
    }
}

fn no_change_prompt(task: &str, output: &str) -> String {
    format!(
        "A coding agent was given the task below and finished without committing \
         any change.\n\nDecide whether leaving the code unchanged is the right \
         outcome. Answer `positive` if no change was needed, `negative` if the \
         agent failed to do the work.\n\n## Task\n\n{}\n\n## Agent output\n\n{}",
        task.trim(),
        output.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::negative_outcome;
    use crate::handlers::testing::{input, step};
    use crate::io::tracker::{LocalTracker, Tracker};
    use crate::test_support::{
        SHA_A, SHA_B, ScriptedLlm, ScriptedRunner, sample_tracker_doc, test_engine, ticket,
    };

    fn setup() -> LocalTracker {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Task", "InProgress")];
        LocalTracker::in_memory(doc)
    }

    #[test]
    fn code_run_that_moved_head_succeeds_without_judging() {
        let tracker = setup();
        let runner = ScriptedRunner::new();
        runner.on_once("git rev-parse HEAD", ScriptedRunner::ok(SHA_A));
        runner.on("git rev-parse HEAD", ScriptedRunner::ok(SHA_B));
        runner.on("aider", ScriptedRunner::ok("Applied edit to src/lib.rs"));
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("aider", Some("code"));

        let out = aider(&engine, &run, &input(&step, "Fix it."), AiderMode::Code).expect("aider");
        assert_eq!(out, "Applied edit to src/lib.rs");
        assert!(llm.prompts().is_empty());
        let agent_calls = runner.calls_matching("aider");
        assert_eq!(agent_calls.len(), 1);
        assert!(agent_calls[0].contains("--chat-mode code"));
    }

    #[test]
    fn unchanged_head_with_negative_judgement_fails() {
        let tracker = setup();
        let runner = ScriptedRunner::new();
        runner.on("git rev-parse HEAD", ScriptedRunner::ok(SHA_A));
        runner.on("aider", ScriptedRunner::ok("I could not find the file."));
        let llm = ScriptedLlm::new(&[r#"{"verdict": "negative", "reason": "nothing was done"}"#]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("aider", Some("architect-code"));

        let err = aider(&engine, &run, &input(&step, "Fix it."), AiderMode::ArchitectCode)
            .unwrap_err();
        assert!(negative_outcome(&err).is_some());
        assert!(llm.prompts()[0].contains("I could not find the file."));
    }

    #[test]
    fn unchanged_head_is_fine_for_planning_modes() {
        let tracker = setup();
        let runner = ScriptedRunner::new();
        runner.on("git rev-parse HEAD", ScriptedRunner::ok(SHA_A));
        runner.on("aider", ScriptedRunner::ok("Plan: touch src/lib.rs"));
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("aider", Some("architect"));

        let out = aider(&engine, &run, &input(&step, "Plan it."), AiderMode::Architect)
            .expect("aider");
        assert_eq!(out, "Plan: touch src/lib.rs");
    }
}
