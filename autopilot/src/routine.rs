//! Step executor: run one job for one ticket.
//!
//! A routine prepares the ticket's branch, then runs each step in order:
//! assemble the knowledge bundle, render the prompt, write it to the
//! artifact directory, dispatch to the step's handler, and apply the step's
//! flags to the output. A [`NegativeOutcome`](crate::error::NegativeOutcome)
//! ends the run with `Ok(false)`; any other error aborts it.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::branches::prepare_workplace;
use crate::core::types::Ticket;
use crate::core::workflow::{Job, Step, StepCommand};
use crate::engine::Engine;
use crate::error::negative_outcome;
use crate::handlers::{StepInput, dispatch};
use crate::io::context::ArtifactDir;
use crate::io::llm::ChatMessage;
use crate::io::prompt::KnowledgeBundle;
use crate::knowledge::{RunState, build_bundle};

const SUMMARY_SYSTEM_PROMPT: &str = "You condense the output of an automated software \
development step. Keep decisions, file names, commands and open problems. Drop chatter.";

/// Where a routine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutinePhase {
    NotStarted,
    Preparing,
    RunningStep(usize),
    Done(bool),
    Aborted,
}

/// Executes one job against one ticket.
pub struct Routine<'e, 'a> {
    engine: &'e Engine<'a>,
    job: &'e Job,
    phase: RoutinePhase,
}

/// Run `job` for `ticket`; `Ok(false)` means a step judged the work
/// unsuccessful.
pub fn execute_workflow(engine: &Engine<'_>, ticket: &Ticket, job: &Job) -> Result<bool> {
    Routine::new(engine, job).run(ticket)
}

impl<'e, 'a> Routine<'e, 'a> {
    pub fn new(engine: &'e Engine<'a>, job: &'e Job) -> Self {
        Self {
            engine,
            job,
            phase: RoutinePhase::NotStarted,
        }
    }

    pub fn phase(&self) -> RoutinePhase {
        self.phase
    }

    fn enter(&mut self, phase: RoutinePhase) {
        debug!(from = ?self.phase, to = ?phase, "routine phase");
        self.phase = phase;
    }

    #[instrument(
        skip_all,
        fields(ticket = ticket.id, state = %ticket.state, steps = self.job.steps.len())
    )]
    pub fn run(&mut self, ticket: &Ticket) -> Result<bool> {
        self.enter(RoutinePhase::Preparing);
        let (mut run, artifacts) = match self.prepare(ticket) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.enter(RoutinePhase::Aborted);
                return Err(err.context(format!("prepare ticket #{}", ticket.id)));
            }
        };

        let job = self.job;
        for (index, step) in job.steps.iter().enumerate() {
            self.enter(RoutinePhase::RunningStep(index));
            let result = self.run_step(&mut run, artifacts.as_ref(), index, step);
            let Err(err) = result else {
                continue;
            };
            let id = run.ticket.id;
            if let Some(negative) = negative_outcome(&err) {
                info!(
                    step = index + 1,
                    reason = %negative.reason,
                    "step judged the work unsuccessful"
                );
                if step.comment {
                    let body = format!(
                        "Step {} ({}) failed: {}",
                        index + 1,
                        step.command.name(),
                        negative.reason
                    );
                    self.engine.comment(id, &body)?;
                }
                self.enter(RoutinePhase::Done(false));
                return Ok(false);
            }
            if step.comment {
                let body = format!(
                    "Step {} ({}) aborted:\n\n```\n{err:#}\n```",
                    index + 1,
                    step.command.name()
                );
                if let Err(comment_err) = self.engine.comment(id, &body) {
                    warn!(err = %comment_err, "cannot post step error");
                }
            }
            self.enter(RoutinePhase::Aborted);
            return Err(err.context(format!(
                "step {} ({}) of ticket #{id}",
                index + 1,
                step.command.name()
            )));
        }

        if self.engine.config.engine.notify_repository_sync && !job.is_trivial_next() {
            self.engine
                .tracker
                .notify_repository_changed(&run.ticket.project)?;
        }
        self.enter(RoutinePhase::Done(true));
        info!("job finished");
        Ok(true)
    }

    /// Check out the ticket branch and reset the artifact directory. A job made
    /// of a single `next` touches neither.
    fn prepare(&self, ticket: &Ticket) -> Result<(RunState, Option<ArtifactDir>)> {
        if self.job.is_trivial_next() {
            return Ok((RunState::new(ticket.clone()), None));
        }
        prepare_workplace(self.engine, ticket)?;
        // Reload to pick up attributes written while preparing.
        let ticket = self.engine.tracker.ticket(ticket.id)?;
        let artifacts = ArtifactDir::prepare(&self.engine.config.artifact_dir, ticket.id)?;
        Ok((RunState::new(ticket), Some(artifacts)))
    }

    fn run_step(
        &self,
        run: &mut RunState,
        artifacts: Option<&ArtifactDir>,
        index: usize,
        step: &Step,
    ) -> Result<()> {
        let (bundle, prompt, prompt_file) = match artifacts {
            Some(dir) if step.command != StepCommand::Next => {
                let bundle = build_bundle(self.engine, run, step)?;
                let prompt = self.engine.prompt_builder().render(&bundle)?;
                let prompt_file = dir.write_step(index, &prompt)?;
                (bundle, prompt, prompt_file)
            }
            _ => (KnowledgeBundle::default(), String::new(), PathBuf::new()),
        };
        let input = StepInput {
            index,
            step,
            bundle,
            prompt,
            prompt_file,
        };
        info!(step = index + 1, command = step.command.name(), "running step");
        let output = dispatch(self.engine, run, &input)?;
        self.record(run, index, step, output)
    }

    /// Apply the step's `comment`, `summarize`, `comment_summary` and
    /// `remember` flags.
    fn record(&self, run: &mut RunState, index: usize, step: &Step, output: String) -> Result<()> {
        let id = run.ticket.id;
        let wants_summary = (step.summarize || step.comment_summary) && !output.trim().is_empty();
        let summary = if wants_summary {
            Some(self.summarize(&output)?)
        } else {
            None
        };
        if step.comment {
            self.engine.comment(id, &output)?;
        }
        if step.comment_summary {
            if let Some(summary) = &summary {
                self.engine.comment(id, summary)?;
            }
        }
        if step.remember {
            let remembered = match (&summary, step.summarize) {
                (Some(summary), true) => summary.as_str(),
                _ => output.as_str(),
            };
            run.history.push(index, step.command.name(), remembered);
        }
        debug!(
            step = index + 1,
            bytes = output.len(),
            summarized = summary.is_some(),
            "step recorded"
        );
        run.last_output = output;
        Ok(())
    }

    fn summarize(&self, output: &str) -> Result<String> {
        let messages = [
            ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Summarize this step output in a few short paragraphs:\n\n{}",
                output.trim()
            )),
        ];
        Ok(self.engine.llm.chat(&messages)?.trim().to_string())
    }
}
