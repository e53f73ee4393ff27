//! Scheduling loop: triggers, selection, execution and transition, repeated
//! with idle backoff.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, info, instrument, warn};

use crate::core::backoff::IdleBackoff;
use crate::core::types::{StatusSpec, TicketId};
use crate::engine::Engine;
use crate::error::is_hard_failure;
use crate::routine::execute_workflow;
use crate::select::select_next_ticket;
use crate::transitions::{advance_on_completion, propagate_triggers};

/// Result of one scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No ticket is selectable.
    Idle,
    /// The selected ticket's state is not worked by the engine for its type.
    Waiting { ticket: TicketId },
    /// A job ran and the ticket moved along its success or fail transition.
    Worked { ticket: TicketId, success: bool },
}

impl CycleOutcome {
    pub fn worked(self) -> bool {
        matches!(self, CycleOutcome::Worked { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopOptions {
    /// Stop after this many cycles; `None` runs until a hard failure.
    pub max_cycles: Option<u64>,
}

/// Counters reported when a bounded loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub cycles: u64,
    pub worked: u64,
    pub errors: u64,
}

/// Provision tracker statuses and check every project checkout.
#[instrument(skip_all)]
pub fn setup(engine: &Engine<'_>) -> Result<()> {
    let statuses: Vec<StatusSpec> = engine
        .workflow
        .states
        .iter()
        .map(|s| StatusSpec {
            name: s.name.clone(),
            is_closed: s.is_closed,
        })
        .collect();
    engine.tracker.ensure_statuses(&statuses)?;

    for project in &engine.config.projects {
        if !project.path.is_dir() {
            bail!(
                "project {}: checkout {} does not exist",
                project.id,
                project.path.display()
            );
        }
        let git = engine.git(project);
        let branch = git
            .current_branch()
            .with_context(|| format!("project {}: read current branch", project.id))?;
        if !git.branch_exists(&project.final_branch)? {
            bail!(
                "project {}: final branch '{}' does not exist",
                project.id,
                project.final_branch
            );
        }
        info!(project = %project.id, branch = %branch, "project ready");
    }
    Ok(())
}

/// Select one ticket and, when its state is worked by the engine, run its
/// job and advance it.
#[instrument(skip_all)]
pub fn run_once(engine: &Engine<'_>) -> Result<CycleOutcome> {
    let Some(ticket) = select_next_ticket(engine)? else {
        return Ok(CycleOutcome::Idle);
    };
    if !engine.workflow.uses_ai(&ticket.issue_type, &ticket.state) {
        info!(ticket = ticket.id, state = %ticket.state, "selected ticket waits for a human");
        return Ok(CycleOutcome::Waiting { ticket: ticket.id });
    }
    let job = engine
        .workflow
        .job(&ticket.issue_type, &ticket.state)
        .ok_or_else(|| {
            anyhow!(
                "no job for {} in state '{}'",
                ticket.issue_type,
                ticket.state
            )
        })?;

    let success = execute_workflow(engine, &ticket, job)?;
    advance_on_completion(engine, &ticket, success)?;
    Ok(CycleOutcome::Worked {
        ticket: ticket.id,
        success,
    })
}

pub fn propagate_triggers_once(engine: &Engine<'_>) -> Result<usize> {
    propagate_triggers(engine)
}

/// Repeat trigger propagation and [`run_once`] until `max_cycles` is reached.
///
/// Cycle errors are logged and the loop continues; a hard failure stops it.
/// `sleep` receives every non-zero idle delay.
pub fn run_loop<S: FnMut(Duration)>(
    engine: &Engine<'_>,
    options: &LoopOptions,
    mut sleep: S,
) -> Result<LoopSummary> {
    let mut backoff = IdleBackoff::new(Instant::now());
    let mut summary = LoopSummary::default();
    loop {
        if options.max_cycles.is_some_and(|max| summary.cycles >= max) {
            info!(?summary, "cycle limit reached");
            return Ok(summary);
        }
        summary.cycles += 1;

        match propagate_triggers(engine) {
            Ok(0) => {}
            Ok(moved) => info!(moved, "triggers applied"),
            Err(err) if is_hard_failure(&err) => return Err(err),
            Err(err) => {
                summary.errors += 1;
                warn!(err = %format!("{err:#}"), "trigger propagation failed");
            }
        }

        let worked = match run_once(engine) {
            Ok(outcome) => {
                debug!(?outcome, cycle = summary.cycles, "cycle finished");
                outcome.worked()
            }
            Err(err) if is_hard_failure(&err) => {
                error!(err = %format!("{err:#}"), "hard failure, stopping");
                return Err(err);
            }
            Err(err) => {
                summary.errors += 1;
                error!(err = %format!("{err:#}"), "cycle failed");
                false
            }
        };
        if worked {
            summary.worked += 1;
        }

        let delay = backoff.record(worked, Instant::now());
        if !delay.is_zero() {
            debug!(?delay, empty_streak = backoff.empty_streak(), "idle");
            sleep(delay);
        }
    }
}
