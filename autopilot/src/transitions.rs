//! Status transitions after a job, and trigger cascades.

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::types::Ticket;
use crate::core::workflow::{TriggerRule, TriggerTarget};
use crate::engine::Engine;

/// Move `ticket` along its state's transition for the outcome; returns the
/// new state.
#[instrument(skip_all, fields(ticket = ticket.id, from = %ticket.state, success))]
pub fn advance_on_completion(engine: &Engine<'_>, ticket: &Ticket, success: bool) -> Result<String> {
    let transition = engine
        .workflow
        .transition_for(&ticket.state, success)
        .ok_or_else(|| {
            let outcome = if success { "success" } else { "fail" };
            anyhow!(
                "no {outcome} transition from state '{}' (ticket #{})",
                ticket.state,
                ticket.id
            )
        })?;
    engine.tracker.set_status(ticket.id, &transition.to)?;
    info!(to = %transition.to, "ticket advanced");
    Ok(transition.to.clone())
}

/// Apply triggers matching the newest status change; returns how many
/// tickets changed state.
///
/// Targets already in the trigger's state are skipped, so processing the same
/// change twice is a no-op.
#[instrument(skip_all)]
pub fn propagate_triggers(engine: &Engine<'_>) -> Result<usize> {
    let Some(change) = engine.tracker.latest_status_change()? else {
        debug!("no status changes recorded");
        return Ok(0);
    };
    let ticket = engine.tracker.ticket(change.ticket)?;
    let rules: Vec<&TriggerRule> = engine
        .workflow
        .triggers_for(&ticket.issue_type, &change.to)
        .collect();
    if rules.is_empty() {
        return Ok(0);
    }

    let mut moved = 0;
    for rule in rules {
        if !siblings_satisfy(engine, &ticket, rule)? {
            debug!(ticket = ticket.id, moved_to = %rule.moved_to, "siblings not ready");
            continue;
        }
        let targets: Vec<Ticket> = match rule.transition.who {
            TriggerTarget::Parent => engine.tracker.parent(&ticket)?.into_iter().collect(),
            TriggerTarget::Children => engine.tracker.children(ticket.id)?,
        };
        for target in targets {
            if target.state == rule.transition.to {
                continue;
            }
            engine.tracker.set_status(target.id, &rule.transition.to)?;
            info!(
                source = ticket.id,
                target = target.id,
                from = %target.state,
                to = %rule.transition.to,
                "trigger applied"
            );
            moved += 1;
        }
    }
    Ok(moved)
}

fn siblings_satisfy(engine: &Engine<'_>, ticket: &Ticket, rule: &TriggerRule) -> Result<bool> {
    let Some(required) = &rule.all_siblings_status else {
        return Ok(true);
    };
    Ok(engine
        .tracker
        .siblings(ticket)?
        .iter()
        .all(|sibling| &sibling.state == required))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tracker::{LocalTracker, Tracker};
    use crate::test_support::{
        ScriptedLlm, ScriptedRunner, child_ticket, sample_tracker_doc, test_engine, ticket,
    };

    #[test]
    fn advances_along_success_and_fail_transitions() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Task", "InProgress"), ticket(2, "Task", "InProgress")];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        let ok = advance_on_completion(&engine, &tracker.ticket(1).expect("ticket"), true);
        assert_eq!(ok.expect("advance"), "Review");
        let failed = advance_on_completion(&engine, &tracker.ticket(2).expect("ticket"), false);
        assert_eq!(failed.expect("advance"), "Todo");
        assert_eq!(tracker.ticket(2).expect("ticket").state, "Todo");
    }

    #[test]
    fn single_outgoing_transition_serves_both_outcomes() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Task", "Review")];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        let state = advance_on_completion(&engine, &tracker.ticket(1).expect("ticket"), false)
            .expect("advance");
        assert_eq!(state, "Done");
    }

    #[test]
    fn missing_transition_is_an_error() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Task", "Done")];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        let err = advance_on_completion(&engine, &tracker.ticket(1).expect("ticket"), true)
            .unwrap_err();
        assert!(err.to_string().contains("no success transition from state 'Done'"));
    }

    #[test]
    fn last_sibling_done_moves_parent_once() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![
            ticket(1, "Epic", "InProgress"),
            child_ticket(2, 1, "Task", "Done"),
            child_ticket(3, 1, "Task", "Review"),
        ];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        tracker.set_status(3, "Done").expect("status");
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 1);
        assert_eq!(tracker.ticket(1).expect("ticket").state, "Review");
        // The parent's own change is now the newest record; it matches no
        // Epic trigger for Review.
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 0);
    }

    #[test]
    fn unfinished_sibling_holds_parent() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![
            ticket(1, "Epic", "InProgress"),
            child_ticket(2, 1, "Task", "InProgress"),
            child_ticket(3, 1, "Task", "Review"),
        ];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        tracker.set_status(3, "Done").expect("status");
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 0);
        assert_eq!(tracker.ticket(1).expect("ticket").state, "InProgress");
    }

    #[test]
    fn children_follow_parent() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![
            ticket(1, "Epic", "Todo"),
            child_ticket(2, 1, "Task", "Todo"),
            child_ticket(3, 1, "Task", "InProgress"),
        ];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        tracker.set_status(1, "InProgress").expect("status");
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 1);
        assert_eq!(tracker.ticket(2).expect("ticket").state, "InProgress");

        // Newest change is now ticket 2 (a Task entering InProgress): no rule.
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 0);
        let changes = tracker.snapshot().status_changes.len();
        assert_eq!(changes, 2);
    }

    #[test]
    fn reprocessing_a_change_is_a_no_op() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![
            ticket(1, "Epic", "Todo"),
            child_ticket(2, 1, "Task", "InProgress"),
        ];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);

        tracker.set_status(1, "InProgress").expect("status");
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 0);
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 0);
        assert_eq!(tracker.snapshot().status_changes.len(), 1);
    }

    #[test]
    fn no_status_changes_is_a_no_op() {
        let tracker = LocalTracker::in_memory(sample_tracker_doc());
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);
        assert_eq!(propagate_triggers(&engine).expect("propagate"), 0);
    }
}
