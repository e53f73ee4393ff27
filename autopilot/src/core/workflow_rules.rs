//! Semantic invariants of the workflow model not expressible via serde.

use std::collections::{BTreeSet, HashSet};

use crate::core::workflow::{State, StepCommand, Workflow};

/// Check workflow invariants:
/// - exactly one `is_first`, `is_default` and `is_closed` state
/// - unique state and issue type names
/// - transitions, triggers, priorities and jobs only name known states/types
/// - at most one `success` and one `fail` transition per source state
/// - every non-default, non-closed `(type, state)` has exactly one priority
/// - `next` is the only step of its job
/// - `evaluate` steps sit in states with both a success and a fail transition
/// - every job state resolves a transition for both outcomes
/// - every `use_ai` type has job steps for that state
pub fn validate_workflow(workflow: &Workflow) -> Vec<String> {
    let mut errors = Vec::new();
    check_states(workflow, &mut errors);
    check_transitions(workflow, &mut errors);
    check_triggers(workflow, &mut errors);
    check_priorities(workflow, &mut errors);
    check_jobs(workflow, &mut errors);
    errors
}

fn check_states(workflow: &Workflow, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for state in &workflow.states {
        if !seen.insert(state.name.as_str()) {
            errors.push(format!("duplicate state '{}'", state.name));
        }
        for issue_type in &state.use_ai {
            if workflow.issue_type(issue_type).is_none() {
                errors.push(format!(
                    "state '{}': use_ai names unknown issue type '{}'",
                    state.name, issue_type
                ));
            }
        }
    }

    let flags: [(&str, fn(&State) -> bool); 3] = [
        ("is_first", |s: &State| s.is_first),
        ("is_default", |s: &State| s.is_default),
        ("is_closed", |s: &State| s.is_closed),
    ];
    for (flag, get) in flags {
        let count = workflow.states.iter().filter(|s| get(s)).count();
        if count != 1 {
            errors.push(format!(
                "exactly one state must set {flag} (found {count})"
            ));
        }
    }

    let mut type_names = HashSet::new();
    for issue_type in &workflow.issue_types {
        if !type_names.insert(issue_type.name.as_str()) {
            errors.push(format!("duplicate issue type '{}'", issue_type.name));
        }
    }
}

fn check_transitions(workflow: &Workflow, errors: &mut Vec<String>) {
    for t in &workflow.transitions {
        for name in [&t.from, &t.to] {
            if workflow.state(name).is_none() {
                errors.push(format!(
                    "transition {} -> {}: unknown state '{}'",
                    t.from, t.to, name
                ));
            }
        }
    }

    let sources: BTreeSet<&str> = workflow
        .transitions
        .iter()
        .map(|t| t.from.as_str())
        .collect();
    for source in sources {
        let outgoing = || workflow.transitions.iter().filter(move |t| t.from == source);
        let successes = outgoing().filter(|t| t.success).count();
        let fails = outgoing().filter(|t| t.fail).count();
        if successes > 1 {
            errors.push(format!(
                "state '{source}' has {successes} success transitions (max 1)"
            ));
        }
        if fails > 1 {
            errors.push(format!(
                "state '{source}' has {fails} fail transitions (max 1)"
            ));
        }
    }
}

fn check_triggers(workflow: &Workflow, errors: &mut Vec<String>) {
    for trigger in &workflow.triggers {
        if workflow.issue_type(&trigger.issue_type).is_none() {
            errors.push(format!(
                "trigger: unknown issue type '{}'",
                trigger.issue_type
            ));
        }
        for rule in &trigger.rules {
            let named = [
                Some(&rule.moved_to),
                rule.all_siblings_status.as_ref(),
                Some(&rule.transition.to),
            ];
            for name in named.into_iter().flatten() {
                if workflow.state(name).is_none() {
                    errors.push(format!(
                        "trigger for '{}': unknown state '{}'",
                        trigger.issue_type, name
                    ));
                }
            }
        }
    }
}

fn check_priorities(workflow: &Workflow, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    for entry in &workflow.priorities {
        if workflow.issue_type(&entry.issue_type).is_none() {
            errors.push(format!(
                "priority: unknown issue type '{}'",
                entry.issue_type
            ));
        }
        if workflow.state(&entry.state).is_none() {
            errors.push(format!("priority: unknown state '{}'", entry.state));
        }
        if !seen.insert((entry.issue_type.as_str(), entry.state.as_str())) {
            errors.push(format!(
                "duplicate priority ({}, {})",
                entry.issue_type, entry.state
            ));
        }
    }

    for issue_type in &workflow.issue_types {
        for state in &workflow.states {
            if state.is_default || state.is_closed {
                continue;
            }
            if !seen.contains(&(issue_type.name.as_str(), state.name.as_str())) {
                errors.push(format!(
                    "missing priority ({}, {})",
                    issue_type.name, state.name
                ));
            }
        }
    }
}

fn check_jobs(workflow: &Workflow, errors: &mut Vec<String>) {
    for issue_type in &workflow.issue_types {
        let mut job_states = HashSet::new();
        for job in &issue_type.jobs {
            let at = format!("{}/{}", issue_type.name, job.state);
            if !job_states.insert(job.state.as_str()) {
                errors.push(format!("{at}: duplicate job"));
            }
            if workflow.state(&job.state).is_none() {
                errors.push(format!("{at}: unknown state '{}'", job.state));
                continue;
            }
            if job.steps.is_empty() {
                errors.push(format!("{at}: job has no steps"));
            }
            if job.steps.len() > 1
                && job.steps.iter().any(|s| s.command == StepCommand::Next)
            {
                errors.push(format!("{at}: 'next' must be the only step of its job"));
            }
            let child_types = job.steps.iter().filter_map(|step| match &step.command {
                StepCommand::CreateIssues { issue_type } => issue_type.as_deref(),
                _ => None,
            });
            for child_type in child_types {
                if workflow.issue_type(child_type).is_none() {
                    errors.push(format!(
                        "{at}: create-issues names unknown issue type '{child_type}'"
                    ));
                }
            }
            for outcome in [true, false] {
                if workflow.transition_for(&job.state, outcome).is_none() {
                    let label = if outcome { "success" } else { "fail" };
                    errors.push(format!("{at}: no {label} transition from '{}'", job.state));
                }
            }
            if job.steps.iter().any(|s| s.command == StepCommand::Evaluate) {
                let flagged = |success: bool| {
                    workflow
                        .transitions
                        .iter()
                        .any(|t| t.from == job.state && (if success { t.success } else { t.fail }))
                };
                if !(flagged(true) && flagged(false)) {
                    errors.push(format!(
                        "{at}: evaluate step requires both a success and a fail transition"
                    ));
                }
            }
        }
    }

    for state in &workflow.states {
        for issue_type in &state.use_ai {
            let has_steps = workflow
                .job(issue_type, &state.name)
                .is_some_and(|job| !job.steps.is_empty());
            if !has_steps {
                errors.push(format!(
                    "state '{}' is AI-enabled for '{}' but has no job steps",
                    state.name, issue_type
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_workflow;

    #[test]
    fn sample_workflow_is_valid() {
        let errors = validate_workflow(&sample_workflow());
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn reports_flag_and_priority_violations() {
        let mut workflow = sample_workflow();
        for state in &mut workflow.states {
            state.is_first = true;
        }
        workflow.priorities.pop();
        let dup = workflow.priorities[0].clone();
        workflow.priorities.push(dup);

        let errors = validate_workflow(&workflow);
        assert!(errors.iter().any(|e| e.contains("exactly one state must set is_first")));
        assert!(errors.iter().any(|e| e.contains("missing priority")));
        assert!(errors.iter().any(|e| e.contains("duplicate priority")));
    }

    #[test]
    fn rejects_second_success_transition() {
        let mut workflow = sample_workflow();
        let mut extra = workflow
            .transitions
            .iter()
            .find(|t| t.from == "InProgress" && t.success)
            .cloned()
            .expect("success transition");
        extra.to = "Done".to_string();
        workflow.transitions.push(extra);

        let errors = validate_workflow(&workflow);
        assert!(
            errors
                .iter()
                .any(|e| e.contains("'InProgress' has 2 success transitions"))
        );
    }

    #[test]
    fn rejects_ai_state_without_job() {
        let mut workflow = sample_workflow();
        for issue_type in &mut workflow.issue_types {
            issue_type.jobs.retain(|job| job.state != "InProgress");
        }
        let errors = validate_workflow(&workflow);
        assert!(
            errors
                .iter()
                .any(|e| e.contains("'InProgress' is AI-enabled for 'Task'"))
        );
    }

    #[test]
    fn rejects_evaluate_without_fail_transition() {
        let mut workflow = sample_workflow();
        workflow
            .transitions
            .retain(|t| !(t.from == "InProgress" && t.fail));
        let errors = validate_workflow(&workflow);
        assert!(
            errors
                .iter()
                .any(|e| e.contains("evaluate step requires both a success and a fail"))
        );
    }

    #[test]
    fn rejects_unknown_child_issue_type() {
        let mut workflow = sample_workflow();
        for issue_type in &mut workflow.issue_types {
            for job in &mut issue_type.jobs {
                for step in &mut job.steps {
                    if let StepCommand::CreateIssues { issue_type } = &mut step.command {
                        *issue_type = Some("Bug".to_string());
                    }
                }
            }
        }
        let errors = validate_workflow(&workflow);
        assert!(
            errors
                .iter()
                .any(|e| e.contains("create-issues names unknown issue type 'Bug'"))
        );
    }

    /// Every state a job can run in resolves a target for both outcomes.
    #[test]
    fn job_states_resolve_both_outcomes() {
        let workflow = sample_workflow();
        for issue_type in &workflow.issue_types {
            for job in &issue_type.jobs {
                for outcome in [true, false] {
                    assert!(
                        workflow.transition_for(&job.state, outcome).is_some(),
                        "{}/{} outcome={outcome}",
                        issue_type.name,
                        job.state
                    );
                }
            }
        }
    }
}
