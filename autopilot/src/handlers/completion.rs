//! LLM-backed steps: `ai`, `evaluate`, `summarize-task`, `create-issues`.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::plan::{IssuePlan, validate_plan};
use crate::core::types::{BlockingRelation, NewTicket, TicketAttr, TicketId};
use crate::engine::Engine;
use crate::error::NegativeOutcome;
use crate::io::llm::LlmError;
use crate::knowledge::RunState;

use super::StepInput;

const EVALUATE_SCHEMA: &str = include_str!("../../schemas/evaluate.schema.json");
const CREATE_ISSUES_SCHEMA: &str = include_str!("../../schemas/create_issues.schema.json");

/// Structured judgement returned by `evaluate` and the no-change check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Verdict {
    pub verdict: String,
    #[serde(default)]
    pub reason: String,
}

impl Verdict {
    /// Only `positive` (any case) counts as success.
    pub fn is_positive(&self) -> bool {
        self.verdict.trim().eq_ignore_ascii_case("positive")
    }
}

fn schema(source: &str, name: &str) -> Result<Value> {
    serde_json::from_str(source).with_context(|| format!("parse {name} schema"))
}

/// Ask for a [`Verdict`] on `prompt`.
pub(crate) fn ask_verdict(engine: &Engine<'_>, prompt: &str) -> Result<Verdict> {
    let schema = schema(EVALUATE_SCHEMA, "evaluate")?;
    let value = engine.llm.complete_json(prompt, &schema)?;
    serde_json::from_value(value).context("decode verdict")
}

pub fn ai(engine: &Engine<'_>, input: &StepInput<'_>) -> Result<String> {
    Ok(engine.llm.complete(&input.prompt)?)
}

#[instrument(skip_all, fields(step = input.index))]
pub fn evaluate(engine: &Engine<'_>, input: &StepInput<'_>) -> Result<String> {
    let verdict = ask_verdict(engine, &input.prompt)?;
    info!(verdict = %verdict.verdict, "evaluation finished");
    if verdict.is_positive() {
        Ok(format!("Verdict: positive\n\n{}", verdict.reason.trim()))
    } else {
        Err(NegativeOutcome::new(verdict.reason.trim()).into())
    }
}

/// Completion that sheds carried files until the prompt fits the model.
#[instrument(skip_all, fields(step = input.index))]
pub fn summarize_task(engine: &Engine<'_>, input: &StepInput<'_>) -> Result<String> {
    let builder = engine.prompt_builder();
    let mut bundle = input.bundle.clone();
    let mut prompt = input.prompt.clone();
    loop {
        match engine.llm.complete(&prompt) {
            Ok(reply) => return Ok(reply),
            Err(LlmError::TokenBudget { estimated, limit }) if !bundle.extra_files.is_empty() => {
                let dropped = bundle.extra_files.pop().map(|f| f.path).unwrap_or_default();
                warn!(estimated, limit, dropped = %dropped, "prompt over token budget, dropping file");
                prompt = builder.render(&bundle)?;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Split the ticket into subtasks proposed by the LLM.
///
/// The proposal is validated as a whole, then stored on the parent as a
/// pending plan before anything is created. The plan is cleared only once
/// every ticket and relation exists, so a re-run after a partial failure
/// completes the same plan instead of asking again. A ticket that already has
/// children and no pending plan is left alone.
#[instrument(skip_all, fields(ticket = run.ticket.id))]
pub fn create_issues(
    engine: &Engine<'_>,
    run: &RunState,
    input: &StepInput<'_>,
    issue_type: Option<&str>,
) -> Result<String> {
    let parent = engine.tracker.ticket(run.ticket.id)?;
    let existing = engine.tracker.children(parent.id)?;
    let plan = match parent.attribute(TicketAttr::PendingPlan) {
        Some(pending) => {
            info!(children = existing.len(), "resuming interrupted split");
            serde_json::from_str::<IssuePlan>(pending).context("decode pending issue plan")?
        }
        None if !existing.is_empty() => {
            info!(children = existing.len(), "ticket already split, skipping");
            return Ok(format!(
                "Ticket already has {} subtasks; nothing created.",
                existing.len()
            ));
        }
        None => {
            let plan = request_plan(engine, &input.prompt)?;
            let encoded = serde_json::to_string(&plan).context("encode issue plan")?;
            engine
                .tracker
                .set_attribute(parent.id, TicketAttr::PendingPlan, &encoded)?;
            plan
        }
    };

    let state = engine
        .workflow
        .first_state()
        .ok_or_else(|| anyhow!("workflow has no first state"))?
        .name
        .clone();
    let child_type = issue_type.unwrap_or(&parent.issue_type);
    // Children created by an interrupted run, matched to plan issues by subject.
    let mut unclaimed: Vec<(&str, TicketId)> = existing
        .iter()
        .map(|child| (child.subject.trim(), child.id))
        .collect();

    let mut created: BTreeMap<u32, TicketId> = BTreeMap::new();
    let mut lines = Vec::new();
    for issue in &plan.issues {
        let subject = issue.subject.trim();
        let claimed = unclaimed.iter().position(|(name, _)| *name == subject);
        let id = match claimed {
            Some(idx) => unclaimed.remove(idx).1,
            None => {
                engine
                    .tracker
                    .create_ticket(NewTicket {
                        subject: subject.to_string(),
                        description: issue.description.trim().to_string(),
                        state: state.clone(),
                        issue_type: child_type.to_string(),
                        project: parent.project.clone(),
                        parent: Some(parent.id),
                    })?
                    .id
            }
        };
        created.insert(issue.id, id);
        lines.push(format!("#{id} {subject}"));
    }

    let resolve = |local: u32| {
        created
            .get(&local)
            .copied()
            .ok_or_else(|| anyhow!("plan issue {local} was not created"))
    };
    let ids: Vec<TicketId> = created.values().copied().collect();
    let present: HashSet<BlockingRelation> = engine
        .tracker
        .blocking_relations(&ids)?
        .into_iter()
        .collect();
    let mut relations = 0;
    for issue in &plan.issues {
        let blocked = resolve(issue.id)?;
        for &blocker in &issue.blocked_by {
            let relation = BlockingRelation {
                blocked,
                blocker: resolve(blocker)?,
            };
            if !present.contains(&relation) {
                engine.tracker.create_relation(relation)?;
                relations += 1;
            }
        }
    }
    engine
        .tracker
        .set_attribute(parent.id, TicketAttr::PendingPlan, "")?;
    info!(created = created.len(), relations, "subtasks created");
    Ok(format!("Created subtasks:\n{}", lines.join("\n")))
}

fn request_plan(engine: &Engine<'_>, prompt: &str) -> Result<IssuePlan> {
    let schema = schema(CREATE_ISSUES_SCHEMA, "create-issues")?;
    let value = engine.llm.complete_json(prompt, &schema)?;
    let plan: IssuePlan = serde_json::from_value(value).context("decode issue plan")?;
    let errors = validate_plan(&plan.issues);
    if !errors.is_empty() {
        bail!("rejected issue plan:\n- {}", errors.join("\n- "));
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::core::types::{Comment, ProjectInfo, StatusChange, StatusSpec, Ticket};
    use crate::error::negative_outcome;
    use crate::handlers::testing::{input, step};
    use crate::io::prompt::FileSnippet;
    use crate::io::tracker::{LocalTracker, Tracker};
    use crate::test_support::{
        ScriptedLlm, ScriptedRunner, child_ticket, sample_tracker_doc, test_engine, ticket,
    };

    #[test]
    fn evaluate_negative_is_a_negative_outcome() {
        let tracker = LocalTracker::in_memory(sample_tracker_doc());
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[
            r#"{"verdict": "Positive", "reason": "all good"}"#,
            r#"Here you go: {"verdict": "needs work", "reason": "tests missing"}"#,
        ]);
        let engine = test_engine(&tracker, &llm, &runner);
        let step = step("evaluate", None);

        let ok = evaluate(&engine, &input(&step, "Judge it.")).expect("positive");
        assert!(ok.contains("all good"));
        let err = evaluate(&engine, &input(&step, "Judge it.")).unwrap_err();
        assert_eq!(
            negative_outcome(&err).map(|n| n.reason.as_str()),
            Some("tests missing")
        );
    }

    #[test]
    fn summarize_drops_files_until_prompt_fits() {
        let tracker = LocalTracker::in_memory(sample_tracker_doc());
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&["summary"]).with_token_limit(2_000);
        let engine = test_engine(&tracker, &llm, &runner);
        let step = step("summarize-task", None);
        let mut step_input = input(&step, "");
        step_input.bundle.instructions = "Summarize.".to_string();
        step_input.bundle.extra_files = vec![
            FileSnippet {
                path: "src/small.rs".to_string(),
                content: "fn small() {}".to_string(),
            },
            FileSnippet {
                path: "src/huge.rs".to_string(),
                content: "x".repeat(20_000),
            },
        ];
        step_input.prompt = engine
            .prompt_builder()
            .render(&step_input.bundle)
            .expect("render");

        let out = summarize_task(&engine, &step_input).expect("summary");
        assert_eq!(out, "summary");
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("src/small.rs"));
        assert!(!prompts[0].contains("src/huge.rs"));
    }

    #[test]
    fn summarize_gives_up_when_nothing_left_to_drop() {
        let tracker = LocalTracker::in_memory(sample_tracker_doc());
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&["unused"]).with_token_limit(1);
        let engine = test_engine(&tracker, &llm, &runner);
        let step = step("summarize-task", None);

        let err = summarize_task(&engine, &input(&step, "too long for one token")).unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn create_issues_creates_tickets_then_relations() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Epic", "Todo")];
        doc.next_id = 10;
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[r#"{"issues": [
            {"id": 1, "subject": "Schema", "description": "Add tables"},
            {"id": 2, "subject": "API", "blocked_by": [1]}
        ]}"#]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("create-issues", Some("Task"));

        let out = create_issues(&engine, &run, &input(&step, "Split it."), Some("Task"))
            .expect("create");
        assert!(out.contains("#10 Schema"));
        let children = tracker.children(1).expect("children");
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.state == "Todo" && c.issue_type == "Task"));
        let relations = tracker.blocking_relations(&[10, 11]).expect("relations");
        assert_eq!(
            relations,
            vec![BlockingRelation {
                blocked: 11,
                blocker: 10
            }]
        );
    }

    #[test]
    fn create_issues_rejects_cyclic_plan_without_side_effects() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Epic", "Todo")];
        doc.next_id = 10;
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[r#"{"issues": [
            {"id": 1, "subject": "A", "blocked_by": [2]},
            {"id": 2, "subject": "B", "blocked_by": [1]}
        ]}"#]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("create-issues", None);

        let err = create_issues(&engine, &run, &input(&step, "Split it."), None).unwrap_err();
        assert!(err.to_string().contains("dependency cycle"));
        assert!(tracker.children(1).expect("children").is_empty());
    }

    /// Local tracker whose `create_ticket` or `create_relation` fails once
    /// after the given number of successful calls.
    struct FlakyTracker {
        inner: LocalTracker,
        ticket_failure_after: Cell<Option<usize>>,
        relation_failure_after: Cell<Option<usize>>,
    }

    impl FlakyTracker {
        fn new(inner: LocalTracker) -> Self {
            Self {
                inner,
                ticket_failure_after: Cell::new(None),
                relation_failure_after: Cell::new(None),
            }
        }

        fn trip(counter: &Cell<Option<usize>>, what: &str) -> anyhow::Result<()> {
            match counter.get() {
                Some(0) => {
                    counter.set(None);
                    Err(anyhow!("tracker unavailable while creating {what}"))
                }
                Some(n) => {
                    counter.set(Some(n - 1));
                    Ok(())
                }
                None => Ok(()),
            }
        }
    }

    impl Tracker for FlakyTracker {
        fn open_tickets(&self, project: &str) -> anyhow::Result<Vec<Ticket>> {
            self.inner.open_tickets(project)
        }
        fn ticket(&self, id: TicketId) -> anyhow::Result<Ticket> {
            self.inner.ticket(id)
        }
        fn children(&self, id: TicketId) -> anyhow::Result<Vec<Ticket>> {
            self.inner.children(id)
        }
        fn parent(&self, ticket: &Ticket) -> anyhow::Result<Option<Ticket>> {
            self.inner.parent(ticket)
        }
        fn siblings(&self, ticket: &Ticket) -> anyhow::Result<Vec<Ticket>> {
            self.inner.siblings(ticket)
        }
        fn blocking_relations(&self, ids: &[TicketId]) -> anyhow::Result<Vec<BlockingRelation>> {
            self.inner.blocking_relations(ids)
        }
        fn comments(&self, id: TicketId, limit: usize) -> anyhow::Result<Vec<Comment>> {
            self.inner.comments(id, limit)
        }
        fn add_comment(&self, id: TicketId, body: &str) -> anyhow::Result<()> {
            self.inner.add_comment(id, body)
        }
        fn latest_status_change(&self) -> anyhow::Result<Option<StatusChange>> {
            self.inner.latest_status_change()
        }
        fn set_status(&self, id: TicketId, state: &str) -> anyhow::Result<()> {
            self.inner.set_status(id, state)
        }
        fn create_ticket(&self, ticket: NewTicket) -> anyhow::Result<Ticket> {
            Self::trip(&self.ticket_failure_after, "ticket")?;
            self.inner.create_ticket(ticket)
        }
        fn create_relation(&self, relation: BlockingRelation) -> anyhow::Result<()> {
            Self::trip(&self.relation_failure_after, "relation")?;
            self.inner.create_relation(relation)
        }
        fn set_attribute(&self, id: TicketId, attr: TicketAttr, value: &str) -> anyhow::Result<()> {
            self.inner.set_attribute(id, attr, value)
        }
        fn project(&self, id: &str) -> anyhow::Result<ProjectInfo> {
            self.inner.project(id)
        }
        fn notify_repository_changed(&self, project: &str) -> anyhow::Result<()> {
            self.inner.notify_repository_changed(project)
        }
        fn ensure_statuses(&self, statuses: &[StatusSpec]) -> anyhow::Result<()> {
            self.inner.ensure_statuses(statuses)
        }
    }

    const CHAIN_PLAN: &str = r#"{"issues": [
        {"id": 1, "subject": "Schema"},
        {"id": 2, "subject": "API", "blocked_by": [1]},
        {"id": 3, "subject": "UI", "blocked_by": [2]}
    ]}"#;

    fn epic_tracker() -> FlakyTracker {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Epic", "Todo")];
        doc.next_id = 10;
        FlakyTracker::new(LocalTracker::in_memory(doc))
    }

    fn assert_chain_complete(tracker: &FlakyTracker) {
        let children = tracker.children(1).expect("children");
        assert_eq!(
            children.iter().map(|c| c.subject.as_str()).collect::<Vec<_>>(),
            vec!["Schema", "API", "UI"]
        );
        let mut relations = tracker.blocking_relations(&[10, 11, 12]).expect("relations");
        relations.sort_by_key(|r| r.blocked);
        assert_eq!(
            relations,
            vec![
                BlockingRelation {
                    blocked: 11,
                    blocker: 10
                },
                BlockingRelation {
                    blocked: 12,
                    blocker: 11
                },
            ]
        );
        let parent = tracker.ticket(1).expect("ticket");
        assert_eq!(parent.attribute(TicketAttr::PendingPlan), None);
    }

    #[test]
    fn create_issues_rerun_restores_missing_relations() {
        let tracker = epic_tracker();
        tracker.relation_failure_after.set(Some(1));
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[CHAIN_PLAN]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("create-issues", None);

        let err = create_issues(&engine, &run, &input(&step, "Split it."), None).unwrap_err();
        assert!(err.to_string().contains("creating relation"));
        assert_eq!(tracker.blocking_relations(&[10, 11, 12]).expect("relations").len(), 1);

        let out = create_issues(&engine, &run, &input(&step, "Split it."), None).expect("resume");
        assert!(out.contains("#12 UI"));
        assert_eq!(llm.prompts().len(), 1);
        assert_chain_complete(&tracker);
    }

    #[test]
    fn create_issues_rerun_finishes_interrupted_ticket_creation() {
        let tracker = epic_tracker();
        tracker.ticket_failure_after.set(Some(1));
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[CHAIN_PLAN]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("create-issues", None);

        create_issues(&engine, &run, &input(&step, "Split it."), None).unwrap_err();
        assert_eq!(tracker.children(1).expect("children").len(), 1);

        create_issues(&engine, &run, &input(&step, "Split it."), None).expect("resume");
        assert_eq!(llm.prompts().len(), 1);
        assert_chain_complete(&tracker);
    }

    #[test]
    fn create_issues_skips_already_split_ticket() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Epic", "Todo"), child_ticket(2, 1, "Epic", "Todo")];
        let tracker = LocalTracker::in_memory(doc);
        let runner = ScriptedRunner::new();
        let llm = ScriptedLlm::new(&[]);
        let engine = test_engine(&tracker, &llm, &runner);
        let run = RunState::new(tracker.ticket(1).expect("ticket"));
        let step = step("create-issues", None);

        let out = create_issues(&engine, &run, &input(&step, "Split it."), None).expect("skip");
        assert!(out.contains("already has 1 subtasks"));
        assert!(llm.prompts().is_empty());
    }
}
