//! Validation for LLM-proposed child tickets and their blocking edges.
//!
//! A proposal is accepted only as a whole: every reference must resolve to a
//! proposed issue, no issue may block itself and the blocked-by graph must be
//! acyclic. Nothing is created in the tracker until these checks pass.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Child ticket proposed by a `create-issues` step.
///
/// `id` is local to the proposal; `blocked_by` refers to other local ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedIssue {
    pub id: u32,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub blocked_by: Vec<u32>,
}

/// Full `create-issues` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePlan {
    pub issues: Vec<ProposedIssue>,
}

/// Check a proposal; returns stable error messages (empty when valid).
pub fn validate_plan(issues: &[ProposedIssue]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut edges: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for issue in issues {
        if edges.insert(issue.id, BTreeSet::new()).is_some() {
            errors.push(format!("duplicate issue id {}", issue.id));
        }
        if issue.subject.trim().is_empty() {
            errors.push(format!("issue {} has an empty subject", issue.id));
        }
    }

    for issue in issues {
        for &blocker in &issue.blocked_by {
            if blocker == issue.id {
                errors.push(format!("issue {} is blocked by itself", issue.id));
            } else if !edges.contains_key(&blocker) {
                errors.push(format!(
                    "issue {} is blocked by unknown issue {}",
                    issue.id, blocker
                ));
            } else if let Some(set) = edges.get_mut(&issue.id) {
                set.insert(blocker);
            }
        }
    }

    if let Some(cycle) = find_cycle(&edges) {
        let path: Vec<String> = cycle.iter().map(u32::to_string).collect();
        errors.push(format!("dependency cycle: {}", path.join(" <- ")));
    }
    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first search over blocked-by edges; returns the first cycle found.
fn find_cycle(edges: &BTreeMap<u32, BTreeSet<u32>>) -> Option<Vec<u32>> {
    let mut marks: BTreeMap<u32, Mark> = BTreeMap::new();
    let mut stack = Vec::new();
    for &start in edges.keys() {
        if marks.contains_key(&start) {
            continue;
        }
        if let Some(cycle) = visit(start, edges, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    node: u32,
    edges: &BTreeMap<u32, BTreeSet<u32>>,
    marks: &mut BTreeMap<u32, Mark>,
    stack: &mut Vec<u32>,
) -> Option<Vec<u32>> {
    marks.insert(node, Mark::Visiting);
    stack.push(node);
    for &next in edges.get(&node).into_iter().flatten() {
        match marks.get(&next) {
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Some(Mark::Done) => {}
            None => {
                if let Some(cycle) = visit(next, edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }
    }
    stack.pop();
    marks.insert(node, Mark::Done);
    None
}
