//! Deterministic dependency- and priority-aware ticket selection.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::core::types::{BlockingRelation, Ticket, TicketId};
use crate::core::workflow::PriorityEntry;

/// Open tickets of one project, in configured project order.
#[derive(Debug, Clone)]
pub struct ProjectTickets {
    pub project: String,
    pub open: Vec<Ticket>,
}

/// Ids of open tickets with no remaining open blocker.
///
/// Relations are restricted to `open`: a blocker id missing from `open` is
/// closed and no longer blocks.
pub fn unblocked_ids(open: &[Ticket], relations: &[BlockingRelation]) -> BTreeSet<TicketId> {
    let open_ids: HashSet<TicketId> = open.iter().map(|t| t.id).collect();
    let mut blockers: BTreeMap<TicketId, BTreeSet<TicketId>> =
        open.iter().map(|t| (t.id, BTreeSet::new())).collect();
    for relation in relations {
        if let Some(set) = blockers.get_mut(&relation.blocked) {
            set.insert(relation.blocker);
        }
    }
    blockers
        .into_iter()
        .filter_map(|(id, mut set)| {
            set.retain(|blocker| open_ids.contains(blocker));
            set.is_empty().then_some(id)
        })
        .collect()
}

/// Unblocked tickets of one project in priority order.
///
/// Matches are accumulated across all ranks, earlier ranks first. Within a
/// rank, tickets are ordered by ascending id.
pub fn ranked_candidates<'a>(
    open: &'a [Ticket],
    relations: &[BlockingRelation],
    priorities: &[PriorityEntry],
) -> Vec<&'a Ticket> {
    let unblocked = unblocked_ids(open, relations);
    let mut pool: Vec<&Ticket> = open.iter().filter(|t| unblocked.contains(&t.id)).collect();
    pool.sort_by_key(|t| t.id);

    let mut ranked = Vec::new();
    for entry in priorities {
        ranked.extend(
            pool.iter()
                .copied()
                .filter(|t| t.issue_type == entry.issue_type && t.state == entry.state),
        );
    }
    ranked
}

/// Pick the next ticket: first candidate of the first project that has one.
pub fn select_next<'a>(
    projects: &'a [ProjectTickets],
    relations: &[BlockingRelation],
    priorities: &[PriorityEntry],
) -> Option<&'a Ticket> {
    projects
        .iter()
        .find_map(|project| ranked_candidates(&project.open, relations, priorities).first().copied())
}
