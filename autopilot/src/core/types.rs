//! Shared deterministic types for the scheduling engine.
//!
//! These types mirror what the tracker exposes. They carry no behavior that
//! depends on external state; the tracker adapter is the only producer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tracker-assigned ticket identifier.
pub type TicketId = u64;

/// Work item owned by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    /// Current workflow state name.
    pub state: String,
    pub issue_type: String,
    pub project: String,
    #[serde(default)]
    pub parent: Option<TicketId>,
    /// Custom attributes keyed by [`TicketAttr::key`].
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Ticket {
    /// Non-empty attribute value, if set.
    pub fn attribute(&self, attr: TicketAttr) -> Option<&str> {
        self.attributes
            .get(attr.key())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// True if the attribute holds a truthy flag (`1`, `true`, `yes`).
    pub fn flag(&self, attr: TicketAttr) -> bool {
        matches!(
            self.attribute(attr).map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes")
        )
    }
}

/// Custom ticket attributes the engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketAttr {
    /// Branch-name override.
    BranchName,
    /// Skip merging the ticket branch into its parent.
    SkipMerge,
    /// Last commit SHA already reported on the ticket.
    LastCommit,
    /// SHA the ticket branch was forked from.
    ParentCommit,
    /// Accepted `create-issues` plan not yet fully written to the tracker.
    PendingPlan,
}

impl TicketAttr {
    pub fn key(self) -> &'static str {
        match self {
            TicketAttr::BranchName => "branch",
            TicketAttr::SkipMerge => "skip_merge",
            TicketAttr::LastCommit => "last_commit",
            TicketAttr::ParentCommit => "parent_commit",
            TicketAttr::PendingPlan => "pending_plan",
        }
    }
}

/// Directed edge: `blocked` cannot be worked until `blocker` is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockingRelation {
    pub blocked: TicketId,
    pub blocker: TicketId,
}

/// Tracker comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub ticket: TicketId,
    pub body: String,
}

/// Tracker audit record for a status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: u64,
    pub ticket: TicketId,
    pub from: String,
    pub to: String,
}

/// Input for creating a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    pub state: String,
    pub issue_type: String,
    pub project: String,
    pub parent: Option<TicketId>,
}

/// Project metadata held by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub wiki: String,
}

/// Status definition provisioned into the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSpec {
    pub name: String,
    #[serde(default)]
    pub is_closed: bool,
}
