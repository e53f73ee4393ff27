//! Issue tracker interface and a file-backed implementation.
//!
//! The engine never caches tracker data across ticks; every read goes through
//! [`Tracker`]. [`LocalTracker`] keeps one JSON document and rewrites it after
//! each mutation.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::types::{
    BlockingRelation, Comment, NewTicket, ProjectInfo, StatusChange, StatusSpec, Ticket, TicketAttr,
    TicketId,
};

/// Operations the engine needs from the system of record.
pub trait Tracker {
    /// Tickets of `project` whose status is not closed, by ascending id.
    fn open_tickets(&self, project: &str) -> Result<Vec<Ticket>>;
    fn ticket(&self, id: TicketId) -> Result<Ticket>;
    fn children(&self, id: TicketId) -> Result<Vec<Ticket>>;
    fn parent(&self, ticket: &Ticket) -> Result<Option<Ticket>>;
    /// Other children of the ticket's parent; empty for root tickets.
    fn siblings(&self, ticket: &Ticket) -> Result<Vec<Ticket>>;
    /// Relations whose blocked side is one of `ids`.
    fn blocking_relations(&self, ids: &[TicketId]) -> Result<Vec<BlockingRelation>>;
    /// The most recent `limit` comments, oldest first.
    fn comments(&self, id: TicketId, limit: usize) -> Result<Vec<Comment>>;
    fn add_comment(&self, id: TicketId, body: &str) -> Result<()>;
    /// Newest status-change audit record across all tickets.
    fn latest_status_change(&self) -> Result<Option<StatusChange>>;
    fn set_status(&self, id: TicketId, state: &str) -> Result<()>;
    fn create_ticket(&self, ticket: NewTicket) -> Result<Ticket>;
    fn create_relation(&self, relation: BlockingRelation) -> Result<()>;
    fn set_attribute(&self, id: TicketId, attr: TicketAttr, value: &str) -> Result<()>;
    fn project(&self, id: &str) -> Result<ProjectInfo>;
    /// Ask the tracker to re-read the project's repository.
    fn notify_repository_changed(&self, project: &str) -> Result<()>;
    /// Create missing statuses and align their closed flag.
    fn ensure_statuses(&self, statuses: &[StatusSpec]) -> Result<()>;
}

/// On-disk tracker document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerDoc {
    pub projects: Vec<ProjectInfo>,
    pub statuses: Vec<StatusSpec>,
    pub tickets: Vec<Ticket>,
    pub relations: Vec<BlockingRelation>,
    pub comments: Vec<Comment>,
    pub status_changes: Vec<StatusChange>,
    /// Next ticket id to hand out.
    pub next_id: TicketId,
    /// Repository re-sync requests per project.
    pub repository_syncs: BTreeMap<String, u64>,
}

impl TrackerDoc {
    fn is_closed(&self, state: &str) -> bool {
        self.statuses.iter().any(|s| s.name == state && s.is_closed)
    }

    fn ticket_mut(&mut self, id: TicketId) -> Result<&mut Ticket> {
        self.tickets
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("ticket {id} not found"))
    }

    fn sorted(mut tickets: Vec<Ticket>) -> Vec<Ticket> {
        tickets.sort_by_key(|t| t.id);
        tickets
    }
}

/// Tracker backed by a JSON file (or memory only).
#[derive(Debug)]
pub struct LocalTracker {
    doc: RefCell<TrackerDoc>,
    path: Option<PathBuf>,
}

impl LocalTracker {
    /// Load the document at `path`; a missing file starts an empty tracker.
    pub fn open(path: &Path) -> Result<Self> {
        let doc = if path.exists() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        } else {
            info!(path = %path.display(), "tracker document missing, starting empty");
            TrackerDoc::default()
        };
        Ok(Self {
            doc: RefCell::new(doc),
            path: Some(path.to_path_buf()),
        })
    }

    /// Tracker that never touches the filesystem.
    pub fn in_memory(doc: TrackerDoc) -> Self {
        Self {
            doc: RefCell::new(doc),
            path: None,
        }
    }

    /// Copy of the current document.
    pub fn snapshot(&self) -> TrackerDoc {
        self.doc.borrow().clone()
    }

    fn read<T>(&self, f: impl FnOnce(&TrackerDoc) -> Result<T>) -> Result<T> {
        f(&self.doc.borrow())
    }

    /// Apply `f` to a copy and keep it only once it is on disk; memory never
    /// holds state the document does not.
    fn mutate<T>(&self, f: impl FnOnce(&mut TrackerDoc) -> Result<T>) -> Result<T> {
        let mut draft = self.doc.borrow().clone();
        let value = f(&mut draft)?;
        self.persist(&draft)?;
        *self.doc.borrow_mut() = draft;
        Ok(value)
    }

    fn persist(&self, doc: &TrackerDoc) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut buf = serde_json::to_string_pretty(doc).context("serialize tracker")?;
        buf.push('\n');
        write_atomic(path, &buf)
    }
}

impl Tracker for LocalTracker {
    fn open_tickets(&self, project: &str) -> Result<Vec<Ticket>> {
        self.read(|doc| {
            Ok(TrackerDoc::sorted(
                doc.tickets
                    .iter()
                    .filter(|t| t.project == project && !doc.is_closed(&t.state))
                    .cloned()
                    .collect(),
            ))
        })
    }

    fn ticket(&self, id: TicketId) -> Result<Ticket> {
        self.read(|doc| {
            doc.tickets
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .ok_or_else(|| anyhow!("ticket {id} not found"))
        })
    }

    fn children(&self, id: TicketId) -> Result<Vec<Ticket>> {
        self.read(|doc| {
            Ok(TrackerDoc::sorted(
                doc.tickets
                    .iter()
                    .filter(|t| t.parent == Some(id))
                    .cloned()
                    .collect(),
            ))
        })
    }

    fn parent(&self, ticket: &Ticket) -> Result<Option<Ticket>> {
        ticket.parent.map(|id| self.ticket(id)).transpose()
    }

    fn siblings(&self, ticket: &Ticket) -> Result<Vec<Ticket>> {
        let Some(parent) = ticket.parent else {
            return Ok(Vec::new());
        };
        let mut siblings = self.children(parent)?;
        siblings.retain(|t| t.id != ticket.id);
        Ok(siblings)
    }

    fn blocking_relations(&self, ids: &[TicketId]) -> Result<Vec<BlockingRelation>> {
        self.read(|doc| {
            Ok(doc
                .relations
                .iter()
                .filter(|r| ids.contains(&r.blocked))
                .copied()
                .collect())
        })
    }

    fn comments(&self, id: TicketId, limit: usize) -> Result<Vec<Comment>> {
        self.read(|doc| {
            let all: Vec<Comment> = doc
                .comments
                .iter()
                .filter(|c| c.ticket == id)
                .cloned()
                .collect();
            let skip = all.len().saturating_sub(limit);
            Ok(all.into_iter().skip(skip).collect())
        })
    }

    #[instrument(skip_all, fields(ticket = id))]
    fn add_comment(&self, id: TicketId, body: &str) -> Result<()> {
        self.mutate(|doc| {
            doc.ticket_mut(id)?;
            doc.comments.push(Comment {
                ticket: id,
                body: body.to_string(),
            });
            debug!(bytes = body.len(), "comment added");
            Ok(())
        })
    }

    fn latest_status_change(&self) -> Result<Option<StatusChange>> {
        self.read(|doc| Ok(doc.status_changes.iter().max_by_key(|c| c.id).cloned()))
    }

    #[instrument(skip_all, fields(ticket = id, state))]
    fn set_status(&self, id: TicketId, state: &str) -> Result<()> {
        self.mutate(|doc| {
            if !doc.statuses.iter().any(|s| s.name == state) {
                return Err(anyhow!("unknown status '{state}'"));
            }
            let ticket = doc.ticket_mut(id)?;
            if ticket.state == state {
                return Ok(());
            }
            let from = std::mem::replace(&mut ticket.state, state.to_string());
            let change_id = doc.status_changes.iter().map(|c| c.id).max().unwrap_or(0) + 1;
            doc.status_changes.push(StatusChange {
                id: change_id,
                ticket: id,
                from,
                to: state.to_string(),
            });
            info!(ticket = id, state, "status changed");
            Ok(())
        })
    }

    #[instrument(skip_all, fields(subject = %new.subject))]
    fn create_ticket(&self, new: NewTicket) -> Result<Ticket> {
        self.mutate(|doc| {
            let max_existing = doc.tickets.iter().map(|t| t.id).max().unwrap_or(0);
            let id = doc.next_id.max(max_existing + 1);
            doc.next_id = id + 1;
            let ticket = Ticket {
                id,
                subject: new.subject,
                description: new.description,
                state: new.state,
                issue_type: new.issue_type,
                project: new.project,
                parent: new.parent,
                attributes: BTreeMap::new(),
            };
            doc.tickets.push(ticket.clone());
            info!(ticket = id, "ticket created");
            Ok(ticket)
        })
    }

    fn create_relation(&self, relation: BlockingRelation) -> Result<()> {
        self.mutate(|doc| {
            doc.ticket_mut(relation.blocked)?;
            doc.ticket_mut(relation.blocker)?;
            if !doc.relations.contains(&relation) {
                doc.relations.push(relation);
            }
            Ok(())
        })
    }

    fn set_attribute(&self, id: TicketId, attr: TicketAttr, value: &str) -> Result<()> {
        self.mutate(|doc| {
            doc.ticket_mut(id)?
                .attributes
                .insert(attr.key().to_string(), value.to_string());
            Ok(())
        })
    }

    fn project(&self, id: &str) -> Result<ProjectInfo> {
        self.read(|doc| {
            Ok(doc
                .projects
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .unwrap_or_else(|| ProjectInfo {
                    id: id.to_string(),
                    ..ProjectInfo::default()
                }))
        })
    }

    fn notify_repository_changed(&self, project: &str) -> Result<()> {
        self.mutate(|doc| {
            *doc.repository_syncs.entry(project.to_string()).or_default() += 1;
            debug!(project, "repository sync requested");
            Ok(())
        })
    }

    #[instrument(skip_all, fields(count = statuses.len()))]
    fn ensure_statuses(&self, statuses: &[StatusSpec]) -> Result<()> {
        self.mutate(|doc| {
            for spec in statuses {
                match doc.statuses.iter_mut().find(|s| s.name == spec.name) {
                    Some(existing) => existing.is_closed = spec.is_closed,
                    None => {
                        info!(status = %spec.name, "creating status");
                        doc.statuses.push(spec.clone());
                    }
                }
            }
            Ok(())
        })
    }
}

/// Write via temp file + rename so readers never see a partial document.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp tracker {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace tracker {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_tracker_doc, ticket};

    #[test]
    fn open_tickets_exclude_closed_and_other_projects() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![
            ticket(3, "Task", "Todo"),
            ticket(1, "Task", "Done"),
            ticket(2, "Task", "InProgress"),
        ];
        let mut foreign = ticket(4, "Task", "Todo");
        foreign.project = "other".to_string();
        doc.tickets.push(foreign);
        let tracker = LocalTracker::in_memory(doc);

        let ids: Vec<_> = tracker
            .open_tickets("demo")
            .expect("open")
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn set_status_records_audit_once() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Task", "Todo")];
        let tracker = LocalTracker::in_memory(doc);

        tracker.set_status(1, "InProgress").expect("set");
        tracker.set_status(1, "InProgress").expect("same state");
        assert!(tracker.set_status(1, "Shipped").is_err());

        let change = tracker.latest_status_change().expect("latest").expect("some");
        assert_eq!((change.from.as_str(), change.to.as_str()), ("Todo", "InProgress"));
        assert_eq!(tracker.snapshot().status_changes.len(), 1);
    }

    #[test]
    fn siblings_exclude_self_and_comments_keep_latest() {
        let mut doc = sample_tracker_doc();
        let mut a = ticket(2, "Task", "Todo");
        a.parent = Some(1);
        let mut b = ticket(3, "Task", "Done");
        b.parent = Some(1);
        doc.tickets = vec![ticket(1, "Epic", "InProgress"), a.clone(), b];
        let tracker = LocalTracker::in_memory(doc);

        let siblings = tracker.siblings(&a).expect("siblings");
        assert_eq!(siblings.iter().map(|t| t.id).collect::<Vec<_>>(), vec![3]);
        assert!(tracker.siblings(&ticket(1, "Epic", "Todo")).expect("root").is_empty());

        for body in ["one", "two", "three"] {
            tracker.add_comment(2, body).expect("comment");
        }
        let last_two: Vec<_> = tracker
            .comments(2, 2)
            .expect("comments")
            .into_iter()
            .map(|c| c.body)
            .collect();
        assert_eq!(last_two, vec!["two", "three"]);
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("state");
        fs::write(&blocker, "not a directory").expect("write blocker");
        let tracker = LocalTracker::open(&blocker.join("tracker.json")).expect("open");

        let err = tracker
            .create_ticket(NewTicket {
                subject: "Lost".to_string(),
                description: String::new(),
                state: "Todo".to_string(),
                issue_type: "Task".to_string(),
                project: "demo".to_string(),
                parent: None,
            })
            .unwrap_err();
        assert!(format!("{err:#}").contains("create directory"));
        let doc = tracker.snapshot();
        assert!(doc.tickets.is_empty());
        assert_eq!(doc.next_id, TrackerDoc::default().next_id);
    }

    #[test]
    fn failing_mutation_is_discarded() {
        let mut doc = sample_tracker_doc();
        doc.tickets = vec![ticket(1, "Task", "Todo")];
        let tracker = LocalTracker::in_memory(doc);
        let err = tracker.set_status(1, "NoSuchState").unwrap_err();
        assert!(err.to_string().contains("NoSuchState"));
        assert_eq!(tracker.ticket(1).expect("ticket").state, "Todo");
        assert!(tracker.snapshot().status_changes.is_empty());
    }

    #[test]
    fn file_backed_tracker_persists_mutations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state").join("tracker.json");
        let tracker = LocalTracker::open(&path).expect("open");
        tracker
            .ensure_statuses(&[StatusSpec {
                name: "Todo".to_string(),
                is_closed: false,
            }])
            .expect("statuses");
        let created = tracker
            .create_ticket(NewTicket {
                subject: "Write docs".to_string(),
                description: String::new(),
                state: "Todo".to_string(),
                issue_type: "Task".to_string(),
                project: "demo".to_string(),
                parent: None,
            })
            .expect("create");
        tracker
            .set_attribute(created.id, TicketAttr::BranchName, "docs")
            .expect("attr");

        let reopened = LocalTracker::open(&path).expect("reopen");
        let loaded = reopened.ticket(created.id).expect("ticket");
        assert_eq!(loaded.attribute(TicketAttr::BranchName), Some("docs"));
        assert_eq!(reopened.open_tickets("demo").expect("open").len(), 1);
    }
}
