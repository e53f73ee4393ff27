//! Branch naming and ancestry for the ticket hierarchy.

use crate::core::types::{Ticket, TicketAttr};

/// Branch for a ticket: the override attribute, else `<prefix>-<id>`.
pub fn branch_name(ticket: &Ticket, prefix: &str) -> String {
    match ticket.attribute(TicketAttr::BranchName) {
        Some(name) => name.to_string(),
        None => format!("{prefix}-{}", ticket.id),
    }
}

/// Branches to check out, in order, before the ticket's own branch.
///
/// `ancestors` runs from the root ticket down to the direct parent. The chain
/// always starts at the project's final branch.
pub fn ancestor_chain(ancestors: &[Ticket], final_branch: &str, prefix: &str) -> Vec<String> {
    let mut chain = vec![final_branch.to_string()];
    chain.extend(ancestors.iter().map(|t| branch_name(t, prefix)));
    chain.dedup();
    chain
}

/// Nearest ancestor branch that exists, else the final branch.
///
/// `ancestors` runs from the direct parent up to the root.
pub fn merge_target<F>(ancestors: &[Ticket], final_branch: &str, prefix: &str, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    ancestors
        .iter()
        .map(|t| branch_name(t, prefix))
        .find(|name| exists(name))
        .unwrap_or_else(|| final_branch.to_string())
}

/// Render a diff link from a `{base}`/`{head}` URL template.
pub fn diff_link(template: Option<&str>, base: &str, head: &str) -> Option<String> {
    template
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.replace("{base}", base).replace("{head}", head))
}
