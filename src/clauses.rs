//! `A OR B OR C` clause handling shared by the planner, optimizer, auditor
//! and the Outlook adapter, plus token edits on canonical `from` clauses.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{present, CanonicalDocument, LABEL_PATH_SEPARATOR};

static OR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bOR\b").expect("valid OR pattern"));

/// Split a clause on the `OR` token into trimmed, non-empty atoms.
///
/// Only a standalone upper-case `OR` separates atoms, so an address such as
/// `ORDERS@shop.com` stays whole.
pub fn split_or(clause: &str) -> Vec<String> {
    OR_TOKEN
        .split(clause)
        .map(str::trim)
        .filter(|atom| !atom.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join atoms back into a clause
pub fn join_or<S: AsRef<str>>(atoms: &[S]) -> String {
    atoms
        .iter()
        .map(|a| a.as_ref())
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Re-spell a clause with uniform ` OR ` spacing, keeping atom order.
/// Blank clauses become `None`.
pub fn canonical_clause(clause: &Option<String>) -> Option<String> {
    let atoms = split_or(present(clause)?);
    if atoms.is_empty() {
        None
    } else {
        Some(join_or(&atoms))
    }
}

/// Comma-separated address list with uniform `, ` spacing; blank lists
/// become `None`.
pub fn canonical_address_list(list: &Option<String>) -> Option<String> {
    let addresses: Vec<&str> = present(list)?
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    if addresses.is_empty() {
        None
    } else {
        Some(addresses.join(", "))
    }
}

/// One rewritten `from` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUpdate {
    /// Position of the filter in the document
    pub index: usize,
    pub old_from: String,
    pub new_from: String,
}

fn targets_label(add: &[String], label_prefix: &str) -> bool {
    let child_prefix = format!("{}{}", label_prefix, LABEL_PATH_SEPARATOR);
    add.iter()
        .any(|name| name == label_prefix || name.starts_with(&child_prefix))
}

/// Indices of filters adding `label_prefix` (or a child of it) whose `from`
/// contains `needle` (case-insensitive).
fn matching_filters(doc: &CanonicalDocument, label_prefix: &str, needle: &str) -> Vec<usize> {
    let needle = needle.to_lowercase();
    doc.filters
        .iter()
        .enumerate()
        .filter(|(_, f)| targets_label(&f.action.add, label_prefix))
        .filter(|(_, f)| {
            present(&f.criteria.from)
                .map(|from| from.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .map(|(i, _)| i)
        .collect()
}

/// Append tokens to matching `from` clauses, skipping ones already present
/// (case-insensitive). Returns the clauses that changed.
pub fn add_tokens(
    doc: &mut CanonicalDocument,
    label_prefix: &str,
    needle: &str,
    tokens: &[String],
) -> Vec<TokenUpdate> {
    let mut updates = Vec::new();

    for index in matching_filters(doc, label_prefix, needle) {
        let filter = &mut doc.filters[index];
        let old_from = filter.criteria.from.clone().unwrap_or_default();
        let mut atoms = split_or(&old_from);
        let mut existing: HashSet<String> = atoms.iter().map(|a| a.to_lowercase()).collect();

        let mut changed = false;
        for token in tokens.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if existing.insert(token.to_lowercase()) {
                atoms.push(token.to_string());
                changed = true;
            }
        }
        if !changed {
            continue;
        }

        let new_from = join_or(&atoms);
        debug!("from clause of filter #{}: '{}' -> '{}'", index + 1, old_from, new_from);
        filter.criteria.from = Some(new_from.clone());
        updates.push(TokenUpdate {
            index,
            old_from,
            new_from,
        });
    }

    updates
}

/// Remove tokens (case-insensitive) from matching `from` clauses. A clause
/// that would become empty is left alone.
pub fn remove_tokens(
    doc: &mut CanonicalDocument,
    label_prefix: &str,
    needle: &str,
    tokens: &[String],
) -> Vec<TokenUpdate> {
    let doomed: HashSet<String> = tokens.iter().map(|t| t.trim().to_lowercase()).collect();
    let mut updates = Vec::new();

    for index in matching_filters(doc, label_prefix, needle) {
        let filter = &mut doc.filters[index];
        let old_from = filter.criteria.from.clone().unwrap_or_default();
        let atoms = split_or(&old_from);
        let kept: Vec<String> = atoms
            .iter()
            .filter(|a| !doomed.contains(&a.to_lowercase()))
            .cloned()
            .collect();
        if kept.len() == atoms.len() || kept.is_empty() {
            continue;
        }

        let new_from = join_or(&kept);
        filter.criteria.from = Some(new_from.clone());
        updates.push(TokenUpdate {
            index,
            old_from,
            new_from,
        });
    }

    updates
}
