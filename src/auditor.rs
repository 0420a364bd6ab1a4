//! Coverage of live filters by the canonical document.
//!
//! Matching is a loose substring test in both directions: a canonical token
//! `@example.com` covers a live `someone@example.com`, and a canonical
//! `amazon` covers a live `amazon.com`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::clauses::split_or;
use crate::models::{present, CanonicalDocument, FilterMatch, RemoteFilter};

/// Effects of an exported filter, addressed by label name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedAction {
    #[serde(default, alias = "add", skip_serializing_if = "Vec::is_empty")]
    pub add_labels: Vec<String>,
    #[serde(default, alias = "remove", skip_serializing_if = "Vec::is_empty")]
    pub remove_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to_folder: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "match")]
    pub criteria: FilterMatch,
    #[serde(default)]
    pub action: ExportedAction,
}

impl ExportedFilter {
    /// Translate label references back to names. References with no known
    /// name are kept as they are.
    pub fn from_remote(filter: &RemoteFilter, names: &HashMap<String, String>) -> Self {
        let to_names = |refs: &[String]| -> Vec<String> {
            refs.iter()
                .map(|r| names.get(r).cloned().unwrap_or_else(|| r.clone()))
                .collect()
        };
        Self {
            id: Some(filter.id.clone()).filter(|id| !id.is_empty()),
            criteria: filter.criteria.clone(),
            action: ExportedAction {
                add_labels: to_names(&filter.action.add_label_ids),
                remove_labels: to_names(&filter.action.remove_label_ids),
                forward: filter.action.forward.clone(),
                move_to_folder: filter.action.move_to_folder_id.clone(),
            },
        }
    }

    /// From-only, with a destination and none of the narrowing qualifiers
    fn simple_rule(&self) -> Option<(&str, String)> {
        let c = &self.criteria;
        if present(&c.query).is_some()
            || present(&c.negated_query).is_some()
            || present(&c.size_comparison).is_some()
            || c.size.is_some()
            || present(&c.to).is_some()
            || present(&c.subject).is_some()
        {
            return None;
        }
        let from = present(&c.from)?.to_lowercase();
        let destination = self
            .action
            .add_labels
            .iter()
            .map(|n| n.trim())
            .find(|n| !n.is_empty())
            .or_else(|| present(&self.action.move_to_folder))?;
        Some((destination, from))
    }
}

/// Live filters as written by `export`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    #[serde(default)]
    pub filters: Vec<ExportedFilter>,
}

impl ExportSnapshot {
    pub fn from_remote(filters: &[RemoteFilter], names: &HashMap<String, String>) -> Self {
        Self {
            filters: filters
                .iter()
                .map(|f| ExportedFilter::from_remote(f, names))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRule {
    pub destination: String,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditReport {
    pub simple_total: usize,
    pub covered: usize,
    pub not_covered: usize,
    /// Share of simple rules not covered, 0-100
    pub percentage: f64,
    pub missing_samples: Vec<MissingRule>,
}

impl AuditReport {
    pub fn render(&self, show_missing: bool) -> Vec<String> {
        let mut lines = vec![
            format!("Simple rules: {}", self.simple_total),
            format!("Covered by canonical: {}", self.covered),
            format!("Not covered: {} ({:.1}%)", self.not_covered, self.percentage),
        ];
        if show_missing && !self.missing_samples.is_empty() {
            lines.push("Missing examples (destination, from):".to_string());
            lines.extend(
                self.missing_samples
                    .iter()
                    .map(|m| format!("- {} <- {}", m.destination, m.from)),
            );
        }
        lines
    }
}

/// destination -> lower-cased `from` atoms of every canonical rule
fn token_index(canonical: &CanonicalDocument) -> HashMap<&str, BTreeSet<String>> {
    let mut index: HashMap<&str, BTreeSet<String>> = HashMap::new();
    for filter in &canonical.filters {
        let Some(destination) = filter.action.destination() else {
            continue;
        };
        let tokens: Vec<String> = present(&filter.criteria.from)
            .map(split_or)
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            continue;
        }
        index.entry(destination).or_default().extend(tokens);
    }
    index
}

/// Score the simple rules of `snapshot` against `canonical`, keeping at
/// most `sample_limit` uncovered examples.
pub fn audit(
    canonical: &CanonicalDocument,
    snapshot: &ExportSnapshot,
    sample_limit: usize,
) -> AuditReport {
    let index = token_index(canonical);
    let empty = BTreeSet::new();

    let mut simple_total = 0;
    let mut covered = 0;
    let mut missing_samples = Vec::new();

    for live in &snapshot.filters {
        let Some((destination, from)) = live.simple_rule() else {
            continue;
        };
        simple_total += 1;

        let tokens = index.get(destination).unwrap_or(&empty);
        let is_covered = tokens
            .iter()
            .any(|t| from.contains(t.as_str()) || t.contains(from.as_str()));
        if is_covered {
            covered += 1;
        } else {
            debug!("Not covered: {} <- {}", destination, from);
            if missing_samples.len() < sample_limit {
                missing_samples.push(MissingRule {
                    destination: destination.to_string(),
                    from,
                });
            }
        }
    }

    let not_covered = simple_total - covered;
    let percentage = if simple_total == 0 {
        0.0
    } else {
        not_covered as f64 / simple_total as f64 * 100.0
    };

    AuditReport {
        simple_total,
        covered,
        not_covered,
        percentage,
        missing_samples,
    }
}
