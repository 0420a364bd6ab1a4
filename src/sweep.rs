//! Retroactive application of canonical filters to existing messages.
//!
//! Every filter becomes a Gmail search query plus a label change; matching
//! messages are modified in batches.

use tracing::{info, warn};

use crate::error::Result;
use crate::executor::{ensure_label, modify_messages_in_batches};
use crate::models::{present, CanonicalDocument, FilterMatch, FilterSpec};
use crate::provider::{LabelIndex, ProviderAdapter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOptions {
    /// Only messages newer than this many days
    pub newer_than_days: Option<u32>,
    /// Only messages older than this many days
    pub older_than_days: Option<u32>,
    pub only_inbox: bool,
    /// Stop listing a rule's matches after this many ids
    pub max_messages: Option<usize>,
    pub dry_run: bool,
}

/// Gmail search query equivalent of a filter match
pub fn build_gmail_query(criteria: &FilterMatch, options: &SweepOptions) -> String {
    let mut parts = Vec::new();
    if let Some(from) = present(&criteria.from) {
        parts.push(format!("from:({})", from));
    }
    if let Some(to) = present(&criteria.to) {
        parts.push(format!("to:({})", to));
    }
    if let Some(subject) = present(&criteria.subject) {
        if subject.contains(' ') {
            parts.push(format!("subject:\"{}\"", subject));
        } else {
            parts.push(format!("subject:{}", subject));
        }
    }
    if let Some(query) = present(&criteria.query) {
        parts.push(query.to_string());
    }
    if let Some(negated) = present(&criteria.negated_query) {
        parts.push(format!("-({})", negated));
    }
    if criteria.has_attachment == Some(true) {
        parts.push("has:attachment".to_string());
    }
    if let Some(days) = options.newer_than_days.filter(|d| *d > 0) {
        parts.push(format!("newer_than:{}d", days));
    }
    if let Some(days) = options.older_than_days.filter(|d| *d > 0) {
        parts.push(format!("older_than:{}d", days));
    }
    if options.only_inbox {
        parts.push("in:inbox".to_string());
    }
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepRule {
    pub query: String,
    pub add_label_ids: Vec<String>,
    pub remove_label_ids: Vec<String>,
    pub matched: usize,
    pub modified: usize,
}

impl SweepRule {
    pub fn render(&self, dry_run: bool) -> String {
        if dry_run {
            format!(
                "Query: {} => {} messages; +{:?} -{:?}",
                self.query, self.matched, self.add_label_ids, self.remove_label_ids
            )
        } else {
            format!("Query: {} => modified {} messages", self.query, self.modified)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rules: Vec<SweepRule>,
    /// Filters skipped because they had no match criteria
    pub skipped: usize,
}

impl SweepReport {
    pub fn total_modified(&self) -> usize {
        self.rules.iter().map(|r| r.modified).sum()
    }

    pub fn total_matched(&self) -> usize {
        self.rules.iter().map(|r| r.matched).sum()
    }
}

/// Label references for a filter's action. Missing add labels are created,
/// except on dry runs where their names stand in for references.
async fn label_changes(
    adapter: &dyn ProviderAdapter,
    index: &mut LabelIndex,
    spec: &FilterSpec,
    dry_run: bool,
) -> Result<(Vec<String>, Vec<String>)> {
    let mut add = Vec::new();
    for name in spec.action.add.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if dry_run {
            add.push(index.resolve_or_name(name));
        } else {
            add.push(ensure_label(adapter, index, name).await?);
        }
    }
    let remove = spec
        .action
        .remove
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(|n| index.resolve_or_name(n))
        .collect();
    Ok((add, remove))
}

/// Apply each filter's label changes to the messages it matches today
pub async fn sweep(
    adapter: &dyn ProviderAdapter,
    doc: &CanonicalDocument,
    options: SweepOptions,
    batch_size: usize,
) -> Result<SweepReport> {
    let mut index = adapter.label_id_index().await?;
    let mut report = SweepReport::default();

    for spec in &doc.filters {
        if spec.criteria.is_empty() {
            report.skipped += 1;
            continue;
        }
        let query = build_gmail_query(&spec.criteria, &options);
        let (add, remove) = label_changes(adapter, &mut index, spec, options.dry_run).await?;
        if add.is_empty() && remove.is_empty() {
            warn!("Filter {} changes no labels; skipping", spec);
            report.skipped += 1;
            continue;
        }

        let mut ids = adapter.list_message_ids(&query).await?;
        if let Some(limit) = options.max_messages {
            ids.truncate(limit);
        }

        let modified = if options.dry_run {
            0
        } else {
            modify_messages_in_batches(adapter, &ids, &add, &remove, batch_size).await?
        };
        info!("Query '{}': {} matched, {} modified", query, ids.len(), modified);

        report.rules.push(SweepRule {
            query,
            add_label_ids: add,
            remove_label_ids: remove,
            matched: ids.len(),
            modified,
        });
    }

    Ok(report)
}
