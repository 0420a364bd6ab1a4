//! Desired-vs-live differencing.
//!
//! Labels are keyed by name (case-insensitive), filters by the
//! [`FilterKey`] of their criteria and effects. The planner never talks to a
//! provider by itself; [`RemoteState::fetch`] is the only async step and it
//! runs before any diffing.

use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

use crate::clauses::{canonical_address_list, canonical_clause};
use crate::error::Result;
use crate::models::{present, CanonicalDocument, FilterSpec, LabelSpec, RemoteFilter, RemoteLabel};
use crate::provider::{LabelFields, LabelIndex, ProviderAdapter, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanKind::Create => write!(f, "create"),
            PlanKind::Update => write!(f, "update"),
            PlanKind::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlanTarget {
    Label,
    Filter,
}

impl fmt::Display for PlanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanTarget::Label => write!(f, "label"),
            PlanTarget::Filter => write!(f, "filter"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Desired {
    Label(LabelSpec),
    Filter(FilterSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Existing {
    Label(RemoteLabel),
    Filter(RemoteFilter),
}

impl Existing {
    pub fn id(&self) -> &str {
        match self {
            Existing::Label(label) => &label.id,
            Existing::Filter(filter) => &filter.id,
        }
    }
}

/// One planned operation
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub kind: PlanKind,
    pub target: PlanTarget,
    /// Human-readable identity of the entity, label names rather than ids
    pub key: String,
    pub desired: Option<Desired>,
    pub existing: Option<Existing>,
    /// Fields to patch, set on label updates only
    pub changes: Option<LabelFields>,
    pub reason: String,
}

impl PlanEntry {
    /// One display line
    pub fn render(&self) -> String {
        match self.kind {
            PlanKind::Create => format!("{} {} {}", self.kind, self.target, self.key),
            PlanKind::Update => {
                format!("{} {} {}: {}", self.kind, self.target, self.key, self.reason)
            }
            PlanKind::Delete => {
                let id = self.existing.as_ref().map(Existing::id).unwrap_or("?");
                format!("{} {} {} [{}]: {}", self.kind, self.target, self.key, id, self.reason)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCounts {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
}

impl fmt::Display for PlanCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "create={} update={} delete={}", self.create, self.update, self.delete)
    }
}

/// Ordered operations plus the deletes that were not opted into
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    entries: Vec<PlanEntry>,
    would_delete: Vec<PlanEntry>,
}

impl Plan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<PlanEntry> {
        self.entries
    }

    /// Deletes that a `delete-missing` run would perform
    pub fn would_delete(&self) -> &[PlanEntry] {
        &self.would_delete
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts::default();
        for entry in &self.entries {
            match entry.kind {
                PlanKind::Create => counts.create += 1,
                PlanKind::Update => counts.update += 1,
                PlanKind::Delete => counts.delete += 1,
            }
        }
        counts
    }

    /// A copy holding only the first `limit` entries
    pub fn truncate(&self, limit: usize) -> Plan {
        Plan {
            entries: self.entries.iter().take(limit).cloned().collect(),
            would_delete: self.would_delete.clone(),
        }
    }

    /// One line per entry, `would delete` lines, then the summary line
    pub fn render(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.entries.iter().map(PlanEntry::render).collect();
        lines.extend(
            self.would_delete
                .iter()
                .map(|entry| format!("would {}", entry.render())),
        );
        lines.push(self.counts().to_string());
        lines
    }
}

/// Comparison key of a filter.
///
/// `query`, `negatedQuery` and `remove` are not part of it. `add` holds
/// provider references, sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterKey {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub add: Vec<String>,
    pub forward: Option<String>,
}

impl FilterKey {
    pub fn desired(spec: &FilterSpec, index: &LabelIndex) -> Self {
        let add = spec
            .action
            .add
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(|n| index.resolve_or_name(n))
            .collect();
        Self::build(
            &spec.criteria.from,
            &spec.criteria.to,
            &spec.criteria.subject,
            add,
            &spec.action.forward,
        )
    }

    pub fn existing(filter: &RemoteFilter) -> Self {
        Self::build(
            &filter.criteria.from,
            &filter.criteria.to,
            &filter.criteria.subject,
            filter.action.add_label_ids.clone(),
            &filter.action.forward,
        )
    }

    fn build(
        from: &Option<String>,
        to: &Option<String>,
        subject: &Option<String>,
        mut add: Vec<String>,
        forward: &Option<String>,
    ) -> Self {
        add.sort();
        add.dedup();
        Self {
            from: canonical_clause(from),
            to: canonical_clause(to),
            subject: canonical_clause(subject),
            add,
            forward: canonical_address_list(forward),
        }
    }

    /// Display form with references translated back to label names
    pub fn describe(&self, names: &HashMap<String, String>) -> String {
        let mut criteria = Vec::new();
        for (field, value) in [("from", &self.from), ("to", &self.to), ("subject", &self.subject)] {
            if let Some(v) = value {
                criteria.push(format!("{}={}", field, v));
            }
        }
        if criteria.is_empty() {
            criteria.push("<no criteria>".to_string());
        }

        let mut effects = Vec::new();
        if !self.add.is_empty() {
            let labels: Vec<&str> = self
                .add
                .iter()
                .map(|r| names.get(r).map(String::as_str).unwrap_or(r))
                .collect();
            effects.push(format!("add=[{}]", labels.join(", ")));
        }
        if let Some(forward) = &self.forward {
            effects.push(format!("forward={}", forward));
        }

        if effects.is_empty() {
            criteria.join(" ")
        } else {
            format!("{} -> {}", criteria.join(" "), effects.join(" "))
        }
    }
}

fn label_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Caller choices that shape a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Include deletes of live entities missing from the document
    pub delete_missing: bool,
}

/// Live labels, filters and the label reference index, fetched once
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    /// Backend the state was read from; decides which color fields compare
    pub provider: ProviderKind,
    pub labels: Vec<RemoteLabel>,
    pub filters: Vec<RemoteFilter>,
    pub index: LabelIndex,
}

impl RemoteState {
    pub async fn fetch(adapter: &dyn ProviderAdapter) -> Result<Self> {
        let labels = adapter.list_labels().await?;
        let mut index = LabelIndex::new();
        for label in &labels {
            index.insert(&label.name, &adapter.label_ref(label));
        }
        let filters = adapter.list_filters().await?;
        info!(
            "Fetched {} labels and {} filters from {}",
            labels.len(),
            filters.len(),
            adapter.kind()
        );
        Ok(Self {
            provider: adapter.kind(),
            labels,
            filters,
            index,
        })
    }
}

#[derive(Debug, Default)]
struct Partial {
    creates: Vec<PlanEntry>,
    updates: Vec<PlanEntry>,
    deletes: Vec<PlanEntry>,
    would_delete: Vec<PlanEntry>,
}

fn label_changes(
    desired: &LabelSpec,
    existing: &RemoteLabel,
    provider: ProviderKind,
) -> Option<(LabelFields, String)> {
    let mut fields = LabelFields::default();
    let mut reasons = Vec::new();

    // Only the color fields the backend stores can ever settle
    match desired.color.as_ref().map(|c| (c, provider.stored_color(c))) {
        Some((color, None)) => {
            debug!("{} keeps no part of color {} of label '{}'", provider, color, desired.name);
        }
        Some((_, Some(color))) => {
            let live = existing.color.as_ref().and_then(|c| provider.stored_color(c));
            if live.as_ref() != Some(&color) {
                let current = live
                    .as_ref()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                reasons.push(format!("color {} -> {}", current, color));
                fields.color = Some(color);
            }
        }
        None => {}
    }
    if let Some(visibility) = present(&desired.list_visibility) {
        if present(&existing.list_visibility) != Some(visibility) {
            reasons.push(format!("listVisibility -> {}", visibility));
            fields.list_visibility = Some(visibility.to_string());
        }
    }
    if let Some(visibility) = present(&desired.message_visibility) {
        if present(&existing.message_visibility) != Some(visibility) {
            reasons.push(format!("messageVisibility -> {}", visibility));
            fields.message_visibility = Some(visibility.to_string());
        }
    }

    if fields.is_empty() {
        None
    } else {
        Some((fields, reasons.join(", ")))
    }
}

fn plan_labels(
    desired: &[LabelSpec],
    existing: &[RemoteLabel],
    provider: ProviderKind,
    options: PlanOptions,
) -> Partial {
    let mut partial = Partial::default();

    let mut live: HashMap<String, &RemoteLabel> = HashMap::new();
    for label in existing {
        live.entry(label_key(&label.name)).or_insert(label);
    }

    let mut wanted = HashSet::new();
    for spec in desired {
        let key = label_key(&spec.name);
        if !wanted.insert(key.clone()) {
            continue;
        }
        match live.get(&key) {
            None => partial.creates.push(PlanEntry {
                kind: PlanKind::Create,
                target: PlanTarget::Label,
                key: spec.name.trim().to_string(),
                desired: Some(Desired::Label(spec.clone())),
                existing: None,
                changes: None,
                reason: "missing on provider".to_string(),
            }),
            Some(current) if current.is_system() => {
                debug!("'{}' is a system label; not updating", current.name);
            }
            Some(current) => {
                if let Some((fields, reason)) = label_changes(spec, current, provider) {
                    partial.updates.push(PlanEntry {
                        kind: PlanKind::Update,
                        target: PlanTarget::Label,
                        key: current.name.clone(),
                        desired: Some(Desired::Label(spec.clone())),
                        existing: Some(Existing::Label((*current).clone())),
                        changes: Some(fields),
                        reason,
                    });
                }
            }
        }
    }

    for label in existing {
        if label.is_system() || wanted.contains(&label_key(&label.name)) {
            continue;
        }
        let entry = PlanEntry {
            kind: PlanKind::Delete,
            target: PlanTarget::Label,
            key: label.name.clone(),
            desired: None,
            existing: Some(Existing::Label(label.clone())),
            changes: None,
            reason: "not in canonical document".to_string(),
        };
        if options.delete_missing {
            partial.deletes.push(entry);
        } else {
            partial.would_delete.push(entry);
        }
    }

    partial
}

fn plan_filters(
    desired: &[FilterSpec],
    existing: &[RemoteFilter],
    index: &LabelIndex,
    options: PlanOptions,
) -> Partial {
    let mut partial = Partial::default();
    let names = index.names_by_reference();

    let live: HashSet<FilterKey> = existing.iter().map(FilterKey::existing).collect();

    let mut wanted = HashSet::new();
    for spec in desired {
        let key = FilterKey::desired(spec, index);
        if !wanted.insert(key.clone()) || live.contains(&key) {
            continue;
        }
        partial.creates.push(PlanEntry {
            kind: PlanKind::Create,
            target: PlanTarget::Filter,
            key: key.describe(&names),
            desired: Some(Desired::Filter(spec.clone())),
            existing: None,
            changes: None,
            reason: "missing on provider".to_string(),
        });
    }

    for filter in existing {
        let key = FilterKey::existing(filter);
        if wanted.contains(&key) {
            continue;
        }
        let entry = PlanEntry {
            kind: PlanKind::Delete,
            target: PlanTarget::Filter,
            key: key.describe(&names),
            desired: None,
            existing: Some(Existing::Filter(filter.clone())),
            changes: None,
            reason: "not in canonical document".to_string(),
        };
        if options.delete_missing {
            partial.deletes.push(entry);
        } else {
            partial.would_delete.push(entry);
        }
    }

    partial
}

fn by_key(entries: &mut [PlanEntry]) {
    entries.sort_by(|a, b| {
        a.key
            .to_lowercase()
            .cmp(&b.key.to_lowercase())
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Diff a document against live state.
///
/// Order: label creates, filter creates, label updates, filter deletes,
/// label deletes; by key within each group. System labels are never deleted.
/// Desired labels or filters that share a key collapse to the first one in
/// document order.
pub fn build_plan(doc: &CanonicalDocument, state: &RemoteState, options: PlanOptions) -> Plan {
    let mut labels = plan_labels(&doc.labels, &state.labels, state.provider, options);
    let mut filters = plan_filters(&doc.filters, &state.filters, &state.index, options);

    for group in [
        &mut labels.creates,
        &mut labels.updates,
        &mut labels.deletes,
        &mut labels.would_delete,
        &mut filters.creates,
        &mut filters.deletes,
        &mut filters.would_delete,
    ] {
        by_key(group);
    }

    let mut entries = Vec::new();
    entries.append(&mut labels.creates);
    entries.append(&mut filters.creates);
    entries.append(&mut labels.updates);
    entries.append(&mut filters.deletes);
    entries.append(&mut labels.deletes);

    let mut would_delete = filters.would_delete;
    would_delete.append(&mut labels.would_delete);

    let plan = Plan {
        entries,
        would_delete,
    };
    info!("Plan: {}", plan.counts());
    plan
}
