//! Collapse from-only filters that share a destination into one
//! `A OR B OR C` rule.

use std::collections::{BTreeSet, HashMap};
use tracing::{info, warn};

use crate::clauses::{join_or, split_or};
use crate::models::{present, CanonicalDocument, FilterAction, FilterMatch, FilterSpec};

/// Smallest group worth merging
pub const MIN_MERGE_THRESHOLD: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedGroup {
    pub destination: String,
    pub rules_merged: usize,
    pub unique_from_terms: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    pub original_count: usize,
    pub optimized_count: usize,
    pub merged_groups: Vec<MergedGroup>,
}

impl OptimizeReport {
    /// Summary line followed by one line per merged group, largest first
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "filters: {} -> {} ({} groups merged)",
            self.original_count,
            self.optimized_count,
            self.merged_groups.len()
        )];
        let mut groups: Vec<&MergedGroup> = self.merged_groups.iter().collect();
        groups.sort_by(|a, b| b.rules_merged.cmp(&a.rules_merged));
        lines.extend(groups.iter().map(|g| {
            format!(
                "- {}: merged {} rules into 1 (unique from terms={})",
                g.destination, g.rules_merged, g.unique_from_terms
            )
        }));
        lines
    }
}

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub document: CanonicalDocument,
    pub report: OptimizeReport,
}

fn destination(filter: &FilterSpec) -> Option<&str> {
    if filter.criteria.is_from_only() {
        filter.action.destination()
    } else {
        None
    }
}

/// Name given to the rule produced from a group
pub fn merged_rule_name(destination: &str) -> String {
    format!("merged_{}", destination.replace('/', "_"))
}

/// `None` when the group's `from` values hold no addresses at all
fn merge_group(destination: &str, members: &[&FilterSpec]) -> Option<(FilterSpec, MergedGroup)> {
    let atoms: BTreeSet<String> = members
        .iter()
        .filter_map(|f| present(&f.criteria.from))
        .flat_map(split_or)
        .collect();
    if atoms.is_empty() {
        return None;
    }
    let remove: BTreeSet<String> = members
        .iter()
        .flat_map(|f| f.action.remove.iter())
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();

    let atoms: Vec<String> = atoms.into_iter().collect();
    let merged = FilterSpec {
        name: Some(merged_rule_name(destination)),
        criteria: FilterMatch::from_address(join_or(&atoms)),
        action: FilterAction {
            add: vec![destination.to_string()],
            remove: remove.into_iter().collect(),
            forward: None,
            move_to_folder: None,
        },
    };
    let group = MergedGroup {
        destination: destination.to_string(),
        rules_merged: members.len(),
        unique_from_terms: atoms.len(),
    };
    Some((merged, group))
}

/// Merge groups of at least `threshold` (never below 2) from-only filters
/// with the same first `add` label.
///
/// Merged rules come first in group first-appearance order, followed by the
/// untouched filters in their original order. Labels are carried over as is.
pub fn optimize(doc: &CanonicalDocument, threshold: usize) -> OptimizeOutcome {
    let threshold = threshold.max(MIN_MERGE_THRESHOLD);

    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, filter) in doc.filters.iter().enumerate() {
        if let Some(dest) = destination(filter) {
            groups
                .entry(dest)
                .or_insert_with(|| {
                    order.push(dest);
                    Vec::new()
                })
                .push(i);
        }
    }

    let mut merged_filters = Vec::new();
    let mut merged_groups = Vec::new();
    let mut consumed = vec![false; doc.filters.len()];
    for dest in order {
        let members = &groups[dest];
        if members.len() < threshold {
            continue;
        }
        let specs: Vec<&FilterSpec> = members.iter().map(|&i| &doc.filters[i]).collect();
        let Some((merged, group)) = merge_group(dest, &specs) else {
            warn!("Group '{}' has no sender addresses; leaving it as is", dest);
            continue;
        };
        for &i in members {
            consumed[i] = true;
        }
        merged_filters.push(merged);
        merged_groups.push(group);
    }

    let passthrough = doc
        .filters
        .iter()
        .zip(&consumed)
        .filter(|(_, used)| !**used)
        .map(|(f, _)| f.clone());
    merged_filters.extend(passthrough);

    let report = OptimizeReport {
        original_count: doc.filters.len(),
        optimized_count: merged_filters.len(),
        merged_groups,
    };
    info!(
        "Optimized {} filters into {}",
        report.original_count, report.optimized_count
    );

    OptimizeOutcome {
        document: CanonicalDocument {
            labels: doc.labels.clone(),
            filters: merged_filters,
        },
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rule(from: &str, add: &[&str]) -> FilterSpec {
        FilterSpec::new(
            FilterMatch::from_address(from),
            FilterAction {
                add: add.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        )
    }

    fn doc(filters: Vec<FilterSpec>) -> CanonicalDocument {
        CanonicalDocument {
            labels: vec![],
            filters,
        }
    }

    #[test]
    fn test_two_work_rules_merge() {
        let input = doc(vec![rule("a@b.com", &["Work"]), rule("c@d.com", &["Work"])]);
        let outcome = optimize(&input, 2);

        assert_eq!(outcome.document.filters.len(), 1);
        let merged = &outcome.document.filters[0];
        assert_eq!(merged.criteria.from.as_deref(), Some("a@b.com OR c@d.com"));
        assert_eq!(merged.action.add, vec!["Work"]);
        assert_eq!(merged.name.as_deref(), Some("merged_Work"));
        assert_eq!(
            outcome.report.merged_groups,
            vec![MergedGroup {
                destination: "Work".to_string(),
                rules_merged: 2,
                unique_from_terms: 2,
            }]
        );
    }

    #[test]
    fn test_merge_unions_remove_and_drops_forward() {
        let mut first = rule("z@x.com OR a@x.com", &["Lists/News"]);
        first.action.remove = vec!["UNREAD".to_string()];
        first.action.forward = Some("me@x.com".to_string());
        let mut second = rule("a@x.com", &["Lists/News", "Other"]);
        second.action.remove = vec!["INBOX".to_string(), "UNREAD".to_string()];

        let outcome = optimize(&doc(vec![first, second]), 2);
        let merged = &outcome.document.filters[0];
        assert_eq!(merged.criteria.from.as_deref(), Some("a@x.com OR z@x.com"));
        assert_eq!(merged.action.remove, vec!["INBOX", "UNREAD"]);
        assert_eq!(merged.action.forward, None);
        assert_eq!(merged.name.as_deref(), Some("merged_Lists_News"));
        assert_eq!(outcome.report.merged_groups[0].unique_from_terms, 2);
    }

    #[test]
    fn test_non_simple_and_small_groups_pass_through() {
        let mut with_subject = rule("a@b.com", &["Work"]);
        with_subject.criteria.subject = Some("report".to_string());
        let input = doc(vec![
            rule("x@y.com", &["Home"]),
            with_subject.clone(),
            rule("c@d.com", &["Work"]),
            rule("e@f.com", &["Work"]),
        ]);
        let outcome = optimize(&input, 2);

        assert_eq!(outcome.report.original_count, 4);
        assert_eq!(outcome.report.optimized_count, 3);
        assert_eq!(outcome.document.filters[0].name.as_deref(), Some("merged_Work"));
        assert_eq!(outcome.document.filters[1], rule("x@y.com", &["Home"]));
        assert_eq!(outcome.document.filters[2], with_subject);
    }

    #[test]
    fn test_threshold_below_two_is_clamped() {
        let input = doc(vec![rule("a@b.com", &["Work"])]);
        let outcome = optimize(&input, 0);
        assert_eq!(outcome.document, input);
        assert!(outcome.report.merged_groups.is_empty());
    }

    #[test]
    fn test_group_without_addresses_is_left_alone() {
        let input = doc(vec![rule("OR", &["Work"]), rule(" OR  OR ", &["Work"])]);
        let outcome = optimize(&input, 2);
        assert_eq!(outcome.document, input);
        assert!(outcome.report.merged_groups.is_empty());
        assert_eq!(outcome.report.optimized_count, 2);
    }

    #[test]
    fn test_high_threshold_keeps_group() {
        let input = doc(vec![rule("a@b.com", &["Work"]), rule("c@d.com", &["Work"])]);
        assert_eq!(optimize(&input, 3).document.filters.len(), 2);
    }

    #[test]
    fn test_report_render_sorts_largest_first() {
        let input = doc(vec![
            rule("a", &["Small"]),
            rule("b", &["Small"]),
            rule("c", &["Big"]),
            rule("d", &["Big"]),
            rule("e", &["Big"]),
        ]);
        let lines = optimize(&input, 2).report.render();
        assert_eq!(lines[0], "filters: 5 -> 2 (2 groups merged)");
        assert_eq!(lines[1], "- Big: merged 3 rules into 1 (unique from terms=3)");
        assert_eq!(lines[2], "- Small: merged 2 rules into 1 (unique from terms=2)");
    }

    proptest! {
        #[test]
        fn prop_never_grows_and_keeps_every_atom(
            specs in prop::collection::vec((0usize..3, prop::collection::vec("[a-e]{1,3}@x\\.com", 1..3)), 0..12),
            threshold in 0usize..5,
        ) {
            let dests = ["Work", "Home", "Lists/News"];
            let filters: Vec<FilterSpec> = specs
                .iter()
                .map(|(d, atoms)| rule(&atoms.join(" OR "), &[dests[*d]]))
                .collect();
            let input = doc(filters);
            let outcome = optimize(&input, threshold);

            prop_assert!(outcome.document.filters.len() <= input.filters.len());
            for group in &outcome.report.merged_groups {
                let merged = outcome
                    .document
                    .filters
                    .iter()
                    .find(|f| f.name.as_deref() == Some(merged_rule_name(&group.destination).as_str()))
                    .unwrap();
                let merged_atoms = split_or(merged.criteria.from.as_deref().unwrap());
                for original in input.filters.iter().filter(|f| f.action.destination() == Some(group.destination.as_str())) {
                    for atom in split_or(original.criteria.from.as_deref().unwrap()) {
                        prop_assert!(merged_atoms.contains(&atom));
                    }
                }
            }
        }
    }
}
