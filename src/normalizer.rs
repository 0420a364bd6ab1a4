//! Canonical to Outlook-shaped translation.
//!
//! Everything here is pure. Gmail accepts the canonical shapes as they are,
//! so only the Outlook target is rewritten: hierarchical label names are
//! flattened, colors are restricted to Outlook's presets, match criteria are
//! reduced to the contains-style fields Outlook rules support, and a
//! `moveToFolder` destination can be derived from the label actions.
//!
//! Fields that have no Outlook equivalent are dropped and reported as
//! [`PolicyError::ProviderUnsupported`] diagnostics; they never fail the run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::OutlookConfig;
use crate::error::PolicyError;
use crate::models::{
    present, CanonicalDocument, FilterAction, FilterMatch, FilterSpec, LabelColor, LabelSpec,
    LABEL_PATH_SEPARATOR,
};
use crate::provider::ProviderKind;

/// The eight category colors Outlook accepts
pub const OUTLOOK_PRESET_COLORS: [&str; 8] = [
    "preset0", "preset1", "preset2", "preset3", "preset4", "preset5", "preset6", "preset7",
];

/// Folder every "remove INBOX" filter moves mail into
pub const ARCHIVE_FOLDER: &str = "Archive";

const OUTLOOK: &str = "outlook";

/// How a hierarchical name `A/B/C` becomes a flat category name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NameMode {
    /// `A-B-C`
    #[default]
    JoinDash,
    /// `A:B:C`
    JoinColon,
    /// `A`
    First,
}

/// Whether and how `moveToFolder` is derived for Outlook rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FolderMode {
    /// Leave `moveToFolder` alone
    #[default]
    None,
    /// Move into a folder named after the first `add` label
    FirstLabel,
    /// Filters removing `INBOX` move to `Archive` instead of assigning categories
    ArchiveOnRemoveInbox,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub name_mode: NameMode,
    pub folder_mode: FolderMode,
}

impl From<&OutlookConfig> for NormalizeOptions {
    fn from(config: &OutlookConfig) -> Self {
        Self {
            name_mode: config.name_mode,
            folder_mode: config.folder_mode,
        }
    }
}

/// Normalized value plus the fields that had to be dropped on the way
#[derive(Debug)]
pub struct Normalized<T> {
    pub value: T,
    pub dropped: Vec<PolicyError>,
}

impl<T> Normalized<T> {
    fn log_dropped(&self) {
        for diagnostic in &self.dropped {
            warn!("{}", diagnostic);
        }
    }
}

/// Flatten a hierarchical label name
pub fn flatten_name(name: &str, mode: NameMode) -> String {
    let segments: Vec<&str> = name
        .split(LABEL_PATH_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() {
        return name.trim().to_string();
    }
    match mode {
        NameMode::JoinDash => segments.join("-"),
        NameMode::JoinColon => segments.join(":"),
        NameMode::First => segments[0].to_string(),
    }
}

/// Keep a color only when it already names an Outlook preset
pub fn map_color(color: Option<&LabelColor>) -> Option<LabelColor> {
    let name = color?.name.as_deref()?.trim();
    OUTLOOK_PRESET_COLORS
        .iter()
        .find(|preset| preset.eq_ignore_ascii_case(name))
        .map(|preset| LabelColor::named(*preset))
}

/// Flatten names, map colors, drop visibility, and drop labels whose
/// flattened name collides with an earlier one.
pub fn normalize_labels(labels: &[LabelSpec], mode: NameMode) -> Normalized<Vec<LabelSpec>> {
    let mut seen = HashSet::new();
    let mut value = Vec::new();
    let mut dropped = Vec::new();

    for label in labels {
        let name = flatten_name(&label.name, mode);
        if !seen.insert(name.to_lowercase()) {
            debug!("'{}' flattens to existing category '{}'; skipped", label.name, name);
            continue;
        }

        if label.list_visibility.is_some() || label.message_visibility.is_some() {
            dropped.push(PolicyError::unsupported(
                OUTLOOK,
                format!("visibility of label '{}'", label.name),
            ));
        }

        let color = map_color(label.color.as_ref());
        if let (Some(original), None) = (&label.color, &color) {
            dropped.push(PolicyError::unsupported(
                OUTLOOK,
                format!("color '{}' of label '{}'", original, label.name),
            ));
        }

        value.push(LabelSpec {
            name,
            color,
            list_visibility: None,
            message_visibility: None,
        });
    }

    Normalized { value, dropped }
}

/// Apply the folder derivation mode to one action.
///
/// `first-label` uses the first `add` entry as written, so hierarchical
/// names keep their path and map onto nested folders.
pub fn derive_folder(action: &FilterAction, mode: FolderMode) -> FilterAction {
    let mut derived = action.clone();
    match mode {
        FolderMode::None => {}
        FolderMode::FirstLabel => {
            if present(&derived.move_to_folder).is_none() {
                if let Some(first) = derived.destination() {
                    derived.move_to_folder = Some(first.to_string());
                }
            }
        }
        FolderMode::ArchiveOnRemoveInbox => {
            if removes_inbox(action) {
                derived.move_to_folder = Some(ARCHIVE_FOLDER.to_string());
                derived.add.clear();
            }
        }
    }
    derived
}

fn removes_inbox(action: &FilterAction) -> bool {
    action
        .remove
        .iter()
        .any(|name| name.trim().eq_ignore_ascii_case("INBOX"))
}

fn outlook_match(spec: &FilterSpec, dropped: &mut Vec<PolicyError>) -> FilterMatch {
    let criteria = &spec.criteria;
    let mut unsupported = Vec::new();
    if present(&criteria.query).is_some() {
        unsupported.push("query");
    }
    if present(&criteria.negated_query).is_some() {
        unsupported.push("negatedQuery");
    }
    if criteria.has_attachment.is_some() {
        unsupported.push("hasAttachment");
    }
    if criteria.size.is_some() || present(&criteria.size_comparison).is_some() {
        unsupported.push("size");
    }
    for field in unsupported {
        dropped.push(PolicyError::unsupported(
            OUTLOOK,
            format!("match.{} of filter '{}'", field, spec),
        ));
    }

    FilterMatch {
        from: present(&criteria.from).map(str::to_string),
        to: present(&criteria.to).map(str::to_string),
        subject: present(&criteria.subject).map(str::to_string),
        ..Default::default()
    }
}

/// Reduce filters to what an Outlook inbox rule can express.
///
/// Filters left without match criteria or without any effect are dropped.
pub fn normalize_filters(filters: &[FilterSpec], options: NormalizeOptions) -> Normalized<Vec<FilterSpec>> {
    let mut value = Vec::new();
    let mut dropped = Vec::new();

    for spec in filters {
        let criteria = outlook_match(spec, &mut dropped);
        let derived = derive_folder(&spec.action, options.folder_mode);

        let archived = options.folder_mode == FolderMode::ArchiveOnRemoveInbox
            && removes_inbox(&spec.action);
        if !spec.action.remove.is_empty() && !archived {
            dropped.push(PolicyError::unsupported(
                OUTLOOK,
                format!("action.remove of filter '{}'", spec),
            ));
        }

        let mut add: Vec<String> = Vec::new();
        for name in derived.add.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            let flat = flatten_name(name, options.name_mode);
            if !add.contains(&flat) {
                add.push(flat);
            }
        }

        let action = FilterAction {
            add,
            remove: Vec::new(),
            forward: present(&derived.forward).map(str::to_string),
            move_to_folder: present(&derived.move_to_folder).map(str::to_string),
        };

        if criteria.is_empty() || !action.has_effect() {
            dropped.push(PolicyError::unsupported(
                OUTLOOK,
                format!("filter '{}' (nothing left to express as a rule)", spec),
            ));
            continue;
        }

        value.push(FilterSpec {
            name: spec.name.clone(),
            criteria,
            action,
        });
    }

    Normalized { value, dropped }
}

/// Shape a document for `provider`. Gmail is passed through untouched.
pub fn normalize_document(
    doc: &CanonicalDocument,
    provider: ProviderKind,
    options: NormalizeOptions,
) -> Normalized<CanonicalDocument> {
    if provider == ProviderKind::Gmail {
        return Normalized {
            value: doc.clone(),
            dropped: Vec::new(),
        };
    }

    let labels = normalize_labels(&doc.labels, options.name_mode);
    let filters = normalize_filters(&doc.filters, options);
    let mut dropped = labels.dropped;
    dropped.extend(filters.dropped);

    let normalized = Normalized {
        value: CanonicalDocument {
            labels: labels.value,
            filters: filters.value,
        },
        dropped,
    };
    normalized.log_dropped();
    normalized
}
