//! Canonical policy model and the provider-side shapes it is compared against

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{PolicyError, Result};

/// Separator for hierarchical label names
pub const LABEL_PATH_SEPARATOR: char = '/';

/// Label color.
///
/// Documents may write a bare preset name (`color: preset3`), a `{name}` map,
/// or Gmail's `{backgroundColor, textColor}` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ColorRepr", rename_all = "camelCase")]
pub struct LabelColor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Name(String),
    Fields {
        #[serde(default)]
        name: Option<String>,
        #[serde(default, rename = "backgroundColor")]
        background_color: Option<String>,
        #[serde(default, rename = "textColor")]
        text_color: Option<String>,
    },
}

impl From<ColorRepr> for LabelColor {
    fn from(repr: ColorRepr) -> Self {
        match repr {
            ColorRepr::Name(name) => LabelColor::named(name),
            ColorRepr::Fields {
                name,
                background_color,
                text_color,
            } => LabelColor {
                name,
                background_color,
                text_color,
            },
        }
    }
}

impl LabelColor {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn rgb(background: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: None,
            background_color: Some(background.into()),
            text_color: Some(text.into()),
        }
    }
}

impl fmt::Display for LabelColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.background_color, &self.text_color) {
            (Some(name), _, _) => write!(f, "{}", name),
            (None, Some(bg), Some(text)) => write!(f, "{}/{}", bg, text),
            (None, Some(bg), None) => write!(f, "{}", bg),
            _ => write!(f, "none"),
        }
    }
}

/// Desired label or category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<LabelColor>,
    #[serde(
        default,
        alias = "labelListVisibility",
        skip_serializing_if = "Option::is_none"
    )]
    pub list_visibility: Option<String>,
    #[serde(
        default,
        alias = "messageListVisibility",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_visibility: Option<String>,
}

impl LabelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: LabelColor) -> Self {
        self.color = Some(color);
        self
    }

    /// Path segments of a hierarchical name (`Lists/Newsletters`)
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.name.split(LABEL_PATH_SEPARATOR)
    }

    fn problems(&self) -> Vec<String> {
        let name = self.name.trim();
        if name.is_empty() {
            return vec!["label name is empty".to_string()];
        }
        if self.segments().any(|s| s.trim().is_empty()) {
            return vec![format!("label '{}' has an empty path segment", self.name)];
        }
        Vec::new()
    }
}

/// Match criteria of a filter. Every field is optional; `from`, `to` and
/// `subject` may hold an `A OR B` disjunction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negated_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_attachment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_comparison: Option<String>,
}

/// Trimmed value of an optional string field, `None` when blank
pub fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl FilterMatch {
    pub fn from_address(from: impl Into<String>) -> Self {
        Self {
            from: Some(from.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        present(&self.from).is_none()
            && present(&self.to).is_none()
            && present(&self.subject).is_none()
            && present(&self.query).is_none()
            && present(&self.negated_query).is_none()
            && present(&self.size_comparison).is_none()
            && self.has_attachment.is_none()
            && self.size.is_none()
    }

    /// `from` is set and none of `to`, `subject`, `query`, `negatedQuery` are
    pub fn is_from_only(&self) -> bool {
        present(&self.from).is_some()
            && present(&self.to).is_none()
            && present(&self.subject).is_none()
            && present(&self.query).is_none()
            && present(&self.negated_query).is_none()
    }
}

impl fmt::Display for FilterMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (key, value) in [
            ("from", &self.from),
            ("to", &self.to),
            ("subject", &self.subject),
            ("query", &self.query),
            ("negatedQuery", &self.negated_query),
        ] {
            if let Some(v) = present(value) {
                parts.push(format!("{}={}", key, v));
            }
        }
        if let Some(has) = self.has_attachment {
            parts.push(format!("hasAttachment={}", has));
        }
        if let Some(size) = self.size {
            let cmp = present(&self.size_comparison).unwrap_or("larger");
            parts.push(format!("size={}:{}", cmp, size));
        }
        if parts.is_empty() {
            write!(f, "<empty>")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Effects of a filter, addressed by label name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterAction {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<String>,
    /// Outlook-only, normally derived by the normalizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to_folder: Option<String>,
}

impl FilterAction {
    pub fn add_label(name: impl Into<String>) -> Self {
        Self {
            add: vec![name.into()],
            ..Default::default()
        }
    }

    pub fn has_effect(&self) -> bool {
        self.add.iter().any(|n| !n.trim().is_empty())
            || self.remove.iter().any(|n| !n.trim().is_empty())
            || present(&self.forward).is_some()
            || present(&self.move_to_folder).is_some()
    }

    /// First non-blank `add` entry
    pub fn destination(&self) -> Option<&str> {
        self.add.iter().map(|n| n.trim()).find(|n| !n.is_empty())
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "add={:?} remove={:?}", self.add, self.remove)?;
        if let Some(forward) = present(&self.forward) {
            write!(f, " forward={}", forward)?;
        }
        if let Some(folder) = present(&self.move_to_folder) {
            write!(f, " moveToFolder={}", folder)?;
        }
        Ok(())
    }
}

/// Desired filter or rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "match", alias = "criteria", default)]
    pub criteria: FilterMatch,
    #[serde(default)]
    pub action: FilterAction,
}

impl FilterSpec {
    pub fn new(criteria: FilterMatch, action: FilterAction) -> Self {
        Self {
            name: None,
            criteria,
            action,
        }
    }

    fn problems(&self, index: usize) -> Vec<String> {
        let mut problems = Vec::new();
        if self.criteria.is_empty() {
            problems.push(format!("filter #{} has an empty match", index + 1));
        }
        if !self.action.has_effect() {
            problems.push(format!("filter #{} ({}) has no action", index + 1, self.criteria));
        }
        problems
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.criteria, self.action)
    }
}

/// The desired state: every label and filter the account should carry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    #[serde(default)]
    pub labels: Vec<LabelSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

impl CanonicalDocument {
    /// Structural validation. Collects every problem into one error.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for label in &self.labels {
            let label_problems = label.problems();
            if label_problems.is_empty() && !seen.insert(label.name.trim().to_lowercase()) {
                problems.push(format!("label '{}' is declared more than once", label.name));
            }
            problems.extend(label_problems);
        }

        for (index, filter) in self.filters.iter().enumerate() {
            problems.extend(filter.problems(index));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PolicyError::Validation(problems.join("; ")))
        }
    }
}

/// Whether the provider or the user owns a label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelType {
    System,
    #[default]
    User,
}

/// Label or category as it exists on the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLabel {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub label_type: LabelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<LabelColor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_visibility: Option<String>,
}

impl RemoteLabel {
    pub fn user(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn system(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            label_type: LabelType::System,
            ..Default::default()
        }
    }

    pub fn is_system(&self) -> bool {
        self.label_type == LabelType::System
    }
}

/// Effects of a live filter, addressed by provider reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFilterAction {
    #[serde(default)]
    pub add_label_ids: Vec<String>,
    #[serde(default)]
    pub remove_label_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<String>,
    /// Outlook folder id; carried through but never compared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to_folder_id: Option<String>,
}

/// Filter or rule as it exists on the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFilter {
    pub id: String,
    #[serde(default)]
    pub criteria: FilterMatch,
    #[serde(default)]
    pub action: RemoteFilterAction,
}
