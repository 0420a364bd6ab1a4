//! Provider capability interface shared by the Gmail and Outlook backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;
use crate::models::{FilterMatch, LabelColor, LabelSpec, RemoteFilter, RemoteLabel};

/// Backend selected once at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gmail,
    Outlook,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Gmail => write!(f, "gmail"),
            ProviderKind::Outlook => write!(f, "outlook"),
        }
    }
}

impl ProviderKind {
    /// The part of `color` this backend keeps: Gmail stores the
    /// background/text pair, Outlook only the preset name.
    pub fn stored_color(self, color: &LabelColor) -> Option<LabelColor> {
        let stored = match self {
            ProviderKind::Gmail => LabelColor {
                name: None,
                background_color: color.background_color.clone(),
                text_color: color.text_color.clone(),
            },
            ProviderKind::Outlook => LabelColor {
                name: color.name.clone(),
                ..Default::default()
            },
        };
        (stored != LabelColor::default()).then_some(stored)
    }
}

/// Mutable label fields sent with an update. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFields {
    pub name: Option<String>,
    pub color: Option<LabelColor>,
    pub list_visibility: Option<String>,
    pub message_visibility: Option<String>,
}

impl LabelFields {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.color.is_none()
            && self.list_visibility.is_none()
            && self.message_visibility.is_none()
    }
}

/// Filter action with label names already turned into provider references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAction {
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub forward: Option<String>,
    /// Folder path, resolved to a folder id by backends that have folders
    pub move_to_folder: Option<String>,
}

/// Upper-case names such as `INBOX` or `CATEGORY_UPDATES` are already
/// provider ids.
pub fn is_system_label_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_alphabetic())
        && !name.chars().any(|c| c.is_lowercase())
        && !name.contains(' ')
}

/// Label name to provider reference.
///
/// Gmail filters address labels by id, Outlook rules address categories by
/// display name; the adapter decides which via [`ProviderAdapter::label_ref`].
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    exact: HashMap<String, String>,
    folded: HashMap<String, String>,
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, reference: &str) {
        self.exact.insert(name.to_string(), reference.to_string());
        self.folded
            .entry(name.to_lowercase())
            .or_insert_with(|| reference.to_string());
    }

    /// Exact match first, then case-insensitive; system names resolve to
    /// themselves.
    pub fn resolve(&self, name: &str) -> Option<String> {
        if let Some(reference) = self.exact.get(name) {
            return Some(reference.clone());
        }
        if let Some(reference) = self.folded.get(&name.to_lowercase()) {
            return Some(reference.clone());
        }
        if is_system_label_name(name) {
            return Some(name.to_string());
        }
        None
    }

    /// Reference for `name`, falling back to the name itself
    pub fn resolve_or_name(&self, name: &str) -> String {
        self.resolve(name).unwrap_or_else(|| name.to_string())
    }

    /// Reverse lookup, reference to name
    pub fn names_by_reference(&self) -> HashMap<String, String> {
        self.exact
            .iter()
            .map(|(name, reference)| (reference.clone(), name.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

/// Label and filter capabilities of one mail backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> ProviderKind;

    /// List all labels (or categories) in the account
    async fn list_labels(&self) -> Result<Vec<RemoteLabel>>;

    /// Create a label from a canonical spec
    async fn create_label(&self, spec: &LabelSpec) -> Result<RemoteLabel>;

    /// Patch the given fields of an existing label
    async fn update_label(&self, id: &str, fields: &LabelFields) -> Result<RemoteLabel>;

    /// Delete a label by ID
    async fn delete_label(&self, id: &str) -> Result<()>;

    /// List all filters (or inbox rules)
    async fn list_filters(&self) -> Result<Vec<RemoteFilter>>;

    /// Create a filter; label references in `action` are already resolved
    async fn create_filter(&self, criteria: &FilterMatch, action: &ResolvedAction) -> Result<RemoteFilter>;

    /// Delete a filter by ID
    async fn delete_filter(&self, id: &str) -> Result<()>;

    /// How filters on this backend refer to `label`
    fn label_ref(&self, label: &RemoteLabel) -> String;

    /// Name to reference index built from the live label list
    async fn label_id_index(&self) -> Result<LabelIndex> {
        let labels = self.list_labels().await?;
        let mut index = LabelIndex::new();
        for label in &labels {
            index.insert(&label.name, &self.label_ref(label));
        }
        Ok(index)
    }

    /// IDs of messages matching a provider search query
    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>>;

    /// Add/remove labels on at most 500 messages; returns how many changed
    async fn batch_modify_messages(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize>;
}
