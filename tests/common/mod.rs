//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use mail_policy::error::{PolicyError, Result};
use mail_policy::models::{
    CanonicalDocument, FilterAction, FilterMatch, FilterSpec, LabelSpec, RemoteFilter,
    RemoteFilterAction, RemoteLabel,
};
use mail_policy::provider::{LabelFields, ProviderAdapter, ProviderKind, ResolvedAction};
use mail_policy::RetryPolicy;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Mailbox {
    next_id: usize,
    labels: Vec<RemoteLabel>,
    filters: Vec<RemoteFilter>,
    /// Search query -> message ids
    messages: HashMap<String, Vec<String>>,
    /// (message ids, add, remove) per batch call
    modifications: Vec<(Vec<String>, Vec<String>, Vec<String>)>,
    /// Deletes that fail with a 503 before one succeeds
    failing_deletes: u32,
    calls: Vec<String>,
}

/// Provider double that keeps labels and filters in memory.
///
/// The Gmail flavor references labels by id, the Outlook flavor by name and
/// keeps only the match fields Outlook rules can hold. Colors are stored the
/// way each backend stores them.
pub struct InMemoryProvider {
    kind: ProviderKind,
    mailbox: Mutex<Mailbox>,
}

impl InMemoryProvider {
    pub fn gmail() -> Self {
        Self::new(ProviderKind::Gmail)
    }

    pub fn outlook() -> Self {
        Self::new(ProviderKind::Outlook)
    }

    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            mailbox: Mutex::new(Mailbox::default()),
        }
    }

    pub fn with_system_label(self, id: &str) -> Self {
        self.mailbox.lock().unwrap().labels.push(RemoteLabel::system(id));
        self
    }

    pub fn with_label(self, id: &str, name: &str) -> Self {
        self.mailbox
            .lock()
            .unwrap()
            .labels
            .push(RemoteLabel::user(id, name));
        self
    }

    pub fn with_filter(self, id: &str, from: &str, add_ids: &[&str]) -> Self {
        self.mailbox.lock().unwrap().filters.push(RemoteFilter {
            id: id.to_string(),
            criteria: FilterMatch::from_address(from),
            action: RemoteFilterAction {
                add_label_ids: add_ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        });
        self
    }

    pub fn with_messages(self, query: &str, ids: &[&str]) -> Self {
        self.mailbox
            .lock()
            .unwrap()
            .messages
            .insert(query.to_string(), ids.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn failing_deletes(self, count: u32) -> Self {
        self.mailbox.lock().unwrap().failing_deletes = count;
        self
    }

    pub fn labels(&self) -> Vec<RemoteLabel> {
        self.mailbox.lock().unwrap().labels.clone()
    }

    pub fn filters(&self) -> Vec<RemoteFilter> {
        self.mailbox.lock().unwrap().filters.clone()
    }

    pub fn modifications(&self) -> Vec<(Vec<String>, Vec<String>, Vec<String>)> {
        self.mailbox.lock().unwrap().modifications.clone()
    }

    /// Mutating calls in order, e.g. `create_label:Work`
    pub fn calls(&self) -> Vec<String> {
        self.mailbox.lock().unwrap().calls.clone()
    }

    pub fn label_id(&self, name: &str) -> Option<String> {
        self.labels()
            .into_iter()
            .find(|l| l.name == name)
            .map(|l| l.id)
    }

    fn take_delete_failure(mailbox: &mut Mailbox) -> Result<()> {
        if mailbox.failing_deletes > 0 {
            mailbox.failing_deletes -= 1;
            return Err(PolicyError::from_status(503, "HTTP 503: busy", None));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for InMemoryProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn list_labels(&self) -> Result<Vec<RemoteLabel>> {
        Ok(self.labels())
    }

    async fn create_label(&self, spec: &LabelSpec) -> Result<RemoteLabel> {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.next_id += 1;
        let label = RemoteLabel {
            id: format!("Label_{}", mailbox.next_id),
            name: spec.name.clone(),
            color: spec.color.as_ref().and_then(|c| self.kind.stored_color(c)),
            list_visibility: spec.list_visibility.clone(),
            message_visibility: spec.message_visibility.clone(),
            ..Default::default()
        };
        mailbox.calls.push(format!("create_label:{}", spec.name));
        mailbox.labels.push(label.clone());
        Ok(label)
    }

    async fn update_label(&self, id: &str, fields: &LabelFields) -> Result<RemoteLabel> {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.calls.push(format!("update_label:{}", id));
        let label = mailbox
            .labels
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;
        if let Some(name) = &fields.name {
            label.name = name.clone();
        }
        if let Some(color) = &fields.color {
            label.color = self.kind.stored_color(color);
        }
        if let Some(v) = &fields.list_visibility {
            label.list_visibility = Some(v.clone());
        }
        if let Some(v) = &fields.message_visibility {
            label.message_visibility = Some(v.clone());
        }
        Ok(label.clone())
    }

    async fn delete_label(&self, id: &str) -> Result<()> {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.calls.push(format!("delete_label:{}", id));
        Self::take_delete_failure(&mut mailbox)?;
        mailbox.labels.retain(|l| l.id != id);
        Ok(())
    }

    async fn list_filters(&self) -> Result<Vec<RemoteFilter>> {
        Ok(self.filters())
    }

    async fn create_filter(&self, criteria: &FilterMatch, action: &ResolvedAction) -> Result<RemoteFilter> {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.next_id += 1;
        let criteria = match self.kind {
            ProviderKind::Gmail => criteria.clone(),
            ProviderKind::Outlook => FilterMatch {
                from: criteria.from.clone(),
                to: criteria.to.clone(),
                subject: criteria.subject.clone(),
                ..Default::default()
            },
        };
        let filter = RemoteFilter {
            id: format!("Filter_{}", mailbox.next_id),
            criteria,
            action: RemoteFilterAction {
                add_label_ids: action.add.clone(),
                remove_label_ids: action.remove.clone(),
                forward: action.forward.clone(),
                move_to_folder_id: action.move_to_folder.as_ref().map(|p| format!("folder:{}", p)),
            },
        };
        mailbox.calls.push(format!("create_filter:{}", filter.id));
        mailbox.filters.push(filter.clone());
        Ok(filter)
    }

    async fn delete_filter(&self, id: &str) -> Result<()> {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.calls.push(format!("delete_filter:{}", id));
        Self::take_delete_failure(&mut mailbox)?;
        mailbox.filters.retain(|f| f.id != id);
        Ok(())
    }

    fn label_ref(&self, label: &RemoteLabel) -> String {
        match self.kind {
            ProviderKind::Gmail => label.id.clone(),
            ProviderKind::Outlook => label.name.clone(),
        }
    }

    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>> {
        if self.kind == ProviderKind::Outlook {
            return Err(PolicyError::unsupported("outlook", "message search"));
        }
        Ok(self
            .mailbox
            .lock()
            .unwrap()
            .messages
            .get(query)
            .cloned()
            .unwrap_or_default())
    }

    async fn batch_modify_messages(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize> {
        assert!(message_ids.len() <= 500, "batch over the provider limit");
        self.mailbox.lock().unwrap().modifications.push((
            message_ids.to_vec(),
            add_label_ids.to_vec(),
            remove_label_ids.to_vec(),
        ));
        Ok(message_ids.len())
    }
}

/// Retry policy that never sleeps
pub fn instant_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::ZERO,
        backoff_factor: 2.0,
    }
}

/// Create a from-only filter adding one label
pub fn sender_filter(from: &str, label: &str) -> FilterSpec {
    FilterSpec::new(FilterMatch::from_address(from), FilterAction::add_label(label))
}

/// Document used by most reconciliation tests
pub fn sample_document() -> CanonicalDocument {
    CanonicalDocument {
        labels: vec![LabelSpec::new("Work"), LabelSpec::new("Lists/News")],
        filters: vec![
            sender_filter("boss@corp.com", "Work"),
            sender_filter("a@news.com OR b@news.com", "Lists/News"),
        ],
    }
}

/// Parse a YAML document inline
pub fn document_from_yaml(yaml: &str) -> CanonicalDocument {
    let doc: CanonicalDocument = serde_yaml::from_str(yaml).expect("valid test document");
    doc.validate().expect("test document passes validation");
    doc
}
