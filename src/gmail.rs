//! Gmail backend: labels and settings filters through the `google-gmail1` hub

use async_trait::async_trait;
use google_gmail1::api::{
    BatchModifyMessagesRequest, Filter, FilterAction, FilterCriteria, Label,
    LabelColor as GmailLabelColor,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::config::{GmailConfig, MAX_BATCH_SIZE};
use crate::error::{PolicyError, Result};
use crate::models::{
    present, FilterMatch, LabelColor, LabelSpec, LabelType, RemoteFilter, RemoteFilterAction,
    RemoteLabel,
};
use crate::provider::{LabelFields, ProviderAdapter, ProviderKind, ResolvedAction};

const LABELS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.labels";
const SETTINGS_SCOPE: &str = "https://www.googleapis.com/auth/gmail.settings.basic";
const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Page size for message listing
const LIST_PAGE_SIZE: u32 = 100;

pub struct GmailAdapter {
    hub: GmailHub,
    timeout: Duration,
    max_retries: u32,
}

impl GmailAdapter {
    pub fn new(hub: GmailHub, config: &GmailConfig) -> Self {
        Self {
            hub,
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.max_retries,
        }
    }

    /// Check if an error is retryable
    fn should_retry(error: &PolicyError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(operation_name: &str, max_retries: u32, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Bound a hub call by the configured request timeout
    async fn timed<T, Fut>(&self, operation_name: &str, call: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("Gmail API {} call timed out after {:?}", operation_name, self.timeout);
                Err(PolicyError::NetworkError(format!(
                    "API call timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

fn to_gmail_color(color: &LabelColor) -> Option<GmailLabelColor> {
    if color.background_color.is_none() && color.text_color.is_none() {
        return None;
    }
    Some(GmailLabelColor {
        background_color: color.background_color.clone(),
        text_color: color.text_color.clone(),
        ..Default::default()
    })
}

fn from_gmail_label(label: Label) -> Option<RemoteLabel> {
    let id = label.id?;
    let name = label.name?;
    let label_type = match label.type_.as_deref() {
        Some("system") => LabelType::System,
        _ => LabelType::User,
    };
    let color = label.color.and_then(|c| {
        if c.background_color.is_none() && c.text_color.is_none() {
            None
        } else {
            Some(LabelColor {
                name: None,
                background_color: c.background_color,
                text_color: c.text_color,
            })
        }
    });
    Some(RemoteLabel {
        id,
        name,
        label_type,
        color,
        list_visibility: label.label_list_visibility,
        message_visibility: label.message_list_visibility,
    })
}

fn from_gmail_filter(filter: Filter) -> Option<RemoteFilter> {
    let id = filter.id?;
    let criteria = filter.criteria.unwrap_or_default();
    let action = filter.action.unwrap_or_default();
    Some(RemoteFilter {
        id,
        criteria: FilterMatch {
            from: criteria.from,
            to: criteria.to,
            subject: criteria.subject,
            query: criteria.query,
            negated_query: criteria.negated_query,
            has_attachment: criteria.has_attachment,
            size: criteria.size.map(i64::from),
            size_comparison: criteria.size_comparison,
        },
        action: RemoteFilterAction {
            add_label_ids: action.add_label_ids.unwrap_or_default(),
            remove_label_ids: action.remove_label_ids.unwrap_or_default(),
            forward: action.forward,
            move_to_folder_id: None,
        },
    })
}

fn to_gmail_criteria(criteria: &FilterMatch) -> Result<FilterCriteria> {
    let size = criteria
        .size
        .map(|s| {
            i32::try_from(s).map_err(|_| {
                PolicyError::Validation(format!("filter size {} does not fit Gmail's size field", s))
            })
        })
        .transpose()?;
    Ok(FilterCriteria {
        from: present(&criteria.from).map(str::to_string),
        to: present(&criteria.to).map(str::to_string),
        subject: present(&criteria.subject).map(str::to_string),
        query: present(&criteria.query).map(str::to_string),
        negated_query: present(&criteria.negated_query).map(str::to_string),
        has_attachment: criteria.has_attachment,
        size,
        size_comparison: present(&criteria.size_comparison).map(str::to_string),
        ..Default::default()
    })
}

fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    if ids.is_empty() {
        None
    } else {
        Some(ids.to_vec())
    }
}

#[async_trait]
impl ProviderAdapter for GmailAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    async fn list_labels(&self) -> Result<Vec<RemoteLabel>> {
        Self::with_retry("list_labels", self.max_retries, || async {
            debug!("Calling Gmail API to list labels...");
            let call = self.hub.users().labels_list("me").add_scope(LABELS_SCOPE).doit();
            let (_, response) = self.timed("list_labels", call).await?;

            let labels: Vec<RemoteLabel> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(from_gmail_label)
                .collect();
            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, spec: &LabelSpec) -> Result<RemoteLabel> {
        Self::with_retry("create_label", self.max_retries, || async {
            let label = Label {
                name: Some(spec.name.trim().to_string()),
                message_list_visibility: Some(
                    present(&spec.message_visibility).unwrap_or("show").to_string(),
                ),
                label_list_visibility: Some(
                    present(&spec.list_visibility).unwrap_or("labelShow").to_string(),
                ),
                color: spec.color.as_ref().and_then(to_gmail_color),
                ..Default::default()
            };

            let call = self
                .hub
                .users()
                .labels_create(label, "me")
                .add_scope(LABELS_SCOPE)
                .doit();
            let (_, created) = self.timed("create_label", call).await?;

            from_gmail_label(created)
                .ok_or_else(|| PolicyError::ApiError("Created label has no ID".to_string()))
        })
        .await
    }

    async fn update_label(&self, id: &str, fields: &LabelFields) -> Result<RemoteLabel> {
        Self::with_retry("update_label", self.max_retries, || async {
            let patch = Label {
                name: fields.name.clone(),
                color: fields.color.as_ref().and_then(to_gmail_color),
                label_list_visibility: fields.list_visibility.clone(),
                message_list_visibility: fields.message_visibility.clone(),
                ..Default::default()
            };

            let call = self
                .hub
                .users()
                .labels_patch(patch, "me", id)
                .add_scope(LABELS_SCOPE)
                .doit();
            let (_, updated) = self.timed("update_label", call).await?;

            from_gmail_label(updated)
                .ok_or_else(|| PolicyError::ApiError("Updated label has no ID".to_string()))
        })
        .await
    }

    async fn delete_label(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .labels_delete("me", id)
            .add_scope(LABELS_SCOPE)
            .doit();
        self.timed("delete_label", call).await?;
        Ok(())
    }

    async fn list_filters(&self) -> Result<Vec<RemoteFilter>> {
        Self::with_retry("list_filters", self.max_retries, || async {
            debug!("Calling Gmail API to list filters...");
            let call = self
                .hub
                .users()
                .settings_filters_list("me")
                .add_scope(SETTINGS_SCOPE)
                .doit();
            let (_, response) = self.timed("list_filters", call).await?;

            let filters: Vec<RemoteFilter> = response
                .filter
                .unwrap_or_default()
                .into_iter()
                .filter_map(from_gmail_filter)
                .collect();
            debug!("Successfully parsed {} filters", filters.len());
            Ok(filters)
        })
        .await
    }

    async fn create_filter(&self, criteria: &FilterMatch, action: &ResolvedAction) -> Result<RemoteFilter> {
        if let Some(folder) = present(&action.move_to_folder) {
            let dropped = PolicyError::unsupported("gmail", "action.moveToFolder");
            warn!("{} ({})", dropped, folder);
        }
        let gmail_criteria = to_gmail_criteria(criteria)?;

        Self::with_retry("create_filter", self.max_retries, || async {
            let filter = Filter {
                criteria: Some(gmail_criteria.clone()),
                action: Some(FilterAction {
                    add_label_ids: non_empty(&action.add),
                    remove_label_ids: non_empty(&action.remove),
                    forward: present(&action.forward).map(str::to_string),
                    ..Default::default()
                }),
                ..Default::default()
            };

            let call = self
                .hub
                .users()
                .settings_filters_create(filter, "me")
                .add_scope(SETTINGS_SCOPE)
                .doit();
            let (_, created) = self.timed("create_filter", call).await?;

            from_gmail_filter(created)
                .ok_or_else(|| PolicyError::ApiError("Created filter has no ID".to_string()))
        })
        .await
    }

    async fn delete_filter(&self, id: &str) -> Result<()> {
        let call = self
            .hub
            .users()
            .settings_filters_delete("me", id)
            .add_scope(SETTINGS_SCOPE)
            .doit();
        self.timed("delete_filter", call).await?;
        Ok(())
    }

    fn label_ref(&self, label: &RemoteLabel) -> String {
        label.id.clone()
    }

    async fn list_message_ids(&self, query: &str) -> Result<Vec<String>> {
        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = page_token.clone();
            let response = Self::with_retry("list_messages", self.max_retries, || {
                let token = token.clone();
                async move {
                    let mut call = self
                        .hub
                        .users()
                        .messages_list("me")
                        .q(query)
                        .max_results(LIST_PAGE_SIZE);
                    if let Some(token) = token.as_deref() {
                        call = call.page_token(token);
                    }
                    let (_, response) = self
                        .timed("list_messages", call.add_scope(MODIFY_SCOPE).doit())
                        .await?;
                    Ok(response)
                }
            })
            .await?;

            all_ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        debug!("Query '{}' matched {} messages", query, all_ids.len());
        Ok(all_ids)
    }

    async fn batch_modify_messages(
        &self,
        message_ids: &[String],
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<usize> {
        if message_ids.is_empty() {
            return Ok(0);
        }
        if message_ids.len() > MAX_BATCH_SIZE {
            return Err(PolicyError::BadRequest(format!(
                "batch of {} messages exceeds the limit of {}",
                message_ids.len(),
                MAX_BATCH_SIZE
            )));
        }

        Self::with_retry("batch_modify_messages", self.max_retries, || async {
            let request = BatchModifyMessagesRequest {
                ids: Some(message_ids.to_vec()),
                add_label_ids: non_empty(add_label_ids),
                remove_label_ids: non_empty(remove_label_ids),
            };
            let call = self
                .hub
                .users()
                .messages_batch_modify(request, "me")
                .add_scope(MODIFY_SCOPE)
                .doit();
            self.timed("batch_modify_messages", call).await?;
            Ok(())
        })
        .await?;

        Ok(message_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_should_retry_transient_errors() {
        assert!(GmailAdapter::should_retry(&PolicyError::ServerError {
            status: 500,
            message: "Internal error".to_string(),
        }));
        assert!(GmailAdapter::should_retry(&PolicyError::RateLimitExceeded { retry_after: 5 }));
        assert!(GmailAdapter::should_retry(&PolicyError::NetworkError(
            "connection reset".to_string()
        )));
        assert!(!GmailAdapter::should_retry(&PolicyError::AuthError(
            "invalid token".to_string()
        )));
        assert!(!GmailAdapter::should_retry(&PolicyError::BadRequest(
            "invalid filter".to_string()
        )));
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = GmailAdapter::with_retry("test_op", 3, || {
            let count = Arc::clone(&counter);
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PolicyError::NetworkError("Connection timeout".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_on_permanent_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = GmailAdapter::with_retry("test_op", 3, || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(PolicyError::Forbidden("Invalid credentials".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_all_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = GmailAdapter::with_retry("test_op", 3, || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(PolicyError::RateLimitExceeded { retry_after: 1 })
            }
        })
        .await;

        assert!(result.is_err());
        // initial + 3 retries
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_from_gmail_label_maps_type_and_color() {
        let label = Label {
            id: Some("INBOX".to_string()),
            name: Some("INBOX".to_string()),
            type_: Some("system".to_string()),
            ..Default::default()
        };
        let remote = from_gmail_label(label).unwrap();
        assert!(remote.is_system());
        assert_eq!(remote.color, None);

        let label = Label {
            id: Some("Label_1".to_string()),
            name: Some("Work".to_string()),
            type_: Some("user".to_string()),
            color: Some(GmailLabelColor {
                background_color: Some("#fb4c2f".to_string()),
                text_color: Some("#ffffff".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let remote = from_gmail_label(label).unwrap();
        assert!(!remote.is_system());
        assert_eq!(remote.color, Some(LabelColor::rgb("#fb4c2f", "#ffffff")));
    }

    #[test]
    fn test_from_gmail_label_requires_id_and_name() {
        assert!(from_gmail_label(Label {
            name: Some("Orphan".to_string()),
            ..Default::default()
        })
        .is_none());
    }

    #[test]
    fn test_from_gmail_filter() {
        let filter = Filter {
            id: Some("F1".to_string()),
            criteria: Some(FilterCriteria {
                from: Some("a@b.com".to_string()),
                size: Some(1024),
                size_comparison: Some("larger".to_string()),
                ..Default::default()
            }),
            action: Some(FilterAction {
                add_label_ids: Some(vec!["Label_1".to_string()]),
                remove_label_ids: Some(vec!["INBOX".to_string()]),
                forward: None,
                ..Default::default()
            }),
            ..Default::default()
        };
        let remote = from_gmail_filter(filter).unwrap();
        assert_eq!(remote.id, "F1");
        assert_eq!(remote.criteria.size, Some(1024));
        assert_eq!(remote.action.add_label_ids, vec!["Label_1"]);
        assert_eq!(remote.action.remove_label_ids, vec!["INBOX"]);
    }

    #[test]
    fn test_to_gmail_criteria_skips_blanks_and_checks_size() {
        let criteria = FilterMatch {
            from: Some("a@b.com".to_string()),
            subject: Some("  ".to_string()),
            ..Default::default()
        };
        let gmail = to_gmail_criteria(&criteria).unwrap();
        assert_eq!(gmail.from.as_deref(), Some("a@b.com"));
        assert_eq!(gmail.subject, None);

        let too_big = FilterMatch {
            size: Some(i64::from(i32::MAX) + 1),
            ..Default::default()
        };
        assert!(matches!(
            to_gmail_criteria(&too_big),
            Err(PolicyError::Validation(_))
        ));
    }

    #[test]
    fn test_named_colors_are_not_sent_to_gmail() {
        assert!(to_gmail_color(&LabelColor::named("preset1")).is_none());
        assert!(to_gmail_color(&LabelColor::rgb("#000000", "#ffffff")).is_some());
    }
}
