//! Outlook backend: categories, inbox rules and mail folders over Microsoft Graph

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clauses::{join_or, split_or};
use crate::config::OutlookConfig;
use crate::error::{parse_retry_after, PolicyError, Result};
use crate::models::{
    present, FilterMatch, LabelColor, LabelSpec, RemoteFilter, RemoteFilterAction, RemoteLabel,
};
use crate::provider::{LabelFields, ProviderAdapter, ProviderKind, ResolvedAction};

const CATEGORIES_PATH: &str = "/me/outlook/masterCategories";
const RULES_PATH: &str = "/me/mailFolders/inbox/messageRules";
const FOLDERS_PATH: &str = "/me/mailFolders";

/// Graph's spelling of "no color"
const NO_COLOR: &str = "none";

const PROVIDER: &str = "outlook";

/// One page of a Graph collection
#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Category {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient_contains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject_contains: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    assign_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    forward_to: Option<Vec<Recipient>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    move_to_folder: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    is_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stop_processing_rules: Option<bool>,
    #[serde(default)]
    conditions: RuleConditions,
    #[serde(default)]
    actions: RuleActions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailFolder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    display_name: String,
}

pub struct OutlookAdapter {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl OutlookAdapter {
    pub fn new(config: &OutlookConfig, token: impl Into<String>) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::ClientBuilder::new()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PolicyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.graph_base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        // nextLink values are already absolute
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.token)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
        Err(PolicyError::from_status(status.as_u16(), message, retry_after))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        Self::check(request.send().await?).await?;
        Ok(())
    }

    /// Follow `@odata.nextLink` until the collection is exhausted
    async fn get_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(path.to_string());
        while let Some(link) = next {
            let page: GraphList<T> = self.send_json(self.request(Method::GET, &link)).await?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }

    fn folder_collection(parent: Option<&str>) -> String {
        match parent {
            Some(id) => format!("{}/{}/childFolders", FOLDERS_PATH, id),
            None => FOLDERS_PATH.to_string(),
        }
    }

    /// Id of the folder at `path` (segments split on `/`), creating any
    /// missing level
    pub async fn ensure_folder_path(&self, path: &str) -> Result<String> {
        let segments: Vec<&str> = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(PolicyError::Validation(format!(
                "empty folder path '{}'",
                path
            )));
        }

        let mut parent: Option<String> = None;
        for segment in segments {
            let collection = Self::folder_collection(parent.as_deref());
            let children: Vec<MailFolder> = self.get_all(&collection).await?;
            let existing = children
                .into_iter()
                .find(|f| f.display_name.eq_ignore_ascii_case(segment))
                .and_then(|f| f.id);

            let id = match existing {
                Some(id) => id,
                None => {
                    info!("Creating mail folder '{}'", segment);
                    let body = MailFolder {
                        id: None,
                        display_name: segment.to_string(),
                    };
                    let created: MailFolder = self
                        .send_json(self.request(Method::POST, &collection).json(&body))
                        .await?;
                    created.id.ok_or_else(|| {
                        PolicyError::ApiError(format!("Folder '{}' created without an id", segment))
                    })?
                }
            };
            parent = Some(id);
        }

        parent.ok_or_else(|| PolicyError::Unknown(format!("Folder path '{}' not resolved", path)))
    }
}

fn from_category(category: Category) -> Option<RemoteLabel> {
    let id = category.id?;
    let name = category.display_name?;
    let color = category
        .color
        .filter(|c| !c.eq_ignore_ascii_case(NO_COLOR) && !c.trim().is_empty())
        .map(LabelColor::named);
    Some(RemoteLabel {
        id,
        name,
        color,
        ..Default::default()
    })
}

fn color_name(color: Option<&LabelColor>) -> String {
    color
        .and_then(|c| c.name.clone())
        .unwrap_or_else(|| NO_COLOR.to_string())
}

fn warn_visibility(list: &Option<String>, message: &Option<String>) {
    if list.is_some() || message.is_some() {
        warn!("{}", PolicyError::unsupported(PROVIDER, "label visibility"));
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn joined(values: Option<Vec<String>>, separator: &str) -> Option<String> {
    values
        .filter(|v| !v.is_empty())
        .map(|v| v.join(separator))
}

fn from_rule(rule: MessageRule) -> Option<RemoteFilter> {
    let id = rule.id?;
    let conditions = rule.conditions;
    let actions = rule.actions;
    let criteria = FilterMatch {
        from: conditions.sender_contains.filter(|v| !v.is_empty()).map(|v| join_or(v.as_slice())),
        to: conditions.recipient_contains.filter(|v| !v.is_empty()).map(|v| join_or(v.as_slice())),
        subject: conditions.subject_contains.filter(|v| !v.is_empty()).map(|v| join_or(v.as_slice())),
        ..Default::default()
    };
    let forward = joined(
        actions
            .forward_to
            .map(|recipients| recipients.into_iter().map(|r| r.email_address.address).collect()),
        ", ",
    );
    Some(RemoteFilter {
        id,
        criteria,
        action: RemoteFilterAction {
            add_label_ids: actions.assign_categories.unwrap_or_default(),
            remove_label_ids: Vec::new(),
            forward,
            move_to_folder_id: actions.move_to_folder,
        },
    })
}

/// Rule conditions for a canonical match; criteria Graph rules cannot
/// express are logged and left out
fn to_conditions(criteria: &FilterMatch) -> RuleConditions {
    let unsupported = [
        ("query", criteria.query.is_some()),
        ("negatedQuery", criteria.negated_query.is_some()),
        ("hasAttachment", criteria.has_attachment.is_some()),
        ("size", criteria.size.is_some()),
    ];
    for (field, set) in unsupported {
        if set {
            warn!("{}", PolicyError::unsupported(PROVIDER, format!("match.{}", field)));
        }
    }

    RuleConditions {
        sender_contains: present(&criteria.from).map(split_or).and_then(non_empty),
        recipient_contains: present(&criteria.to).map(split_or).and_then(non_empty),
        subject_contains: present(&criteria.subject).map(split_or).and_then(non_empty),
    }
}

fn to_recipients(forward: &str) -> Vec<Recipient> {
    forward
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|address| Recipient {
            email_address: EmailAddress {
                address: address.to_string(),
            },
        })
        .collect()
}

#[async_trait]
impl ProviderAdapter for OutlookAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
    }

    async fn list_labels(&self) -> Result<Vec<RemoteLabel>> {
        let categories: Vec<Category> = self.get_all(CATEGORIES_PATH).await?;
        let labels: Vec<RemoteLabel> = categories.into_iter().filter_map(from_category).collect();
        debug!("Listed {} categories", labels.len());
        Ok(labels)
    }

    async fn create_label(&self, spec: &LabelSpec) -> Result<RemoteLabel> {
        warn_visibility(&spec.list_visibility, &spec.message_visibility);
        let body = Category {
            id: None,
            display_name: Some(spec.name.clone()),
            color: Some(color_name(spec.color.as_ref())),
        };
        let created: Category = self
            .send_json(self.request(Method::POST, CATEGORIES_PATH).json(&body))
            .await?;
        from_category(created).ok_or_else(|| {
            PolicyError::ApiError(format!("Category '{}' created without an id", spec.name))
        })
    }

    async fn update_label(&self, id: &str, fields: &LabelFields) -> Result<RemoteLabel> {
        warn_visibility(&fields.list_visibility, &fields.message_visibility);
        let path = format!("{}/{}", CATEGORIES_PATH, id);
        if fields.name.is_some() || fields.color.is_some() {
            let body = Category {
                id: None,
                display_name: fields.name.clone(),
                color: fields.color.as_ref().map(|c| color_name(Some(c))),
            };
            self.send_empty(self.request(Method::PATCH, &path).json(&body))
                .await?;
        }
        let current: Category = self.send_json(self.request(Method::GET, &path)).await?;
        from_category(current)
            .ok_or_else(|| PolicyError::ApiError(format!("Category {} has no display name", id)))
    }

    async fn delete_label(&self, id: &str) -> Result<()> {
        let path = format!("{}/{}", CATEGORIES_PATH, id);
        self.send_empty(self.request(Method::DELETE, &path)).await
    }

    async fn list_filters(&self) -> Result<Vec<RemoteFilter>> {
        let rules: Vec<MessageRule> = self.get_all(RULES_PATH).await?;
        let filters: Vec<RemoteFilter> = rules.into_iter().filter_map(from_rule).collect();
        debug!("Listed {} inbox rules", filters.len());
        Ok(filters)
    }

    async fn create_filter(&self, criteria: &FilterMatch, action: &ResolvedAction) -> Result<RemoteFilter> {
        if !action.remove.is_empty() {
            warn!("{}", PolicyError::unsupported(PROVIDER, "action.remove"));
        }

        let move_to_folder = match present(&action.move_to_folder) {
            Some(path) => Some(self.ensure_folder_path(path).await?),
            None => None,
        };

        let rule = MessageRule {
            id: None,
            display_name: Some(format!("Rule {}", chrono::Utc::now().timestamp())),
            sequence: Some(1),
            is_enabled: Some(true),
            stop_processing_rules: Some(true),
            conditions: to_conditions(criteria),
            actions: RuleActions {
                assign_categories: non_empty(action.add.clone()),
                forward_to: present(&action.forward)
                    .map(to_recipients)
                    .filter(|r| !r.is_empty()),
                move_to_folder,
            },
        };

        let created: MessageRule = self
            .send_json(self.request(Method::POST, RULES_PATH).json(&rule))
            .await?;
        from_rule(created)
            .ok_or_else(|| PolicyError::ApiError("Rule created without an id".to_string()))
    }

    async fn delete_filter(&self, id: &str) -> Result<()> {
        let path = format!("{}/{}", RULES_PATH, id);
        self.send_empty(self.request(Method::DELETE, &path)).await
    }

    /// Rules assign categories by display name
    fn label_ref(&self, label: &RemoteLabel) -> String {
        label.name.clone()
    }

    async fn list_message_ids(&self, _query: &str) -> Result<Vec<String>> {
        Err(PolicyError::unsupported(PROVIDER, "message search"))
    }

    async fn batch_modify_messages(
        &self,
        _message_ids: &[String],
        _add_label_ids: &[String],
        _remove_label_ids: &[String],
    ) -> Result<usize> {
        Err(PolicyError::unsupported(PROVIDER, "message relabeling"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> OutlookAdapter {
        let config = OutlookConfig {
            graph_base_url: server.uri(),
            ..Default::default()
        };
        OutlookAdapter::new(&config, "test-token").unwrap()
    }

    #[tokio::test]
    async fn test_list_labels_follows_next_link() {
        let server = MockServer::start().await;
        let next = format!("{}/page2", server.uri());

        Mock::given(method("GET"))
            .and(path(CATEGORIES_PATH))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "c1", "displayName": "Work", "color": "preset0"}],
                "@odata.nextLink": next,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "c2", "displayName": "Lists-News", "color": "none"}]
            })))
            .mount(&server)
            .await;

        let labels = adapter(&server).list_labels().await.unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].color, Some(LabelColor::named("preset0")));
        assert_eq!(labels[1].name, "Lists-News");
        assert_eq!(labels[1].color, None);
    }

    #[tokio::test]
    async fn test_list_filters_joins_conditions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RULES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "id": "r1",
                    "displayName": "Rule 1",
                    "conditions": {"senderContains": ["a@b.com", "c@d.com"]},
                    "actions": {
                        "assignCategories": ["Work"],
                        "forwardTo": [
                            {"emailAddress": {"address": "x@y.com"}},
                            {"emailAddress": {"address": "z@y.com"}}
                        ],
                        "moveToFolder": "folder-1"
                    }
                }]
            })))
            .mount(&server)
            .await;

        let filters = adapter(&server).list_filters().await.unwrap();
        assert_eq!(filters.len(), 1);
        let filter = &filters[0];
        assert_eq!(filter.criteria.from.as_deref(), Some("a@b.com OR c@d.com"));
        assert_eq!(filter.action.add_label_ids, vec!["Work".to_string()]);
        assert_eq!(filter.action.forward.as_deref(), Some("x@y.com, z@y.com"));
        assert_eq!(filter.action.move_to_folder_id.as_deref(), Some("folder-1"));
    }

    #[tokio::test]
    async fn test_create_filter_resolves_folder_and_splits_clauses() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(FOLDERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "f-archive", "displayName": "archive"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(RULES_PATH))
            .and(body_partial_json(json!({
                "sequence": 1,
                "isEnabled": true,
                "stopProcessingRules": true,
                "conditions": {"senderContains": ["a@b.com", "c@d.com"]},
                "actions": {
                    "assignCategories": ["Work"],
                    "forwardTo": [{"emailAddress": {"address": "x@y.com"}}],
                    "moveToFolder": "f-archive"
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "r9",
                "conditions": {"senderContains": ["a@b.com", "c@d.com"]},
                "actions": {"assignCategories": ["Work"], "moveToFolder": "f-archive"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let criteria = FilterMatch::from_address("a@b.com OR c@d.com");
        let action = ResolvedAction {
            add: vec!["Work".to_string()],
            forward: Some("x@y.com".to_string()),
            move_to_folder: Some("Archive".to_string()),
            ..Default::default()
        };

        let created = adapter(&server).create_filter(&criteria, &action).await.unwrap();
        assert_eq!(created.id, "r9");
        assert_eq!(created.action.move_to_folder_id.as_deref(), Some("f-archive"));
    }

    #[tokio::test]
    async fn test_ensure_folder_path_creates_missing_levels() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(FOLDERS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"id": "f-lists", "displayName": "Lists"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/mailFolders/f-lists/childFolders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/me/mailFolders/f-lists/childFolders"))
            .and(body_partial_json(json!({"displayName": "News"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"id": "f-news", "displayName": "News"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = adapter(&server)
            .ensure_folder_path("Lists/News")
            .await
            .unwrap();
        assert_eq!(id, "f-news");
    }

    #[tokio::test]
    async fn test_create_label_sends_none_without_color() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CATEGORIES_PATH))
            .and(body_partial_json(json!({"displayName": "Work", "color": "none"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "c1", "displayName": "Work", "color": "none"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let label = adapter(&server)
            .create_label(&LabelSpec::new("Work"))
            .await
            .unwrap();
        assert_eq!(label.id, "c1");
        assert_eq!(adapter(&server).label_ref(&label), "Work");
    }

    #[tokio::test]
    async fn test_throttling_maps_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/r1", RULES_PATH)))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = adapter(&server).delete_filter("r1").await.unwrap_err();
        assert!(matches!(err, PolicyError::RateLimitExceeded { retry_after: 7 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_message_operations_are_unsupported() {
        let server = MockServer::start().await;
        let err = adapter(&server).list_message_ids("from:a").await.unwrap_err();
        assert!(matches!(err, PolicyError::ProviderUnsupported { .. }));
    }

    #[test]
    fn test_to_conditions_drops_query() {
        let criteria = FilterMatch {
            subject: Some("invoice".to_string()),
            query: Some("list:news".to_string()),
            ..Default::default()
        };
        let conditions = to_conditions(&criteria);
        assert_eq!(conditions.subject_contains, Some(vec!["invoice".to_string()]));
        assert!(conditions.sender_contains.is_none());
    }
}
