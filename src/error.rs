use thiserror::Error;

/// Type alias for Result with PolicyError
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Error types for the policy reconciliation engine
#[derive(Error, Debug)]
pub enum PolicyError {
    /// Canonical document is malformed; fatal before any remote call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A canonical field has no equivalent on the target provider
    #[error("{provider} does not support {field}; dropped")]
    ProviderUnsupported { provider: String, field: String },

    /// An adapter call failed while applying a plan entry
    #[error("Remote call failed for {key}: {message}")]
    RemoteCallFailed { key: String, message: String },

    /// A deliberate delete kept failing after every retry
    #[error("Failed to delete {key} after {attempts} attempts: {message}")]
    TransientDeleteFailure {
        key: String,
        attempts: u32,
        message: String,
    },

    /// Provider API returned an error
    #[error("Provider API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (401/403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML document error
    #[error("Document error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl PolicyError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PolicyError::RateLimitExceeded { .. }
                | PolicyError::ServerError { .. }
                | PolicyError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Shorthand for a dropped provider field
    pub fn unsupported(provider: impl Into<String>, field: impl Into<String>) -> Self {
        PolicyError::ProviderUnsupported {
            provider: provider.into(),
            field: field.into(),
        }
    }

    /// Map an HTTP status onto the error taxonomy.
    ///
    /// Shared by both backends so a 429 or 503 is classified the same way
    /// whether it came from Gmail or Graph.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
        let message = message.into();
        match status {
            429 => PolicyError::RateLimitExceeded {
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
            },
            400 => PolicyError::BadRequest(message),
            401 | 403 => PolicyError::Forbidden(message),
            404 => PolicyError::NotFound(message),
            500..=599 => PolicyError::ServerError { status, message },
            _ => PolicyError::ApiError(message),
        }
    }
}

const DEFAULT_RETRY_AFTER: u64 = 5;

/// Parse a delay-seconds Retry-After header value
pub(crate) fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}

impl From<google_gmail1::Error> for PolicyError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let retry_after = parse_retry_after(
                    response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok()),
                );
                let message = format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                );
                PolicyError::from_status(status.as_u16(), message, retry_after)
            }
            google_gmail1::Error::BadRequest(ref err) => PolicyError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                PolicyError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => PolicyError::NetworkError(err.to_string()),
            _ => PolicyError::ApiError(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for PolicyError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            return PolicyError::NetworkError(error.to_string());
        }
        if let Some(status) = error.status() {
            return PolicyError::from_status(status.as_u16(), error.to_string(), None);
        }
        if error.is_decode() {
            return PolicyError::ApiError(format!("Malformed response: {}", error));
        }
        PolicyError::NetworkError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let rate_limit = PolicyError::RateLimitExceeded { retry_after: 5 };
        assert!(rate_limit.is_transient());
        assert!(!rate_limit.is_permanent());

        let server_error = PolicyError::ServerError {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert!(server_error.is_transient());

        let network_error = PolicyError::NetworkError("Connection timeout".to_string());
        assert!(network_error.is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(PolicyError::BadRequest("Invalid query".to_string()).is_permanent());
        assert!(PolicyError::NotFound("label".to_string()).is_permanent());
        assert!(PolicyError::Validation("empty match".to_string()).is_permanent());
        assert!(PolicyError::unsupported("outlook", "query").is_permanent());
    }

    #[test]
    fn test_from_status_mapping() {
        assert!(matches!(
            PolicyError::from_status(429, "slow down", Some(12)),
            PolicyError::RateLimitExceeded { retry_after: 12 }
        ));
        assert!(matches!(
            PolicyError::from_status(429, "slow down", None),
            PolicyError::RateLimitExceeded { retry_after: 5 }
        ));
        assert!(matches!(
            PolicyError::from_status(502, "bad gateway", None),
            PolicyError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            PolicyError::from_status(401, "expired", None),
            PolicyError::Forbidden(_)
        ));
        assert!(matches!(
            PolicyError::from_status(404, "gone", None),
            PolicyError::NotFound(_)
        ));
        assert!(matches!(
            PolicyError::from_status(409, "conflict", None),
            PolicyError::ApiError(_)
        ));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("120")), Some(120));
        assert_eq!(parse_retry_after(Some(" 0 ")), Some(0));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn test_error_display() {
        let error = PolicyError::RateLimitExceeded { retry_after: 10 };
        let display = format!("{}", error);
        assert!(display.contains("Rate limit exceeded"));
        assert!(display.contains("10 seconds"));

        let unsupported = PolicyError::unsupported("outlook", "label visibility");
        assert_eq!(
            unsupported.to_string(),
            "outlook does not support label visibility; dropped"
        );

        let failed = PolicyError::TransientDeleteFailure {
            key: "filter from=a@b.com".to_string(),
            attempts: 3,
            message: "HTTP 503".to_string(),
        };
        assert!(failed.to_string().contains("after 3 attempts"));
    }
}
