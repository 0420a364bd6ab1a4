//! Credentials for both backends.
//!
//! Gmail runs the installed-app OAuth flow and caches tokens on disk. Outlook
//! takes a bearer token prepared by an external sign-in helper, either from
//! an environment variable or from a token file.

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::debug;

use crate::config::{GmailConfig, OutlookConfig};
use crate::error::{PolicyError, Result};

/// Gmail API scopes needed by labels, filters and the message sweep
///
/// - gmail.modify: relabel existing messages
/// - gmail.labels: label management
/// - gmail.settings.basic: filter management
pub const REQUIRED_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.labels",
    "https://www.googleapis.com/auth/gmail.settings.basic",
];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Initialize Gmail API hub with OAuth2 authentication
///
/// Sets up:
/// - OAuth2 InstalledFlow (desktop app flow), opening a browser on first use
/// - Token persistence at `token_cache_path` for automatic refresh
/// - HTTP/1 client with TLS support
pub async fn initialize_gmail_hub(config: &GmailConfig) -> Result<GmailHub> {
    let secret = yup_oauth2::read_application_secret(&config.credentials_path)
        .await
        .map_err(|e| {
            PolicyError::AuthError(format!(
                "Failed to read credentials from {:?}: {}",
                config.credentials_path, e
            ))
        })?;

    if let Some(parent) = config.token_cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(&config.token_cache_path)
    .build()
    .await
    .map_err(|e| PolicyError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Request every scope up front so the cached token covers all calls
    let _token = auth
        .token(REQUIRED_SCOPES)
        .await
        .map_err(|e| PolicyError::AuthError(format!("Failed to obtain token: {}", e)))?;

    if tokio::fs::try_exists(&config.token_cache_path).await.unwrap_or(false) {
        secure_token_file(&config.token_cache_path).await?;
    }

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| PolicyError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Token cache files written by sign-in helpers
#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
}

fn parse_token(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str::<TokenFile>(trimmed)
            .ok()
            .map(|t| t.access_token)
            .filter(|t| !t.trim().is_empty());
    }
    Some(trimmed.to_string())
}

/// Bearer token for Microsoft Graph.
///
/// The environment variable named by `token_env` wins; otherwise
/// `token_path` is read, either as a bare token or as JSON carrying
/// `access_token`.
pub async fn load_outlook_token(config: &OutlookConfig) -> Result<String> {
    if let Ok(value) = env::var(&config.token_env) {
        if let Some(token) = parse_token(&value) {
            debug!("Using Outlook token from ${}", config.token_env);
            return Ok(token);
        }
    }

    let Some(path) = &config.token_path else {
        return Err(PolicyError::AuthError(format!(
            "No Outlook token: set ${} or outlook.token_path",
            config.token_env
        )));
    };

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        PolicyError::AuthError(format!("Failed to read Outlook token from {:?}: {}", path, e))
    })?;
    parse_token(&content).ok_or_else(|| {
        PolicyError::AuthError(format!("Outlook token file {:?} holds no access token", path))
    })
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Windows uses ACLs instead of mode bits; nothing to do here
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn outlook_config(token_env: &str, token_path: Option<&Path>) -> OutlookConfig {
        OutlookConfig {
            token_env: token_env.to_string(),
            token_path: token_path.map(Path::to_path_buf),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_secure_token_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "test content")
            .await
            .unwrap();

        secure_token_file(temp_file.path()).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = tokio::fs::metadata(temp_file.path()).await.unwrap();
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_outlook_token_from_env() {
        env::set_var("MAIL_POLICY_TEST_TOKEN_ENV", "  abc123  ");
        let token = load_outlook_token(&outlook_config("MAIL_POLICY_TEST_TOKEN_ENV", None))
            .await
            .unwrap();
        assert_eq!(token, "abc123");
        env::remove_var("MAIL_POLICY_TEST_TOKEN_ENV");
    }

    #[tokio::test]
    async fn test_outlook_token_from_json_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(
            temp_file.path(),
            r#"{"access_token": "tok-1", "expires_in": 3600}"#,
        )
        .await
        .unwrap();

        let config = outlook_config("MAIL_POLICY_TEST_UNSET_1", Some(temp_file.path()));
        assert_eq!(load_outlook_token(&config).await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn test_outlook_token_from_plain_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "plain-token\n").await.unwrap();

        let config = outlook_config("MAIL_POLICY_TEST_UNSET_2", Some(temp_file.path()));
        assert_eq!(load_outlook_token(&config).await.unwrap(), "plain-token");
    }

    #[tokio::test]
    async fn test_outlook_token_missing() {
        let err = load_outlook_token(&outlook_config("MAIL_POLICY_TEST_UNSET_3", None))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::AuthError(_)));
        assert!(err.to_string().contains("MAIL_POLICY_TEST_UNSET_3"));
    }

    #[test]
    fn test_parse_token_rejects_blank_json() {
        assert_eq!(parse_token(r#"{"access_token": " "}"#), None);
        assert_eq!(parse_token(""), None);
    }

    #[test]
    fn test_scopes_constants() {
        assert_eq!(REQUIRED_SCOPES.len(), 3);
        assert!(REQUIRED_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.settings.basic"));
    }
}
