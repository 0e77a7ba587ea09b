//! OAuth token lifecycle for the Anthropic-shaped provider's "max" mode.
//!
//! The credentials file is the authoritative state, shared across processes; the
//! in-memory cache is only a hint. Every request re-reads the file first (another
//! process may already have refreshed), and concurrent in-process refreshes coalesce
//! onto a single network call behind `refresh_lock`.

use pearl_store::{CredentialsFile, TokenSet};
use tokio::sync::Mutex;

use crate::error::BackendError;

/// Prefix that marks a configured API key as an OAuth access token rather than a
/// plain static key.
pub const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat";

pub fn looks_like_oauth_token(key: &str) -> bool {
    key.starts_with(OAUTH_TOKEN_PREFIX)
}

pub struct OAuthManager {
    credentials: CredentialsFile,
    client_id: String,
    client_secret: Option<String>,
    token_endpoint: String,
    http: reqwest::Client,
    refresh_lock: Mutex<()>,
}

#[derive(serde::Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<&'a str>,
}

#[derive(serde::Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
}

impl OAuthManager {
    pub fn new(
        credentials_path: impl Into<std::path::PathBuf>,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        token_endpoint: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        OAuthManager {
            credentials: CredentialsFile::new(credentials_path),
            client_id: client_id.into(),
            client_secret,
            token_endpoint: token_endpoint.into(),
            http,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Re-reads the file, refreshing exactly once (per in-process coalescing group)
    /// if expired and a refresh token is available.
    pub async fn current_token(&self) -> Result<TokenSet, BackendError> {
        let now = pearl_core::time::now_unix_secs();

        if let Some(tokens) = self.read_file()?
            && !tokens.is_expired(now)
        {
            return Ok(tokens);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another in-process caller may have refreshed while we waited for the lock.
        if let Some(tokens) = self.read_file()?
            && !tokens.is_expired(now)
        {
            return Ok(tokens);
        }

        let stale = self.read_file()?;
        let refresh_token = stale
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or_else(|| {
                BackendError::Authentication("no refresh token available".to_string())
            })?;

        self.refresh(&refresh_token).await
    }

    /// Forces exactly one refresh-and-retry after a mid-request auth failure.
    pub async fn force_refresh(&self) -> Result<TokenSet, BackendError> {
        let _guard = self.refresh_lock.lock().await;
        let refresh_token = self
            .read_file()?
            .and_then(|t| t.refresh_token)
            .ok_or_else(|| {
                BackendError::Authentication("no refresh token available".to_string())
            })?;
        self.refresh(&refresh_token).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, BackendError> {
        let resp = self
            .http
            .post(&self.token_endpoint)
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token,
                client_id: &self.client_id,
                client_secret: self.client_secret.as_deref(),
            })
            .send()
            .await
            .map_err(BackendError::from)?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(BackendError::Authentication("refresh token rejected".to_string()));
        }
        let resp = resp.error_for_status().map_err(BackendError::from)?;
        let body: RefreshResponse = resp.json().await.map_err(BackendError::from)?;

        let now = pearl_core::time::now_unix_secs();
        let tokens = TokenSet {
            access_token: body.access_token,
            refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: now + body.expires_in,
        };
        self.credentials
            .write(&tokens)
            .map_err(|e| BackendError::Authentication(format!("failed to persist tokens: {e}")))?;
        Ok(tokens)
    }

    fn read_file(&self) -> Result<Option<TokenSet>, BackendError> {
        self.credentials
            .read()
            .map_err(|e| BackendError::Authentication(format!("failed to read credentials: {e}")))
    }
}
