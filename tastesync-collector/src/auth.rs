//! Credential handling
//!
//! A sync receives an explicit [`Credential`] and wraps it in a
//! [`CredentialHolder`]. When the upstream reports an expired token the holder
//! asks the external [`CredentialRefresher`] for a new one. Concurrent workers
//! that observed the same stale token share a single refresh.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::SyncError;

/// Access token plus the optional material needed to refresh it
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

// Tokens never appear in logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// External capability that exchanges a stale credential for a fresh one
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, user_id: &str, stale: &Credential) -> Result<Credential, SyncError>;
}

/// Refresher used when no client credentials are configured
pub struct NoRefresh;

#[async_trait]
impl CredentialRefresher for NoRefresh {
    async fn refresh(&self, user_id: &str, _stale: &Credential) -> Result<Credential, SyncError> {
        Err(SyncError::AuthExpired(format!(
            "Token refresh not configured (user {})",
            user_id
        )))
    }
}

/// OAuth refresh-token grant against a token endpoint
pub struct TokenEndpointRefresher {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenEndpointRefresher {
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let http_client = reqwest::Client::builder()
            .user_agent(tastesync_common::config::get_user_agent())
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            token_url,
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl CredentialRefresher for TokenEndpointRefresher {
    async fn refresh(&self, user_id: &str, stale: &Credential) -> Result<Credential, SyncError> {
        let refresh_token = stale
            .refresh_token
            .clone()
            .ok_or_else(|| SyncError::AuthExpired(format!("No refresh token for user {}", user_id)))?;

        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SyncError::UpstreamUnavailable(format!("Token endpoint: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::AuthExpired(format!(
                "Token refresh rejected ({}): {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::AuthExpired(format!("Bad token response: {}", e)))?;

        Ok(Credential {
            access_token: token.access_token,
            // The endpoint may omit the refresh token, keep the old one then
            refresh_token: token.refresh_token.or(Some(refresh_token)),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

/// Per-sync credential state
pub struct CredentialHolder {
    user_id: String,
    current: RwLock<Credential>,
    refresher: Arc<dyn CredentialRefresher>,
    refreshes: AtomicU32,
}

impl CredentialHolder {
    pub fn new(user_id: &str, credential: Credential, refresher: Arc<dyn CredentialRefresher>) -> Self {
        Self {
            user_id: user_id.to_string(),
            current: RwLock::new(credential),
            refresher,
            refreshes: AtomicU32::new(0),
        }
    }

    pub async fn current(&self) -> Credential {
        self.current.read().await.clone()
    }

    /// Number of refreshes performed through this holder
    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Replace `stale` with a refreshed credential
    ///
    /// If another caller already replaced `stale`, the newer credential is
    /// returned without calling the refresher again.
    pub async fn refresh(&self, stale: &Credential) -> Result<Credential, SyncError> {
        let mut current = self.current.write().await;
        if current.access_token != stale.access_token {
            return Ok(current.clone());
        }

        tracing::info!(user_id = %self.user_id, "Refreshing expired credential");
        let fresh = self.refresher.refresh(&self.user_id, stale).await?;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        *current = fresh.clone();
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingRefresher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CredentialRefresher for CountingRefresher {
        async fn refresh(&self, _user_id: &str, _stale: &Credential) -> Result<Credential, SyncError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential::new(format!("fresh-{}", n)))
        }
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let credential = Credential::new("secret-token").with_refresh_token("secret-refresh");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }

    #[tokio::test]
    async fn test_refresh_replaces_credential() {
        let refresher = Arc::new(CountingRefresher { calls: AtomicU32::new(0) });
        let holder = CredentialHolder::new("alice", Credential::new("stale"), refresher.clone());

        let stale = holder.current().await;
        let fresh = holder.refresh(&stale).await.unwrap();
        assert_eq!(fresh.access_token, "fresh-1");
        assert_eq!(holder.current().await.access_token, "fresh-1");
        assert_eq!(holder.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_of_same_token_calls_refresher_once() {
        let refresher = Arc::new(CountingRefresher { calls: AtomicU32::new(0) });
        let holder = Arc::new(CredentialHolder::new("alice", Credential::new("stale"), refresher.clone()));
        let stale = holder.current().await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let holder = holder.clone();
            let stale = stale.clone();
            tasks.spawn(async move { holder.refresh(&stale).await.unwrap() });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().access_token, "fresh-1");
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_refresh_fails_with_auth_expired() {
        let holder = CredentialHolder::new("alice", Credential::new("stale"), Arc::new(NoRefresh));
        let stale = holder.current().await;
        let err = holder.refresh(&stale).await.unwrap_err();
        assert!(matches!(err, SyncError::AuthExpired(_)));
    }
}
