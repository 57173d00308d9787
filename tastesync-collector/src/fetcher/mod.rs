//! Rate-limited, retrying access to the upstream listening history
//!
//! Every request waits on one shared token bucket, so the configured
//! requests/second ceiling holds across all concurrent workers of all syncs
//! that share this fetcher.

pub mod retry;
pub mod spotify;
pub mod upstream;

pub use retry::{RetryDecision, RetryPolicy};
pub use spotify::SpotifyClient;
pub use upstream::{RawPlay, UpstreamClient, UpstreamFailure, UpstreamResult, UPSTREAM_PAGE_MAX};

use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use std::future::Future;
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use tastesync_common::{ItemKind, ListeningEvent, TimeRange, TopItemEntry};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::auth::{Credential, CredentialHolder};
use crate::error::SyncError;

type DirectLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct Fetcher {
    client: Arc<dyn UpstreamClient>,
    rate_limiter: DirectLimiter,
    policy: RetryPolicy,
    rate_per_second: u32,
    worker_pool_size: usize,
}

impl Fetcher {
    /// # Errors
    /// `Config` when the rate ceiling is zero
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        rate_per_second: u32,
        policy: RetryPolicy,
        worker_pool_size: usize,
    ) -> Result<Self, SyncError> {
        let rate = NonZeroU32::new(rate_per_second)
            .ok_or_else(|| SyncError::Config("Rate limit must be at least 1 request/second".to_string()))?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
            policy,
            rate_per_second,
            worker_pool_size: worker_pool_size.max(1),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Concurrent fetch workers: never more than the rate ceiling allows
    pub fn effective_pool_size(&self) -> usize {
        self.worker_pool_size.min(self.rate_per_second as usize).max(1)
    }

    /// Run one upstream operation under the rate limiter and retry policy
    ///
    /// An expired credential is refreshed at most once per call; a second
    /// expiry ends the call with `AuthExpired`. The retry that follows a
    /// refresh does not consume an attempt.
    async fn call<T, F, Fut>(&self, operation: &str, creds: &CredentialHolder, mut op: F) -> Result<T, SyncError>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = UpstreamResult<T>>,
    {
        let mut attempt = 0u32;
        let mut refreshed = false;
        let mut retry_after_refresh = false;

        loop {
            if !std::mem::take(&mut retry_after_refresh) {
                attempt += 1;
            }
            self.rate_limiter.until_ready().await;

            let credential = creds.current().await;
            let failure = match op(credential.clone()).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation, attempt, "Upstream call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            match self.policy.decide(&failure, attempt) {
                RetryDecision::Retry(delay) => {
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        failure = %failure,
                        "Upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::RefreshCredential => {
                    if refreshed {
                        tracing::error!(operation, "Credential rejected again after refresh");
                        return Err(SyncError::AuthExpired(
                            "Upstream rejected the refreshed credential".to_string(),
                        ));
                    }
                    refreshed = true;
                    retry_after_refresh = true;
                    creds.refresh(&credential).await?;
                }
                RetryDecision::GiveUp(err) => {
                    tracing::error!(operation, attempt, failure = %failure, "Upstream call failed");
                    return Err(err);
                }
            }
        }
    }

    /// Most recent plays, most recent first, at most `limit` (clamped to 50)
    pub async fn fetch_recent_events(
        &self,
        user_id: &str,
        creds: &CredentialHolder,
        limit: u32,
    ) -> Result<Vec<ListeningEvent>, SyncError> {
        let limit = limit.clamp(1, UPSTREAM_PAGE_MAX);
        let plays = self
            .call("recently_played", creds, |credential| {
                let client = self.client.clone();
                async move { client.recently_played(&credential, limit).await }
            })
            .await?;

        let fetched = plays.len();
        let mut seen = HashSet::with_capacity(fetched);
        let mut events: Vec<ListeningEvent> = plays
            .into_iter()
            .map(|play| ListeningEvent {
                user_id: user_id.to_string(),
                track: play.track,
                played_at: play.played_at,
                context: play.context,
                inferred_context: None,
            })
            .filter(|event| seen.insert(event.key()))
            .collect();
        if events.len() < fetched {
            tracing::warn!(
                user_id,
                dropped = fetched - events.len(),
                "Dropped duplicate plays returned by upstream"
            );
        }
        events.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        events.truncate(limit as usize);

        tracing::info!(user_id, count = events.len(), "Fetched recent plays");
        Ok(events)
    }

    /// Ranked entries 1..n in upstream order
    pub async fn fetch_top_items(
        &self,
        user_id: &str,
        creds: &CredentialHolder,
        kind: ItemKind,
        time_range: TimeRange,
        limit: u32,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<TopItemEntry>, SyncError> {
        let limit = limit.clamp(1, UPSTREAM_PAGE_MAX);
        let items = self
            .call("top_items", creds, |credential| {
                let client = self.client.clone();
                async move { client.top_items(&credential, kind, time_range, limit).await }
            })
            .await?;

        let entries: Vec<TopItemEntry> = items
            .into_iter()
            .filter(|item| item.kind() == kind)
            .take(limit as usize)
            .enumerate()
            .map(|(idx, item)| TopItemEntry {
                user_id: user_id.to_string(),
                time_range,
                rank: idx as u32 + 1,
                item,
                observed_at,
            })
            .collect();

        tracing::debug!(user_id, %kind, %time_range, count = entries.len(), "Fetched top items");
        Ok(entries)
    }

    /// Fetch every (kind, range) combination on a bounded worker pool
    ///
    /// Output is ordered by kind, time range and rank. The first failure
    /// aborts the remaining workers.
    pub async fn fetch_all_top_items(
        self: &Arc<Self>,
        user_id: &str,
        creds: &Arc<CredentialHolder>,
        kinds: &[ItemKind],
        ranges: &[TimeRange],
        limit: u32,
        observed_at: DateTime<Utc>,
    ) -> Result<Vec<TopItemEntry>, SyncError> {
        let permits = Arc::new(Semaphore::new(self.effective_pool_size()));
        let mut workers = JoinSet::new();

        for &kind in kinds {
            for &time_range in ranges {
                let fetcher = Arc::clone(self);
                let creds = Arc::clone(creds);
                let permits = Arc::clone(&permits);
                let user_id = user_id.to_string();
                workers.spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| SyncError::Internal(format!("Worker pool closed: {}", e)))?;
                    fetcher
                        .fetch_top_items(&user_id, &creds, kind, time_range, limit, observed_at)
                        .await
                });
            }
        }

        let mut entries = Vec::new();
        while let Some(joined) = workers.join_next().await {
            let result = joined.map_err(|e| SyncError::Internal(format!("Fetch worker failed: {}", e)))?;
            match result {
                Ok(batch) => entries.extend(batch),
                Err(e) => {
                    workers.abort_all();
                    return Err(e);
                }
            }
        }

        entries.sort_by(|a, b| {
            (a.item.kind(), a.time_range, a.rank).cmp(&(b.item.kind(), b.time_range, b.rank))
        });
        Ok(entries)
    }
}
