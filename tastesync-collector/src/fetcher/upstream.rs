//! Upstream client seam
//!
//! Implementations perform exactly one request per call and report failures as
//! [`UpstreamFailure`] values. Retrying, rate limiting and credential refresh
//! belong to the [`Fetcher`](super::Fetcher).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use tastesync_common::{ItemKind, TimeRange, TopItem, Track};

use crate::auth::Credential;

/// Largest page the upstream serves for any listing endpoint
pub const UPSTREAM_PAGE_MAX: u32 = 50;

/// Classified failure of a single upstream request
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamFailure {
    /// HTTP 429, optionally with a `Retry-After` hint
    Throttled { retry_after: Option<Duration> },
    /// HTTP 401
    AuthExpired,
    /// 5xx or transport failure, worth retrying
    Transient(String),
    /// Any other failure, not worth retrying
    Unavailable(String),
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::Throttled { retry_after: Some(d) } => {
                write!(f, "throttled (retry after {:?})", d)
            }
            UpstreamFailure::Throttled { retry_after: None } => f.write_str("throttled"),
            UpstreamFailure::AuthExpired => f.write_str("access token expired"),
            UpstreamFailure::Transient(msg) => write!(f, "transient failure: {}", msg),
            UpstreamFailure::Unavailable(msg) => write!(f, "unavailable: {}", msg),
        }
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamFailure>;

/// One entry of the recently-played listing
#[derive(Debug, Clone, PartialEq)]
pub struct RawPlay {
    pub track: Track,
    pub played_at: DateTime<Utc>,
    pub context: Option<String>,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Most recent plays, most recent first
    async fn recently_played(&self, credential: &Credential, limit: u32) -> UpstreamResult<Vec<RawPlay>>;

    /// Ranked top items in upstream order
    async fn top_items(
        &self,
        credential: &Credential,
        kind: ItemKind,
        time_range: TimeRange,
        limit: u32,
    ) -> UpstreamResult<Vec<TopItem>>;
}
