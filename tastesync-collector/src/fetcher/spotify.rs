//! Spotify Web API client
//!
//! Endpoints used:
//! - `GET /me/player/recently-played?limit=N`
//! - `GET /me/top/{tracks|artists}?time_range=...&limit=N`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use tastesync_common::{Artist, ItemKind, Resolution, TimeRange, TopItem, Track};

use super::upstream::{RawPlay, UpstreamClient, UpstreamFailure, UpstreamResult, UPSTREAM_PAGE_MAX};
use crate::auth::Credential;
use crate::error::SyncError;

#[derive(Debug, Deserialize)]
struct Paging<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SpArtistRef {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpAlbum {
    name: String,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpTrack {
    /// Absent for local files
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<SpArtistRef>,
    album: SpAlbum,
    duration_ms: u64,
    #[serde(default)]
    explicit: bool,
    #[serde(default)]
    popularity: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct SpContext {
    #[serde(rename = "type")]
    context_type: String,
}

#[derive(Debug, Deserialize)]
struct SpPlayHistory {
    track: SpTrack,
    played_at: DateTime<Utc>,
    #[serde(default)]
    context: Option<SpContext>,
}

#[derive(Debug, Deserialize)]
struct SpFollowers {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct SpArtist {
    id: String,
    name: String,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    popularity: u8,
    followers: Option<SpFollowers>,
}

fn release_year(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.get(..4)).and_then(|y| y.parse().ok())
}

fn convert_track(raw: SpTrack) -> Option<Track> {
    let id = raw.id?;
    let (artist_id, artist_name) = raw
        .artists
        .into_iter()
        .next()
        .map(|a| (a.id.unwrap_or_default(), a.name))
        .unwrap_or_default();

    Some(Track {
        id,
        name: raw.name,
        primary_artist_id: artist_id,
        primary_artist_name: artist_name,
        album_name: raw.album.name,
        duration_ms: raw.duration_ms,
        explicit: raw.explicit,
        release_year: release_year(raw.album.release_date.as_deref()),
        popularity: raw.popularity.unwrap_or(0),
        descriptors: None,
        resolution: Resolution::Pending,
    })
}

fn convert_artist(raw: SpArtist) -> Artist {
    Artist {
        id: raw.id,
        name: raw.name,
        genres: raw.genres.into_iter().collect::<BTreeSet<_>>(),
        popularity: raw.popularity,
        followers: raw.followers.map(|f| f.total).unwrap_or(0),
    }
}

/// Map a non-success HTTP status onto a failure kind
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> UpstreamFailure {
    match status {
        StatusCode::TOO_MANY_REQUESTS => UpstreamFailure::Throttled { retry_after },
        StatusCode::UNAUTHORIZED => UpstreamFailure::AuthExpired,
        s if s.is_server_error() => UpstreamFailure::Transient(format!("HTTP {}: {}", s.as_u16(), body)),
        s => UpstreamFailure::Unavailable(format!("HTTP {}: {}", s.as_u16(), body)),
    }
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub struct SpotifyClient {
    http_client: Client,
    base_url: String,
}

impl SpotifyClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let http_client = Client::builder()
            .user_agent(tastesync_common::config::get_user_agent())
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        query: &[(&str, String)],
    ) -> UpstreamResult<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Querying upstream API");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&credential.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| UpstreamFailure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamFailure::Unavailable(format!("Parse error: {}", e)))
    }
}

#[async_trait]
impl UpstreamClient for SpotifyClient {
    async fn recently_played(&self, credential: &Credential, limit: u32) -> UpstreamResult<Vec<RawPlay>> {
        let limit = limit.clamp(1, UPSTREAM_PAGE_MAX);
        let page: Paging<SpPlayHistory> = self
            .get_json(credential, "/me/player/recently-played", &[("limit", limit.to_string())])
            .await?;

        Ok(page
            .items
            .into_iter()
            .filter_map(|item| {
                let played_at = item.played_at;
                let context = item.context.map(|c| c.context_type);
                convert_track(item.track).map(|track| RawPlay {
                    track,
                    played_at,
                    context,
                })
            })
            .collect())
    }

    async fn top_items(
        &self,
        credential: &Credential,
        kind: ItemKind,
        time_range: TimeRange,
        limit: u32,
    ) -> UpstreamResult<Vec<TopItem>> {
        let limit = limit.clamp(1, UPSTREAM_PAGE_MAX);
        let path = format!("/me/top/{}", kind.api_path());
        let query = [
            ("time_range", time_range.api_param().to_string()),
            ("limit", limit.to_string()),
        ];

        match kind {
            ItemKind::Track => {
                let page: Paging<SpTrack> = self.get_json(credential, &path, &query).await?;
                Ok(page
                    .items
                    .into_iter()
                    .filter_map(convert_track)
                    .map(TopItem::Track)
                    .collect())
            }
            ItemKind::Artist => {
                let page: Paging<SpArtist> = self.get_json(credential, &path, &query).await?;
                Ok(page
                    .items
                    .into_iter()
                    .map(|a| TopItem::Artist(convert_artist(a)))
                    .collect())
            }
        }
    }
}
