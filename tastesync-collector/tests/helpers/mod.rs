//! Shared fixtures for collector integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tastesync_collector::auth::{Credential, CredentialRefresher};
use tastesync_collector::enrichment::{EnrichmentResolver, ReferenceRow, ReferenceTable};
use tastesync_collector::fetcher::{Fetcher, RawPlay, RetryPolicy, UpstreamClient, UpstreamFailure, UpstreamResult};
use tastesync_collector::store::{MemoryObjectStore, ObjectStore, SnapshotWriter, StoreError};
use tastesync_collector::sync::{Collector, CollectorSettings};
use tastesync_collector::SyncError;
use tastesync_common::{
    Artist, DescriptorVector, ItemKind, ListeningEvent, MetricsBlob, Resolution, Snapshot, TimeRange, TopItem,
    TopItemEntry, Track, SCHEMA_VERSION,
};

pub const VALID_TOKEN: &str = "valid-token";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 11, 12, 0, 0).unwrap()
}

pub fn descriptors(energy: f64) -> DescriptorVector {
    DescriptorVector {
        danceability: 0.5,
        energy,
        valence: 0.5,
        acousticness: 0.3,
        instrumentalness: 0.0,
        speechiness: 0.05,
        liveness: 0.1,
        tempo: 120.0,
        loudness: -6.0,
    }
}

pub fn track(id: &str, name: &str, artist: &str) -> Track {
    Track {
        id: id.to_string(),
        name: name.to_string(),
        primary_artist_id: format!("artist-{}", artist.to_lowercase().replace(' ', "-")),
        primary_artist_name: artist.to_string(),
        album_name: "Album".to_string(),
        duration_ms: 210_000,
        explicit: false,
        release_year: Some(2020),
        popularity: 60,
        descriptors: None,
        resolution: Resolution::Pending,
    }
}

pub fn artist(id: &str, genres: &[&str]) -> Artist {
    Artist {
        id: id.to_string(),
        name: id.to_uppercase(),
        genres: genres.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>(),
        popularity: 55,
        followers: 1_000,
    }
}

pub fn reference_row(id: &str, name: &str, artist: &str, energy: f64) -> ReferenceRow {
    ReferenceRow {
        track_id: id.to_string(),
        name: name.to_string(),
        artist: artist.to_string(),
        descriptors: descriptors(energy),
    }
}

/// `count` distinct plays one minute apart, newest first
pub fn plays(prefix: &str, count: usize) -> Vec<RawPlay> {
    (0..count)
        .map(|i| RawPlay {
            track: track(&format!("{}-t{}", prefix, i), &format!("Song {}", i), "Band"),
            played_at: base_time() - ChronoDuration::minutes(i as i64),
            context: Some("playlist".to_string()),
        })
        .collect()
}

pub fn events_for(user_id: &str, count: usize) -> Vec<ListeningEvent> {
    plays(user_id, count)
        .into_iter()
        .map(|play| ListeningEvent {
            user_id: user_id.to_string(),
            track: play.track,
            played_at: play.played_at,
            context: play.context,
            inferred_context: None,
        })
        .collect()
}

pub fn top_track_entry(
    user_id: &str,
    time_range: TimeRange,
    rank: u32,
    track_id: &str,
    observed_at: DateTime<Utc>,
) -> TopItemEntry {
    TopItemEntry {
        user_id: user_id.to_string(),
        time_range,
        rank,
        item: TopItem::Track(track(track_id, track_id, "Band")),
        observed_at,
    }
}

pub fn snapshot(user_id: &str, synced_at: DateTime<Utc>, events: usize) -> Snapshot {
    Snapshot {
        user_id: user_id.to_string(),
        synced_at,
        schema_version: SCHEMA_VERSION,
        events: events_for(user_id, events),
        top_items: vec![top_track_entry(user_id, TimeRange::Short, 1, "fav", synced_at)],
        metrics: MetricsBlob::default(),
    }
}

/// Scripted upstream
///
/// Queued failures are returned, one per call, before any call succeeds. A
/// credential other than the accepted token is rejected as expired.
pub struct MockUpstream {
    pub plays: Vec<RawPlay>,
    pub top_tracks: Vec<Track>,
    pub top_artists: Vec<Artist>,
    pub failures: Mutex<VecDeque<UpstreamFailure>>,
    pub accepted_token: Mutex<String>,
    pub delay: Option<Duration>,
    pub recent_calls: AtomicU32,
    pub top_calls: AtomicU32,
}

impl MockUpstream {
    pub fn new(plays: Vec<RawPlay>) -> Self {
        Self {
            plays,
            top_tracks: vec![track("top-1", "Anthem", "Band"), track("top-2", "Ballad", "Singer")],
            top_artists: vec![artist("band", &["rock", "indie"]), artist("singer", &["pop"])],
            failures: Mutex::new(VecDeque::new()),
            accepted_token: Mutex::new(VALID_TOKEN.to_string()),
            delay: None,
            recent_calls: AtomicU32::new(0),
            top_calls: AtomicU32::new(0),
        }
    }

    pub fn with_failures(self, failures: Vec<UpstreamFailure>) -> Self {
        *self.failures.lock().unwrap() = failures.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn accept_token(&self, token: &str) {
        *self.accepted_token.lock().unwrap() = token.to_string();
    }

    pub fn recent_calls(&self) -> u32 {
        self.recent_calls.load(Ordering::SeqCst)
    }

    pub fn top_calls(&self) -> u32 {
        self.top_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self, credential: &Credential) -> UpstreamResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        if credential.access_token != *self.accepted_token.lock().unwrap() {
            return Err(UpstreamFailure::AuthExpired);
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn recently_played(&self, credential: &Credential, limit: u32) -> UpstreamResult<Vec<RawPlay>> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        self.gate(credential).await?;
        Ok(self.plays.iter().take(limit as usize).cloned().collect())
    }

    async fn top_items(
        &self,
        credential: &Credential,
        kind: ItemKind,
        _time_range: TimeRange,
        limit: u32,
    ) -> UpstreamResult<Vec<TopItem>> {
        self.top_calls.fetch_add(1, Ordering::SeqCst);
        self.gate(credential).await?;
        let items: Vec<TopItem> = match kind {
            ItemKind::Track => self.top_tracks.iter().cloned().map(TopItem::Track).collect(),
            ItemKind::Artist => self.top_artists.iter().cloned().map(TopItem::Artist).collect(),
        };
        Ok(items.into_iter().take(limit as usize).collect())
    }
}

/// Refresher handing out a fixed token and counting calls
pub struct StaticRefresher {
    pub token: String,
    pub calls: AtomicU32,
}

impl StaticRefresher {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialRefresher for StaticRefresher {
    async fn refresh(&self, _user_id: &str, _stale: &Credential) -> Result<Credential, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Credential::new(self.token.clone()))
    }
}

/// Memory store whose writes can be made to fail per slot
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryObjectStore,
    pub fail_current: AtomicBool,
    pub fail_archive: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_current(&self, fail: bool) {
        self.fail_current.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_archive(&self, fail: bool) {
        self.fail_archive.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        if key.ends_with("/current.json") && self.fail_current.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("current slot unavailable".to_string()));
        }
        if key.contains("/archive/") && self.fail_archive.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("archive unavailable".to_string()));
        }
        self.inner.put(key, body).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky-memory"
    }
}

/// Policy with millisecond delays so retry tests run quickly
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
        0.0,
        max_attempts,
    )
}

pub fn fetcher(upstream: Arc<MockUpstream>, max_attempts: u32) -> Arc<Fetcher> {
    Arc::new(Fetcher::new(upstream, 1_000, fast_policy(max_attempts), 4).unwrap())
}

pub fn reference_table() -> ReferenceTable {
    ReferenceTable::from_rows(vec![
        reference_row("u1-t0", "Song 0", "Band", 0.9),
        reference_row("ref-anthem", "Anthem", "Band", 0.7),
    ])
}

pub fn collector(
    upstream: Arc<MockUpstream>,
    store: Arc<dyn ObjectStore>,
    refresher: Arc<dyn CredentialRefresher>,
    settings: CollectorSettings,
) -> Collector {
    Collector::new(
        fetcher(upstream, 5),
        Arc::new(EnrichmentResolver::with_defaults(reference_table())),
        SnapshotWriter::new(store),
        refresher,
        settings,
    )
}

pub fn valid_credential() -> Credential {
    Credential::new(VALID_TOKEN)
}
