//! Domain model shared by the collector and its consumers
//!
//! Tracks and artists are value-like: they are copied into every snapshot that
//! references them, carrying the popularity and descriptor values observed at
//! sync time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::time::TimePeriod;

/// Schema version written into every snapshot and archive entry
pub const SCHEMA_VERSION: u32 = 1;

/// Lookback window used by the upstream service to rank top items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    /// Roughly the last 4 weeks
    Short,
    /// Roughly the last 6 months
    Medium,
    /// Several years
    Long,
}

impl TimeRange {
    pub const ALL: [TimeRange; 3] = [TimeRange::Short, TimeRange::Medium, TimeRange::Long];

    /// Query parameter value understood by the upstream API
    pub fn api_param(self) -> &'static str {
        match self {
            TimeRange::Short => "short_term",
            TimeRange::Medium => "medium_term",
            TimeRange::Long => "long_term",
        }
    }

    /// Human readable lookback description
    pub fn label(self) -> &'static str {
        match self {
            TimeRange::Short => "~4 weeks",
            TimeRange::Medium => "~6 months",
            TimeRange::Long => "several years",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeRange::Short => "short",
            TimeRange::Medium => "medium",
            TimeRange::Long => "long",
        };
        f.write_str(s)
    }
}

impl FromStr for TimeRange {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "short" | "short_term" => Ok(TimeRange::Short),
            "medium" | "medium_term" => Ok(TimeRange::Medium),
            "long" | "long_term" => Ok(TimeRange::Long),
            other => Err(crate::Error::InvalidInput(format!("Unknown time range: {}", other))),
        }
    }
}

/// Kind of ranked item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Track,
    Artist,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Track, ItemKind::Artist];

    /// Path segment used by the upstream top-items endpoint
    pub fn api_path(self) -> &'static str {
        match self {
            ItemKind::Track => "tracks",
            ItemKind::Artist => "artists",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Track => f.write_str("track"),
            ItemKind::Artist => f.write_str("artist"),
        }
    }
}

/// Acoustic descriptors attached to a resolved track
///
/// All fields except `tempo` (bpm) and `loudness` (dB) are normalized to 0.0-1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorVector {
    pub danceability: f64,
    pub energy: f64,
    /// Musical positivity
    pub valence: f64,
    /// Likelihood the track is acoustic
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub speechiness: f64,
    pub liveness: f64,
    pub tempo: f64,
    pub loudness: f64,
}

/// How a track's descriptor vector was obtained
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Resolution {
    /// Not yet passed through enrichment
    #[default]
    Pending,
    /// Reference table hit on track id
    Exact,
    /// Reference row matched on normalized (name, artist)
    Fuzzy {
        /// Id of the matched reference row
        reference_id: String,
        /// Similarity score in 0.0-1.0
        score: f64,
    },
    /// No descriptor available (coverage gap)
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Exact | Resolution::Fuzzy { .. })
    }
}

/// A track as observed upstream at sync time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub primary_artist_id: String,
    pub primary_artist_name: String,
    pub album_name: String,
    pub duration_ms: u64,
    pub explicit: bool,
    pub release_year: Option<i32>,
    /// Upstream popularity (0-100)
    pub popularity: u8,
    #[serde(default)]
    pub descriptors: Option<DescriptorVector>,
    #[serde(default)]
    pub resolution: Resolution,
}

impl Track {
    pub fn is_resolved(&self) -> bool {
        self.descriptors.is_some() && self.resolution.is_resolved()
    }
}

/// An artist as observed upstream at sync time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: BTreeSet<String>,
    /// Upstream popularity (0-100)
    pub popularity: u8,
    pub followers: u64,
}

/// Listening context inferred from descriptors and time of day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningContext {
    Workout,
    Focus,
    Relaxation,
    Sleep,
    Party,
    Commute,
    General,
}

impl fmt::Display for ListeningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ListeningContext::Workout => "workout",
            ListeningContext::Focus => "focus",
            ListeningContext::Relaxation => "relaxation",
            ListeningContext::Sleep => "sleep",
            ListeningContext::Party => "party",
            ListeningContext::Commute => "commute",
            ListeningContext::General => "general",
        };
        f.write_str(s)
    }
}

/// One play of a track by a user
///
/// Identity is the (user id, played-at, track id) triple. Distinct timestamps
/// for the same track are distinct replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListeningEvent {
    pub user_id: String,
    pub track: Track,
    pub played_at: DateTime<Utc>,
    /// Playback context reported upstream (e.g. "playlist", "album")
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub inferred_context: Option<ListeningContext>,
}

/// Identity triple of a listening event
pub type EventKey = (String, DateTime<Utc>, String);

impl ListeningEvent {
    pub fn key(&self) -> EventKey {
        (self.user_id.clone(), self.played_at, self.track.id.clone())
    }
}

/// Ranked item referenced by a top-items entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TopItem {
    Track(Track),
    Artist(Artist),
}

impl TopItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            TopItem::Track(_) => ItemKind::Track,
            TopItem::Artist(_) => ItemKind::Artist,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TopItem::Track(t) => &t.id,
            TopItem::Artist(a) => &a.id,
        }
    }

    pub fn popularity(&self) -> u8 {
        match self {
            TopItem::Track(t) => t.popularity,
            TopItem::Artist(a) => a.popularity,
        }
    }

    pub fn as_track(&self) -> Option<&Track> {
        match self {
            TopItem::Track(t) => Some(t),
            TopItem::Artist(_) => None,
        }
    }

    pub fn as_artist(&self) -> Option<&Artist> {
        match self {
            TopItem::Artist(a) => Some(a),
            TopItem::Track(_) => None,
        }
    }
}

/// One ranked entry of a user's top tracks or top artists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopItemEntry {
    pub user_id: String,
    pub time_range: TimeRange,
    /// 1-based rank, unique within (user, time range, kind)
    pub rank: u32,
    pub item: TopItem,
    /// Sync timestamp at which this rank was observed
    pub observed_at: DateTime<Utc>,
}

/// Deduplication key of a top-items entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopItemKey {
    pub user_id: String,
    pub time_range: TimeRange,
    pub kind: ItemKind,
    pub item_id: String,
}

impl TopItemEntry {
    pub fn key(&self) -> TopItemKey {
        TopItemKey {
            user_id: self.user_id.clone(),
            time_range: self.time_range,
            kind: self.item.kind(),
            item_id: self.item.id().to_string(),
        }
    }
}

/// Means of descriptor values and composite scores over resolved tracks
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DescriptorAggregates {
    pub resolved_tracks: usize,
    pub danceability: f64,
    pub energy: f64,
    pub valence: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub speechiness: f64,
    pub liveness: f64,
    pub tempo: f64,
    pub loudness: f64,
    pub mood_score: f64,
    pub grooviness: f64,
    pub focus_score: f64,
    pub relaxation_score: f64,
}

/// Aggregate statistics derived from a snapshot or merged corpus
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsBlob {
    /// Unique artists divided by total events (0.0 when no events)
    pub diversity_score: f64,
    /// Normalized Shannon entropy of artist plays (0-100)
    pub artist_entropy: f64,
    /// Mean popularity over top-track entries
    pub mainstream_score: Option<f64>,
    /// Share of short-range top tracks also in the long-range list (0-100)
    pub taste_consistency_pct: f64,
    /// Computed over resolved tracks only
    pub descriptor_aggregates: Option<DescriptorAggregates>,
    /// Share of distinct tracks with a resolved descriptor vector (0-100)
    pub descriptor_coverage_pct: f64,
    pub total_events: usize,
    pub unique_tracks: usize,
    pub unique_artists: usize,
    /// Distinct genres across top-artist entries
    pub top_genre_count: usize,
    #[serde(default)]
    pub context_distribution: BTreeMap<ListeningContext, usize>,
    /// Plays per part of the day (UTC)
    #[serde(default)]
    pub time_period_distribution: BTreeMap<TimePeriod, usize>,
}

/// Record counts written alongside every commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordCounts {
    pub events: usize,
    pub top_tracks: usize,
    pub top_artists: usize,
}

/// Complete capture of one user's processed history at one sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub user_id: String,
    pub synced_at: DateTime<Utc>,
    pub schema_version: u32,
    pub events: Vec<ListeningEvent>,
    pub top_items: Vec<TopItemEntry>,
    pub metrics: MetricsBlob,
}

impl Snapshot {
    pub fn record_counts(&self) -> RecordCounts {
        let top_tracks = self
            .top_items
            .iter()
            .filter(|e| e.item.kind() == ItemKind::Track)
            .count();
        RecordCounts {
            events: self.events.len(),
            top_tracks,
            top_artists: self.top_items.len() - top_tracks,
        }
    }
}
