//! Multi-user merge
//!
//! Listening events are unioned, rejecting only exact (user, played-at, track)
//! duplicates. Top-item entries are keyed by (user, time range, kind, item id)
//! and only the most recently observed entry per key survives. Entries of
//! different users never collapse into each other.
//!
//! Per-user preparation runs on the rayon pool; the final union is a single
//! pass over users in id order so the output does not depend on scheduling.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tastesync_common::{
    DescriptorVector, ItemKind, ListeningContext, ListeningEvent, MetricsBlob, Snapshot, TimeRange,
    TopItemEntry, TopItemKey,
};

use crate::metrics::{distinct_tracks, MetricsComputer};

/// Everything known about one user's listening, possibly spanning several syncs
#[derive(Debug, Clone, Default)]
pub struct UserHistory {
    pub user_id: String,
    pub events: Vec<ListeningEvent>,
    pub top_items: Vec<TopItemEntry>,
}

impl UserHistory {
    pub fn new(user_id: impl Into<String>, events: Vec<ListeningEvent>, top_items: Vec<TopItemEntry>) -> Self {
        Self {
            user_id: user_id.into(),
            events,
            top_items,
        }
    }

    /// Concatenate snapshots in the order given (oldest first)
    pub fn from_snapshots(user_id: impl Into<String>, snapshots: Vec<Snapshot>) -> Self {
        let mut history = Self {
            user_id: user_id.into(),
            ..Self::default()
        };
        for snapshot in snapshots {
            history.events.extend(snapshot.events);
            history.top_items.extend(snapshot.top_items);
        }
        history
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedCorpus {
    pub events: Vec<ListeningEvent>,
    pub top_items: Vec<TopItemEntry>,
    pub metrics: MetricsBlob,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMergeCounts {
    pub events: usize,
    pub top_tracks: usize,
    pub top_artists: usize,
    /// Events dropped as exact duplicates
    pub duplicates_rejected: usize,
    /// Top-item entries replaced by a later observation of the same key
    pub superseded: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptorStat {
    pub mean: f64,
    /// Sample standard deviation, 0.0 below two values
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl DescriptorStat {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = if values.len() < 2 {
            0.0
        } else {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self { mean, std, min, max })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeStats {
    pub members: Vec<String>,
    pub per_user: BTreeMap<String, UserMergeCounts>,
    pub total_events: usize,
    pub total_top_items: usize,
    pub unique_tracks: usize,
    pub duplicates_rejected: usize,
    pub superseded: usize,
    /// Share of distinct tracks carrying descriptors (0-100)
    pub descriptor_coverage_pct: f64,
    pub time_range_distribution: BTreeMap<TimeRange, usize>,
    pub date_range: Option<DateRange>,
    pub context_distribution: BTreeMap<ListeningContext, usize>,
    pub descriptor_stats: BTreeMap<String, DescriptorStat>,
}

/// Output of per-user preparation
struct PreparedUser {
    user_id: String,
    events: Vec<ListeningEvent>,
    top_items: Vec<TopItemEntry>,
    duplicates_rejected: usize,
    superseded: usize,
}

fn prepare_user(history: UserHistory) -> PreparedUser {
    let mut seen = HashSet::new();
    let mut events = Vec::with_capacity(history.events.len());
    let mut duplicates_rejected = 0;
    for event in history.events {
        if seen.insert(event.key()) {
            events.push(event);
        } else {
            duplicates_rejected += 1;
        }
    }
    events.sort_by(|a, b| {
        b.played_at
            .cmp(&a.played_at)
            .then_with(|| a.track.id.cmp(&b.track.id))
    });

    // Later input wins ties on observed_at
    let mut latest: HashMap<TopItemKey, TopItemEntry> = HashMap::new();
    let mut superseded = 0;
    for entry in history.top_items {
        let key = entry.key();
        match latest.get(&key) {
            Some(existing) if existing.observed_at > entry.observed_at => superseded += 1,
            Some(_) => {
                superseded += 1;
                latest.insert(key, entry);
            }
            None => {
                latest.insert(key, entry);
            }
        }
    }
    let mut top_items: Vec<TopItemEntry> = latest.into_values().collect();
    top_items.sort_by(|a, b| {
        (a.item.kind(), a.time_range, a.rank, a.item.id()).cmp(&(b.item.kind(), b.time_range, b.rank, b.item.id()))
    });

    PreparedUser {
        user_id: history.user_id,
        events,
        top_items,
        duplicates_rejected,
        superseded,
    }
}

const DESCRIPTOR_FIELDS: [(&str, fn(&DescriptorVector) -> f64); 9] = [
    ("danceability", |d| d.danceability),
    ("energy", |d| d.energy),
    ("valence", |d| d.valence),
    ("acousticness", |d| d.acousticness),
    ("instrumentalness", |d| d.instrumentalness),
    ("speechiness", |d| d.speechiness),
    ("liveness", |d| d.liveness),
    ("tempo", |d| d.tempo),
    ("loudness", |d| d.loudness),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine {
    metrics: MetricsComputer,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&self, histories: BTreeMap<String, UserHistory>) -> (MergedCorpus, MergeStats) {
        let prepared: Vec<PreparedUser> = histories
            .into_iter()
            .map(|(user_id, mut history)| {
                history.user_id = user_id;
                history
            })
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(prepare_user)
            .collect();

        let mut stats = MergeStats::default();
        let mut events = Vec::new();
        let mut top_items = Vec::new();
        let mut seen_events = HashSet::new();
        let mut seen_items = HashSet::new();

        for user in prepared {
            let mut counts = UserMergeCounts {
                duplicates_rejected: user.duplicates_rejected,
                superseded: user.superseded,
                ..UserMergeCounts::default()
            };

            for event in user.events {
                if seen_events.insert(event.key()) {
                    counts.events += 1;
                    events.push(event);
                } else {
                    counts.duplicates_rejected += 1;
                }
            }
            for entry in user.top_items {
                if !seen_items.insert(entry.key()) {
                    counts.superseded += 1;
                    continue;
                }
                match entry.item.kind() {
                    ItemKind::Track => counts.top_tracks += 1,
                    ItemKind::Artist => counts.top_artists += 1,
                }
                *stats.time_range_distribution.entry(entry.time_range).or_insert(0) += 1;
                top_items.push(entry);
            }

            stats.duplicates_rejected += counts.duplicates_rejected;
            stats.superseded += counts.superseded;
            stats.members.push(user.user_id.clone());
            stats.per_user.insert(user.user_id, counts);
        }

        stats.total_events = events.len();
        stats.total_top_items = top_items.len();
        stats.unique_tracks = events
            .iter()
            .map(|e| e.track.id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let tracks = distinct_tracks(&events, &top_items);
        let resolved: Vec<&DescriptorVector> = tracks
            .iter()
            .filter(|t| t.is_resolved())
            .filter_map(|t| t.descriptors.as_ref())
            .collect();
        stats.descriptor_coverage_pct = if tracks.is_empty() {
            0.0
        } else {
            resolved.len() as f64 / tracks.len() as f64 * 100.0
        };
        for (name, field) in DESCRIPTOR_FIELDS {
            let values: Vec<f64> = resolved.iter().map(|d| field(d)).collect();
            if let Some(stat) = DescriptorStat::from_values(&values) {
                stats.descriptor_stats.insert(name.to_string(), stat);
            }
        }

        let start = events.iter().map(|e| e.played_at).min();
        let end = events.iter().map(|e| e.played_at).max();
        if let (Some(start), Some(end)) = (start, end) {
            stats.date_range = Some(DateRange {
                start,
                end,
                days: (end - start).num_days(),
            });
        }
        for context in events.iter().filter_map(|e| e.inferred_context) {
            *stats.context_distribution.entry(context).or_insert(0) += 1;
        }

        tracing::info!(
            members = stats.members.len(),
            events = stats.total_events,
            top_items = stats.total_top_items,
            duplicates_rejected = stats.duplicates_rejected,
            superseded = stats.superseded,
            "Merged user histories"
        );

        let metrics = self.metrics.compute(&events, &top_items);
        (
            MergedCorpus {
                events,
                top_items,
                metrics,
            },
            stats,
        )
    }
}
