//! Aggregate statistics for a snapshot or a merged corpus
//!
//! Composite descriptor scores:
//! - mood = 0.5·valence + 0.3·energy + 0.2·(1 − acousticness)
//! - grooviness = 0.4·danceability + 0.3·energy + 0.3·tempo_norm
//! - focus = 0.4·(1 − speechiness) + 0.3·instrumentalness + 0.3·(1 − 2·|energy − 0.5|)
//! - relaxation = 0.4·(1 − energy) + 0.3·acousticness + 0.3·(1 − tempo_norm)
//!
//! `tempo_norm` maps 50-200 bpm onto 0.0-1.0 (clamped), so a track's scores do
//! not depend on which other tracks happen to be in the batch.

use chrono::{DateTime, Timelike, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tastesync_common::time::{is_weekend, TimePeriod};
use tastesync_common::{
    DescriptorAggregates, DescriptorVector, ItemKind, ListeningContext, ListeningEvent, MetricsBlob,
    TimeRange, TopItem, TopItemEntry, Track,
};

const TEMPO_FLOOR_BPM: f64 = 50.0;
const TEMPO_CEILING_BPM: f64 = 200.0;

pub fn normalized_tempo(tempo: f64) -> f64 {
    ((tempo - TEMPO_FLOOR_BPM) / (TEMPO_CEILING_BPM - TEMPO_FLOOR_BPM)).clamp(0.0, 1.0)
}

/// Composite scores derived from one descriptor vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeScores {
    pub mood: f64,
    pub grooviness: f64,
    pub focus: f64,
    pub relaxation: f64,
}

impl CompositeScores {
    pub fn from_descriptors(d: &DescriptorVector) -> Self {
        let tempo_norm = normalized_tempo(d.tempo);
        Self {
            mood: 0.5 * d.valence + 0.3 * d.energy + 0.2 * (1.0 - d.acousticness),
            grooviness: 0.4 * d.danceability + 0.3 * d.energy + 0.3 * tempo_norm,
            focus: 0.4 * (1.0 - d.speechiness)
                + 0.3 * d.instrumentalness
                + 0.3 * (1.0 - (d.energy - 0.5).abs() * 2.0),
            relaxation: 0.4 * (1.0 - d.energy) + 0.3 * d.acousticness + 0.3 * (1.0 - tempo_norm),
        }
    }
}

/// Guess what a play was for from its descriptors and when it happened
///
/// Rules are checked in order; the first match wins.
pub fn infer_context(d: &DescriptorVector, played_at: DateTime<Utc>) -> ListeningContext {
    let hour = played_at.hour();
    let weekend = is_weekend(played_at);

    if d.energy > 0.7 && d.danceability > 0.6 {
        return ListeningContext::Workout;
    }
    if d.speechiness < 0.2 && d.instrumentalness > 0.5 {
        return ListeningContext::Focus;
    }
    if d.energy < 0.4 && d.acousticness > 0.5 {
        return if hour < 22 {
            ListeningContext::Relaxation
        } else {
            ListeningContext::Sleep
        };
    }
    if d.valence > 0.6 && d.energy > 0.6 && (hour >= 20 || weekend) {
        return ListeningContext::Party;
    }
    if (6..=9).contains(&hour) && !weekend && d.energy > 0.5 {
        return ListeningContext::Commute;
    }
    ListeningContext::General
}

/// Set the inferred context of every event whose track is resolved
pub fn annotate_contexts(events: &mut [ListeningEvent]) {
    for event in events.iter_mut() {
        event.inferred_context = event
            .track
            .descriptors
            .as_ref()
            .filter(|_| event.track.resolution.is_resolved())
            .map(|d| infer_context(d, event.played_at));
    }
}

/// Normalized Shannon entropy of a frequency table (0-100)
///
/// 0 when there are fewer than two distinct values.
pub fn normalized_entropy<I>(counts: I) -> f64
where
    I: IntoIterator<Item = usize>,
{
    let counts: Vec<usize> = counts.into_iter().filter(|&c| c > 0).collect();
    if counts.len() < 2 {
        return 0.0;
    }
    let total: usize = counts.iter().sum();
    let entropy: f64 = counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.log2()
        })
        .sum();
    (entropy / (counts.len() as f64).log2()) * 100.0
}

/// Distinct tracks referenced by events and top-track entries, first seen wins
pub fn distinct_tracks<'a>(events: &'a [ListeningEvent], top_items: &'a [TopItemEntry]) -> Vec<&'a Track> {
    let mut seen = HashSet::new();
    events
        .iter()
        .map(|e| &e.track)
        .chain(top_items.iter().filter_map(|e| e.item.as_track()))
        .filter(|t| seen.insert(t.id.as_str()))
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsComputer;

impl MetricsComputer {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, events: &[ListeningEvent], top_items: &[TopItemEntry]) -> MetricsBlob {
        let total_events = events.len();

        let mut artist_plays: HashMap<&str, usize> = HashMap::new();
        for event in events {
            *artist_plays.entry(event.track.primary_artist_id.as_str()).or_default() += 1;
        }
        let unique_artists = artist_plays.len();
        let unique_tracks = events
            .iter()
            .map(|e| e.track.id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let diversity_score = if total_events == 0 {
            0.0
        } else {
            unique_artists as f64 / total_events as f64
        };

        let top_track_popularity: Vec<f64> = top_items
            .iter()
            .filter(|e| e.item.kind() == ItemKind::Track)
            .map(|e| e.item.popularity() as f64)
            .collect();
        let mainstream_score = mean(&top_track_popularity);

        let tracks = distinct_tracks(events, top_items);
        let resolved: Vec<&DescriptorVector> = tracks
            .iter()
            .filter(|t| t.resolution.is_resolved())
            .filter_map(|t| t.descriptors.as_ref())
            .collect();
        let descriptor_coverage_pct = if tracks.is_empty() {
            0.0
        } else {
            resolved.len() as f64 / tracks.len() as f64 * 100.0
        };

        let top_genre_count = top_items
            .iter()
            .filter_map(|e| e.item.as_artist())
            .flat_map(|a| a.genres.iter())
            .collect::<HashSet<_>>()
            .len();

        let mut context_distribution = BTreeMap::new();
        for context in events.iter().filter_map(|e| e.inferred_context) {
            *context_distribution.entry(context).or_insert(0) += 1;
        }
        let mut time_period_distribution = BTreeMap::new();
        for event in events {
            *time_period_distribution.entry(TimePeriod::of(event.played_at)).or_insert(0) += 1;
        }

        MetricsBlob {
            diversity_score,
            artist_entropy: normalized_entropy(artist_plays.values().copied()),
            mainstream_score,
            taste_consistency_pct: taste_consistency(top_items),
            descriptor_aggregates: aggregate_descriptors(&resolved),
            descriptor_coverage_pct,
            total_events,
            unique_tracks,
            unique_artists,
            top_genre_count,
            context_distribution,
            time_period_distribution,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// |short ∩ long| / |short| × 100 over top-track entries, keyed per user
fn taste_consistency(top_items: &[TopItemEntry]) -> f64 {
    let tracks_in = |range: TimeRange| -> HashSet<(&str, &str)> {
        top_items
            .iter()
            .filter(|e| e.time_range == range)
            .filter_map(|e| match &e.item {
                TopItem::Track(t) => Some((e.user_id.as_str(), t.id.as_str())),
                TopItem::Artist(_) => None,
            })
            .collect()
    };

    let short = tracks_in(TimeRange::Short);
    if short.is_empty() {
        return 0.0;
    }
    let long = tracks_in(TimeRange::Long);
    short.intersection(&long).count() as f64 / short.len() as f64 * 100.0
}

fn aggregate_descriptors(resolved: &[&DescriptorVector]) -> Option<DescriptorAggregates> {
    if resolved.is_empty() {
        return None;
    }
    let n = resolved.len() as f64;
    let avg = |f: fn(&DescriptorVector) -> f64| resolved.iter().map(|d| f(d)).sum::<f64>() / n;
    let composites: Vec<CompositeScores> = resolved
        .iter()
        .map(|d| CompositeScores::from_descriptors(d))
        .collect();
    let avg_composite = |f: fn(&CompositeScores) -> f64| composites.iter().map(f).sum::<f64>() / n;

    Some(DescriptorAggregates {
        resolved_tracks: resolved.len(),
        danceability: avg(|d| d.danceability),
        energy: avg(|d| d.energy),
        valence: avg(|d| d.valence),
        acousticness: avg(|d| d.acousticness),
        instrumentalness: avg(|d| d.instrumentalness),
        speechiness: avg(|d| d.speechiness),
        liveness: avg(|d| d.liveness),
        tempo: avg(|d| d.tempo),
        loudness: avg(|d| d.loudness),
        mood_score: avg_composite(|c| c.mood),
        grooviness: avg_composite(|c| c.grooviness),
        focus_score: avg_composite(|c| c.focus),
        relaxation_score: avg_composite(|c| c.relaxation),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use tastesync_common::{Artist, Resolution};

    fn descriptors() -> DescriptorVector {
        DescriptorVector {
            danceability: 0.5,
            energy: 0.5,
            valence: 0.5,
            acousticness: 0.5,
            instrumentalness: 0.0,
            speechiness: 0.5,
            liveness: 0.1,
            tempo: 125.0,
            loudness: -6.0,
        }
    }

    fn track(id: &str, artist: &str, popularity: u8, resolved: bool) -> Track {
        Track {
            id: id.to_string(),
            name: id.to_uppercase(),
            primary_artist_id: artist.to_string(),
            primary_artist_name: artist.to_uppercase(),
            album_name: "Album".to_string(),
            duration_ms: 180_000,
            explicit: false,
            release_year: None,
            popularity,
            descriptors: resolved.then(descriptors),
            resolution: if resolved {
                Resolution::Exact
            } else {
                Resolution::Unresolved
            },
        }
    }

    fn event(track: Track, hour: u32) -> ListeningEvent {
        ListeningEvent {
            user_id: "u1".to_string(),
            track,
            played_at: Utc.with_ymd_and_hms(2024, 3, 11, hour, 0, 0).unwrap(),
            context: None,
            inferred_context: None,
        }
    }

    fn top_track(range: TimeRange, rank: u32, track: Track) -> TopItemEntry {
        TopItemEntry {
            user_id: "u1".to_string(),
            time_range: range,
            rank,
            item: TopItem::Track(track),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalized_tempo_clamps() {
        assert_eq!(normalized_tempo(50.0), 0.0);
        assert_eq!(normalized_tempo(125.0), 0.5);
        assert_eq!(normalized_tempo(200.0), 1.0);
        assert_eq!(normalized_tempo(20.0), 0.0);
        assert_eq!(normalized_tempo(260.0), 1.0);
    }

    #[test]
    fn test_composite_scores() {
        let scores = CompositeScores::from_descriptors(&descriptors());
        assert!((scores.mood - 0.5).abs() < 1e-9);
        assert!((scores.grooviness - 0.5).abs() < 1e-9);
        // 0.4*0.5 + 0.3*0.0 + 0.3*1.0
        assert!((scores.focus - 0.5).abs() < 1e-9);
        assert!((scores.relaxation - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_infer_context_rules() {
        // Monday
        let noon = Utc.with_ymd_and_hms(2024, 3, 11, 12, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 11, 23, 0, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2024, 3, 11, 8, 0, 0).unwrap();

        let workout = DescriptorVector { energy: 0.9, danceability: 0.8, ..descriptors() };
        assert_eq!(infer_context(&workout, noon), ListeningContext::Workout);

        let focus = DescriptorVector { speechiness: 0.05, instrumentalness: 0.9, ..descriptors() };
        assert_eq!(infer_context(&focus, noon), ListeningContext::Focus);

        let calm = DescriptorVector { energy: 0.2, acousticness: 0.8, ..descriptors() };
        assert_eq!(infer_context(&calm, noon), ListeningContext::Relaxation);
        assert_eq!(infer_context(&calm, late), ListeningContext::Sleep);

        let upbeat = DescriptorVector { energy: 0.65, valence: 0.8, danceability: 0.4, ..descriptors() };
        assert_eq!(infer_context(&upbeat, late), ListeningContext::Party);
        assert_eq!(infer_context(&upbeat, morning), ListeningContext::Commute);

        assert_eq!(infer_context(&descriptors(), noon), ListeningContext::General);
    }

    #[test]
    fn test_normalized_entropy() {
        assert_eq!(normalized_entropy(vec![5]), 0.0);
        assert_eq!(normalized_entropy(Vec::<usize>::new()), 0.0);
        assert!((normalized_entropy(vec![3, 3, 3]) - 100.0).abs() < 1e-9);
        let skewed = normalized_entropy(vec![9, 1]);
        assert!(skewed > 0.0 && skewed < 100.0);
    }

    #[test]
    fn test_compute_on_empty_input() {
        let blob = MetricsComputer::new().compute(&[], &[]);
        assert_eq!(blob.diversity_score, 0.0);
        assert!(blob.mainstream_score.is_none());
        assert_eq!(blob.taste_consistency_pct, 0.0);
        assert!(blob.descriptor_aggregates.is_none());
        assert_eq!(blob.descriptor_coverage_pct, 0.0);
    }

    #[test]
    fn test_compute_basic_metrics() {
        let mut events = vec![
            event(track("t1", "a1", 80, true), 12),
            event(track("t1", "a1", 80, true), 13),
            event(track("t2", "a2", 20, false), 14),
            event(track("t3", "a1", 50, false), 15),
        ];
        annotate_contexts(&mut events);
        assert!(events[0].inferred_context.is_some());
        assert!(events[2].inferred_context.is_none());

        let top_items = vec![
            top_track(TimeRange::Short, 1, track("t1", "a1", 80, true)),
            top_track(TimeRange::Short, 2, track("t2", "a2", 20, false)),
            top_track(TimeRange::Long, 1, track("t1", "a1", 80, true)),
            TopItemEntry {
                user_id: "u1".to_string(),
                time_range: TimeRange::Long,
                rank: 1,
                item: TopItem::Artist(Artist {
                    id: "a1".to_string(),
                    name: "A1".to_string(),
                    genres: BTreeSet::from(["pop".to_string(), "rock".to_string()]),
                    popularity: 70,
                    followers: 10,
                }),
                observed_at: Utc::now(),
            },
        ];

        let blob = MetricsComputer::new().compute(&events, &top_items);
        assert_eq!(blob.total_events, 4);
        assert_eq!(blob.unique_artists, 2);
        assert_eq!(blob.unique_tracks, 3);
        assert!((blob.diversity_score - 0.5).abs() < 1e-9);
        // (80 + 20 + 80) / 3
        assert!((blob.mainstream_score.unwrap() - 60.0).abs() < 1e-9);
        assert!((blob.taste_consistency_pct - 50.0).abs() < 1e-9);
        // t1 resolved out of t1, t2, t3
        assert!((blob.descriptor_coverage_pct - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(blob.descriptor_aggregates.unwrap().resolved_tracks, 1);
        assert_eq!(blob.top_genre_count, 2);
        assert_eq!(blob.context_distribution.values().sum::<usize>(), 2);
        assert_eq!(blob.time_period_distribution[&TimePeriod::Afternoon], 4);
    }
}
