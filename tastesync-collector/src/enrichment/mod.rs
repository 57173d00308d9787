//! Descriptor enrichment
//!
//! Each track is looked up in the reference table, first by exact track id,
//! then by fuzzy (name, primary artist) match. A miss is recorded on the track
//! as `Resolution::Unresolved`; it is never an error.
//!
//! Fuzzy matching scans every reference row, so adding rows to the table can
//! only keep or raise the best score for a track. Coverage therefore never
//! drops when the table grows.

pub mod reference;
pub mod similarity;

pub use reference::{ReferenceRow, ReferenceTable};
pub use similarity::{normalize, strategy_from_name, JaroWinkler, NormalizedLevenshtein, SimilarityStrategy};

use rayon::prelude::*;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tastesync_common::{DescriptorVector, Resolution, Track};

/// Default minimum fuzzy score
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

/// Enriched tracks plus coverage over the batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchResolution {
    pub tracks: Vec<Track>,
    pub resolved: usize,
    pub total: usize,
    /// resolved / total, 0.0 for an empty batch
    pub coverage: f64,
}

pub struct EnrichmentResolver {
    table: RwLock<Arc<ReferenceTable>>,
    strategy: Arc<dyn SimilarityStrategy>,
    threshold: f64,
}

impl EnrichmentResolver {
    pub fn new(table: ReferenceTable, strategy: Arc<dyn SimilarityStrategy>, threshold: f64) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
            strategy,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Resolver with the default strategy and threshold
    pub fn with_defaults(table: ReferenceTable) -> Self {
        Self::new(table, Arc::new(NormalizedLevenshtein), DEFAULT_FUZZY_THRESHOLD)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Shared handle on the table currently in use
    pub fn table(&self) -> Arc<ReferenceTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new reference table; in-flight batches keep the old one
    pub fn reload(&self, table: ReferenceTable) {
        let rows = table.len();
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        tracing::info!(rows, "Reference table reloaded");
    }

    fn lookup(&self, table: &ReferenceTable, track: &Track) -> (Option<DescriptorVector>, Resolution) {
        if let Some(row) = table.get(&track.id) {
            return (Some(row.descriptors.clone()), Resolution::Exact);
        }

        let name = normalize(&track.name);
        let artist = normalize(&track.primary_artist_name);

        // Rows are sorted by id; only a strictly better score replaces the
        // current best, so ties resolve to the lowest reference id.
        let mut best: Option<(f64, usize)> = None;
        for (idx, candidate) in table.indexed_rows().iter().enumerate() {
            let score = self.strategy.pair_score(
                (name.as_str(), artist.as_str()),
                (candidate.norm_name.as_str(), candidate.norm_artist.as_str()),
            );
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, idx));
            }
        }

        match best {
            Some((score, idx)) if score >= self.threshold => {
                let row = &table.indexed_rows()[idx].row;
                (
                    Some(row.descriptors.clone()),
                    Resolution::Fuzzy {
                        reference_id: row.track_id.clone(),
                        score,
                    },
                )
            }
            _ => (None, Resolution::Unresolved),
        }
    }

    fn apply(&self, table: &ReferenceTable, mut track: Track) -> Track {
        let (descriptors, resolution) = self.lookup(table, &track);
        track.descriptors = descriptors;
        track.resolution = resolution;
        track
    }

    /// Attach a descriptor vector or mark the track unresolved
    pub fn resolve(&self, track: Track) -> Track {
        let table = self.table();
        self.apply(&table, track)
    }

    /// Resolve a batch in parallel, preserving input order
    pub fn resolve_batch(&self, tracks: Vec<Track>) -> BatchResolution {
        let table = self.table();
        let tracks: Vec<Track> = tracks
            .into_par_iter()
            .map(|track| self.apply(&table, track))
            .collect();

        let total = tracks.len();
        let resolved = tracks.iter().filter(|t| t.resolution.is_resolved()).count();
        let coverage = if total == 0 {
            0.0
        } else {
            resolved as f64 / total as f64
        };

        tracing::debug!(total, resolved, coverage, "Resolved track batch");
        BatchResolution {
            tracks,
            resolved,
            total,
            coverage,
        }
    }
}
