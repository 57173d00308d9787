//! Per-user sync orchestration
//!
//! A sync fetches recent plays and every (kind, time range) top-items list,
//! enriches the distinct tracks, computes metrics and commits the snapshot.
//! The timeout budget covers fetching and enrichment only; once writing has
//! started the commit runs to completion.

pub mod state;

pub use state::{FailureReason, StateTransition, SyncResult, SyncSession, SyncState, SyncStatus};

use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tastesync_common::{
    ItemKind, ListeningEvent, MetricsBlob, RecordCounts, Snapshot, TimeRange, TopItem, TopItemEntry, Track,
    SCHEMA_VERSION,
};
use tokio::time::Instant;

use crate::auth::{Credential, CredentialHolder, CredentialRefresher};
use crate::enrichment::EnrichmentResolver;
use crate::error::SyncError;
use crate::fetcher::Fetcher;
use crate::merge::UserHistory;
use crate::metrics::{annotate_contexts, MetricsComputer};
use crate::store::snapshot_writer::validate_user_id;
use crate::store::{ArchiveRetention, SnapshotWriter};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// A current snapshot younger than this makes an unforced collect a no-op
    pub freshness: Duration,
    /// Budget for fetching plus enrichment
    pub timeout: Duration,
    pub recent_limit: u32,
    pub top_limit: u32,
    pub kinds: Vec<ItemKind>,
    pub ranges: Vec<TimeRange>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            freshness: Duration::from_secs(24 * 3600),
            timeout: Duration::from_secs(300),
            recent_limit: 50,
            top_limit: 50,
            kinds: ItemKind::ALL.to_vec(),
            ranges: TimeRange::ALL.to_vec(),
        }
    }
}

/// Enriched records ready to be committed
struct Enriched {
    events: Vec<ListeningEvent>,
    top_items: Vec<TopItemEntry>,
    metrics: MetricsBlob,
    coverage: f64,
}

pub struct Collector {
    fetcher: Arc<Fetcher>,
    resolver: Arc<EnrichmentResolver>,
    writer: SnapshotWriter,
    retention: ArchiveRetention,
    refresher: Arc<dyn CredentialRefresher>,
    metrics: MetricsComputer,
    settings: CollectorSettings,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Collector {
    pub fn new(
        fetcher: Arc<Fetcher>,
        resolver: Arc<EnrichmentResolver>,
        writer: SnapshotWriter,
        refresher: Arc<dyn CredentialRefresher>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            writer,
            retention: ArchiveRetention::unbounded(),
            refresher,
            metrics: MetricsComputer::new(),
            settings,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retention(mut self, retention: ArchiveRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    pub fn resolver(&self) -> &Arc<EnrichmentResolver> {
        &self.resolver
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Drop the user's lock entry once no sync holds or awaits it
    fn release_user_lock(&self, user_id: &str) {
        let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(user_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(user_id);
        }
    }

    /// Users with a sync lock entry (running syncs)
    pub fn active_user_locks(&self) -> usize {
        self.user_locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run one sync for `user_id`
    ///
    /// Never returns an error: every outcome, including failures, is reported
    /// in the [`SyncResult`]. A failed sync leaves the previous current
    /// snapshot in place.
    pub async fn collect(&self, user_id: &str, credential: Credential, force: bool) -> SyncResult {
        let mut session = SyncSession::new(user_id);

        if let Err(e) = validate_user_id(user_id) {
            return self.fail(&mut session, e, RecordCounts::default(), 0.0, Vec::new());
        }

        let Ok(guard) = self.user_lock(user_id).try_lock_owned() else {
            tracing::warn!(user_id, "Rejected sync, another sync for this user is running");
            return self.fail(
                &mut session,
                SyncError::SyncInProgress(user_id.to_string()),
                RecordCounts::default(),
                0.0,
                Vec::new(),
            );
        };

        let result = self.run_sync(&mut session, user_id, credential, force).await;
        drop(guard);
        self.release_user_lock(user_id);
        result
    }

    async fn run_sync(
        &self,
        session: &mut SyncSession,
        user_id: &str,
        credential: Credential,
        force: bool,
    ) -> SyncResult {
        let mut warnings = Vec::new();
        if !force {
            match self.writer.read_current_metadata(user_id).await {
                Ok(Some(metadata)) if self.is_fresh(metadata.synced_at) => {
                    tracing::info!(
                        user_id,
                        synced_at = %metadata.synced_at,
                        "Current snapshot is fresh, skipping sync"
                    );
                    return SyncResult {
                        sync_id: session.sync_id,
                        user_id: user_id.to_string(),
                        status: SyncStatus::Skipped,
                        reason: None,
                        timestamp: metadata.synced_at,
                        counts: metadata.counts,
                        coverage: 0.0,
                        partial_progress: false,
                        final_state: session.state,
                        warnings,
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Freshness check failed, syncing anyway");
                    warnings.push(format!("Freshness check failed: {}", e));
                }
            }
        }

        let synced_at = Utc::now().trunc_subsecs(6);
        let deadline = Instant::now() + self.settings.timeout;

        let enriched = match self.fetch_and_enrich(session, user_id, credential, synced_at, deadline).await {
            Ok(enriched) => enriched,
            Err(e) => return self.fail(session, e, RecordCounts::default(), 0.0, warnings),
        };

        if let Err(e) = session.transition_to(SyncState::Writing) {
            return self.fail(session, e, RecordCounts::default(), enriched.coverage, warnings);
        }

        let snapshot = Snapshot {
            user_id: user_id.to_string(),
            synced_at,
            schema_version: SCHEMA_VERSION,
            events: enriched.events,
            top_items: enriched.top_items,
            metrics: enriched.metrics,
        };
        let counts = snapshot.record_counts();

        match self.writer.archive_current_if_missing(user_id).await {
            Ok(Some(key)) => tracing::info!(user_id, key = %key, "Archived previous snapshot left by a partial commit"),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Previous snapshot could not be archived");
                warnings.push(format!("Previous snapshot could not be archived: {}", e));
            }
        }

        let report = match self.writer.commit(user_id, &snapshot).await {
            Ok(report) => report,
            Err(e) => return self.fail(session, e, counts, enriched.coverage, warnings),
        };
        session.committed = true;

        let status = if let Some(archive_error) = &report.archive_error {
            warnings.push(format!("Archive append failed: {}", archive_error));
            SyncStatus::PartialSuccess
        } else {
            SyncStatus::Success
        };

        match self.retention.prune(&self.writer, user_id).await {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Archive pruning failed");
                warnings.push(format!("Archive pruning failed: {}", e));
            }
        }

        if let Err(e) = session.transition_to(SyncState::Done) {
            return self.fail(session, e, counts, enriched.coverage, warnings);
        }

        tracing::info!(
            sync_id = %session.sync_id,
            user_id,
            events = counts.events,
            top_tracks = counts.top_tracks,
            top_artists = counts.top_artists,
            coverage = enriched.coverage,
            partial = report.is_partial(),
            "Sync complete"
        );

        SyncResult {
            sync_id: session.sync_id,
            user_id: user_id.to_string(),
            status,
            reason: None,
            timestamp: synced_at,
            counts,
            coverage: enriched.coverage,
            partial_progress: true,
            final_state: session.state,
            warnings,
        }
    }

    fn is_fresh(&self, synced_at: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(synced_at);
        match age.to_std() {
            Ok(age) => age < self.settings.freshness,
            // Timestamp in the future counts as fresh
            Err(_) => true,
        }
    }

    async fn fetch_and_enrich(
        &self,
        session: &mut SyncSession,
        user_id: &str,
        credential: Credential,
        synced_at: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Enriched, SyncError> {
        let timeout = self.settings.timeout;
        session.transition_to(SyncState::Fetching)?;

        let creds = Arc::new(CredentialHolder::new(user_id, credential, self.refresher.clone()));
        let fetch = async {
            tokio::try_join!(
                self.fetcher
                    .fetch_recent_events(user_id, &creds, self.settings.recent_limit),
                self.fetcher.fetch_all_top_items(
                    user_id,
                    &creds,
                    &self.settings.kinds,
                    &self.settings.ranges,
                    self.settings.top_limit,
                    synced_at,
                ),
            )
        };
        let (events, top_items) = tokio::time::timeout_at(deadline, fetch)
            .await
            .map_err(|_| SyncError::Timeout(timeout))??;

        session.transition_to(SyncState::Enriching)?;

        let resolver = self.resolver.clone();
        let metrics = self.metrics;
        let enrich = tokio::task::spawn_blocking(move || enrich(&resolver, metrics, events, top_items));
        let enriched = tokio::time::timeout_at(deadline, enrich)
            .await
            .map_err(|_| SyncError::Timeout(timeout))?
            .map_err(|e| SyncError::Internal(format!("Enrichment task failed: {}", e)))?;

        Ok(enriched)
    }

    fn fail(
        &self,
        session: &mut SyncSession,
        err: SyncError,
        counts: RecordCounts,
        coverage: f64,
        warnings: Vec<String>,
    ) -> SyncResult {
        if !session.is_terminal() {
            if let Err(e) = session.transition_to(SyncState::Failed) {
                tracing::error!(sync_id = %session.sync_id, error = %e, "Could not mark sync failed");
            }
        }
        tracing::error!(
            sync_id = %session.sync_id,
            user_id = %session.user_id,
            code = err.code(),
            error = %err,
            committed = session.committed,
            "Sync failed"
        );

        SyncResult {
            sync_id: session.sync_id,
            user_id: session.user_id.clone(),
            status: SyncStatus::Failed,
            reason: Some(FailureReason::from(&err)),
            timestamp: Utc::now(),
            counts,
            coverage,
            partial_progress: session.committed,
            final_state: session.state,
            warnings,
        }
    }

    /// History of a user from the current slot, or from every stored snapshot
    pub async fn load_history(&self, user_id: &str, include_archive: bool) -> Result<UserHistory, SyncError> {
        let snapshots = if include_archive {
            self.writer.read_all(user_id).await?
        } else {
            self.writer.read_current(user_id).await?.into_iter().collect()
        };
        Ok(UserHistory::from_snapshots(user_id, snapshots))
    }

    /// Histories for several users, keyed by user id
    pub async fn load_histories(
        &self,
        user_ids: &[String],
        include_archive: bool,
    ) -> Result<BTreeMap<String, UserHistory>, SyncError> {
        let mut histories = BTreeMap::new();
        for user_id in user_ids {
            let history = self.load_history(user_id, include_archive).await?;
            histories.insert(user_id.clone(), history);
        }
        Ok(histories)
    }
}

/// Resolve every distinct track once, then write the results back into the
/// events and top-track entries
fn enrich(
    resolver: &EnrichmentResolver,
    metrics: MetricsComputer,
    mut events: Vec<ListeningEvent>,
    mut top_items: Vec<TopItemEntry>,
) -> Enriched {
    let mut distinct: Vec<Track> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let tracks = events
        .iter()
        .map(|e| &e.track)
        .chain(top_items.iter().filter_map(|e| e.item.as_track()));
    for track in tracks {
        if !index.contains_key(&track.id) {
            index.insert(track.id.clone(), distinct.len());
            distinct.push(track.clone());
        }
    }

    let batch = resolver.resolve_batch(distinct);
    let lookup = |id: &str| index.get(id).map(|&idx| &batch.tracks[idx]);

    for event in &mut events {
        if let Some(resolved) = lookup(&event.track.id) {
            event.track.descriptors = resolved.descriptors.clone();
            event.track.resolution = resolved.resolution.clone();
        }
    }
    for entry in &mut top_items {
        if let TopItem::Track(track) = &mut entry.item {
            if let Some(resolved) = lookup(&track.id) {
                track.descriptors = resolved.descriptors.clone();
                track.resolution = resolved.resolution.clone();
            }
        }
    }

    annotate_contexts(&mut events);
    let blob = metrics.compute(&events, &top_items);

    Enriched {
        events,
        top_items,
        metrics: blob,
        coverage: batch.coverage,
    }
}
