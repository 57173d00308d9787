//! # tastesync Common Library
//!
//! Shared code for the tastesync workspace:
//! - Domain model (tracks, artists, listening events, top items, snapshots)
//! - Configuration loading and root folder resolution
//! - Common error type
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{
    Artist, DescriptorAggregates, DescriptorVector, EventKey, ItemKind, ListeningContext,
    ListeningEvent, MetricsBlob, RecordCounts, Resolution, Snapshot, TimeRange, TopItem,
    TopItemEntry, TopItemKey, Track, SCHEMA_VERSION,
};
