//! Descriptor lookup: exact, fuzzy above and below threshold, coverage

mod helpers;

use helpers::*;
use std::sync::Arc;
use tastesync_collector::enrichment::{EnrichmentResolver, JaroWinkler, ReferenceTable};
use tastesync_common::Resolution;

#[test]
fn test_exact_fuzzy_and_unresolved_outcomes() {
    let resolver = EnrichmentResolver::with_defaults(ReferenceTable::from_rows(vec![
        reference_row("t-exact", "Whatever", "Someone", 0.9),
        reference_row("r-blinding", "Blinding Lights", "The Weeknd", 0.7),
    ]));

    let exact = resolver.resolve(track("t-exact", "Different Title", "Other"));
    assert_eq!(exact.resolution, Resolution::Exact);
    assert_eq!(exact.descriptors.as_ref().unwrap().energy, 0.9);

    let fuzzy = resolver.resolve(track("t-remaster", "Blinding Lights (feat. Guest)", "The Weeknd"));
    match &fuzzy.resolution {
        Resolution::Fuzzy { reference_id, score } => {
            assert_eq!(reference_id, "r-blinding");
            assert!(*score >= 0.8);
        }
        other => panic!("expected fuzzy match, got {:?}", other),
    }
    assert_eq!(fuzzy.descriptors.as_ref().unwrap().energy, 0.7);

    let miss = resolver.resolve(track("t-unknown", "Quiet Harbor", "Nobody Known"));
    assert_eq!(miss.resolution, Resolution::Unresolved);
    assert!(miss.descriptors.is_none());
}

#[test]
fn test_near_match_below_threshold_stays_unresolved() {
    let rows = vec![reference_row("r1", "Midnight City", "M83", 0.5)];
    let strict = EnrichmentResolver::new(
        ReferenceTable::from_rows(rows.clone()),
        Arc::new(tastesync_collector::enrichment::NormalizedLevenshtein),
        0.99,
    );
    let lenient = EnrichmentResolver::new(
        ReferenceTable::from_rows(rows),
        Arc::new(tastesync_collector::enrichment::NormalizedLevenshtein),
        0.8,
    );

    let candidate = track("x", "Midnight Citi", "M83");
    assert_eq!(strict.resolve(candidate.clone()).resolution, Resolution::Unresolved);
    assert!(lenient.resolve(candidate).resolution.is_resolved());
}

#[test]
fn test_coverage_never_drops_when_rows_are_added() {
    let batch = vec![
        track("a", "Alpha Song", "Band"),
        track("b", "Beta Song", "Band"),
        track("c", "Gamma Song", "Group"),
        track("d", "Delta", "Solo"),
    ];
    let mut rows = Vec::new();
    let mut previous = 0.0;

    for row in [
        reference_row("r-gamma", "Gamma Song", "Group", 0.4),
        reference_row("a", "Unrelated", "Unrelated", 0.2),
        reference_row("r-noise", "Zeta Zeta", "Nobody", 0.1),
        reference_row("r-delta", "Delta", "Solo", 0.6),
    ] {
        rows.push(row);
        let resolver = EnrichmentResolver::with_defaults(ReferenceTable::from_rows(rows.clone()));
        let coverage = resolver.resolve_batch(batch.clone()).coverage;
        assert!(coverage >= previous, "coverage dropped from {} to {}", previous, coverage);
        previous = coverage;
    }
    assert_eq!(previous, 0.75);
}

#[test]
fn test_resolution_is_deterministic() {
    let table = || {
        ReferenceTable::from_rows(vec![
            reference_row("r3", "Song", "Band", 0.3),
            reference_row("r1", "Song", "Band", 0.1),
            reference_row("r2", "Songs", "Band", 0.2),
        ])
    };
    let first = EnrichmentResolver::with_defaults(table()).resolve_batch(vec![track("x", "Song", "Band")]);
    let second = EnrichmentResolver::with_defaults(table()).resolve_batch(vec![track("x", "Song", "Band")]);

    assert_eq!(first.tracks, second.tracks);
    match &first.tracks[0].resolution {
        Resolution::Fuzzy { reference_id, .. } => assert_eq!(reference_id, "r1"),
        other => panic!("expected fuzzy match, got {:?}", other),
    }
}

#[test]
fn test_jaro_winkler_strategy_is_pluggable() {
    let resolver = EnrichmentResolver::new(
        ReferenceTable::from_rows(vec![reference_row("r1", "Harder Better Faster", "Daft Punk", 0.8)]),
        Arc::new(JaroWinkler),
        0.9,
    );
    let resolved = resolver.resolve(track("x", "Harder, Better, Faster", "Daft Punk"));
    assert!(resolved.resolution.is_resolved());
}
