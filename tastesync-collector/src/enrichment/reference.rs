//! Static reference table of descriptor vectors
//!
//! Loaded once from a JSON array of rows:
//!
//! ```json
//! [{"track_id": "...", "name": "...", "artist": "...",
//!   "danceability": 0.7, "energy": 0.8, "valence": 0.5, "acousticness": 0.1,
//!   "instrumentalness": 0.0, "speechiness": 0.05, "liveness": 0.1,
//!   "tempo": 120.0, "loudness": -6.0}]
//! ```
//!
//! Rows are kept sorted by track id. The table is read-only after
//! construction; reloading builds a new table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tastesync_common::{DescriptorVector, Error, Result};

use super::similarity::normalize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRow {
    pub track_id: String,
    pub name: String,
    pub artist: String,
    #[serde(flatten)]
    pub descriptors: DescriptorVector,
}

/// Row with its precomputed normalized (name, artist)
#[derive(Debug, Clone)]
pub(crate) struct IndexedRow {
    pub row: ReferenceRow,
    pub norm_name: String,
    pub norm_artist: String,
}

#[derive(Debug, Default)]
pub struct ReferenceTable {
    rows: Vec<IndexedRow>,
    by_id: HashMap<String, usize>,
}

impl ReferenceTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from rows; for duplicate track ids the first row wins
    pub fn from_rows(rows: Vec<ReferenceRow>) -> Self {
        let mut unique: Vec<ReferenceRow> = Vec::with_capacity(rows.len());
        let mut seen = std::collections::HashSet::new();
        for row in rows {
            if seen.insert(row.track_id.clone()) {
                unique.push(row);
            }
        }
        unique.sort_by(|a, b| a.track_id.cmp(&b.track_id));

        let rows: Vec<IndexedRow> = unique
            .into_iter()
            .map(|row| IndexedRow {
                norm_name: normalize(&row.name),
                norm_artist: normalize(&row.artist),
                row,
            })
            .collect();
        let by_id = rows
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.row.track_id.clone(), idx))
            .collect();

        Self { rows, by_id }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let rows: Vec<ReferenceRow> = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidInput(format!("Bad reference table {}: {}", path.display(), e)))?;
        let table = Self::from_rows(rows);
        tracing::info!(path = %path.display(), rows = table.len(), "Loaded reference table");
        Ok(table)
    }

    /// Load `path`, or an empty table when the file does not exist
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Reference table not found, descriptors will be unresolved"
            );
            return Ok(Self::empty());
        }
        Self::load(path)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, track_id: &str) -> Option<&ReferenceRow> {
        self.by_id.get(track_id).map(|&idx| &self.rows[idx].row)
    }

    pub(crate) fn indexed_rows(&self) -> &[IndexedRow] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptors() -> DescriptorVector {
        DescriptorVector {
            danceability: 0.5,
            energy: 0.5,
            valence: 0.5,
            acousticness: 0.5,
            instrumentalness: 0.0,
            speechiness: 0.1,
            liveness: 0.1,
            tempo: 120.0,
            loudness: -5.0,
        }
    }

    fn row(id: &str, name: &str) -> ReferenceRow {
        ReferenceRow {
            track_id: id.to_string(),
            name: name.to_string(),
            artist: "Artist".to_string(),
            descriptors: descriptors(),
        }
    }

    #[test]
    fn test_rows_sorted_and_deduplicated() {
        let table = ReferenceTable::from_rows(vec![row("b", "first b"), row("a", "a"), row("b", "second b")]);
        assert_eq!(table.len(), 2);
        let ids: Vec<&str> = table.indexed_rows().iter().map(|r| r.row.track_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(table.get("b").unwrap().name, "first b");
    }

    #[test]
    fn test_load_flat_json_rows() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ref.json");
        std::fs::write(
            &path,
            r#"[{"track_id": "t1", "name": "Song", "artist": "Band",
                 "danceability": 0.7, "energy": 0.8, "valence": 0.6, "acousticness": 0.1,
                 "instrumentalness": 0.0, "speechiness": 0.05, "liveness": 0.2,
                 "tempo": 128.0, "loudness": -4.5}]"#,
        )
        .unwrap();

        let table = ReferenceTable::load(&path).unwrap();
        let row = table.get("t1").unwrap();
        assert_eq!(row.descriptors.tempo, 128.0);
        assert_eq!(table.indexed_rows()[0].norm_artist, "band");
    }

    #[test]
    fn test_missing_file_yields_empty_table() {
        let temp = TempDir::new().unwrap();
        let table = ReferenceTable::load_or_empty(&temp.path().join("absent.json")).unwrap();
        assert!(table.is_empty());
    }
}
