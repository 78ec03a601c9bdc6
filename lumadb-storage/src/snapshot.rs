//! Snapshot manifest bookkeeping (spec §4.2, §6.2)

use lumadb_common::Offset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry in `.snapshots/snapshots.json`, describing a point-in-time
/// copy of a Log's segment files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub id: String,
    pub timestamp: i64,
    pub high_watermark: Offset,
    pub segment_base_offsets: Vec<Offset>,
    pub total_size: u64,
}

/// A handle to a just-created snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    pub id: String,
    pub dir: PathBuf,
}

const MANIFEST_FILE: &str = "snapshots.json";

/// Append one entry to the shared manifest file, creating it if absent.
pub fn append_manifest_entry(
    snapshots_dir: &std::path::Path,
    entry: &SnapshotManifest,
) -> lumadb_common::Result<()> {
    let manifest_path = snapshots_dir.join(MANIFEST_FILE);
    let mut entries = read_manifest(snapshots_dir)?;
    entries.push(entry.clone());
    let json = serde_json::to_vec_pretty(&entries)?;
    std::fs::write(manifest_path, json)?;
    Ok(())
}

/// Read all recorded snapshot manifests for a Log.
pub fn read_manifest(snapshots_dir: &std::path::Path) -> lumadb_common::Result<Vec<SnapshotManifest>> {
    let manifest_path = snapshots_dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read(manifest_path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let entry = SnapshotManifest {
            id: "snapshot-1".into(),
            timestamp: 100,
            high_watermark: 5,
            segment_base_offsets: vec![0],
            total_size: 128,
        };
        append_manifest_entry(dir.path(), &entry).unwrap();
        let entries = read_manifest(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "snapshot-1");
    }
}
