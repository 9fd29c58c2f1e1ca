//! Index manifest
//!
//! `manifest.json` enumerates the live segments and carries the global
//! vector dimensionality. Updates are full rewrites: write `manifest.tmp`,
//! fsync, atomically rename over `manifest.json`, fsync the directory.
//! Readers snapshot the manifest once per query.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::{RecollexError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_TMP: &str = "manifest.tmp";

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// One segment entry: directory name plus its half-open global row range
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub name: String,
    /// `[start_row, end_row_exclusive]` in global row numbering
    pub rows: [u64; 2],
}

impl SegmentRecord {
    pub fn row_count(&self) -> u64 {
        self.rows[1] - self.rows[0]
    }
}

/// The manifest document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// Global vector dimensionality; 0 until the first segment is written
    pub dims: u32,
    pub segments: Vec<SegmentRecord>,
}

impl Manifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            dims: 0,
            segments: Vec::new(),
        }
    }

    /// Total rows across all segments
    pub fn total_rows(&self) -> u64 {
        self.segments.last().map(|s| s.rows[1]).unwrap_or(0)
    }

    pub fn segment(&self, name: &str) -> Option<&SegmentRecord> {
        self.segments.iter().find(|s| s.name == name)
    }

    /// Next unused segment directory name
    pub fn next_segment_name(&self) -> String {
        let next = self
            .segments
            .iter()
            .filter_map(|s| s.name.strip_prefix("seg_")?.parse::<u64>().ok())
            .max()
            .map(|n| n + 1)
            .unwrap_or(0);
        format!("seg_{next:03}")
    }

    /// Append a segment of `rows` rows at the next contiguous range
    pub fn push_segment(&mut self, name: String, rows: u64) -> SegmentRecord {
        let start = self.total_rows();
        let record = SegmentRecord {
            name,
            rows: [start, start + rows],
        };
        self.segments.push(record.clone());
        record
    }

    fn validate(&self) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(RecollexError::Corruption(format!(
                "unsupported manifest version {}",
                self.version
            )));
        }
        let mut expected_start = 0u64;
        for seg in &self.segments {
            if seg.rows[0] != expected_start || seg.rows[1] < seg.rows[0] {
                return Err(RecollexError::Corruption(format!(
                    "segment {} has non-contiguous row range [{}, {})",
                    seg.name, seg.rows[0], seg.rows[1]
                )));
            }
            expected_start = seg.rows[1];
        }
        Ok(())
    }

    /// Load the manifest from an index directory; a missing file is an
    /// empty manifest. Unknown JSON fields are ignored.
    pub fn load(dir: &Path) -> Result<Manifest> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Manifest::empty());
        }
        let bytes = std::fs::read(&path)?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| RecollexError::Corruption(format!("manifest parse failed: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Persist atomically: tmp write, fsync, rename, fsync directory
    pub fn store(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(MANIFEST_TMP);
        let bytes = serde_json::to_vec_pretty(self)?;
        {
            let mut file = File::create(&tmp)?;
            use std::io::Write;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir)?;
        Ok(())
    }
}

/// Fsync a directory so a rename survives a crash
pub fn sync_dir(path: &Path) -> std::io::Result<()> {
    File::open(path)?.sync_all()
}

/// Thread-safe manifest holder handing out per-query snapshots
pub struct ManifestHolder {
    inner: ArcSwap<Manifest>,
}

impl ManifestHolder {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            inner: ArcSwap::from_pointee(manifest),
        }
    }

    /// Snapshot for the duration of one query
    pub fn snapshot(&self) -> Arc<Manifest> {
        self.inner.load_full()
    }

    /// Atomically replace after a successful flush/compaction
    pub fn store(&self, manifest: Manifest) {
        self.inner.store(Arc::new(manifest));
    }

    pub fn dims(&self) -> u32 {
        self.inner.load().dims
    }
}
