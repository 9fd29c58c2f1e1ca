//! Segment writer
//!
//! Accumulates CSR rows in memory and publishes them as an immutable
//! segment directory. Publication is crash-safe: arrays are written into
//! `<name>.tmp/`, fsynced, and the directory is renamed into place before
//! the manifest ever references it. A crash leaves either a `.tmp` orphan
//! or an unreferenced segment directory, both garbage-collected on open.

use std::path::{Path, PathBuf};

use super::array::write_array;
use super::reader::{DATA_FILE, INDICES_FILE, INDPTR_FILE, ROW_IDS_FILE};
use crate::encoder::SparseVector;
use crate::error::Result;
use crate::manifest::sync_dir;

pub const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Default)]
pub struct SegmentWriter {
    indptr: Vec<i64>,
    indices: Vec<i32>,
    data: Vec<f32>,
    row_ids: Vec<u64>,
}

impl SegmentWriter {
    pub fn new() -> Self {
        Self {
            indptr: vec![0],
            indices: Vec::new(),
            data: Vec::new(),
            row_ids: Vec::new(),
        }
    }

    /// Append one document row. The vector is assumed validated.
    pub fn push_row(&mut self, doc_id: u64, vector: &SparseVector) {
        self.row_ids.push(doc_id);
        self.indices.extend(vector.indices.iter().map(|&i| i as i32));
        self.data.extend_from_slice(&vector.weights);
        self.indptr.push(self.indices.len() as i64);
    }

    pub fn row_count(&self) -> u64 {
        self.row_ids.len() as u64
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Row offset a doc_id was buffered at
    pub fn buffered_offset(&self, doc_id: u64) -> Option<u32> {
        self.row_ids.iter().position(|&d| d == doc_id).map(|p| p as u32)
    }

    /// Write all four arrays into `segments_dir/<name>.tmp/`, fsync them,
    /// then rename the directory to `segments_dir/<name>/`.
    pub fn publish(self, segments_dir: &Path, name: &str) -> Result<()> {
        std::fs::create_dir_all(segments_dir)?;
        let tmp: PathBuf = segments_dir.join(format!("{name}{TMP_SUFFIX}"));
        let _ = std::fs::remove_dir_all(&tmp);
        std::fs::create_dir(&tmp)?;

        write_array(&tmp.join(INDPTR_FILE), &self.indptr)?;
        write_array(&tmp.join(INDICES_FILE), &self.indices)?;
        write_array(&tmp.join(DATA_FILE), &self.data)?;
        write_array(&tmp.join(ROW_IDS_FILE), &self.row_ids)?;
        sync_dir(&tmp)?;

        std::fs::rename(&tmp, segments_dir.join(name))?;
        sync_dir(segments_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::reader::SegmentReader;
    use tempfile::tempdir;

    #[test]
    fn test_publish_then_read_back() {
        let dir = tempdir().unwrap();
        let mut writer = SegmentWriter::new();
        writer.push_row(1, &SparseVector::new(vec![10, 20], vec![0.5, 0.7]));
        writer.push_row(2, &SparseVector::new(vec![30], vec![0.9]));
        assert_eq!(writer.row_count(), 2);
        assert_eq!(writer.nnz(), 3);
        assert_eq!(writer.buffered_offset(2), Some(1));

        writer.publish(dir.path(), "seg_000").unwrap();
        assert!(dir.path().join("seg_000").is_dir());
        assert!(!dir.path().join("seg_000.tmp").exists());

        let reader = SegmentReader::open(dir.path(), "seg_000").unwrap();
        assert_eq!(reader.row_count(), 2);
        assert_eq!(
            reader.row_slice(0).unwrap(),
            (&[10, 20][..], &[0.5, 0.7][..])
        );
    }

    #[test]
    fn test_publish_replaces_stale_tmp() {
        let dir = tempdir().unwrap();
        // A leftover tmp dir from a crashed writer does not block publish
        std::fs::create_dir_all(dir.path().join("seg_000.tmp")).unwrap();
        std::fs::write(dir.path().join("seg_000.tmp").join("junk"), b"x").unwrap();

        let mut writer = SegmentWriter::new();
        writer.push_row(1, &SparseVector::new(vec![5], vec![1.0]));
        writer.publish(dir.path(), "seg_000").unwrap();

        let reader = SegmentReader::open(dir.path(), "seg_000").unwrap();
        assert_eq!(reader.row_count(), 1);
    }

    #[test]
    fn test_empty_writer() {
        let writer = SegmentWriter::new();
        assert!(writer.is_empty());
        assert_eq!(writer.row_count(), 0);
    }
}
