//! Immutable segment reader backed by mmapped array files
//!
//! A segment directory holds four arrays: `indptr` (i64, N+1), `indices`
//! (i32, nnz), `data` (f32, nnz), `row_ids` (u64, N). The reader validates
//! their shapes on open, builds a doc_id → row hash, and serves zero-copy
//! row slices to the scorer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::array::ArrayFile;
use super::csr::{CsrView, SegmentCsr};
use crate::error::{RecollexError, Result};

pub const INDPTR_FILE: &str = "indptr";
pub const INDICES_FILE: &str = "indices";
pub const DATA_FILE: &str = "data";
pub const ROW_IDS_FILE: &str = "row_ids";

pub struct SegmentReader {
    name: String,
    indptr: ArrayFile,
    indices: ArrayFile,
    data: ArrayFile,
    row_ids: ArrayFile,
    /// doc_id → row offset, built on open
    row_index: HashMap<u64, u32>,
}

impl SegmentReader {
    /// Open `segments_dir/<name>` and validate array shapes
    pub fn open(segments_dir: &Path, name: &str) -> Result<Self> {
        let dir: PathBuf = segments_dir.join(name);
        let indptr = ArrayFile::open(&dir.join(INDPTR_FILE))?;
        let indices = ArrayFile::open(&dir.join(INDICES_FILE))?;
        let data = ArrayFile::open(&dir.join(DATA_FILE))?;
        let row_ids = ArrayFile::open(&dir.join(ROW_IDS_FILE))?;

        let rows = row_ids.len();
        if indptr.len() != rows + 1 {
            return Err(RecollexError::Corruption(format!(
                "segment {name}: indptr length {} does not match {rows} rows",
                indptr.len()
            )));
        }
        let nnz = indices.len();
        if data.len() != nnz {
            return Err(RecollexError::Corruption(format!(
                "segment {name}: data length {} != indices length {nnz}",
                data.len()
            )));
        }
        let indptr_slice = indptr.slice::<i64>()?;
        if indptr_slice.first().copied().unwrap_or(0) != 0
            || indptr_slice.last().copied().unwrap_or(0) != nnz as i64
        {
            return Err(RecollexError::Corruption(format!(
                "segment {name}: indptr does not span [0, {nnz}]"
            )));
        }

        let mut row_index = HashMap::with_capacity(rows);
        for (row, &doc_id) in row_ids.slice::<u64>()?.iter().enumerate() {
            row_index.insert(doc_id, row as u32);
        }

        Ok(Self {
            name: name.to_string(),
            indptr,
            indices,
            data,
            row_ids,
            row_index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> u32 {
        self.row_ids.len() as u32
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// The doc_id stored at a row offset
    pub fn doc_id_at(&self, row: u32) -> Result<u64> {
        self.row_ids
            .slice::<u64>()?
            .get(row as usize)
            .copied()
            .ok_or_else(|| {
                RecollexError::Corruption(format!(
                    "segment {}: row {row} out of range",
                    self.name
                ))
            })
    }

    /// The row offset holding a doc_id, if present in this segment
    pub fn row_of(&self, doc_id: u64) -> Option<u32> {
        self.row_index.get(&doc_id).copied()
    }

    /// Zero-copy `(indices, data)` slices for one row
    pub fn row_slice(&self, row: u32) -> Result<(&[i32], &[f32])> {
        let indptr = self.indptr.slice::<i64>()?;
        let row = row as usize;
        if row + 1 >= indptr.len() {
            return Err(RecollexError::Corruption(format!(
                "segment {}: row {row} out of range",
                self.name
            )));
        }
        let start = indptr[row] as usize;
        let end = indptr[row + 1] as usize;
        Ok((
            &self.indices.slice::<i32>()?[start..end],
            &self.data.slice::<f32>()?[start..end],
        ))
    }

    /// Gather selected rows into a compact materialized CSR
    pub fn slice_rows(&self, offsets: &[u32]) -> Result<CsrView> {
        let mut csr = SegmentCsr {
            indptr: Vec::with_capacity(offsets.len() + 1),
            indices: Vec::new(),
            data: Vec::new(),
        };
        csr.indptr.push(0);
        for &row in offsets {
            let (idx, val) = self.row_slice(row)?;
            csr.indices.extend_from_slice(idx);
            csr.data.extend_from_slice(val);
            csr.indptr.push(csr.indices.len() as i64);
        }
        Ok(CsrView {
            rows: offsets.to_vec(),
            csr,
        })
    }

    /// Copy the whole segment into an owned CSR (for the CSR cache)
    pub fn materialize(&self) -> Result<SegmentCsr> {
        Ok(SegmentCsr {
            indptr: self.indptr.slice::<i64>()?.to_vec(),
            indices: self.indices.slice::<i32>()?.to_vec(),
            data: self.data.slice::<f32>()?.to_vec(),
        })
    }
}
