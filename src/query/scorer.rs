//! Exact sparse scoring kernels
//!
//! Scores are the true sparse inner product `q · X[r]` — no approximation
//! in either kernel. The slice kernel walks candidate rows and merges
//! against the query row; the accumulator kernel walks query-term postings
//! restricted to the segment's candidates. Both iterate terms in ascending
//! id order, so their floating-point summation order is identical and the
//! kernels agree bit-for-bit.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bitmap::DocSet;
use crate::error::Result;
use crate::query::filter::QueryTerm;
use crate::segment::{sparse_dot, SegmentCsr};

/// The query as a sorted sparse row
#[derive(Clone, Debug, Default)]
pub struct QueryVector {
    pub indices: Vec<i32>,
    pub weights: Vec<f32>,
}

impl QueryVector {
    /// Sort terms ascending and merge duplicate ids by summing weights
    pub fn from_terms(q_terms: &[QueryTerm]) -> Self {
        let mut terms: Vec<(u32, f32)> = q_terms.iter().map(|t| (t.term, t.weight)).collect();
        terms.sort_by_key(|(t, _)| *t);

        let mut indices = Vec::with_capacity(terms.len());
        let mut weights: Vec<f32> = Vec::with_capacity(terms.len());
        for (term, weight) in terms {
            if indices.last() == Some(&(term as i32)) {
                let last = weights.len() - 1;
                weights[last] += weight;
            } else {
                indices.push(term as i32);
                weights.push(weight);
            }
        }
        Self { indices, weights }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Candidates resolved to one segment: `(row_offset, doc_id, seq)` sorted
/// ascending by row offset
#[derive(Clone, Debug)]
pub struct SegmentCandidates {
    pub segment_id: String,
    pub rows: Vec<(u32, u64, i64)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kernel {
    Slice,
    Accumulator,
}

/// Pick a kernel by candidate count
pub fn select_kernel(candidate_count: usize, threshold: usize) -> Kernel {
    if candidate_count >= threshold {
        Kernel::Slice
    } else {
        Kernel::Accumulator
    }
}

/// Score a segment's candidates, returning `(row_offset, score)` pairs in
/// candidate order
pub fn score_segment(
    csr: &SegmentCsr,
    cands: &SegmentCandidates,
    query: &QueryVector,
    threshold: usize,
    term_bitmap: &dyn Fn(u32) -> Result<Arc<DocSet>>,
) -> Result<Vec<(u32, f32)>> {
    match select_kernel(cands.rows.len(), threshold) {
        Kernel::Slice => Ok(slice_kernel(csr, cands, query)),
        Kernel::Accumulator => accumulator_kernel(csr, cands, query, term_bitmap),
    }
}

/// Gathered-rows kernel: one sorted merge per candidate row
pub fn slice_kernel(
    csr: &SegmentCsr,
    cands: &SegmentCandidates,
    query: &QueryVector,
) -> Vec<(u32, f32)> {
    cands
        .rows
        .iter()
        .map(|&(row, _, _)| {
            let (idx, val) = csr.row(row as usize);
            (row, sparse_dot(&query.indices, &query.weights, idx, val))
        })
        .collect()
}

/// Postings-driven kernel: for every query term, visit only the candidate
/// docs carrying it
pub fn accumulator_kernel(
    csr: &SegmentCsr,
    cands: &SegmentCandidates,
    query: &QueryVector,
    term_bitmap: &dyn Fn(u32) -> Result<Arc<DocSet>>,
) -> Result<Vec<(u32, f32)>> {
    let mut scores = vec![0.0f32; cands.rows.len()];
    let mut position: HashMap<u64, usize> = HashMap::with_capacity(cands.rows.len());
    let mut seg_docs = DocSet::new();
    for (pos, &(_, doc_id, _)) in cands.rows.iter().enumerate() {
        position.insert(doc_id, pos);
        seg_docs.insert(doc_id);
    }

    for (&term, &weight) in query.indices.iter().zip(query.weights.iter()) {
        let postings = term_bitmap(term as u32)?;
        for doc_id in (&*postings & &seg_docs).iter() {
            let pos = position[&doc_id];
            let row = cands.rows[pos].0;
            scores[pos] += weight * csr.value_at(row as usize, term);
        }
    }

    Ok(cands
        .rows
        .iter()
        .zip(scores)
        .map(|(&(row, _, _), score)| (row, score))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap;

    /// Three rows over dims 50:
    ///   row 0 (doc 1): {10: 0.5, 20: 0.7}
    ///   row 1 (doc 2): {30: 0.9}
    ///   row 2 (doc 3): {10: 1.0}
    fn fixture() -> (SegmentCsr, SegmentCandidates) {
        let csr = SegmentCsr {
            indptr: vec![0, 2, 3, 4],
            indices: vec![10, 20, 30, 10],
            data: vec![0.5, 0.7, 0.9, 1.0],
        };
        let cands = SegmentCandidates {
            segment_id: "seg_000".to_string(),
            rows: vec![(0, 1, 1), (1, 2, 2), (2, 3, 3)],
        };
        (csr, cands)
    }

    fn postings_handle(term: u32) -> Result<Arc<DocSet>> {
        // Mirrors the fixture rows
        Ok(Arc::new(match term {
            10 => bitmap::of_iter([1u64, 3]),
            20 => bitmap::of_one(1),
            30 => bitmap::of_one(2),
            _ => bitmap::empty(),
        }))
    }

    #[test]
    fn test_query_vector_sorts_and_merges() {
        let q = QueryVector::from_terms(&[
            QueryTerm {
                term: 20,
                weight: 0.5,
            },
            QueryTerm {
                term: 10,
                weight: 1.0,
            },
            QueryTerm {
                term: 20,
                weight: 0.25,
            },
        ]);
        assert_eq!(q.indices, vec![10, 20]);
        assert_eq!(q.weights, vec![1.0, 0.75]);
    }

    #[test]
    fn test_slice_kernel_exact() {
        let (csr, cands) = fixture();
        let q = QueryVector::from_terms(&[QueryTerm {
            term: 10,
            weight: 1.0,
        }]);
        let scores = slice_kernel(&csr, &cands, &q);
        assert_eq!(scores, vec![(0, 0.5), (1, 0.0), (2, 1.0)]);
    }

    #[test]
    fn test_accumulator_kernel_exact() {
        let (csr, cands) = fixture();
        let q = QueryVector::from_terms(&[
            QueryTerm {
                term: 10,
                weight: 1.0,
            },
            QueryTerm {
                term: 30,
                weight: 2.0,
            },
        ]);
        let scores = accumulator_kernel(&csr, &cands, &q, &postings_handle).unwrap();
        assert_eq!(scores, vec![(0, 0.5), (1, 1.8), (2, 1.0)]);
    }

    #[test]
    fn test_kernel_agreement() {
        let (csr, cands) = fixture();
        let q = QueryVector::from_terms(&[
            QueryTerm {
                term: 10,
                weight: 0.3,
            },
            QueryTerm {
                term: 20,
                weight: 0.7,
            },
            QueryTerm {
                term: 30,
                weight: 0.9,
            },
            QueryTerm {
                term: 40,
                weight: 1.0,
            },
        ]);
        let slice = slice_kernel(&csr, &cands, &q);
        let acc = accumulator_kernel(&csr, &cands, &q, &postings_handle).unwrap();
        assert_eq!(slice, acc);
    }

    #[test]
    fn test_kernel_agreement_on_subset() {
        let (csr, _) = fixture();
        // Only docs 2 and 3 are candidates
        let cands = SegmentCandidates {
            segment_id: "seg_000".to_string(),
            rows: vec![(1, 2, 2), (2, 3, 3)],
        };
        let q = QueryVector::from_terms(&[
            QueryTerm {
                term: 10,
                weight: 1.0,
            },
            QueryTerm {
                term: 30,
                weight: 1.0,
            },
        ]);
        let slice = slice_kernel(&csr, &cands, &q);
        let acc = accumulator_kernel(&csr, &cands, &q, &postings_handle).unwrap();
        assert_eq!(slice, acc);
        assert_eq!(slice, vec![(1, 0.9), (2, 1.0)]);
    }

    #[test]
    fn test_kernel_selection() {
        assert_eq!(select_kernel(64, 64), Kernel::Slice);
        assert_eq!(select_kernel(63, 64), Kernel::Accumulator);
    }
}
