//! Rank merging across segments
//!
//! Scored hits stream into a size-k min-heap ordered by score, with ties
//! broken toward higher `seq` then lower `doc_id`. The recency merger
//! orders by `seq` alone.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One scored candidate
#[derive(Clone, Debug)]
pub struct Hit {
    pub doc_id: u64,
    pub segment_id: String,
    pub row_offset: u32,
    pub seq: i64,
    pub score: f32,
}

impl PartialEq for Hit {
    fn eq(&self, other: &Self) -> bool {
        self.doc_id == other.doc_id
            && self.seq == other.seq
            && self.score.total_cmp(&other.score) == Ordering::Equal
    }
}

impl Eq for Hit {}

impl PartialOrd for Hit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the heap's greatest element is the worst hit:
        // lower score, then lower seq, then higher doc_id
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.seq.cmp(&self.seq))
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }
}

/// Top-k merge for scored profiles
#[derive(Clone, Copy, Debug, Default)]
pub struct TopKMerger;

impl TopKMerger {
    pub fn merge(&self, hits: impl IntoIterator<Item = Hit>, k: usize) -> Vec<Hit> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap: BinaryHeap<Hit> = BinaryHeap::with_capacity(k + 1);
        for hit in hits {
            heap.push(hit);
            if heap.len() > k {
                // Greatest is the worst under the reversed ordering
                heap.pop();
            }
        }
        // Ascending by reversed Ord = best first
        heap.into_sorted_vec()
    }
}

/// Recency merge: newest `seq` first, score reported as 0.0
#[derive(Clone, Copy, Debug, Default)]
pub struct RecencyMerger;

impl RecencyMerger {
    pub fn merge(&self, hits: impl IntoIterator<Item = Hit>, k: usize) -> Vec<Hit> {
        let mut hits: Vec<Hit> = hits
            .into_iter()
            .map(|mut h| {
                h.score = 0.0;
                h
            })
            .collect();
        hits.sort_by(|a, b| b.seq.cmp(&a.seq).then_with(|| a.doc_id.cmp(&b.doc_id)));
        hits.truncate(k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc_id: u64, seq: i64, score: f32) -> Hit {
        Hit {
            doc_id,
            segment_id: "seg_000".to_string(),
            row_offset: 0,
            seq,
            score,
        }
    }

    #[test]
    fn test_top_k_orders_by_score() {
        let hits = vec![hit(1, 1, 0.5), hit(2, 2, 0.9), hit(3, 3, 0.1)];
        let top = TopKMerger.merge(hits, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].doc_id, 2);
        assert_eq!(top[1].doc_id, 1);
    }

    #[test]
    fn test_top_k_tie_breaks() {
        // Equal scores: higher seq wins, then lower doc_id
        let hits = vec![hit(5, 1, 1.0), hit(4, 2, 1.0), hit(3, 2, 1.0)];
        let top = TopKMerger.merge(hits, 3);
        assert_eq!(
            top.iter().map(|h| h.doc_id).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn test_top_k_zero() {
        assert!(TopKMerger.merge(vec![hit(1, 1, 1.0)], 0).is_empty());
    }

    #[test]
    fn test_top_k_fewer_than_k() {
        let top = TopKMerger.merge(vec![hit(1, 1, 0.5)], 10);
        assert_eq!(top.len(), 1);
    }

    #[test]
    fn test_recency_orders_by_seq() {
        let hits = vec![hit(1, 5, 0.7), hit(2, 9, 0.1), hit(3, 1, 0.9)];
        let recent = RecencyMerger.merge(hits, 2);
        assert_eq!(recent[0].doc_id, 2);
        assert_eq!(recent[1].doc_id, 1);
        // Scores are zeroed in the recency profile
        assert!(recent.iter().all(|h| h.score == 0.0));
    }
}
