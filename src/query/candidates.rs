//! Candidate supplier
//!
//! Composes the final candidate set `C = B ∩ AND(MUST) ∩ OR(SHOULD)` and
//! caps it at the budget, keeping the lowest doc_ids. Iteration order is
//! ascending doc_id, which downstream partitioning relies on.

use std::sync::Arc;

use crate::bitmap::{self, DocSet};
use crate::error::Result;
use crate::query::filter::TermSelection;

#[derive(Clone, Copy, Debug, Default)]
pub struct CandidateSupplier;

impl CandidateSupplier {
    /// Compose candidates for a scored query
    pub fn collect(
        &self,
        base: &DocSet,
        selection: &TermSelection,
        budget: u64,
        term_bitmap: &dyn Fn(u32) -> Result<Arc<DocSet>>,
    ) -> Result<DocSet> {
        let mut candidates = base.clone();

        for &term in &selection.must {
            if candidates.is_empty() {
                return Ok(candidates);
            }
            candidates &= &*term_bitmap(term)?;
        }

        if !selection.should.is_empty() {
            let mut any = DocSet::new();
            for &term in &selection.should {
                any |= &*term_bitmap(term)?;
            }
            candidates &= any;
        }

        Ok(bitmap::truncate(&candidates, budget))
    }

    /// Recency variant: the base set itself, capped at the budget
    pub fn collect_recent(&self, base: &DocSet, budget: u64) -> DocSet {
        bitmap::truncate(base, budget)
    }
}
