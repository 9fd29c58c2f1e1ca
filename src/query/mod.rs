//! Query pipeline: gating, candidate supply, scoring, merging
//!
//! Control flow for one query: the filter policy builds the base bitmap
//! and splits query terms into MUST/SHOULD; the candidate supplier
//! composes the candidate set under a budget; candidates are partitioned
//! per segment and scored by one of two exact kernels; the rank merger
//! keeps the top k.

pub mod candidates;
pub mod filter;
pub mod merge;
pub mod profile;
pub mod scorer;

pub use candidates::CandidateSupplier;
pub use filter::{base_bitmap, AdaptiveGate, QueryTerm, ScopeFilter, TermSelection};
pub use merge::{Hit, RecencyMerger, TopKMerger};
pub use profile::{GatingKnobs, KnobOverrides, Profile};
pub use scorer::{QueryVector, SegmentCandidates};

/// Built-in policy objects chosen at open time
#[derive(Clone, Copy, Debug, Default)]
pub struct Policies {
    pub gate: AdaptiveGate,
    pub supplier: CandidateSupplier,
    pub top_k: TopKMerger,
    pub recency: RecencyMerger,
}
