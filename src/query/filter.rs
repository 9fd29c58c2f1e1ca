//! Filter policy: base bitmap construction and adaptive term gating
//!
//! The base bitmap `B` narrows the alive set by tag scopes, tombstones and
//! explicit exclusions. The adaptive gate then picks MUST terms greedily —
//! rarest-and-heaviest first — until the candidate count fits the budget,
//! and hands the next terms to SHOULD.

use std::collections::HashSet;
use std::sync::Arc;

use crate::bitmap::DocSet;
use crate::error::Result;
use crate::query::profile::GatingKnobs;
use crate::tags::TagScope;

/// A weighted query term
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueryTerm {
    pub term: u32,
    pub weight: f32,
}

/// Tag scoping plus doc_id exclusions for one query
#[derive(Clone, Debug, Default)]
pub struct ScopeFilter {
    pub all_of: TagScope,
    pub one_of: TagScope,
    pub none_of: TagScope,
    pub exclude: DocSet,
}

/// Gate output: term ids selected for AND / OR composition
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TermSelection {
    pub must: Vec<u32>,
    pub should: Vec<u32>,
}

/// Build the base bitmap `B` for a query.
///
/// `alive` is the maintained set of non-compacted doc_ids; scopes narrow
/// it, then tombstones and the exclusion set are subtracted. Unknown tags
/// resolve to empty bitmaps, so an unmatched `all_of` empties the base.
pub fn base_bitmap(
    scope: &ScopeFilter,
    alive: &DocSet,
    tombstones: &DocSet,
    get_bitmap: &dyn Fn(&str) -> Result<Arc<DocSet>>,
) -> Result<DocSet> {
    let mut base = if scope.all_of.is_unrestricted() {
        alive.clone()
    } else {
        let mut labels = scope.all_of.labels().iter();
        let first = labels.next().expect("restricted scope is non-empty");
        let mut base = (*get_bitmap(first)?).clone();
        for label in labels {
            if base.is_empty() {
                break;
            }
            base &= &*get_bitmap(label)?;
        }
        base
    };

    if !scope.one_of.is_unrestricted() && !base.is_empty() {
        let mut any = DocSet::new();
        for label in scope.one_of.labels() {
            any |= &*get_bitmap(label)?;
        }
        base &= any;
    }

    for label in scope.none_of.labels() {
        if base.is_empty() {
            break;
        }
        base -= &*get_bitmap(label)?;
    }

    base -= tombstones;
    base -= &scope.exclude;
    Ok(base)
}

/// Adaptive MUST/SHOULD term gate
#[derive(Clone, Copy, Debug, Default)]
pub struct AdaptiveGate;

impl AdaptiveGate {
    /// Rank query terms and split them into MUST and SHOULD sets.
    ///
    /// `total_docs` is the alive document count `N` used by the rarity
    /// weighting `weight × ln((N+1)/(DF+1))`.
    pub fn select(
        &self,
        q_terms: &[QueryTerm],
        base: &DocSet,
        total_docs: u64,
        knobs: &GatingKnobs,
        term_bitmap: &dyn Fn(u32) -> Result<Arc<DocSet>>,
        df_lookup: &dyn Fn(u32) -> Result<u64>,
    ) -> Result<TermSelection> {
        if q_terms.is_empty() {
            return Ok(TermSelection::default());
        }

        let mut ranked: Vec<(QueryTerm, u64)> = Vec::with_capacity(q_terms.len());
        for qt in q_terms {
            ranked.push((*qt, df_lookup(qt.term)?));
        }

        // Drop the most frequent fraction of the query outright
        let drop_count =
            ((ranked.len() as f64) * knobs.df_drop_top_percent / 100.0).floor() as usize;
        if drop_count > 0 {
            ranked.sort_by(|a, b| b.1.cmp(&a.1));
            ranked.drain(..drop_count.min(ranked.len()));
        }

        // Rarity-weighted ranking; ties prefer heavier weight, then lower id
        let n = total_docs as f64;
        let score = |qt: &QueryTerm, df: u64| qt.weight as f64 * ((n + 1.0) / (df as f64 + 1.0)).ln();
        ranked.sort_by(|a, b| {
            score(&b.0, b.1)
                .total_cmp(&score(&a.0, a.1))
                .then_with(|| b.0.weight.total_cmp(&a.0.weight))
                .then_with(|| a.0.term.cmp(&b.0.term))
        });

        // Greedy MUST: keep ANDing while over budget or under min_must, but
        // never AND down to an empty candidate set
        let mut must: Vec<u32> = Vec::new();
        let mut current = base.clone();
        for (qt, _) in &ranked {
            if current.len() <= knobs.budget && must.len() >= knobs.min_must {
                break;
            }
            let narrowed = &current & &*term_bitmap(qt.term)?;
            if narrowed.is_empty() {
                continue;
            }
            current = narrowed;
            must.push(qt.term);
        }

        let must_set: HashSet<u32> = must.iter().copied().collect();
        let should: Vec<u32> = ranked
            .iter()
            .map(|(qt, _)| qt.term)
            .filter(|t| !must_set.contains(t))
            .take(knobs.should_cap)
            .collect();

        Ok(TermSelection { must, should })
    }
}
