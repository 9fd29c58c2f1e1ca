//! Engine facade
//!
//! `Recollex` ties the layers together: it owns the metadata store, the
//! manifest holder, the segment caches and the policy objects, and
//! exposes the add / remove / search surface.
//!
//! Write protocol for one batch:
//! 1. validate everything up front (no state change on validation errors)
//! 2. take the engine write mutex, then the cross-process file lock
//! 3. re-read `manifest.json` from disk and base the flush on that copy
//! 4. write + fsync + rename the segment directory
//! 5. write + fsync + rename the manifest
//! 6. commit docs rows, posting/tag/alive bitmap deltas, DF stats and the
//!    id counters in one metadata transaction
//!
//! A crash between steps leaves either an orphan `.tmp`/segment directory
//! (garbage-collected on the next open) or a manifest entry whose rows are
//! unreachable until compaction; never a partially visible document.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bitmap::{self, DocSet};
use crate::cache::SegmentCaches;
use crate::config::{OpenOptions, RecollexConfig};
use crate::encoder::{SparseVector, TermEncoder};
use crate::error::{RecollexError, Result};
use crate::lock::IndexLock;
use crate::manifest::{Manifest, ManifestHolder};
use crate::meta::{
    df_key, term_bitmap, DocRecord, MetaStore, ALIVE, KV_NEXT_DOC_ID, KV_NEXT_SEQ, META_FILE,
    TOMBSTONES,
};
use crate::query::{
    base_bitmap, Hit, Policies, Profile, QueryTerm, QueryVector, ScopeFilter, SegmentCandidates,
};
use crate::segment::{SegmentWriter, SEGMENTS_DIR};
use crate::tags::{self, Tag, TagScope};

/// A pre-encoded document for [`Recollex::add_many`]
#[derive(Clone, Debug, Default)]
pub struct AddRecord {
    /// Caller-chosen doc_id; assigned from the counter when absent
    pub doc_id: Option<u64>,
    pub vector: SparseVector,
    pub text: Option<String>,
    pub tags: Vec<Tag>,
    /// Explicit recency key; must exceed every previously assigned seq
    pub seq: Option<i64>,
}

/// One search request; knobs not set fall back to the profile preset
#[derive(Clone, Debug)]
pub struct SearchRequest {
    pub k: usize,
    pub profile: Profile,
    pub all_of: TagScope,
    pub one_of: TagScope,
    pub none_of: TagScope,
    pub exclude: DocSet,
    pub overrides: crate::query::KnobOverrides,
    pub min_score: Option<f32>,
}

impl SearchRequest {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            profile: Profile::default(),
            all_of: TagScope::default(),
            one_of: TagScope::default(),
            none_of: TagScope::default(),
            exclude: DocSet::new(),
            overrides: Default::default(),
            min_score: None,
        }
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn all_of<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.all_of = TagScope::new(tags);
        self
    }

    pub fn one_of<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.one_of = TagScope::new(tags);
        self
    }

    pub fn none_of<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.none_of = TagScope::new(tags);
        self
    }

    pub fn exclude_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        for id in ids {
            self.exclude.insert(id);
        }
        self
    }

    /// String form of the exclusion list; non-numeric entries are dropped
    pub fn exclude_id_strs<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            if let Ok(id) = id.as_ref().trim().parse::<u64>() {
                self.exclude.insert(id);
            }
        }
        self
    }

    pub fn with_overrides(mut self, overrides: crate::query::KnobOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// One search result, hydrated from the docs table
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub doc_id: String,
    pub segment_id: String,
    pub row_offset: u32,
    pub score: f32,
    pub seq: i64,
    pub text: Option<String>,
    pub tags: Vec<Tag>,
}

/// Point-in-time index counters
#[derive(Clone, Debug)]
pub struct IndexStats {
    pub docs: u64,
    pub alive: u64,
    pub tombstones: u64,
    pub segments: usize,
    pub total_rows: u64,
    pub dims: u32,
    pub cached_readers: usize,
    pub cached_csr_bytes: usize,
}

struct WriterState {
    next_doc_id: u64,
    next_seq: i64,
}

pub struct Recollex {
    dir: PathBuf,
    segments_dir: PathBuf,
    config: RecollexConfig,
    encoder: Option<Arc<dyn TermEncoder>>,
    meta: MetaStore,
    manifest: ManifestHolder,
    caches: SegmentCaches,
    policies: Policies,
    writer: Mutex<WriterState>,
    /// Set when corruption was detected on open; writes are refused
    read_only: Option<String>,
}

impl Recollex {
    /// Open an index directory with default options, creating it if missing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    /// Open an index directory, creating it if missing
    pub fn open_with(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        let segments_dir = dir.join(SEGMENTS_DIR);
        std::fs::create_dir_all(&segments_dir)?;

        let meta = MetaStore::open(&dir.join(META_FILE), options.config.caches.bitmap_entries)?;
        let manifest = Manifest::load(&dir)?;

        let mut read_only = None;
        Self::collect_garbage(&segments_dir, &manifest)?;
        for seg in &manifest.segments {
            if !segments_dir.join(&seg.name).is_dir() {
                let reason = format!("manifest references missing segment {}", seg.name);
                warn!(segment = %seg.name, "{reason}; opening read-only");
                read_only = Some(reason);
                break;
            }
        }

        let next_doc_id = meta
            .get_kv(KV_NEXT_DOC_ID)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let next_seq = meta
            .get_kv(KV_NEXT_SEQ)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        info!(
            dir = %dir.display(),
            segments = manifest.segments.len(),
            rows = manifest.total_rows(),
            dims = manifest.dims,
            "opened index"
        );

        let caches = SegmentCaches::new(&segments_dir, &options.config.caches);
        Ok(Self {
            dir,
            segments_dir,
            config: options.config,
            encoder: options.encoder,
            meta,
            manifest: ManifestHolder::new(manifest),
            caches,
            policies: Policies::default(),
            writer: Mutex::new(WriterState {
                next_doc_id,
                next_seq,
            }),
            read_only,
        })
    }

    /// Delete stale `.tmp` directories and segment directories the
    /// manifest does not reference
    fn collect_garbage(segments_dir: &Path, manifest: &Manifest) -> Result<()> {
        let referenced: HashSet<&str> =
            manifest.segments.iter().map(|s| s.name.as_str()).collect();
        for entry in std::fs::read_dir(segments_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale_tmp = name.ends_with(crate::segment::writer::TMP_SUFFIX);
            let orphan = !stale_tmp && !referenced.contains(name.as_str());
            if stale_tmp || orphan {
                warn!(segment = %name, orphan, "removing unreferenced segment directory");
                std::fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    /// Global vector dimensionality: manifest first, then encoder, then
    /// config; 0 while still unknown
    pub fn dims(&self) -> u32 {
        let stamped = self.manifest.dims();
        if stamped != 0 {
            return stamped;
        }
        if let Some(encoder) = &self.encoder {
            return encoder.dims();
        }
        self.config.dims.unwrap_or(0)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.is_some()
    }

    fn check_writable(&self) -> Result<()> {
        match &self.read_only {
            Some(reason) => Err(RecollexError::ReadOnly(reason.clone())),
            None => Ok(()),
        }
    }

    /// Encode and add a single document; returns its doc_id
    pub fn add<I, T>(&self, text: &str, tags: I) -> Result<u64>
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        let encoder = self.encoder.as_ref().ok_or(RecollexError::NoEncoder)?;
        let vector = encoder.encode_one(text)?;
        let record = AddRecord {
            doc_id: None,
            vector,
            text: Some(text.to_string()),
            tags: tags.into_iter().map(Into::into).collect(),
            seq: None,
        };
        Ok(self.add_many(vec![record])?[0])
    }

    /// Add a batch of pre-encoded documents as one segment; returns the
    /// assigned doc_ids in input order
    pub fn add_many(&self, records: Vec<AddRecord>) -> Result<Vec<u64>> {
        self.check_writable()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let dims = self.resolve_dims()?;
        for record in &records {
            record.vector.validate(dims)?;
            for tag in &record.tags {
                tag.validate()?;
            }
        }
        let mut seen: HashSet<u64> = HashSet::new();
        for record in &records {
            if let Some(id) = record.doc_id {
                if !seen.insert(id) || self.meta.has_doc(id)? {
                    return Err(RecollexError::Validation(format!("duplicate doc_id {id}")));
                }
            }
        }

        let mut writer_state = self.writer.lock();
        let _lock = IndexLock::acquire(&self.dir, self.config.lock_timeout())?;

        // A concurrent writer may have advanced the index; restart from the
        // manifest on disk
        let mut manifest = Manifest::load(&self.dir)?;
        if manifest.dims != 0 && manifest.dims != dims {
            return Err(RecollexError::Validation(format!(
                "vector dims {dims} do not match index dims {}",
                manifest.dims
            )));
        }
        manifest.dims = dims;

        // Explicit seqs must advance monotonically; check the whole batch
        // before any counter moves
        let mut simulated_seq = writer_state.next_seq;
        for record in &records {
            match record.seq {
                Some(seq) if seq >= simulated_seq => simulated_seq = seq + 1,
                Some(seq) => {
                    return Err(RecollexError::Validation(format!(
                        "explicit seq {seq} is not greater than the last assigned seq"
                    )));
                }
                None => simulated_seq += 1,
            }
        }

        // Assign ids and seqs under the write mutex
        let mut assigned: Vec<(u64, i64)> = Vec::with_capacity(records.len());
        for record in &records {
            let doc_id = match record.doc_id {
                Some(id) => {
                    writer_state.next_doc_id = writer_state.next_doc_id.max(id + 1);
                    id
                }
                None => {
                    let id = writer_state.next_doc_id;
                    writer_state.next_doc_id += 1;
                    id
                }
            };
            let seq = match record.seq {
                Some(seq) => {
                    writer_state.next_seq = seq + 1;
                    seq
                }
                None => {
                    let seq = writer_state.next_seq;
                    writer_state.next_seq += 1;
                    seq
                }
            };
            assigned.push((doc_id, seq));
        }

        // Materialize the segment
        let name = manifest.next_segment_name();
        let mut segment = SegmentWriter::new();
        let mut docs: Vec<DocRecord> = Vec::with_capacity(records.len());
        let mut term_deltas: BTreeMap<u32, DocSet> = BTreeMap::new();
        let mut tag_deltas: BTreeMap<String, DocSet> = BTreeMap::new();
        let mut alive_delta = DocSet::new();

        for (row, (record, &(doc_id, seq))) in records.iter().zip(assigned.iter()).enumerate() {
            segment.push_row(doc_id, &record.vector);
            alive_delta.insert(doc_id);
            for &term in &record.vector.indices {
                term_deltas.entry(term).or_default().insert(doc_id);
            }
            for tag in &record.tags {
                tag_deltas
                    .entry(tag.canonical())
                    .or_default()
                    .insert(doc_id);
            }
            docs.push(DocRecord {
                doc_id,
                segment_id: name.clone(),
                row_offset: row as u32,
                seq,
                text: record.text.clone(),
                tags: if record.tags.is_empty() {
                    None
                } else {
                    Some(tags::to_json(&record.tags)?)
                },
            });
        }

        let rows = segment.row_count();
        segment.publish(&self.segments_dir, &name)?;
        manifest.push_segment(name.clone(), rows);
        manifest.store(&self.dir)?;

        let next_doc_id = writer_state.next_doc_id;
        let next_seq = writer_state.next_seq;
        self.meta.with_txn(|txn| {
            txn.put_docs(&docs)?;
            for (term, delta) in &term_deltas {
                txn.union_into(&term_bitmap(*term), delta)?;
                txn.incr_stat(&df_key(*term), delta.len() as i64)?;
            }
            for (label, delta) in &tag_deltas {
                txn.union_into(label, delta)?;
            }
            txn.union_into(ALIVE, &alive_delta)?;
            txn.set_kv(KV_NEXT_DOC_ID, &next_doc_id.to_string())?;
            txn.set_kv(KV_NEXT_SEQ, &next_seq.to_string())
        })?;

        self.manifest.store(manifest);
        debug!(segment = %name, rows, "flushed batch");
        Ok(assigned.into_iter().map(|(id, _)| id).collect())
    }

    /// Tombstone documents; unknown ids are silent no-ops. Returns the
    /// number of documents actually removed.
    pub fn remove(&self, doc_ids: &[u64]) -> Result<usize> {
        self.check_writable()?;
        let _writer = self.writer.lock();

        let found = self.meta.get_docs(doc_ids)?;
        if found.is_empty() {
            return Ok(0);
        }

        // Read each removed row's terms so DF stays exact
        let mut delta = DocSet::new();
        let mut df_decr: BTreeMap<u32, i64> = BTreeMap::new();
        for doc in &found {
            delta.insert(doc.doc_id);
            let reader = self.caches.readers.get_or_open(&doc.segment_id)?;
            let (terms, _) = reader.row_slice(doc.row_offset)?;
            for &term in terms {
                *df_decr.entry(term as u32).or_default() -= 1;
            }
        }

        self.meta.with_txn(|txn| {
            txn.union_into(TOMBSTONES, &delta)?;
            txn.remove_from(ALIVE, &delta)?;
            for (term, decr) in &df_decr {
                txn.incr_stat(&df_key(*term), *decr)?;
            }
            Ok(())
        })?;

        debug!(removed = found.len(), "tombstoned documents");
        Ok(found.len())
    }

    /// Tombstone every document matching a tag scope. With `dry_run` the
    /// matching count is returned and nothing changes.
    pub fn remove_by(&self, scope: &ScopeFilter, dry_run: bool) -> Result<usize> {
        let alive = self.meta.get_bitmap(ALIVE)?;
        let tombstones = self.meta.get_bitmap(TOMBSTONES)?;
        let matched = base_bitmap(scope, &alive, &tombstones, &|name| {
            self.meta.get_bitmap(name)
        })?;
        if dry_run {
            return Ok(matched.len() as usize);
        }
        let ids: Vec<u64> = matched.iter().collect();
        self.remove(&ids)
    }

    /// Encode `text` and run a top-k search. Empty text means no query
    /// terms, which pairs with the `recent` profile.
    pub fn search(&self, text: &str, request: &SearchRequest) -> Result<Vec<SearchResult>> {
        let q_terms = if text.is_empty() {
            Vec::new()
        } else {
            let encoder = self.encoder.as_ref().ok_or(RecollexError::NoEncoder)?;
            let vector = encoder.encode_one(text)?;
            vector
                .indices
                .iter()
                .zip(vector.weights.iter())
                .map(|(&term, &weight)| QueryTerm { term, weight })
                .collect()
        };
        self.search_terms(&q_terms, request)
    }

    /// Batched variant of [`search`](Self::search): one encoder call, one
    /// result list per input text
    pub fn search_batch(
        &self,
        texts: &[&str],
        request: &SearchRequest,
    ) -> Result<Vec<Vec<SearchResult>>> {
        let encoder = self.encoder.as_ref().ok_or(RecollexError::NoEncoder)?;
        let vectors = encoder.encode(texts)?;
        vectors
            .iter()
            .map(|vector| {
                let q_terms: Vec<QueryTerm> = vector
                    .indices
                    .iter()
                    .zip(vector.weights.iter())
                    .map(|(&term, &weight)| QueryTerm { term, weight })
                    .collect();
                self.search_terms(&q_terms, request)
            })
            .collect()
    }

    /// Newest-first convenience: `search("")` with the `recent` profile
    pub fn last(&self, k: usize) -> Result<Vec<SearchResult>> {
        self.search_terms(&[], &SearchRequest::new(k).with_profile(Profile::Recent))
    }

    /// Run a top-k search over pre-encoded query terms
    pub fn search_terms(
        &self,
        q_terms: &[QueryTerm],
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>> {
        if request.k == 0 {
            return Ok(Vec::new());
        }
        let dims = self.dims();
        if dims > 0 {
            for qt in q_terms {
                if qt.term >= dims {
                    return Err(RecollexError::Validation(format!(
                        "query term id {} >= dims {dims}",
                        qt.term
                    )));
                }
            }
        }

        // Snapshot the manifest and bitmaps for the whole query
        let manifest = self.manifest.snapshot();
        let alive = self.meta.get_bitmap(ALIVE)?;
        let tombstones = self.meta.get_bitmap(TOMBSTONES)?;
        let knobs = request.overrides.apply(request.profile.knobs(request.k));

        let scope = ScopeFilter {
            all_of: request.all_of.clone(),
            one_of: request.one_of.clone(),
            none_of: request.none_of.clone(),
            exclude: request.exclude.clone(),
        };
        let get_bitmap = |name: &str| self.meta.get_bitmap(name);
        let base = base_bitmap(&scope, &alive, &tombstones, &get_bitmap)?;
        let term_handle = |term: u32| self.meta.get_bitmap(&term_bitmap(term));

        if request.profile.is_recent() {
            let candidates = self.policies.supplier.collect_recent(&base, knobs.budget);
            let (partitions, records) = self.partition(&candidates, &manifest)?;
            let hits = if request.min_score.is_some() && !q_terms.is_empty() {
                let scored = self.score_partitions(&partitions, q_terms, &term_handle)?;
                self.filter_min_score(scored, request.min_score)
            } else {
                partitions
                    .iter()
                    .flat_map(|part| {
                        part.rows.iter().map(|&(row, doc_id, seq)| Hit {
                            doc_id,
                            segment_id: part.segment_id.clone(),
                            row_offset: row,
                            seq,
                            score: 0.0,
                        })
                    })
                    .collect()
            };
            let merged = self.policies.recency.merge(hits, request.k);
            return self.hydrate(merged, &records);
        }

        let selection = self.policies.gate.select(
            q_terms,
            &base,
            alive.len(),
            &knobs,
            &term_handle,
            &|term| self.meta.term_df(term),
        )?;
        let candidates =
            self.policies
                .supplier
                .collect(&base, &selection, knobs.budget, &term_handle)?;

        let (partitions, records) = self.partition(&candidates, &manifest)?;
        let scored = self.score_partitions(&partitions, q_terms, &term_handle)?;
        let hits = self.filter_min_score(scored, request.min_score);
        let merged = self.policies.top_k.merge(hits, request.k);
        self.hydrate(merged, &records)
    }

    /// Current index counters
    pub fn stats(&self) -> Result<IndexStats> {
        let manifest = self.manifest.snapshot();
        Ok(IndexStats {
            docs: self.meta.doc_count()?,
            alive: self.meta.get_bitmap(ALIVE)?.len(),
            tombstones: self.meta.get_bitmap(TOMBSTONES)?.len(),
            segments: manifest.segments.len(),
            total_rows: manifest.total_rows(),
            dims: manifest.dims,
            cached_readers: self.caches.readers.len(),
            cached_csr_bytes: self.caches.csr.bytes(),
        })
    }

    /// Rewrite all live rows into one fresh segment, dropping tombstoned
    /// rows, stripping them from every bitmap and reconciling DF stats.
    pub fn compact(&self) -> Result<()> {
        self.check_writable()?;
        let _writer = self.writer.lock();
        let _lock = IndexLock::acquire(&self.dir, self.config.lock_timeout())?;

        let old_manifest = Manifest::load(&self.dir)?;
        let tombstones = self.meta.get_bitmap(TOMBSTONES)?;
        let alive = self.meta.get_bitmap(ALIVE)?;

        let mut segment = SegmentWriter::new();
        let mut docs: Vec<DocRecord> = Vec::new();
        let name = old_manifest.next_segment_name();
        for record in &old_manifest.segments {
            let reader = self.caches.readers.get_or_open(&record.name)?;
            for row in 0..reader.row_count() {
                let doc_id = reader.doc_id_at(row)?;
                if !alive.contains(doc_id) {
                    continue;
                }
                let (indices, weights) = reader.row_slice(row)?;
                let vector = SparseVector::new(
                    indices.iter().map(|&i| i as u32).collect(),
                    weights.to_vec(),
                );
                let Some(existing) = self.meta.get_doc(doc_id)? else {
                    return Err(RecollexError::Corruption(format!(
                        "alive doc {doc_id} has no docs row"
                    )));
                };
                docs.push(DocRecord {
                    doc_id,
                    segment_id: name.clone(),
                    row_offset: segment.row_count() as u32,
                    seq: existing.seq,
                    text: existing.text,
                    tags: existing.tags,
                });
                segment.push_row(doc_id, &vector);
            }
        }

        let dropped: Vec<u64> = tombstones.iter().collect();
        let rows = segment.row_count();
        let mut manifest = Manifest::empty();
        manifest.dims = old_manifest.dims;
        if rows > 0 {
            segment.publish(&self.segments_dir, &name)?;
            manifest.push_segment(name.clone(), rows);
        }
        manifest.store(&self.dir)?;

        let term_names = self.meta.bitmap_names("term:")?;
        let tag_names = self.meta.bitmap_names("tag:")?;
        self.meta.with_txn(|txn| {
            txn.put_docs(&docs)?;
            txn.delete_docs(&dropped)?;
            for bitmap_name in term_names.iter().chain(tag_names.iter()) {
                txn.remove_from(bitmap_name, &tombstones)?;
            }
            txn.delete_stats_with_prefix("term_df:")?;
            for bitmap_name in &term_names {
                if let Some(term) = bitmap_name.strip_prefix("term:") {
                    if let Ok(term) = term.parse::<u32>() {
                        let cardinality = txn.get_bitmap(bitmap_name)?.len();
                        txn.set_stat(&df_key(term), cardinality as i64)?;
                    }
                }
            }
            txn.put_bitmap(TOMBSTONES, bitmap::empty())?;
            txn.put_bitmap(ALIVE, (*alive).clone())
        })?;

        // Old segment directories become orphans; the next open removes
        // them, which keeps in-flight readers on the old snapshot valid
        self.caches.clear();
        self.manifest.store(manifest);
        info!(
            kept = rows,
            dropped = dropped.len(),
            segment = %name,
            "compacted index"
        );
        Ok(())
    }

    fn resolve_dims(&self) -> Result<u32> {
        let dims = self.dims();
        if dims == 0 {
            return Err(RecollexError::Validation(
                "vector dims unknown; configure an encoder or set dims".to_string(),
            ));
        }
        Ok(dims)
    }

    /// Resolve candidate doc_ids to per-segment row partitions via the
    /// docs table, preserving ascending row order within each segment.
    /// The query's manifest snapshot bounds which segments are read.
    fn partition(
        &self,
        candidates: &DocSet,
        manifest: &Manifest,
    ) -> Result<(Vec<SegmentCandidates>, HashMap<u64, DocRecord>)> {
        let ids: Vec<u64> = candidates.iter().collect();
        let records = self.meta.get_docs(&ids)?;

        let mut by_segment: BTreeMap<String, Vec<(u32, u64, i64)>> = BTreeMap::new();
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            // A segment can be newer than this query's snapshot only when a
            // concurrent compaction moved the row; the vector is unchanged,
            // so reading it through the current manifest stays exact
            if manifest.segment(&record.segment_id).is_none()
                && self.manifest.snapshot().segment(&record.segment_id).is_none()
            {
                return Err(RecollexError::Corruption(format!(
                    "docs row for {} references segment {} absent from the manifest",
                    record.doc_id, record.segment_id
                )));
            }
            by_segment.entry(record.segment_id.clone()).or_default().push((
                record.row_offset,
                record.doc_id,
                record.seq,
            ));
            map.insert(record.doc_id, record);
        }

        let partitions = by_segment
            .into_iter()
            .map(|(segment_id, mut rows)| {
                rows.sort_by_key(|&(row, _, _)| row);
                SegmentCandidates { segment_id, rows }
            })
            .collect();
        Ok((partitions, map))
    }

    fn score_partitions(
        &self,
        partitions: &[SegmentCandidates],
        q_terms: &[QueryTerm],
        term_handle: &dyn Fn(u32) -> Result<Arc<DocSet>>,
    ) -> Result<Vec<Hit>> {
        let query = QueryVector::from_terms(q_terms);
        let mut hits = Vec::new();
        for part in partitions {
            let reader = self.caches.readers.get_or_open(&part.segment_id)?;
            let csr = self.caches.csr.get_or_materialize(&reader)?;
            let scores = crate::query::scorer::score_segment(
                &csr,
                part,
                &query,
                self.config.kernel_threshold,
                term_handle,
            )?;
            for (&(row, doc_id, seq), (scored_row, score)) in part.rows.iter().zip(scores) {
                debug_assert_eq!(row, scored_row);
                if reader.doc_id_at(row)? != doc_id {
                    return Err(RecollexError::Corruption(format!(
                        "docs row for {doc_id} points at row {row} of {} which holds a different doc",
                        part.segment_id
                    )));
                }
                hits.push(Hit {
                    doc_id,
                    segment_id: part.segment_id.clone(),
                    row_offset: row,
                    seq,
                    score,
                });
            }
        }
        Ok(hits)
    }

    fn filter_min_score(&self, hits: Vec<Hit>, min_score: Option<f32>) -> Vec<Hit> {
        match min_score {
            Some(min) => hits.into_iter().filter(|h| h.score >= min).collect(),
            None => hits,
        }
    }

    fn hydrate(
        &self,
        hits: Vec<Hit>,
        records: &HashMap<u64, DocRecord>,
    ) -> Result<Vec<SearchResult>> {
        hits.into_iter()
            .map(|hit| {
                let record = records.get(&hit.doc_id).ok_or_else(|| {
                    RecollexError::Corruption(format!("candidate {} has no docs row", hit.doc_id))
                })?;
                Ok(SearchResult {
                    doc_id: hit.doc_id.to_string(),
                    segment_id: hit.segment_id,
                    row_offset: hit.row_offset,
                    score: hit.score,
                    seq: hit.seq,
                    text: record.text.clone(),
                    tags: tags::from_json(record.tags.as_deref())?,
                })
            })
            .collect()
    }
}
