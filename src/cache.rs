//! Segment-level caches
//!
//! Two process-local LRUs sit above the storage layer: a count-capped
//! cache of open segment readers (mmaps plus the doc_id → row hash) and a
//! count- and byte-capped cache of fully materialized CSR matrices for hot
//! segments. Either cache can be disabled by sizing it to zero, in which
//! case every access loads fresh.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::segment::{SegmentCsr, SegmentReader};

pub struct SegmentReaderCache {
    inner: Option<Mutex<LruCache<String, Arc<SegmentReader>>>>,
    segments_dir: PathBuf,
}

impl SegmentReaderCache {
    pub fn new(segments_dir: PathBuf, entries: usize) -> Self {
        let inner = NonZeroUsize::new(entries).map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            inner,
            segments_dir,
        }
    }

    pub fn get_or_open(&self, name: &str) -> Result<Arc<SegmentReader>> {
        if let Some(inner) = &self.inner {
            if let Some(reader) = inner.lock().get(name) {
                return Ok(Arc::clone(reader));
            }
        }
        let reader = Arc::new(SegmentReader::open(&self.segments_dir, name)?);
        if let Some(inner) = &self.inner {
            inner.lock().put(name.to_string(), Arc::clone(&reader));
        }
        Ok(reader)
    }

    pub fn invalidate(&self, name: &str) {
        if let Some(inner) = &self.inner {
            inner.lock().pop(name);
        }
    }

    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|i| i.lock().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CsrCacheInner {
    lru: LruCache<String, Arc<SegmentCsr>>,
    bytes: usize,
}

pub struct CsrCache {
    inner: Option<Mutex<CsrCacheInner>>,
    byte_cap: usize,
}

impl CsrCache {
    pub fn new(entries: usize, byte_cap: usize) -> Self {
        let inner = NonZeroUsize::new(entries).map(|cap| {
            Mutex::new(CsrCacheInner {
                lru: LruCache::new(cap),
                bytes: 0,
            })
        });
        Self { inner, byte_cap }
    }

    /// Fetch the materialized CSR for a segment, loading through `reader`
    /// on a miss. Evicts by entry count first, then down to the byte cap.
    pub fn get_or_materialize(&self, reader: &SegmentReader) -> Result<Arc<SegmentCsr>> {
        if let Some(inner) = &self.inner {
            if let Some(csr) = inner.lock().lru.get(reader.name()) {
                return Ok(Arc::clone(csr));
            }
        }
        let csr = Arc::new(reader.materialize()?);
        if let Some(inner) = &self.inner {
            let mut guard = inner.lock();
            guard.bytes += csr.bytes();
            if let Some((_, old)) = guard.lru.push(reader.name().to_string(), Arc::clone(&csr)) {
                guard.bytes = guard.bytes.saturating_sub(old.bytes());
            }
            while guard.bytes > self.byte_cap {
                match guard.lru.pop_lru() {
                    Some((_, old)) => guard.bytes = guard.bytes.saturating_sub(old.bytes()),
                    None => break,
                }
            }
        }
        Ok(csr)
    }

    pub fn invalidate(&self, name: &str) {
        if let Some(inner) = &self.inner {
            let mut guard = inner.lock();
            if let Some(old) = guard.lru.pop(name) {
                guard.bytes = guard.bytes.saturating_sub(old.bytes());
            }
        }
    }

    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            let mut guard = inner.lock();
            guard.lru.clear();
            guard.bytes = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map(|i| i.lock().lru.len()).unwrap_or(0)
    }

    pub fn bytes(&self) -> usize {
        self.inner.as_ref().map(|i| i.lock().bytes).unwrap_or(0)
    }
}

/// Both segment-level caches, built from one config
pub struct SegmentCaches {
    pub readers: SegmentReaderCache,
    pub csr: CsrCache,
}

impl SegmentCaches {
    pub fn new(segments_dir: &Path, config: &CacheConfig) -> Self {
        Self {
            readers: SegmentReaderCache::new(segments_dir.to_path_buf(), config.segment_readers),
            csr: CsrCache::new(config.csr_entries, config.csr_bytes),
        }
    }

    /// Drop every cached handle for a segment (after compaction)
    pub fn invalidate(&self, name: &str) {
        self.readers.invalidate(name);
        self.csr.invalidate(name);
    }

    pub fn clear(&self) {
        self.readers.clear();
        self.csr.clear();
    }
}
