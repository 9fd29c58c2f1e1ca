use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::encoder::TermEncoder;

/// Cache sizing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum deserialized bitmaps kept in memory
    pub bitmap_entries: usize,
    /// Maximum open segment readers (0 disables the cache)
    pub segment_readers: usize,
    /// Maximum materialized CSR matrices (0 disables the cache)
    pub csr_entries: usize,
    /// Byte cap across all cached CSR matrices
    pub csr_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bitmap_entries: 256,
            segment_readers: 64,
            csr_entries: 128,
            csr_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecollexConfig {
    /// Cache sizing
    pub caches: CacheConfig,
    /// Manifest lock acquisition timeout
    pub lock_timeout_ms: u64,
    /// Candidate-count threshold below which the accumulator scoring
    /// kernel is used instead of the slice kernel
    pub kernel_threshold: usize,
    /// Vector dimensionality; required when no encoder is configured and
    /// the index is empty, otherwise taken from the manifest/encoder
    pub dims: Option<u32>,
}

impl Default for RecollexConfig {
    fn default() -> Self {
        Self {
            caches: CacheConfig::default(),
            lock_timeout_ms: 30_000,
            kernel_threshold: 64,
            dims: None,
        }
    }
}

impl RecollexConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    pub fn with_dims(mut self, dims: u32) -> Self {
        self.dims = Some(dims);
        self
    }

    pub fn with_caches(mut self, caches: CacheConfig) -> Self {
        self.caches = caches;
        self
    }
}

/// Options passed to [`crate::Recollex::open`]
#[derive(Clone, Default)]
pub struct OpenOptions {
    pub config: RecollexConfig,
    /// External encoder collaborator; text-based calls fail without one
    pub encoder: Option<Arc<dyn TermEncoder>>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RecollexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn TermEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }
}

impl std::fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOptions")
            .field("config", &self.config)
            .field("encoder", &self.encoder.as_ref().map(|e| e.dims()))
            .finish()
    }
}
