//! Recollex: a local, embeddable search index for SPLADE-style sparse
//! learned vectors.
//!
//! Documents carry arbitrary tag labels and a monotonic `seq`; their
//! sparse term vectors live in immutable CSR segments on disk. Queries run
//! exact sparse dot-product scoring under Roaring-bitmap tag filtering,
//! with an adaptive MUST/SHOULD term gate keeping candidate sets inside a
//! budget. Text encoding is delegated to an external [`TermEncoder`]
//! collaborator.

pub mod bitmap;
pub mod cache;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod meta;
pub mod query;
pub mod segment;
pub mod tags;

pub use config::{CacheConfig, OpenOptions, RecollexConfig};
pub use encoder::{SparseVector, TermEncoder};
pub use engine::{AddRecord, IndexStats, Recollex, SearchRequest, SearchResult};
pub use error::{RecollexError, Result};
pub use query::{KnobOverrides, Profile, QueryTerm, ScopeFilter};
pub use tags::Tag;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
