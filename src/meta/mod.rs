//! Metadata persistence: docs table, bitmap table, stats, kv

pub mod cache;
pub mod store;

pub use cache::BitmapCache;
pub use store::{df_key, term_bitmap, DocRecord, MetaStore, MetaTxn};
pub use store::{ALIVE, KV_NEXT_DOC_ID, KV_NEXT_SEQ, TOMBSTONES};

/// Metadata database file name under the index root
pub const META_FILE: &str = "meta.sqlite";
