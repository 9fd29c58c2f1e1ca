//! Persistent metadata store
//!
//! A single SQLite database (`meta.sqlite`) holds the docs table, the
//! bitmap table (term postings, tags, tombstones, alive set), integer
//! stats, and a small kv table for the doc_id/seq counters. All mutations
//! happen inside explicit transactions; the bitmap LRU is updated only
//! after a successful commit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use super::cache::BitmapCache;
use crate::bitmap::{self, DocSet};
use crate::error::{RecollexError, Result};

/// Bitmap holding every live (non-compacted) doc_id
pub const ALIVE: &str = "alive";
/// Bitmap holding logically deleted doc_ids
pub const TOMBSTONES: &str = "tombstones";

pub const KV_NEXT_DOC_ID: &str = "next_doc_id";
pub const KV_NEXT_SEQ: &str = "next_seq";

/// Bitmap name for a term's posting list
pub fn term_bitmap(term: u32) -> String {
    format!("term:{term}")
}

/// Stats key for a term's document frequency
pub fn df_key(term: u32) -> String {
    format!("term_df:{term}")
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS docs (
    doc_id     TEXT PRIMARY KEY,
    segment_id TEXT NOT NULL,
    row_offset INTEGER NOT NULL,
    seq        INTEGER NOT NULL,
    text       TEXT,
    tags       TEXT
);
CREATE INDEX IF NOT EXISTS idx_docs_segment_row ON docs(segment_id, row_offset);
CREATE INDEX IF NOT EXISTS idx_docs_seq ON docs(seq);
CREATE TABLE IF NOT EXISTS bitmaps (
    name      TEXT PRIMARY KEY,
    data      BLOB NOT NULL,
    last_used INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS stats (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// One docs-table row
#[derive(Clone, Debug, PartialEq)]
pub struct DocRecord {
    pub doc_id: u64,
    pub segment_id: String,
    pub row_offset: u32,
    pub seq: i64,
    pub text: Option<String>,
    pub tags: Option<String>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn row_to_doc(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocRecord> {
    let doc_id: String = row.get(0)?;
    let doc_id = doc_id.parse::<u64>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(DocRecord {
        doc_id,
        segment_id: row.get(1)?,
        row_offset: row.get::<_, i64>(2)? as u32,
        seq: row.get(3)?,
        text: row.get(4)?,
        tags: row.get(5)?,
    })
}

pub struct MetaStore {
    conn: Mutex<Connection>,
    cache: BitmapCache,
}

impl MetaStore {
    /// Open (creating if missing) the metadata database
    pub fn open(path: &Path, bitmap_cache_entries: usize) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cache: BitmapCache::new(bitmap_cache_entries),
        })
    }

    /// Fetch a bitmap; absent names are the empty set
    pub fn get_bitmap(&self, name: &str) -> Result<Arc<DocSet>> {
        if let Some(set) = self.cache.get(name) {
            return Ok(set);
        }
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row("SELECT data FROM bitmaps WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        let set = match blob {
            Some(bytes) => {
                conn.execute(
                    "UPDATE bitmaps SET last_used = ?1 WHERE name = ?2",
                    rusqlite::params![now_secs(), name],
                )?;
                Arc::new(bitmap::deserialize(&bytes)?)
            }
            None => Arc::new(bitmap::empty()),
        };
        self.cache.put(name, Arc::clone(&set));
        Ok(set)
    }

    /// Document frequency of a term: the maintained stat, falling back to
    /// the cardinality of the term's posting bitmap
    pub fn term_df(&self, term: u32) -> Result<u64> {
        if let Some(v) = self.get_stat(&df_key(term))? {
            return Ok(v.max(0) as u64);
        }
        Ok(self.get_bitmap(&term_bitmap(term))?.len())
    }

    pub fn get_stat(&self, key: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row("SELECT value FROM stats WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn get_kv(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn get_doc(&self, doc_id: u64) -> Result<Option<DocRecord>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT doc_id, segment_id, row_offset, seq, text, tags FROM docs WHERE doc_id = ?1",
                [doc_id.to_string()],
                row_to_doc,
            )
            .optional()?)
    }

    pub fn has_doc(&self, doc_id: u64) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM docs WHERE doc_id = ?1",
                [doc_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Batched lookup; missing ids are silently absent from the result
    pub fn get_docs(&self, ids: &[u64]) -> Result<Vec<DocRecord>> {
        let conn = self.conn.lock();
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(256) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT doc_id, segment_id, row_offset, seq, text, tags \
                 FROM docs WHERE doc_id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(chunk.iter().map(|id| id.to_string())),
                row_to_doc,
            )?;
            for row in rows {
                out.push(row?);
            }
        }
        Ok(out)
    }

    pub fn doc_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM docs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Names of all stored bitmaps with the given prefix
    pub fn bitmap_names(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name FROM bitmaps WHERE name LIKE ?1 || '%' ORDER BY name")?;
        let rows = stmt.query_map([prefix], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn bitmap_cache(&self) -> &BitmapCache {
        &self.cache
    }

    /// Run `f` inside one transaction. On success the transaction commits
    /// and staged bitmap updates land in the LRU; on error everything
    /// rolls back and the cache is untouched.
    pub fn with_txn<T>(&self, f: impl FnOnce(&MetaTxn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let txn = MetaTxn {
            tx: &tx,
            cache: &self.cache,
            staged: RefCell::new(HashMap::new()),
        };
        match f(&txn) {
            Ok(value) => {
                let staged = txn.staged.take();
                drop(txn);
                tx.commit()?;
                for (name, set) in staged {
                    self.cache.put(&name, set);
                }
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }
}

/// Transactional view over the metadata store
pub struct MetaTxn<'a> {
    tx: &'a rusqlite::Transaction<'a>,
    cache: &'a BitmapCache,
    /// Bitmaps written in this transaction, applied to the LRU on commit
    staged: RefCell<HashMap<String, Arc<DocSet>>>,
}

impl MetaTxn<'_> {
    /// Read a bitmap as seen by this transaction
    pub fn get_bitmap(&self, name: &str) -> Result<Arc<DocSet>> {
        if let Some(set) = self.staged.borrow().get(name) {
            return Ok(Arc::clone(set));
        }
        if let Some(set) = self.cache.get(name) {
            return Ok(set);
        }
        let blob: Option<Vec<u8>> = self
            .tx
            .query_row("SELECT data FROM bitmaps WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        match blob {
            Some(bytes) => Ok(Arc::new(bitmap::deserialize(&bytes)?)),
            None => Ok(Arc::new(bitmap::empty())),
        }
    }

    pub fn put_bitmap(&self, name: &str, set: DocSet) -> Result<()> {
        let bytes = bitmap::serialize(&set);
        self.tx.execute(
            "INSERT INTO bitmaps(name, data, last_used) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET data = excluded.data, last_used = excluded.last_used",
            rusqlite::params![name, bytes, now_secs()],
        )?;
        self.staged
            .borrow_mut()
            .insert(name.to_string(), Arc::new(set));
        Ok(())
    }

    /// Union `delta` into the named bitmap
    pub fn union_into(&self, name: &str, delta: &DocSet) -> Result<()> {
        let current = self.get_bitmap(name)?;
        self.put_bitmap(name, &*current | delta)
    }

    /// Remove every id in `delta` from the named bitmap
    pub fn remove_from(&self, name: &str, delta: &DocSet) -> Result<()> {
        let current = self.get_bitmap(name)?;
        self.put_bitmap(name, &*current - delta)
    }

    pub fn put_docs(&self, docs: &[DocRecord]) -> Result<()> {
        let mut stmt = self.tx.prepare_cached(
            "INSERT OR REPLACE INTO docs(doc_id, segment_id, row_offset, seq, text, tags) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for doc in docs {
            stmt.execute(rusqlite::params![
                doc.doc_id.to_string(),
                doc.segment_id,
                doc.row_offset as i64,
                doc.seq,
                doc.text,
                doc.tags,
            ])?;
        }
        Ok(())
    }

    pub fn delete_docs(&self, ids: &[u64]) -> Result<()> {
        let mut stmt = self
            .tx
            .prepare_cached("DELETE FROM docs WHERE doc_id = ?1")?;
        for id in ids {
            stmt.execute([id.to_string()])?;
        }
        Ok(())
    }

    pub fn incr_stat(&self, key: &str, delta: i64) -> Result<()> {
        self.tx.execute(
            "INSERT INTO stats(key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
            rusqlite::params![key, delta],
        )?;
        Ok(())
    }

    pub fn set_stat(&self, key: &str, value: i64) -> Result<()> {
        self.tx.execute(
            "INSERT INTO stats(key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_stats_with_prefix(&self, prefix: &str) -> Result<()> {
        self.tx
            .execute("DELETE FROM stats WHERE key LIKE ?1 || '%'", [prefix])?;
        Ok(())
    }

    pub fn set_kv(&self, key: &str, value: &str) -> Result<()> {
        self.tx.execute(
            "INSERT INTO kv(key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(&dir.path().join("meta.sqlite"), 16).unwrap();
        (dir, store)
    }

    fn doc(doc_id: u64, segment: &str, row: u32, seq: i64) -> DocRecord {
        DocRecord {
            doc_id,
            segment_id: segment.to_string(),
            row_offset: row,
            seq,
            text: Some(format!("text {doc_id}")),
            tags: None,
        }
    }

    #[test]
    fn test_missing_bitmap_is_empty() {
        let (_dir, store) = open_store();
        assert!(store.get_bitmap("tag:nope").unwrap().is_empty());
    }

    #[test]
    fn test_bitmap_commit_and_cache() {
        let (_dir, store) = open_store();
        store
            .with_txn(|txn| {
                txn.union_into("term:10", &bitmap::of_iter([1u64, 3]))?;
                txn.union_into("term:10", &bitmap::of_one(5))
            })
            .unwrap();

        let set = store.get_bitmap("term:10").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3, 5]);

        store
            .with_txn(|txn| txn.remove_from("term:10", &bitmap::of_one(3)))
            .unwrap();
        let set = store.get_bitmap("term:10").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 5]);
    }

    #[test]
    fn test_rollback_leaves_no_trace() {
        let (_dir, store) = open_store();
        let result: Result<()> = store.with_txn(|txn| {
            txn.union_into("term:7", &bitmap::of_one(1))?;
            txn.put_docs(&[doc(1, "seg_000", 0, 1)])?;
            Err(RecollexError::Validation("boom".into()))
        });
        assert!(result.is_err());

        assert!(store.get_bitmap("term:7").unwrap().is_empty());
        assert!(store.get_doc(1).unwrap().is_none());
    }

    #[test]
    fn test_docs_roundtrip_and_batch() {
        let (_dir, store) = open_store();
        store
            .with_txn(|txn| {
                txn.put_docs(&[
                    doc(1, "seg_000", 0, 1),
                    doc(2, "seg_000", 1, 2),
                    doc(3, "seg_001", 0, 3),
                ])
            })
            .unwrap();

        assert!(store.has_doc(2).unwrap());
        assert_eq!(store.doc_count().unwrap(), 3);

        let got = store.get_doc(3).unwrap().unwrap();
        assert_eq!(got.segment_id, "seg_001");
        assert_eq!(got.row_offset, 0);

        let batch = store.get_docs(&[1, 3, 99]).unwrap();
        assert_eq!(batch.len(), 2);

        store.with_txn(|txn| txn.delete_docs(&[1])).unwrap();
        assert!(!store.has_doc(1).unwrap());
    }

    #[test]
    fn test_stats_and_df_fallback() {
        let (_dir, store) = open_store();
        store
            .with_txn(|txn| {
                txn.union_into(&term_bitmap(9), &bitmap::of_iter([1u64, 2, 3]))?;
                txn.incr_stat(&df_key(5), 2)?;
                txn.incr_stat(&df_key(5), 1)
            })
            .unwrap();

        // Maintained stat wins
        assert_eq!(store.term_df(5).unwrap(), 3);
        // Missing stat falls back to posting cardinality
        assert_eq!(store.term_df(9).unwrap(), 3);
        // Unknown term
        assert_eq!(store.term_df(1234).unwrap(), 0);
    }

    #[test]
    fn test_kv_counters() {
        let (_dir, store) = open_store();
        assert!(store.get_kv(KV_NEXT_DOC_ID).unwrap().is_none());
        store
            .with_txn(|txn| {
                txn.set_kv(KV_NEXT_DOC_ID, "4")?;
                txn.set_kv(KV_NEXT_SEQ, "4")
            })
            .unwrap();
        assert_eq!(store.get_kv(KV_NEXT_DOC_ID).unwrap().unwrap(), "4");
    }

    #[test]
    fn test_bitmap_names_prefix() {
        let (_dir, store) = open_store();
        store
            .with_txn(|txn| {
                txn.put_bitmap("term:1", bitmap::of_one(1))?;
                txn.put_bitmap("term:2", bitmap::of_one(1))?;
                txn.put_bitmap("tag:a", bitmap::of_one(1))
            })
            .unwrap();
        assert_eq!(store.bitmap_names("term:").unwrap(), vec!["term:1", "term:2"]);
        assert_eq!(store.bitmap_names("tag:").unwrap(), vec!["tag:a"]);
    }
}
