//! Crash-safety scenarios: the write protocol orders segment rename,
//! manifest rename, then the metadata commit, so a kill at any point must
//! leave either the pre-flush state (orphans swept on reopen) or the full
//! post-flush state.

use std::sync::Arc;

use tempfile::TempDir;

use recollex::encoder::SparseVector;
use recollex::segment::{SegmentWriter, SEGMENTS_DIR};
use recollex::{
    OpenOptions, Recollex, RecollexConfig, RecollexError, Result, SearchRequest, TermEncoder,
};

struct StubEncoder;

impl TermEncoder for StubEncoder {
    fn dims(&self) -> u32 {
        64
    }

    fn encode(&self, texts: &[&str]) -> Result<Vec<SparseVector>> {
        texts
            .iter()
            .map(|text| {
                Ok(match *text {
                    "alpha beta" => SparseVector::new(vec![10, 20], vec![0.5, 0.7]),
                    "gamma" => SparseVector::new(vec![30], vec![0.9]),
                    _ => SparseVector::new(vec![], vec![]),
                })
            })
            .collect()
    }
}

const NO_TAGS: [&str; 0] = [];

fn options() -> OpenOptions {
    OpenOptions::new()
        .with_config(RecollexConfig::default().with_lock_timeout_ms(2_000))
        .with_encoder(Arc::new(StubEncoder))
}

#[test]
fn killed_between_segment_and_manifest_rename() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("idx");

    {
        let index = Recollex::open_with(&path, options()).unwrap();
        index.add("alpha beta", ["t:a"]).unwrap();

        // Simulate the crash window for a second flush: the segment
        // directory was renamed into place, but neither the manifest nor
        // the metadata commit happened.
        let mut writer = SegmentWriter::new();
        writer.push_row(2, &SparseVector::new(vec![30], vec![0.9]));
        writer
            .publish(&path.join(SEGMENTS_DIR), "seg_001")
            .unwrap();
    }

    let index = Recollex::open_with(&path, options()).unwrap();
    assert!(!index.is_read_only());

    // The orphan was swept and doc 2 never became visible
    assert!(!path.join(SEGMENTS_DIR).join("seg_001").exists());
    assert!(index.search("gamma", &SearchRequest::new(10)).unwrap().is_empty());

    // Re-adding succeeds and gets a fresh doc_id
    let id = index.add("gamma", ["t:a"]).unwrap();
    assert_eq!(id, 2);
    let results = index.search("gamma", &SearchRequest::new(10)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].doc_id, "2");
}

#[test]
fn killed_before_tmp_rename_leaves_stale_tmp() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("idx");

    {
        let index = Recollex::open_with(&path, options()).unwrap();
        index.add("alpha beta", NO_TAGS).unwrap();
    }

    // A crash mid-write leaves a half-written tmp directory behind
    let stale = path.join(SEGMENTS_DIR).join("seg_001.tmp");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("indptr"), b"partial").unwrap();

    let index = Recollex::open_with(&path, options()).unwrap();
    assert!(!stale.exists());
    assert!(!index.is_read_only());
    assert_eq!(index.last(10).unwrap().len(), 1);
}

#[test]
fn killed_between_manifest_rename_and_metadata_commit() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("idx");

    {
        let index = Recollex::open_with(&path, options()).unwrap();
        index.add("alpha beta", ["t:a"]).unwrap();

        // Segment and manifest both landed, metadata commit did not: write
        // the segment and splice it into the manifest by hand.
        let mut writer = SegmentWriter::new();
        writer.push_row(2, &SparseVector::new(vec![30], vec![0.9]));
        writer
            .publish(&path.join(SEGMENTS_DIR), "seg_001")
            .unwrap();
        let mut manifest = recollex::manifest::Manifest::load(&path).unwrap();
        manifest.push_segment("seg_001".to_string(), 1);
        manifest.store(&path).unwrap();
    }

    let index = Recollex::open_with(&path, options()).unwrap();
    assert!(!index.is_read_only());

    // The row exists on disk but no bitmap references it, so it can never
    // become a candidate
    assert!(index.search("gamma", &SearchRequest::new(10)).unwrap().is_empty());
    assert_eq!(index.last(10).unwrap().len(), 1);

    // Compaction reclaims the unreachable row
    index.compact().unwrap();
    let stats = index.stats().unwrap();
    assert_eq!(stats.total_rows, 1);
    assert!(index.search("gamma", &SearchRequest::new(10)).unwrap().is_empty());
}

#[test]
fn missing_referenced_segment_degrades_to_read_only() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("idx");

    {
        let index = Recollex::open_with(&path, options()).unwrap();
        index.add("alpha beta", ["t:a"]).unwrap();
    }

    std::fs::remove_dir_all(path.join(SEGMENTS_DIR).join("seg_000")).unwrap();

    let index = Recollex::open_with(&path, options()).unwrap();
    assert!(index.is_read_only());

    let err = index.add("gamma", ["t:a"]).unwrap_err();
    assert!(matches!(err, RecollexError::ReadOnly(_)));
    let err = index.remove(&[1]).unwrap_err();
    assert!(matches!(err, RecollexError::ReadOnly(_)));
    let err = index.compact().unwrap_err();
    assert!(matches!(err, RecollexError::ReadOnly(_)));
}

#[test]
fn writer_contention_times_out_loudly() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("idx");
    let index = Recollex::open_with(&path, options()).unwrap();
    index.add("alpha beta", NO_TAGS).unwrap();

    // A foreign writer holds the lock; our flush must fail, not hang
    let _foreign = recollex::lock::IndexLock::acquire(
        &path,
        std::time::Duration::from_millis(100),
    )
    .unwrap();

    let fast = OpenOptions::new()
        .with_config(RecollexConfig::default().with_lock_timeout_ms(150))
        .with_encoder(Arc::new(StubEncoder) as Arc<dyn TermEncoder>);
    let contender = Recollex::open_with(&path, fast).unwrap();
    let err = contender.add("gamma", NO_TAGS).unwrap_err();
    assert!(matches!(err, RecollexError::LockTimeout { .. }));

    // Reads are unaffected by writer lock contention
    assert_eq!(contender.last(10).unwrap().len(), 1);
}
