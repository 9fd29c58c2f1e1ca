//! Bitmap codec and set algebra over 64-bit document ids
//!
//! Bitmaps are stored in the metadata store as opaque byte strings in the
//! Roaring portable format and deserialized on demand. All algebra runs on
//! the compressed representation.

use roaring::RoaringTreemap;

use crate::error::{RecollexError, Result};

/// Set of document ids
pub type DocSet = RoaringTreemap;

/// Create an empty document set
pub fn empty() -> DocSet {
    RoaringTreemap::new()
}

/// Create a set holding a single document id
pub fn of_one(doc_id: u64) -> DocSet {
    let mut set = RoaringTreemap::new();
    set.insert(doc_id);
    set
}

/// Collect an iterator of ids into a set
pub fn of_iter<I: IntoIterator<Item = u64>>(ids: I) -> DocSet {
    ids.into_iter().collect()
}

/// Union of two sets
pub fn union(a: &DocSet, b: &DocSet) -> DocSet {
    a | b
}

/// Intersection of two sets
pub fn intersect(a: &DocSet, b: &DocSet) -> DocSet {
    a & b
}

/// Difference `a - b`
pub fn difference(a: &DocSet, b: &DocSet) -> DocSet {
    a - b
}

/// Remove every id in `b` from `a` in place
pub fn and_not_into(a: &mut DocSet, b: &DocSet) {
    *a -= b;
}

/// Serialize into the Roaring portable format
pub fn serialize(set: &DocSet) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(set.serialized_size());
    // Writing into a Vec cannot fail
    set.serialize_into(&mut bytes)
        .expect("serialize into Vec is infallible");
    bytes
}

/// Deserialize from the Roaring portable format
pub fn deserialize(bytes: &[u8]) -> Result<DocSet> {
    RoaringTreemap::deserialize_from(bytes)
        .map_err(|e| RecollexError::Corruption(format!("bitmap deserialization failed: {e}")))
}

/// First `cap` ids in ascending order, as a new set
pub fn truncate(set: &DocSet, cap: u64) -> DocSet {
    if set.len() <= cap {
        return set.clone();
    }
    set.iter().take(cap as usize).collect()
}
