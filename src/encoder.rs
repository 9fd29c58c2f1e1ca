//! Encoder collaborator contract
//!
//! The neural encoder lives outside this crate; the engine only sees the
//! sparse `(indices, weights)` vectors it produces. Term ids must be
//! strictly ascending and below the encoder's vocabulary size.

use crate::error::{RecollexError, Result};

/// A sparse term-weighted vector
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub weights: Vec<f32>,
}

impl SparseVector {
    pub fn new(indices: Vec<u32>, weights: Vec<f32>) -> Self {
        Self { indices, weights }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Check the encoder contract: parallel arrays, strictly ascending
    /// term ids below `dims`, non-negative finite weights
    pub fn validate(&self, dims: u32) -> Result<()> {
        if self.indices.len() != self.weights.len() {
            return Err(RecollexError::Validation(format!(
                "indices/weights length mismatch: {} vs {}",
                self.indices.len(),
                self.weights.len()
            )));
        }
        let mut prev: Option<u32> = None;
        for &idx in &self.indices {
            if idx >= dims {
                return Err(RecollexError::Validation(format!(
                    "term id {idx} >= dims {dims}"
                )));
            }
            if let Some(p) = prev {
                if idx <= p {
                    return Err(RecollexError::Validation(format!(
                        "term ids not strictly ascending at {idx}"
                    )));
                }
            }
            prev = Some(idx);
        }
        for &w in &self.weights {
            if !w.is_finite() || w < 0.0 {
                return Err(RecollexError::Validation(format!(
                    "term weight {w} is not a non-negative finite value"
                )));
            }
        }
        Ok(())
    }
}

/// External text encoder producing sparse term vectors
pub trait TermEncoder: Send + Sync {
    /// Tokenizer vocabulary size; stamped into the manifest on first write
    fn dims(&self) -> u32;

    /// Encode a batch of texts into sparse vectors
    fn encode(&self, texts: &[&str]) -> Result<Vec<SparseVector>>;

    /// Encode a single text
    fn encode_one(&self, text: &str) -> Result<SparseVector> {
        let mut batch = self.encode(&[text])?;
        batch.pop().ok_or_else(|| {
            RecollexError::Validation("encoder returned an empty batch".to_string())
        })
    }
}
