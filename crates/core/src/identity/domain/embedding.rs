//! Vector math over face embeddings.
//!
//! Embeddings are stored as `f32` (the model's output precision); sums and
//! dot products accumulate in `f64` so long evidence lists don't drift.

use thiserror::Error;

/// Fixed-dimension face embedding as produced by the embedding model.
pub type Embedding = Vec<f32>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    #[error("no embeddings to summarize")]
    NoEvidence,
    #[error("mean embedding has zero norm")]
    ZeroNorm,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt()
}

/// Scales `v` to unit length in place. A zero vector is left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (*x as f64 / norm) as f32;
        }
    }
}

/// Cosine similarity in `[-1, 1]`. Zero-norm inputs compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, ComputationError> {
    if a.len() != b.len() {
        return Err(ComputationError::DimensionMismatch {
            expected: b.len(),
            actual: a.len(),
        });
    }
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return Ok(0.0);
    }
    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();
    Ok((dot / denom).clamp(-1.0, 1.0))
}

/// Element-wise mean of `embeddings`, scaled to unit L2 norm.
pub fn normalized_mean(embeddings: &[Embedding]) -> Result<Embedding, ComputationError> {
    let first = embeddings.first().ok_or(ComputationError::NoEvidence)?;
    let dim = first.len();

    let mut sum = vec![0.0f64; dim];
    for e in embeddings {
        if e.len() != dim {
            return Err(ComputationError::DimensionMismatch {
                expected: dim,
                actual: e.len(),
            });
        }
        for (acc, x) in sum.iter_mut().zip(e.iter()) {
            *acc += *x as f64;
        }
    }

    let count = embeddings.len() as f64;
    let norm = sum.iter().map(|s| (s / count) * (s / count)).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(ComputationError::ZeroNorm);
    }
    Ok(sum.iter().map(|s| (s / count / norm) as f32).collect())
}
