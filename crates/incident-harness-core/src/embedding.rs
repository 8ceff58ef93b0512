//! Vector utilities.
//!
//! Pure helpers for storing embedding vectors as BLOBs, comparing them, and
//! enforcing the single configured dimension. The embedder itself is an
//! external collaborator; see [`Embedder`](crate::providers::Embedder).

use crate::error::Error;

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use incident_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let sim = similarity_f64(a, b);
    if sim.is_nan() {
        0.0
    } else {
        sim as f32
    }
}

/// Sums run in f64 so large components cannot overflow the norms. NaN
/// when a component is not finite.
fn similarity_f64(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() {
        return f64::NAN;
    }
    if denom < f64::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Cosine distance, `1 - similarity`, in `[0.0, 2.0]`. Lower is closer.
///
/// A non-finite result (NaN or infinite components) ranks as farthest.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let distance = 1.0 - similarity_f64(a, b);
    if distance.is_finite() {
        distance
    } else {
        2.0
    }
}

/// Reject a vector whose length is not the configured dimension.
pub fn check_dims(vector: &[f32], dims: usize) -> Result<(), Error> {
    if vector.len() != dims {
        return Err(Error::DimensionMismatch {
            expected: dims,
            actual: vector.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_components_keep_a_finite_distance() {
        let a = [1e30f32, 0.0, 0.0];
        let b = [2e30f32, 0.0, 0.0];
        let d = cosine_distance(&a, &b);
        assert!(d.is_finite());
        assert!(d.abs() < 1e-9);
        assert_eq!(cosine_distance(&a, &[0.0, 3e30, 0.0]), 1.0);
    }

    #[test]
    fn nan_components_rank_farthest() {
        assert_eq!(cosine_distance(&[f32::NAN, 1.0], &[1.0, 1.0]), 2.0);
        assert_eq!(cosine_distance(&[f32::INFINITY, 1.0], &[1.0, 1.0]), 2.0);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_check_dims() {
        assert!(check_dims(&[0.1, 0.2, 0.3], 3).is_ok());
        match check_dims(&[0.1, 0.2], 3) {
            Err(Error::DimensionMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (3, 2));
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }
}
