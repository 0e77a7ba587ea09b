//! Cosine similarity: the canonical metric between an embedded query and a candidate memory.

#[derive(Debug, thiserror::Error)]
pub enum SimilarityError {
    #[error("embedding dimension mismatch: {a} vs {b}")]
    DimensionMismatch { a: usize, b: usize },
}

/// `(a·b) / (‖a‖‖b‖)`. Returns `Ok(0.0)` (never `NaN`) when either vector has zero norm.
/// A dimension mismatch fails the call rather than silently scoring "no overlap" — it
/// signals a real misconfiguration (e.g. an embedder swap mid-corpus), not an absent match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch { a: a.len(), b: b.len() });
    }
    if a.is_empty() {
        return Ok(0.0);
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let v = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_vector_scores_zero_not_nan() {
        let zero = [0.0, 0.0, 0.0];
        let other = [1.0, 2.0, 3.0];
        let s = cosine_similarity(&zero, &other).unwrap();
        assert_eq!(s, 0.0);
        assert!(!s.is_nan());
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn mismatched_dimensions_fails_the_call() {
        let a = [1.0, 2.0];
        let b = [1.0, 2.0, 3.0];
        let err = cosine_similarity(&a, &b).unwrap_err();
        assert!(matches!(err, SimilarityError::DimensionMismatch { a: 2, b: 3 }));
    }
}
