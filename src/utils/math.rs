//! Math utility functions

/// Squared L2 norm, accumulated in f64
///
/// Squares of any finite f32 neither overflow nor flush to zero in f64.
pub fn squared_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum()
}

/// L2 normalize a vector in place, returns the original norm
pub fn l2_normalize(v: &mut [f32]) -> f64 {
    let norm = squared_norm(v).sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
    norm
}

/// Euclidean distance between two vectors of equal length
///
/// Returns `f32::INFINITY` on a length mismatch so the pair never wins a
/// nearest-neighbour comparison.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Dot product, equal to cosine similarity for unit vectors
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        let norm = l2_normalize(&mut v);
        assert!((norm - 5.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_untouched() {
        let mut v = vec![0.0, 0.0];
        assert_eq!(l2_normalize(&mut v), 0.0);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_l2_normalize_extreme_magnitudes() {
        for scale in [1e20_f32, 1e-23, f32::MAX, f32::MIN_POSITIVE] {
            let mut v = vec![scale, scale];
            let norm = l2_normalize(&mut v);
            assert!(norm > 0.0 && norm.is_finite(), "scale {}", scale);
            assert!((v[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6, "scale {}", scale);
            assert!((v[1] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6, "scale {}", scale);
        }
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = vec![0.6, 0.8];
        assert_eq!(euclidean_distance(&a, &a), 0.0);
    }

    #[test]
    fn test_euclidean_distance_opposite_unit_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((euclidean_distance(&a, &b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_length_mismatch() {
        assert_eq!(euclidean_distance(&[1.0], &[1.0, 0.0]), f32::INFINITY);
    }

    #[test]
    fn test_distance_monotonic_with_cosine() {
        // |a - b|^2 = 2 - 2 cos for unit vectors
        let a = vec![1.0, 0.0];
        let b = vec![0.6, 0.8];
        let d = euclidean_distance(&a, &b);
        assert!((d * d - (2.0 - 2.0 * dot(&a, &b))).abs() < 1e-6);
    }
}
