//! Exponential recency weighting.
//!
//! Evidence in the coverage aggregate fades with a configurable half-life:
//! an entry written today carries weight 1.0, one written a half-life ago
//! carries 0.5, two half-lives ago 0.25, and so on. The same curve doubles
//! as the decay factor applied to accumulated weights by the reconciliation
//! job and as the entity recency score.

/// Default evidence half-life, in days.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 14.0;

/// Returns `0.5 ^ (days_ago / half_life_days)`.
///
/// Negative `days_ago` (clock skew on just-created entries) is clamped to 0,
/// so the result is always in `(0.0, 1.0]` for a positive half-life.
pub fn recency_weight(days_ago: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    let days = days_ago.max(0.0);
    0.5_f64.powf(days / half_life_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_points() {
        assert_eq!(recency_weight(0.0, DEFAULT_HALF_LIFE_DAYS), 1.0);
        assert!((recency_weight(14.0, DEFAULT_HALF_LIFE_DAYS) - 0.5).abs() < 1e-12);
        assert!((recency_weight(28.0, DEFAULT_HALF_LIFE_DAYS) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_monotonically_decreasing() {
        let mut prev = recency_weight(0.0, DEFAULT_HALF_LIFE_DAYS);
        for d in 1..120 {
            let w = recency_weight(d as f64, DEFAULT_HALF_LIFE_DAYS);
            assert!(w < prev, "weight must strictly decrease (day {})", d);
            assert!(w > 0.0);
            prev = w;
        }
    }

    #[test]
    fn test_negative_days_clamped() {
        assert_eq!(recency_weight(-3.5, DEFAULT_HALF_LIFE_DAYS), 1.0);
    }

    #[test]
    fn test_custom_half_life() {
        assert!((recency_weight(7.0, 7.0) - 0.5).abs() < 1e-12);
    }
}
