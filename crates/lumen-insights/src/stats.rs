//! Statistical utilities: arithmetic aggregation, Pearson correlation with a
//! minimum-sample guard, and threshold-based trend classification.

use serde::{Deserialize, Serialize};

/// Mean/min/max summary of a metric series. Empty input yields all zeros.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Aggregates a series into `{mean, min, max}`; all zeros when empty.
pub fn aggregate(values: &[f64]) -> MetricSummary {
    if values.is_empty() {
        return MetricSummary::default();
    }
    let sum: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    MetricSummary {
        mean: sum / values.len() as f64,
        min,
        max,
    }
}

/// Minimum paired samples before a correlation is reported.
pub const MIN_CORRELATION_SAMPLES: usize = 3;

/// Product-moment correlation of two paired series.
///
/// Returns `None` when fewer than [`MIN_CORRELATION_SAMPLES`] pairs exist or
/// when either series has zero variance. The result is clamped to `[-1, 1]`
/// to absorb floating-point drift on perfectly linear inputs.
pub fn pearson_correlation(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < MIN_CORRELATION_SAMPLES {
        return None;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];
    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some((cov / denom).clamp(-1.0, 1.0))
}

/// Direction of a mood/metric correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn of(correlation: f64) -> Self {
        if correlation >= 0.0 {
            Direction::Positive
        } else {
            Direction::Negative
        }
    }
}

/// Trend of a period mean relative to the preceding period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// Classifies `current` against `previous` with a threshold of 5% of
/// `|previous|`. A zero previous value degenerates to a zero threshold, so
/// any positive diff is improving and any negative diff declining.
pub fn classify_trend(current: f64, previous: f64) -> Trend {
    let diff = current - previous;
    let threshold = previous.abs() * 0.05;
    if diff > threshold {
        Trend::Improving
    } else if diff < -threshold {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_zeros() {
        let s = aggregate(&[]);
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.min, 0.0);
        assert_eq!(s.max, 0.0);
    }

    #[test]
    fn test_aggregate_basic() {
        let s = aggregate(&[2.0, 4.0, 6.0]);
        assert_eq!(s.mean, 4.0);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 6.0);
    }

    #[test]
    fn test_correlation_minimum_samples() {
        assert_eq!(pearson_correlation(&[1.0, 2.0], &[1.0, 2.0]), None);
    }

    #[test]
    fn test_correlation_zero_variance() {
        assert_eq!(pearson_correlation(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]), None);
    }

    #[test]
    fn test_correlation_perfectly_linear() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x + 1.0).collect();
        let r = pearson_correlation(&xs, &ys).unwrap();
        assert!((r - 1.0).abs() < 1e-12);

        let inverse: Vec<f64> = xs.iter().map(|x| -3.0 * x).collect();
        let r = pearson_correlation(&xs, &inverse).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_correlation_in_unit_interval() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        let ys = [2.0, 1.0, 4.0, 3.0, 5.0];
        let r = pearson_correlation(&xs, &ys).unwrap();
        assert!((-1.0..=1.0).contains(&r));
    }

    #[test]
    fn test_trend_thresholds() {
        assert_eq!(classify_trend(1.06, 1.0), Trend::Improving);
        assert_eq!(classify_trend(0.94, 1.0), Trend::Declining);
        assert_eq!(classify_trend(1.04, 1.0), Trend::Stable);
        assert_eq!(classify_trend(0.96, 1.0), Trend::Stable);
    }

    #[test]
    fn test_trend_zero_previous() {
        assert_eq!(classify_trend(0.001, 0.0), Trend::Improving);
        assert_eq!(classify_trend(-0.001, 0.0), Trend::Declining);
        assert_eq!(classify_trend(0.0, 0.0), Trend::Stable);
    }

    #[test]
    fn test_trend_negative_previous() {
        // Threshold uses |previous|.
        assert_eq!(classify_trend(-0.8, -1.0), Trend::Improving);
        assert_eq!(classify_trend(-1.2, -1.0), Trend::Declining);
    }

    #[test]
    fn test_direction() {
        assert_eq!(Direction::of(0.4), Direction::Positive);
        assert_eq!(Direction::of(-0.4), Direction::Negative);
    }
}
