//! Engine configuration.
//!
//! Every tunable the math and housekeeping depend on (half-life, ID caps,
//! staleness window, sweep cadence) is an explicit field injected at
//! construction rather than a hidden module constant, so tests can vary them.
//! `Default` reads `LUMEN_*` environment overrides the same way the daemon's
//! tick rate does.

use crate::decay::DEFAULT_HALF_LIFE_DAYS;
use crate::stats::MIN_CORRELATION_SAMPLES;
use std::time::Duration;

/// Default reconciliation sweep interval: 1 hour.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Default look-back window for the sweep's active-user filter: 24 hours.
const DEFAULT_SWEEP_LOOKBACK_SECS: u64 = 86_400;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct InsightsConfig {
    /// Evidence half-life in days for recency weighting and coverage decay.
    pub half_life_days: f64,
    /// Cap on the global idempotency ID list per user (oldest evicted first).
    pub processed_id_cap: usize,
    /// Cap on each domain's contributing-entry ID list.
    pub contributing_id_cap: usize,
    /// Entities unmentioned for longer than this many days are pruned.
    pub entity_stale_days: i64,
    /// Users whose coverage was last updated within this window are swept.
    pub sweep_lookback: Duration,
    /// Minimum elapsed time before coverage decay is applied again.
    pub min_decay_interval: Duration,
    /// Entity recency scores are rewritten only when they moved by more than
    /// this amount (reduces write volume).
    pub recency_write_epsilon: f64,
    /// Mood-sum drift beyond this tolerance triggers a wholesale overwrite of
    /// the stored period record.
    pub mood_sum_tolerance: f64,
    /// Minimum paired samples before a mood correlation is reported.
    pub min_correlation_samples: usize,
    /// Interval between scheduled reconciliation sweeps.
    pub sweep_interval: Duration,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        let sweep_secs = env_u64("LUMEN_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS).max(60);
        Self {
            half_life_days: env_f64("LUMEN_HALF_LIFE_DAYS", DEFAULT_HALF_LIFE_DAYS),
            processed_id_cap: env_u64("LUMEN_PROCESSED_ID_CAP", 100) as usize,
            contributing_id_cap: env_u64("LUMEN_CONTRIBUTING_ID_CAP", 100) as usize,
            entity_stale_days: env_u64("LUMEN_ENTITY_STALE_DAYS", 90) as i64,
            sweep_lookback: Duration::from_secs(env_u64(
                "LUMEN_SWEEP_LOOKBACK_SECS",
                DEFAULT_SWEEP_LOOKBACK_SECS,
            )),
            min_decay_interval: Duration::from_secs(3600),
            recency_write_epsilon: 0.01,
            mood_sum_tolerance: 0.001,
            min_correlation_samples: MIN_CORRELATION_SAMPLES,
            sweep_interval: Duration::from_secs(sweep_secs),
        }
    }
}
