//! Scheduled reconciliation and decay sweep.
//!
//! A low-priority background task that periodically, for every user active in
//! the last 24 hours:
//! 1. **Drift repair** - recomputes each current period's entry statistics
//!    from the stored source entries and overwrites any record that has
//!    drifted (missed deliveries, partial updates).
//! 2. **Health trends** - regenerates the current week's health metric
//!    summaries, trends against the previous week, and mood correlations.
//! 3. **Coverage decay** - multiplies all domain weights by the elapsed-time
//!    decay factor and renormalizes, at most once per hour per user.
//! 4. **Entity refresh** - re-derives entity recency scores and prunes
//!    entities unmentioned for 90 days, writing only when something moved.
//!
//! Sweeps for the same user never overlap: an in-flight map skips users whose
//! previous sweep is still running. Each user is an error boundary; a failing
//! sub-step logs, skips the user, and leaves the rest of the sweep intact.

use crate::calendar::{month_range, period_key, quarter_range, week_range, year_range, Cadence, PeriodRange};
use crate::config::InsightsConfig;
use crate::decay::recency_weight;
use crate::error::Result;
use crate::model::{AnalyzedEntry, HealthPeriod, HealthSample, MetricTrend, MoodCorrelation, PeriodStats};
use crate::stats::{aggregate, classify_trend, pearson_correlation, Direction};
use crate::store::{AggregateStore, TxnOutcome};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// The health metrics carried per entry, with their aggregate field names.
const HEALTH_METRICS: [(&str, fn(&HealthSample) -> Option<f64>); 3] = [
    ("sleep_quality", |s| s.sleep_quality),
    ("hrv", |s| s.hrv),
    ("recovery", |s| s.recovery),
];

/// Counters for one full sweep, logged at completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub users_considered: usize,
    pub users_swept: usize,
    pub users_skipped_inactive: usize,
    pub users_skipped_in_flight: usize,
    pub users_failed: usize,
    pub drift_repairs: usize,
    pub decays_applied: usize,
    pub entities_pruned: usize,
}

pub struct ReconciliationJob {
    store: Arc<AggregateStore>,
    config: InsightsConfig,
    in_flight: DashMap<String, ()>,
}

impl ReconciliationJob {
    pub fn new(store: Arc<AggregateStore>, config: InsightsConfig) -> Self {
        Self {
            store,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &InsightsConfig {
        &self.config
    }

    /// One full sweep over all recently-active users.
    pub fn run_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let lookback = Duration::from_std(self.config.sweep_lookback)
            .unwrap_or_else(|_| Duration::hours(24));

        for (user_id, coverage) in self.store.coverage_users()? {
            report.users_considered += 1;
            if now - coverage.last_updated > lookback {
                report.users_skipped_inactive += 1;
                continue;
            }
            if self.in_flight.insert(user_id.clone(), ()).is_some() {
                debug!(
                    target: "lumen::reconciler",
                    user = %user_id,
                    "previous sweep still running, skipping"
                );
                report.users_skipped_in_flight += 1;
                continue;
            }
            let outcome = self.reconcile_user(&user_id, now, &mut report);
            self.in_flight.remove(&user_id);
            match outcome {
                Ok(()) => report.users_swept += 1,
                Err(e) => {
                    report.users_failed += 1;
                    warn!(
                        target: "lumen::reconciler",
                        user = %user_id,
                        error = %e,
                        "user reconciliation failed, deferring to next sweep"
                    );
                }
            }
        }
        Ok(report)
    }

    fn reconcile_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        report.drift_repairs += self.repair_entry_stats(user_id, now)?;
        self.rebuild_health_trends(user_id, now)?;
        if self.apply_decay(user_id, now)? {
            report.decays_applied += 1;
        }
        report.entities_pruned += self.refresh_entities(user_id, now)?;
        Ok(())
    }

    // -- drift repair ------------------------------------------------------

    fn cadence_range(now: DateTime<Utc>, cadence: Cadence) -> PeriodRange {
        match cadence {
            Cadence::Weekly => week_range(now),
            Cadence::Monthly => month_range(now),
            Cadence::Quarterly => quarter_range(now),
            Cadence::Annual => year_range(now),
        }
    }

    /// Recomputes each current period from the stored source entries and
    /// overwrites stored records that have drifted. Returns the number of
    /// periods repaired.
    fn repair_entry_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let stored = self.store.get_entry_stats(user_id)?.unwrap_or_default();
        let mut repaired = 0;

        for cadence in Cadence::ALL {
            let range = Self::cadence_range(now, cadence);
            let key = period_key(now, cadence);
            let entries = self.store.entries_in_range(user_id, range.start, range.end)?;

            let mut recomputed = PeriodStats::default();
            for entry in entries.iter().filter(|e| e.analysis_complete) {
                recomputed.apply_entry(entry);
            }

            let current = stored.periods.get(&key).cloned().unwrap_or_default();
            if !current.drifted_from(&recomputed, self.config.mood_sum_tolerance) {
                continue;
            }
            warn!(
                target: "lumen::reconciler",
                user = %user_id,
                period = %key,
                stored_count = current.entry_count,
                recomputed_count = recomputed.entry_count,
                "period statistics drifted, overwriting"
            );
            let key_for_write = key.clone();
            self.store.update_entry_stats(user_id, |stats| {
                stats
                    .periods
                    .insert(key_for_write.clone(), recomputed.clone());
            })?;
            repaired += 1;
        }
        Ok(repaired)
    }

    // -- health trends -----------------------------------------------------

    /// Regenerates the current week's health period from source entries.
    /// The whole period record is replaced; it is never updated in place.
    fn rebuild_health_trends(&self, user_id: &str, now: DateTime<Utc>) -> Result<()> {
        let range = week_range(now);
        let key = period_key(now, Cadence::Weekly);
        let previous_key = period_key(now - Duration::days(7), Cadence::Weekly);

        let entries: Vec<AnalyzedEntry> = self
            .store
            .entries_in_range(user_id, range.start, range.end)?
            .into_iter()
            .filter(|e| e.analysis_complete)
            .collect();
        let sampled: Vec<&AnalyzedEntry> =
            entries.iter().filter(|e| e.health.is_some()).collect();
        if sampled.is_empty() {
            return Ok(());
        }

        let previous = self
            .store
            .get_health(user_id)?
            .unwrap_or_default()
            .periods
            .get(&previous_key)
            .cloned();

        let mut period = HealthPeriod::default();
        for (metric, extract) in HEALTH_METRICS {
            let values: Vec<f64> = sampled
                .iter()
                .filter_map(|e| e.health.as_ref().and_then(extract))
                .collect();
            if values.is_empty() {
                continue;
            }
            let summary = aggregate(&values);
            let prev_mean = previous
                .as_ref()
                .and_then(|p| Self::metric_of(p, metric))
                .map(|t| t.summary.mean);
            let trend = MetricTrend {
                summary,
                data_points: values.len() as u64,
                trend: prev_mean.map(|prev| classify_trend(summary.mean, prev)),
            };
            match metric {
                "sleep_quality" => period.sleep_quality = Some(trend),
                "hrv" => period.hrv = Some(trend),
                _ => period.recovery = Some(trend),
            }

            // Mood correlation over entries carrying both values.
            let pairs: Vec<(f64, f64)> = sampled
                .iter()
                .filter_map(|e| {
                    let mood = e.mood_score?;
                    let value = e.health.as_ref().and_then(extract)?;
                    Some((mood, value))
                })
                .collect();
            if pairs.len() < self.config.min_correlation_samples {
                continue;
            }
            let moods: Vec<f64> = pairs.iter().map(|p| p.0).collect();
            let values: Vec<f64> = pairs.iter().map(|p| p.1).collect();
            if let Some(correlation) = pearson_correlation(&moods, &values) {
                period.mood_correlations.push(MoodCorrelation {
                    metric: metric.to_string(),
                    correlation,
                    direction: Direction::of(correlation),
                    sample_size: pairs.len(),
                });
            }
        }

        self.store.update_health(user_id, |agg| {
            agg.periods.insert(key.clone(), period.clone());
        })?;
        Ok(())
    }

    fn metric_of<'a>(period: &'a HealthPeriod, metric: &str) -> Option<&'a MetricTrend> {
        match metric {
            "sleep_quality" => period.sleep_quality.as_ref(),
            "hrv" => period.hrv.as_ref(),
            _ => period.recovery.as_ref(),
        }
    }

    // -- coverage decay ----------------------------------------------------

    /// Applies elapsed-time decay to the user's domain weights, at most once
    /// per `min_decay_interval`. Returns whether decay ran.
    ///
    /// `last_updated` is deliberately left alone: decay is housekeeping, not
    /// activity, and must not keep an idle user inside the sweep window.
    fn apply_decay(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let min_interval =
            Duration::from_std(self.config.min_decay_interval).unwrap_or_else(|_| Duration::hours(1));
        let half_life = self.config.half_life_days;
        let cap = self.config.processed_id_cap;

        self.store.with_coverage(user_id, |mut agg| {
            let anchor = agg.last_decayed.unwrap_or(agg.last_updated);
            let elapsed = now - anchor;
            if elapsed < min_interval {
                return TxnOutcome::Skip(false);
            }
            let days = (now.timestamp_millis() - anchor.timestamp_millis()) as f64 / MILLIS_PER_DAY;
            let factor = recency_weight(days, half_life);
            agg.decay(factor);
            agg.renormalize();
            if agg.processed_entry_ids.len() > cap {
                let overflow = agg.processed_entry_ids.len() - cap;
                agg.processed_entry_ids.drain(..overflow);
            }
            agg.last_decayed = Some(now);
            TxnOutcome::Commit(agg, true)
        })
    }

    // -- entity refresh ----------------------------------------------------

    /// Re-derives every entity's recency score from its last mention and
    /// prunes entities stale beyond the configured window. The document is
    /// rewritten only when a score moved past the write epsilon or something
    /// was pruned. Returns the number of entities pruned.
    fn refresh_entities(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let Some(mut agg) = self.store.get_entities(user_id)? else {
            return Ok(0);
        };
        let stale_cutoff = now - Duration::days(self.config.entity_stale_days);
        let before = agg.entities.len();
        agg.entities.retain(|_, e| e.last_mention >= stale_cutoff);
        let pruned = before - agg.entities.len();

        let mut moved = false;
        for entity in agg.entities.values_mut() {
            let days = (now.timestamp_millis() - entity.last_mention.timestamp_millis()) as f64
                / MILLIS_PER_DAY;
            let score = recency_weight(days, self.config.half_life_days);
            if (score - entity.recency_score).abs() > self.config.recency_write_epsilon {
                entity.recency_score = score;
                moved = true;
            }
        }

        if pruned > 0 || moved {
            self.store.put_entities(user_id, &agg)?;
            if pruned > 0 {
                debug!(
                    target: "lumen::reconciler",
                    user = %user_id,
                    pruned,
                    "pruned stale entities"
                );
            }
        }
        Ok(pruned)
    }
}

/// Spawns the reconciliation sweep as a background `tokio::spawn` task at the
/// configured interval. Returns the join handle for graceful shutdown.
pub fn init_reconciliation_loop(job: Arc<ReconciliationJob>) -> tokio::task::JoinHandle<()> {
    let interval = job.config().sweep_interval;
    info!(
        target: "lumen::reconciler",
        interval_secs = interval.as_secs(),
        lookback_secs = job.config().sweep_lookback.as_secs(),
        "reconciliation loop initialized"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut cycle: u64 = 0;
        loop {
            ticker.tick().await;
            cycle += 1;
            match job.run_sweep(Utc::now()) {
                Ok(report) => {
                    info!(
                        target: "lumen::reconciler",
                        cycle,
                        considered = report.users_considered,
                        swept = report.users_swept,
                        failed = report.users_failed,
                        drift_repairs = report.drift_repairs,
                        decays = report.decays_applied,
                        entities_pruned = report.entities_pruned,
                        "sweep complete"
                    );
                }
                Err(e) => {
                    warn!(target: "lumen::reconciler", cycle, error = %e, "sweep failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryEntity, EntryTag};
    use crate::stats::Trend;
    use crate::updater::IncrementalUpdater;
    use chrono::TimeZone;

    fn setup() -> (
        tempfile::TempDir,
        Arc<AggregateStore>,
        IncrementalUpdater,
        ReconciliationJob,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(AggregateStore::open_path(dir.path()).unwrap());
        let config = InsightsConfig::default();
        let updater = IncrementalUpdater::new(store.clone(), config.clone());
        let job = ReconciliationJob::new(store.clone(), config);
        (dir, store, updater, job)
    }

    fn entry(id: &str, at: DateTime<Utc>) -> AnalyzedEntry {
        AnalyzedEntry {
            id: id.to_string(),
            user_id: "u1".to_string(),
            created_at: at,
            mood_score: Some(0.5),
            category: "reflection".to_string(),
            entry_type: "text".to_string(),
            analysis_complete: true,
            entities: Vec::new(),
            tags: vec![EntryTag {
                tag_type: "activity".to_string(),
                content: Some("gym".to_string()),
                category: None,
            }],
            health: None,
        }
    }

    fn now() -> DateTime<Utc> {
        // A Wednesday; the ISO week is 2026-02-16 .. 2026-02-22.
        Utc.with_ymd_and_hms(2026, 2, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_consistent_stats_are_left_alone() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        updater.process_entry(&entry("e1", t), t).unwrap();
        updater.process_entry(&entry("e2", t), t).unwrap();

        let before = store.get_entry_stats("u1").unwrap().unwrap();
        let report = job.run_sweep(t).unwrap();
        assert_eq!(report.drift_repairs, 0);
        assert_eq!(report.users_swept, 1);

        let after = store.get_entry_stats("u1").unwrap().unwrap();
        assert_eq!(
            before.periods["weekly-2026-02-16"],
            after.periods["weekly-2026-02-16"]
        );
    }

    #[test]
    fn test_drifted_period_is_overwritten() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        updater.process_entry(&entry("e1", t), t).unwrap();
        updater.process_entry(&entry("e2", t), t).unwrap();

        // Tamper with the stored weekly record.
        store
            .update_entry_stats("u1", |stats| {
                let weekly = stats.periods.get_mut("weekly-2026-02-16").unwrap();
                weekly.entry_count = 99;
                weekly.mood_sum += 5.0;
            })
            .unwrap();

        let report = job.run_sweep(t).unwrap();
        assert!(report.drift_repairs >= 1);

        let repaired = store.get_entry_stats("u1").unwrap().unwrap();
        let weekly = &repaired.periods["weekly-2026-02-16"];
        assert_eq!(weekly.entry_count, 2);
        assert!((weekly.mood_sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_incomplete_entries_excluded_from_recomputation() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        updater.process_entry(&entry("e1", t), t).unwrap();
        let mut pending = entry("e2", t);
        pending.analysis_complete = false;
        store.put_entry(&pending).unwrap();

        let report = job.run_sweep(t).unwrap();
        assert_eq!(report.drift_repairs, 0);
        let stats = store.get_entry_stats("u1").unwrap().unwrap();
        assert_eq!(stats.periods["weekly-2026-02-16"].entry_count, 1);
    }

    #[test]
    fn test_inactive_user_is_skipped() {
        let (_dir, _store, updater, job) = setup();
        let t = now();
        updater.process_entry(&entry("e1", t), t).unwrap();

        let later = t + Duration::days(3);
        let report = job.run_sweep(later).unwrap();
        assert_eq!(report.users_skipped_inactive, 1);
        assert_eq!(report.users_swept, 0);
    }

    #[test]
    fn test_decay_reduces_weights_and_respects_min_interval() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        updater.process_entry(&entry("e1", t), t).unwrap();
        let before = store.get_coverage("u1").unwrap().unwrap();
        let weight_before = before.raw_weight(crate::domains::LifeDomain::Health);

        // Two hours later: past the one hour gate, inside the 24h lookback.
        let sweep_time = t + Duration::hours(2);
        let report = job.run_sweep(sweep_time).unwrap();
        assert_eq!(report.decays_applied, 1);

        let after = store.get_coverage("u1").unwrap().unwrap();
        let weight_after = after.raw_weight(crate::domains::LifeDomain::Health);
        assert!(weight_after < weight_before);
        assert!(weight_after > 0.0);
        assert_eq!(after.last_decayed, Some(sweep_time));
        // Activity timestamp untouched by housekeeping.
        assert_eq!(after.last_updated, t);

        // Immediate re-sweep: the decay gate holds.
        let report = job.run_sweep(sweep_time + Duration::minutes(5)).unwrap();
        assert_eq!(report.decays_applied, 0);
    }

    #[test]
    fn test_decay_keeps_scores_normalized() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        updater.process_entry(&entry("e1", t), t).unwrap();
        let mut social = entry("e2", t);
        social.tags = vec![EntryTag {
            tag_type: "person".to_string(),
            content: Some("Alex".to_string()),
            category: None,
        }];
        updater.process_entry(&social, t).unwrap();

        job.run_sweep(t + Duration::hours(2)).unwrap();
        let coverage = store.get_coverage("u1").unwrap().unwrap();
        let sum: f64 = coverage.domains.values().map(|e| e.normalized_score).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_entities_pruned_and_fresh_scores_refreshed() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        let mut old = entry("e-old", t - Duration::days(120));
        old.entities = vec![EntryEntity {
            id: None,
            name: "Old Project".to_string(),
            category: Some("project".to_string()),
        }];
        let mut fresh = entry("e-new", t - Duration::days(3));
        fresh.entities = vec![EntryEntity {
            id: None,
            name: "Alex".to_string(),
            category: Some("friend".to_string()),
        }];
        // Process as of their creation so recency scores start stale.
        updater.process_entry(&old, t - Duration::days(120)).unwrap();
        updater.process_entry(&fresh, t - Duration::days(3)).unwrap();
        // Keep the user inside the lookback window.
        store
            .with_coverage("u1", |mut agg| {
                agg.last_updated = t;
                TxnOutcome::Commit(agg, ())
            })
            .unwrap();

        let report = job.run_sweep(t).unwrap();
        assert_eq!(report.entities_pruned, 1);

        let entities = store.get_entities("u1").unwrap().unwrap();
        assert!(!entities.entities.contains_key("old-project"));
        let alex = &entities.entities["alex"];
        let expected = recency_weight(3.0, 14.0);
        assert!((alex.recency_score - expected).abs() < 0.02);
    }

    #[test]
    fn test_health_trends_rebuilt_with_correlations() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        for (i, (mood, sleep)) in [(0.3, 0.4), (0.5, 0.6), (0.8, 0.9), (0.6, 0.7)]
            .iter()
            .enumerate()
        {
            let mut e = entry(&format!("e{}", i), t - Duration::hours(i as i64));
            e.mood_score = Some(*mood);
            e.health = Some(HealthSample {
                sleep_quality: Some(*sleep),
                hrv: None,
                recovery: None,
            });
            updater.process_entry(&e, t).unwrap();
        }

        job.run_sweep(t).unwrap();
        let health = store.get_health("u1").unwrap().unwrap();
        let week = &health.periods["weekly-2026-02-16"];
        let sleep = week.sleep_quality.as_ref().unwrap();
        assert_eq!(sleep.data_points, 4);
        assert!(sleep.summary.min <= sleep.summary.mean);
        assert!(sleep.trend.is_none(), "no previous week means no trend");

        let corr = &week.mood_correlations[0];
        assert_eq!(corr.metric, "sleep_quality");
        assert!(corr.correlation > 0.9);
        assert_eq!(corr.direction, Direction::Positive);
        assert_eq!(corr.sample_size, 4);
    }

    #[test]
    fn test_health_trend_compares_against_previous_week() {
        let (_dir, store, updater, job) = setup();
        let t = now();
        let last_week = t - Duration::days(7);

        for (i, sleep) in [0.4, 0.4, 0.4].iter().enumerate() {
            let mut e = entry(&format!("prev{}", i), last_week - Duration::hours(i as i64));
            e.health = Some(HealthSample {
                sleep_quality: Some(*sleep),
                hrv: None,
                recovery: None,
            });
            updater.process_entry(&e, last_week).unwrap();
        }
        // Build last week's period record first.
        job.run_sweep(last_week).unwrap();

        for (i, sleep) in [0.8, 0.8, 0.8].iter().enumerate() {
            let mut e = entry(&format!("cur{}", i), t - Duration::hours(i as i64));
            e.health = Some(HealthSample {
                sleep_quality: Some(*sleep),
                hrv: None,
                recovery: None,
            });
            updater.process_entry(&e, t).unwrap();
        }
        job.run_sweep(t).unwrap();

        let health = store.get_health("u1").unwrap().unwrap();
        let week = &health.periods["weekly-2026-02-16"];
        assert_eq!(
            week.sleep_quality.as_ref().unwrap().trend,
            Some(Trend::Improving)
        );
    }
}
