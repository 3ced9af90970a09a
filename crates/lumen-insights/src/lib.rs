//! lumen-insights: behavioral analytics for a personal journaling service.
//!
//! Fully analyzed journal entries arrive one at a time and are folded into
//! per-user aggregate documents: life-domain coverage with exponential decay,
//! period-keyed entry statistics, entity mention activity, and weekly health
//! trends. A scheduled sweep repairs drift against the stored source entries,
//! applies time decay, and prunes stale state so every document stays bounded
//! no matter how long a user journals.

pub mod calendar;
pub mod config;
pub mod decay;
pub mod domains;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod stats;
pub mod store;
pub mod updater;

pub use calendar::{
    month_range, period_key, period_start, quarter_range, week_range, year_range, Cadence,
    PeriodRange,
};
pub use config::InsightsConfig;
pub use decay::{recency_weight, DEFAULT_HALF_LIFE_DAYS};
pub use domains::{map_tag_to_domain, LifeDomain};
pub use error::{InsightsError, Result};
pub use model::{
    AnalyzedEntry, CoverageAggregate, DomainEvidence, EntityActivity, EntityActivityAggregate,
    EntryEntity, EntryStatsAggregate, EntryTag, HealthPeriod, HealthSample, HealthTrendsAggregate,
    MetricTrend, MoodCorrelation, PeriodStats,
};
pub use reconciler::{init_reconciliation_loop, ReconciliationJob, SweepReport};
pub use stats::{
    aggregate, classify_trend, pearson_correlation, Direction, MetricSummary, Trend,
    MIN_CORRELATION_SAMPLES,
};
pub use store::{AggregateStore, TxnOutcome};
pub use updater::{IncrementalUpdater, UpdateOutcome, UpdateSummary};
