//! Aggregate documents and the analyzed-entry input shape.
//!
//! All aggregates are scoped per user; a user's documents are the unit of
//! isolation. Unbounded event history is compressed into capped, amortized
//! state: ordered ID lists are capped with oldest-first eviction, weights are
//! decayable scalars, and period maps hold one compact record per period key.

use crate::domains::LifeDomain;
use crate::stats::{Direction, MetricSummary, Trend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Upstream input: the analyzed entry
// ---------------------------------------------------------------------------

/// A semantic tag produced by the upstream analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryTag {
    /// Tag kind: `person`, `activity`, `goal`, or anything else (ignored).
    #[serde(rename = "type")]
    pub tag_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// An entity mentioned in an entry (person, place, project, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryEntity {
    /// Stable id when the pipeline resolved one; otherwise the name is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl EntryEntity {
    /// Sanitized identifier: the resolved id when present, else the name,
    /// stripped of anything that could read as a path separator.
    pub fn effective_id(&self) -> String {
        sanitize_entity_id(self.id.as_deref().unwrap_or(&self.name))
    }
}

/// Health metrics attached to an entry by a wearable sync or manual log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HealthSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<f64>,
}

fn default_true() -> bool {
    true
}

/// A fully analyzed journal entry as delivered by the upstream pipeline.
/// `id` must be stable and globally unique; it is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedEntry {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_score: Option<f64>,
    pub category: String,
    pub entry_type: String,
    /// Reconciliation only trusts entries whose analysis completed.
    #[serde(default = "default_true")]
    pub analysis_complete: bool,
    #[serde(default)]
    pub entities: Vec<EntryEntity>,
    #[serde(default)]
    pub tags: Vec<EntryTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSample>,
}

/// Lowercases and replaces every character that is not alphanumeric, `-`, or
/// `_` with `-`, so the result can never be read as a nested document path.
pub fn sanitize_entity_id(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Appends `id` to an ordered list, evicting from the front once `cap` is
/// exceeded.
pub fn push_capped(ids: &mut Vec<String>, id: String, cap: usize) {
    ids.push(id);
    if ids.len() > cap {
        let overflow = ids.len() - cap;
        ids.drain(..overflow);
    }
}

// ---------------------------------------------------------------------------
// Coverage aggregate
// ---------------------------------------------------------------------------

/// Per-domain evidence: decayable mass plus the capped list of entries that
/// contributed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainEvidence {
    pub raw_weight: f64,
    pub normalized_score: f64,
    #[serde(default)]
    pub contributing_entry_ids: Vec<String>,
}

/// Life-domain coverage for one user. Created lazily on first entry; mutated
/// by the incremental updater and decayed by the reconciliation job; never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageAggregate {
    #[serde(default)]
    pub domains: BTreeMap<LifeDomain, DomainEvidence>,
    /// Global idempotency list, distinct from the per-domain lists.
    #[serde(default)]
    pub processed_entry_ids: Vec<String>,
    pub last_updated: DateTime<Utc>,
    /// When the decay pass last ran. Kept separate from `last_updated` so
    /// hourly decay does not keep an inactive user inside the sweep's
    /// look-back window forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_decayed: Option<DateTime<Utc>>,
}

impl Default for CoverageAggregate {
    fn default() -> Self {
        Self {
            domains: BTreeMap::new(),
            processed_entry_ids: Vec::new(),
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
            last_decayed: None,
        }
    }
}

impl CoverageAggregate {
    pub fn is_processed(&self, entry_id: &str) -> bool {
        self.processed_entry_ids.iter().any(|id| id == entry_id)
    }

    pub fn domain_mut(&mut self, domain: LifeDomain) -> &mut DomainEvidence {
        self.domains.entry(domain).or_default()
    }

    /// Multiplies every domain's raw weight by `factor`.
    pub fn decay(&mut self, factor: f64) {
        for evidence in self.domains.values_mut() {
            evidence.raw_weight *= factor;
        }
    }

    /// Recomputes normalized scores: each raw weight divided by the total,
    /// or all zeros when no evidence exists. Scores sum to 1.0 ± epsilon
    /// whenever any raw weight is positive.
    pub fn renormalize(&mut self) {
        let total: f64 = self.domains.values().map(|e| e.raw_weight).sum();
        for evidence in self.domains.values_mut() {
            evidence.normalized_score = if total > 0.0 {
                evidence.raw_weight / total
            } else {
                0.0
            };
        }
    }

    pub fn normalized_score(&self, domain: LifeDomain) -> f64 {
        self.domains
            .get(&domain)
            .map(|e| e.normalized_score)
            .unwrap_or(0.0)
    }

    pub fn raw_weight(&self, domain: LifeDomain) -> f64 {
        self.domains.get(&domain).map(|e| e.raw_weight).unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Entry statistics aggregate
// ---------------------------------------------------------------------------

/// Additive per-period counters. The mood mean is derived at read time from
/// `mood_sum / mood_count` so concurrent increments stay commutative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodStats {
    pub entry_count: u64,
    pub mood_sum: f64,
    pub mood_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_max: Option<f64>,
    #[serde(default)]
    pub category_breakdown: BTreeMap<String, u64>,
    #[serde(default)]
    pub entry_type_distribution: BTreeMap<String, u64>,
}

impl PeriodStats {
    pub fn mood_mean(&self) -> Option<f64> {
        if self.mood_count > 0 {
            Some(self.mood_sum / self.mood_count as f64)
        } else {
            None
        }
    }

    /// Folds one entry into this period's counters.
    pub fn apply_entry(&mut self, entry: &AnalyzedEntry) {
        self.entry_count += 1;
        if let Some(mood) = entry.mood_score {
            self.mood_sum += mood;
            self.mood_count += 1;
            self.mood_min = Some(self.mood_min.map_or(mood, |m| m.min(mood)));
            self.mood_max = Some(self.mood_max.map_or(mood, |m| m.max(mood)));
        }
        *self
            .category_breakdown
            .entry(entry.category.clone())
            .or_insert(0) += 1;
        *self
            .entry_type_distribution
            .entry(entry.entry_type.clone())
            .or_insert(0) += 1;
    }

    /// Drift check against a from-scratch recomputation: any count mismatch,
    /// or a mood-sum delta beyond `mood_tolerance`, means the stored record
    /// has drifted and must be overwritten wholesale.
    pub fn drifted_from(&self, recomputed: &PeriodStats, mood_tolerance: f64) -> bool {
        self.entry_count != recomputed.entry_count
            || self.mood_count != recomputed.mood_count
            || (self.mood_sum - recomputed.mood_sum).abs() > mood_tolerance
            || self.category_breakdown != recomputed.category_breakdown
            || self.entry_type_distribution != recomputed.entry_type_distribution
    }
}

/// Period-keyed entry statistics for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryStatsAggregate {
    #[serde(default)]
    pub periods: BTreeMap<String, PeriodStats>,
}

// ---------------------------------------------------------------------------
// Entity activity aggregate
// ---------------------------------------------------------------------------

/// Mention activity for one entity. The recency score is re-derived from
/// `last_mention` by every reconciliation pass and may be briefly stale
/// in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityActivity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub mention_count: u64,
    pub last_mention: DateTime<Utc>,
    pub recency_score: f64,
}

/// Entity mention activity for one user, keyed by sanitized entity id.
/// The only aggregate with deletions: stale entities are pruned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityActivityAggregate {
    #[serde(default)]
    pub entities: BTreeMap<String, EntityActivity>,
}

// ---------------------------------------------------------------------------
// Health trends aggregate
// ---------------------------------------------------------------------------

/// Summary and trend for one health metric within a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricTrend {
    #[serde(flatten)]
    pub summary: MetricSummary,
    pub data_points: u64,
    /// Present only when the immediately preceding period had data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
}

/// Correlation between mood and one health metric within a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodCorrelation {
    pub metric: String,
    pub correlation: f64,
    pub direction: Direction,
    pub sample_size: usize,
}

/// Health metrics and mood correlations for one period. Entirely regenerated
/// by the reconciliation job; never incrementally updated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthPeriod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality: Option<MetricTrend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv: Option<MetricTrend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<MetricTrend>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mood_correlations: Vec<MoodCorrelation>,
}

/// Period-keyed health trends for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthTrendsAggregate {
    #[serde(default)]
    pub periods: BTreeMap<String, HealthPeriod>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, mood: Option<f64>, category: &str) -> AnalyzedEntry {
        AnalyzedEntry {
            id: id.to_string(),
            user_id: "u1".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 18, 10, 0, 0).unwrap(),
            mood_score: mood,
            category: category.to_string(),
            entry_type: "text".to_string(),
            analysis_complete: true,
            entities: Vec::new(),
            tags: Vec::new(),
            health: None,
        }
    }

    #[test]
    fn test_sanitize_entity_id() {
        assert_eq!(sanitize_entity_id("Alex Chen"), "alex-chen");
        assert_eq!(sanitize_entity_id("a/b\\c.d#e"), "a-b-c-d-e");
        assert_eq!(sanitize_entity_id("  Mum  "), "mum");
        assert_eq!(sanitize_entity_id("already-clean_1"), "already-clean_1");
    }

    #[test]
    fn test_entity_effective_id_prefers_resolved_id() {
        let e = EntryEntity {
            id: Some("Person/42".to_string()),
            name: "Alex".to_string(),
            category: None,
        };
        assert_eq!(e.effective_id(), "person-42");

        let e = EntryEntity {
            id: None,
            name: "Alex Chen".to_string(),
            category: None,
        };
        assert_eq!(e.effective_id(), "alex-chen");
    }

    #[test]
    fn test_push_capped_evicts_oldest() {
        let mut ids = Vec::new();
        for i in 0..7 {
            push_capped(&mut ids, format!("e{}", i), 5);
        }
        assert_eq!(ids.len(), 5);
        assert_eq!(ids.first().map(String::as_str), Some("e2"));
        assert_eq!(ids.last().map(String::as_str), Some("e6"));
    }

    #[test]
    fn test_renormalize_sums_to_one() {
        let mut agg = CoverageAggregate::default();
        agg.domain_mut(LifeDomain::Health).raw_weight = 1.0;
        agg.domain_mut(LifeDomain::Creativity).raw_weight = 0.25;
        agg.domain_mut(LifeDomain::Work).raw_weight = 0.75;
        agg.renormalize();
        let sum: f64 = agg.domains.values().map(|e| e.normalized_score).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((agg.normalized_score(LifeDomain::Health) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_renormalize_all_zero_when_no_evidence() {
        let mut agg = CoverageAggregate::default();
        agg.domain_mut(LifeDomain::Health).raw_weight = 0.0;
        agg.renormalize();
        assert_eq!(agg.normalized_score(LifeDomain::Health), 0.0);
    }

    #[test]
    fn test_period_stats_mood_invariant() {
        let mut stats = PeriodStats::default();
        stats.apply_entry(&entry("e1", Some(0.8), "reflection"));
        stats.apply_entry(&entry("e2", Some(0.2), "gratitude"));
        stats.apply_entry(&entry("e3", None, "reflection"));

        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.mood_count, 2);
        let mean = stats.mood_mean().unwrap();
        assert!(stats.mood_min.unwrap() <= mean && mean <= stats.mood_max.unwrap());
        assert_eq!(stats.category_breakdown.get("reflection"), Some(&2));
        assert_eq!(stats.entry_type_distribution.get("text"), Some(&3));
    }

    #[test]
    fn test_drift_detection() {
        let mut stored = PeriodStats::default();
        stored.apply_entry(&entry("e1", Some(0.8), "reflection"));
        let recomputed = stored.clone();
        assert!(!stored.drifted_from(&recomputed, 0.001));

        stored.mood_sum += 0.01;
        assert!(stored.drifted_from(&recomputed, 0.001));

        let mut missing_one = recomputed.clone();
        missing_one.entry_count += 1;
        assert!(stored.drifted_from(&missing_one, 0.001));
    }
}
