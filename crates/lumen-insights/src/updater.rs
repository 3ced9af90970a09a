//! Incremental aggregate updates for newly analyzed entries.
//!
//! One call per delivered entry. The coverage transaction doubles as the
//! idempotency gate: the entry ID is checked against the user's processed
//! list and recorded in the same atomic commit as the domain weights, so a
//! redelivered entry can never double-count. Everything after the gate
//! (entry stats, entity activity, the source-entry copy) is commutative or
//! last-writer-wins and does not need to join the transaction; failures
//! there are logged and left for the reconciliation sweep to repair.

use crate::calendar::{period_key, Cadence};
use crate::config::InsightsConfig;
use crate::decay::recency_weight;
use crate::domains::{map_tag_to_domain, LifeDomain};
use crate::error::Result;
use crate::model::{push_capped, AnalyzedEntry};
use crate::store::{AggregateStore, TxnOutcome};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// What the idempotency gate decided for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First time this entry ID was seen; all aggregates were updated.
    Applied,
    /// Redelivery of an already-processed entry; nothing was touched.
    AlreadyProcessed,
}

#[derive(Debug, Clone)]
pub struct UpdateSummary {
    pub outcome: UpdateOutcome,
    /// Distinct life domains the entry's tags mapped to.
    pub domains_matched: usize,
    /// Entities upserted into the activity aggregate.
    pub entity_count: usize,
}

pub struct IncrementalUpdater {
    store: Arc<AggregateStore>,
    config: InsightsConfig,
}

impl IncrementalUpdater {
    pub fn new(store: Arc<AggregateStore>, config: InsightsConfig) -> Self {
        Self { store, config }
    }

    /// Applies one analyzed entry to the user's aggregates.
    ///
    /// `now` is injected so replays and tests are deterministic; production
    /// callers pass `Utc::now()`.
    pub fn process_entry(
        &self,
        entry: &AnalyzedEntry,
        now: DateTime<Utc>,
    ) -> Result<UpdateSummary> {
        let days_ago =
            (now.timestamp_millis() - entry.created_at.timestamp_millis()) as f64 / MILLIS_PER_DAY;
        let weight = recency_weight(days_ago, self.config.half_life_days);

        // Distinct domains only: two tags hitting the same domain add the
        // entry's weight once.
        let domains: BTreeSet<LifeDomain> =
            entry.tags.iter().filter_map(map_tag_to_domain).collect();

        let outcome = self.store.with_coverage(&entry.user_id, |mut agg| {
            if agg.is_processed(&entry.id) {
                return TxnOutcome::Skip(UpdateOutcome::AlreadyProcessed);
            }
            for &domain in &domains {
                let evidence = agg.domain_mut(domain);
                evidence.raw_weight += weight;
                push_capped(
                    &mut evidence.contributing_entry_ids,
                    entry.id.clone(),
                    self.config.contributing_id_cap,
                );
            }
            agg.renormalize();
            push_capped(
                &mut agg.processed_entry_ids,
                entry.id.clone(),
                self.config.processed_id_cap,
            );
            agg.last_updated = now;
            TxnOutcome::Commit(agg, UpdateOutcome::Applied)
        })?;

        if outcome == UpdateOutcome::AlreadyProcessed {
            tracing::debug!(
                target: "lumen::updater",
                user = %entry.user_id,
                entry = %entry.id,
                "duplicate delivery, skipping"
            );
            return Ok(UpdateSummary {
                outcome,
                domains_matched: 0,
                entity_count: 0,
            });
        }

        // Past the gate. These writes are idempotent per delivery attempt but
        // would double-count on redelivery; the gate above prevents that. A
        // failure here leaves a partial update that reconciliation repairs,
        // so log and continue instead of propagating.
        if let Err(e) = self.store.put_entry(entry) {
            tracing::error!(
                target: "lumen::updater",
                user = %entry.user_id,
                entry = %entry.id,
                error = %e,
                "failed to persist source entry"
            );
        }
        if let Err(e) = self.apply_entry_stats(entry) {
            tracing::error!(
                target: "lumen::updater",
                user = %entry.user_id,
                entry = %entry.id,
                error = %e,
                "failed to update entry statistics"
            );
        }
        let entity_count = match self.apply_entities(entry, now) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(
                    target: "lumen::updater",
                    user = %entry.user_id,
                    entry = %entry.id,
                    error = %e,
                    "failed to update entity activity"
                );
                0
            }
        };

        tracing::debug!(
            target: "lumen::updater",
            user = %entry.user_id,
            entry = %entry.id,
            domains = domains.len(),
            entities = entity_count,
            weight,
            "entry applied"
        );
        Ok(UpdateSummary {
            outcome: UpdateOutcome::Applied,
            domains_matched: domains.len(),
            entity_count,
        })
    }

    /// Folds the entry into all four period records keyed by its timestamp.
    fn apply_entry_stats(&self, entry: &AnalyzedEntry) -> Result<()> {
        self.store.update_entry_stats(&entry.user_id, |stats| {
            for cadence in Cadence::ALL {
                let key = period_key(entry.created_at, cadence);
                stats.periods.entry(key).or_default().apply_entry(entry);
            }
        })?;
        Ok(())
    }

    /// Upserts each mentioned entity: bump the mention count, advance the
    /// last-mention timestamp, and refresh the recency score from `now`.
    fn apply_entities(&self, entry: &AnalyzedEntry, now: DateTime<Utc>) -> Result<usize> {
        let mentioned: Vec<_> = entry
            .entities
            .iter()
            .map(|e| (e.effective_id(), e))
            .filter(|(id, _)| !id.is_empty())
            .collect();
        if mentioned.is_empty() {
            return Ok(0);
        }
        let half_life = self.config.half_life_days;
        self.store.update_entities(&entry.user_id, |agg| {
            for (id, source) in &mentioned {
                let activity = agg
                    .entities
                    .entry(id.clone())
                    .or_insert_with(|| crate::model::EntityActivity {
                        name: source.name.clone(),
                        category: source.category.clone(),
                        mention_count: 0,
                        last_mention: entry.created_at,
                        recency_score: 0.0,
                    });
                activity.mention_count += 1;
                activity.name = source.name.clone();
                if source.category.is_some() {
                    activity.category = source.category.clone();
                }
                if entry.created_at > activity.last_mention {
                    activity.last_mention = entry.created_at;
                }
                let days = (now.timestamp_millis() - activity.last_mention.timestamp_millis())
                    as f64
                    / MILLIS_PER_DAY;
                activity.recency_score = recency_weight(days, half_life);
            }
        })?;
        Ok(mentioned.len())
    }
}
