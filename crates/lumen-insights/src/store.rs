//! Sled-backed aggregate store, one tree per collection.
//!
//! | Tree              | Key                         | Document                  |
//! |-------------------|-----------------------------|---------------------------|
//! | `coverage`        | user id                     | [`CoverageAggregate`]     |
//! | `entry_stats`     | user id                     | [`EntryStatsAggregate`]   |
//! | `entity_activity` | user id                     | [`EntityActivityAggregate`] |
//! | `health_trends`   | user id                     | [`HealthTrendsAggregate`] |
//! | `entries`         | `{user}/{millis:016x}/{id}` | [`AnalyzedEntry`]         |
//!
//! Three write disciplines, matching what each aggregate can tolerate:
//! - `with_coverage` runs a sled transaction (snapshot read, single atomic
//!   commit, automatic retry on write conflict). The idempotency gate and
//!   anything else touching the coverage document goes through here, and the
//!   closure must stay side-effect free so retries are transparent.
//! - `update_*` runs a compare-and-swap read-modify-write of one document,
//!   safe for commutative increments without a cross-document transaction.
//! - `put_*` is a plain last-writer-wins upsert, used where reconciliation
//!   overwrites wholesale anyway.

use crate::error::{InsightsError, Result};
use crate::model::{
    AnalyzedEntry, CoverageAggregate, EntityActivityAggregate, EntryStatsAggregate,
    HealthTrendsAggregate,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::{Db, Tree};
use std::path::Path;

const COVERAGE_TREE: &str = "coverage";
const ENTRY_STATS_TREE: &str = "entry_stats";
const ENTITY_TREE: &str = "entity_activity";
const HEALTH_TREE: &str = "health_trends";
const ENTRIES_TREE: &str = "entries";

/// Result of a coverage transaction body: commit the mutated aggregate, or
/// leave the document untouched (e.g. the idempotency gate fired).
pub enum TxnOutcome<R> {
    Commit(CoverageAggregate, R),
    Skip(R),
}

pub struct AggregateStore {
    db: Db,
}

impl AggregateStore {
    /// Opens or creates the aggregate DB at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn tree(&self, name: &str) -> Result<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    fn get_doc<T: DeserializeOwned>(
        &self,
        tree_name: &'static str,
        key: &str,
    ) -> Result<Option<T>> {
        let tree = self.tree(tree_name)?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => {
                let doc = serde_json::from_slice(&bytes).map_err(|source| {
                    InsightsError::Corrupt {
                        collection: tree_name,
                        key: key.to_string(),
                        source,
                    }
                })?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn put_doc<T: Serialize>(&self, tree_name: &'static str, key: &str, doc: &T) -> Result<()> {
        let tree = self.tree(tree_name)?;
        let bytes = serde_json::to_vec(doc).map_err(|source| InsightsError::Corrupt {
            collection: tree_name,
            key: key.to_string(),
            source,
        })?;
        tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Atomic read-modify-write of one document via a CAS loop. A document
    /// that no longer deserializes is reset to its default shape (the next
    /// reconciliation pass rebuilds it from source data).
    fn update_doc<T, F>(&self, tree_name: &'static str, key: &str, mutate: F) -> Result<T>
    where
        T: Default + Serialize + DeserializeOwned,
        F: Fn(&mut T),
    {
        let tree = self.tree(tree_name)?;
        let merged = tree.update_and_fetch(key.as_bytes(), |old| {
            let mut doc: T = match old {
                Some(bytes) => serde_json::from_slice(bytes).unwrap_or_else(|e| {
                    tracing::warn!(
                        target: "lumen::store",
                        collection = tree_name,
                        key = key,
                        error = %e,
                        "resetting undecodable document"
                    );
                    T::default()
                }),
                None => T::default(),
            };
            mutate(&mut doc);
            serde_json::to_vec(&doc).ok()
        })?;
        match merged {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| {
                InsightsError::Corrupt {
                    collection: tree_name,
                    key: key.to_string(),
                    source,
                }
            }),
            None => Ok(T::default()),
        }
    }

    // -- coverage ----------------------------------------------------------

    pub fn get_coverage(&self, user_id: &str) -> Result<Option<CoverageAggregate>> {
        self.get_doc(COVERAGE_TREE, user_id)
    }

    /// Runs `body` against the user's coverage document inside a sled
    /// transaction. The body receives the current document (or a fresh one),
    /// and decides whether to commit a mutated copy. Write-write conflicts
    /// retry the body automatically, so it must be side-effect free.
    pub fn with_coverage<R, F>(&self, user_id: &str, body: F) -> Result<R>
    where
        F: Fn(CoverageAggregate) -> TxnOutcome<R>,
    {
        let tree = self.tree(COVERAGE_TREE)?;
        let outcome = tree.transaction(|tx| {
            let current: CoverageAggregate = match tx.get(user_id.as_bytes())? {
                Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| {
                    ConflictableTransactionError::Abort(InsightsError::Corrupt {
                        collection: COVERAGE_TREE,
                        key: user_id.to_string(),
                        source,
                    })
                })?,
                None => CoverageAggregate::default(),
            };
            match body(current) {
                TxnOutcome::Commit(aggregate, result) => {
                    let bytes = serde_json::to_vec(&aggregate).map_err(|source| {
                        ConflictableTransactionError::Abort(InsightsError::Corrupt {
                            collection: COVERAGE_TREE,
                            key: user_id.to_string(),
                            source,
                        })
                    })?;
                    tx.insert(user_id.as_bytes(), bytes)?;
                    Ok(result)
                }
                TxnOutcome::Skip(result) => Ok(result),
            }
        });
        outcome.map_err(InsightsError::from)
    }

    /// All users with a coverage document, with their aggregates. The sweep
    /// uses `last_updated` on each to filter to recently-active users.
    pub fn coverage_users(&self) -> Result<Vec<(String, CoverageAggregate)>> {
        let tree = self.tree(COVERAGE_TREE)?;
        let mut out = Vec::new();
        for item in tree.iter() {
            let (key, bytes) = item?;
            let user_id = String::from_utf8(key.to_vec()).unwrap_or_default();
            match serde_json::from_slice::<CoverageAggregate>(&bytes) {
                Ok(agg) => out.push((user_id, agg)),
                Err(e) => {
                    tracing::warn!(
                        target: "lumen::store",
                        user = %user_id,
                        error = %e,
                        "skipping undecodable coverage document"
                    );
                }
            }
        }
        Ok(out)
    }

    // -- entry stats -------------------------------------------------------

    pub fn get_entry_stats(&self, user_id: &str) -> Result<Option<EntryStatsAggregate>> {
        self.get_doc(ENTRY_STATS_TREE, user_id)
    }

    pub fn update_entry_stats<F>(&self, user_id: &str, mutate: F) -> Result<EntryStatsAggregate>
    where
        F: Fn(&mut EntryStatsAggregate),
    {
        self.update_doc(ENTRY_STATS_TREE, user_id, mutate)
    }

    // -- entity activity ---------------------------------------------------

    pub fn get_entities(&self, user_id: &str) -> Result<Option<EntityActivityAggregate>> {
        self.get_doc(ENTITY_TREE, user_id)
    }

    pub fn update_entities<F>(&self, user_id: &str, mutate: F) -> Result<EntityActivityAggregate>
    where
        F: Fn(&mut EntityActivityAggregate),
    {
        self.update_doc(ENTITY_TREE, user_id, mutate)
    }

    /// Last-writer-wins overwrite, used by reconciliation after it has
    /// recomputed recency scores and pruned stale entities.
    pub fn put_entities(&self, user_id: &str, aggregate: &EntityActivityAggregate) -> Result<()> {
        self.put_doc(ENTITY_TREE, user_id, aggregate)
    }

    // -- health trends -----------------------------------------------------

    pub fn get_health(&self, user_id: &str) -> Result<Option<HealthTrendsAggregate>> {
        self.get_doc(HEALTH_TREE, user_id)
    }

    pub fn update_health<F>(&self, user_id: &str, mutate: F) -> Result<HealthTrendsAggregate>
    where
        F: Fn(&mut HealthTrendsAggregate),
    {
        self.update_doc(HEALTH_TREE, user_id, mutate)
    }

    // -- source entries ----------------------------------------------------

    fn entry_key(user_id: &str, created_at: DateTime<Utc>, entry_id: &str) -> String {
        // Zero-padded hex millis keep lexicographic order == chronological.
        let millis = created_at.timestamp_millis().max(0);
        format!("{}/{:016x}/{}", user_id, millis, entry_id)
    }

    /// Idempotent upsert of a delivered source entry, keyed so that
    /// [`entries_in_range`](Self::entries_in_range) is a cheap range scan.
    pub fn put_entry(&self, entry: &AnalyzedEntry) -> Result<()> {
        let key = Self::entry_key(&entry.user_id, entry.created_at, &entry.id);
        let tree = self.tree(ENTRIES_TREE)?;
        let bytes = serde_json::to_vec(entry).map_err(|source| InsightsError::Corrupt {
            collection: ENTRIES_TREE,
            key: key.clone(),
            source,
        })?;
        tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Source entries for one user within `[start, end]`, oldest first.
    /// Ground truth for entry-stats reconciliation and health trends.
    pub fn entries_in_range(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AnalyzedEntry>> {
        let tree = self.tree(ENTRIES_TREE)?;
        let lower = format!("{}/{:016x}", user_id, start.timestamp_millis().max(0));
        let upper = format!(
            "{}/{:016x}",
            user_id,
            (end.timestamp_millis() + 1).max(0)
        );
        let mut out = Vec::new();
        for item in tree.range(lower.as_bytes()..upper.as_bytes()) {
            let (key, bytes) = item?;
            match serde_json::from_slice::<AnalyzedEntry>(&bytes) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    let key = String::from_utf8_lossy(&key).into_owned();
                    return Err(InsightsError::UpstreamRead(format!(
                        "undecodable source entry at '{}': {}",
                        key, e
                    )));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeriodStats;
    use chrono::TimeZone;

    fn temp_store() -> (tempfile::TempDir, AggregateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AggregateStore::open_path(dir.path()).unwrap();
        (dir, store)
    }

    fn entry_at(id: &str, user: &str, at: DateTime<Utc>) -> AnalyzedEntry {
        AnalyzedEntry {
            id: id.to_string(),
            user_id: user.to_string(),
            created_at: at,
            mood_score: Some(0.5),
            category: "reflection".to_string(),
            entry_type: "text".to_string(),
            analysis_complete: true,
            entities: Vec::new(),
            tags: Vec::new(),
            health: None,
        }
    }

    #[test]
    fn test_coverage_roundtrip() {
        let (_dir, store) = temp_store();
        assert!(store.get_coverage("u1").unwrap().is_none());

        store
            .with_coverage("u1", |mut agg| {
                agg.processed_entry_ids.push("e1".to_string());
                agg.last_updated = Utc::now();
                TxnOutcome::Commit(agg, ())
            })
            .unwrap();

        let agg = store.get_coverage("u1").unwrap().unwrap();
        assert_eq!(agg.processed_entry_ids, vec!["e1".to_string()]);
    }

    #[test]
    fn test_coverage_skip_leaves_document_untouched() {
        let (_dir, store) = temp_store();
        let seen: bool = store
            .with_coverage("u1", |agg| {
                let existed = !agg.processed_entry_ids.is_empty();
                TxnOutcome::Skip(existed)
            })
            .unwrap();
        assert!(!seen);
        assert!(store.get_coverage("u1").unwrap().is_none());
    }

    #[test]
    fn test_update_doc_accumulates() {
        let (_dir, store) = temp_store();
        for _ in 0..3 {
            store
                .update_entry_stats("u1", |stats| {
                    stats
                        .periods
                        .entry("weekly-2026-02-16".to_string())
                        .or_insert_with(PeriodStats::default)
                        .entry_count += 1;
                })
                .unwrap();
        }
        let stats = store.get_entry_stats("u1").unwrap().unwrap();
        assert_eq!(stats.periods["weekly-2026-02-16"].entry_count, 3);
    }

    #[test]
    fn test_entries_range_scan_is_per_user_and_ordered() {
        let (_dir, store) = temp_store();
        let base = Utc.with_ymd_and_hms(2026, 2, 16, 0, 0, 0).unwrap();
        store.put_entry(&entry_at("e2", "u1", base + chrono::Duration::days(2))).unwrap();
        store.put_entry(&entry_at("e1", "u1", base)).unwrap();
        store.put_entry(&entry_at("e9", "u2", base + chrono::Duration::days(1))).unwrap();
        store
            .put_entry(&entry_at("late", "u1", base + chrono::Duration::days(30)))
            .unwrap();

        let found = store
            .entries_in_range("u1", base, base + chrono::Duration::days(6))
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[test]
    fn test_put_entry_is_idempotent() {
        let (_dir, store) = temp_store();
        let at = Utc.with_ymd_and_hms(2026, 2, 16, 9, 0, 0).unwrap();
        store.put_entry(&entry_at("e1", "u1", at)).unwrap();
        store.put_entry(&entry_at("e1", "u1", at)).unwrap();
        let found = store
            .entries_in_range("u1", at, at + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
