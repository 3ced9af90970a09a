//! Error taxonomy for the insights engine.
//!
//! An idempotency short-circuit is *not* an error: the updater reports it as
//! [`UpdateOutcome::AlreadyProcessed`](crate::updater::UpdateOutcome) and logs
//! at debug level. Errors here are either programming mistakes that should
//! fail loudly (`InvalidCadence`) or store/upstream faults that the caller
//! propagates or isolates behind a per-user boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsightsError {
    /// Not one of `weekly`, `monthly`, `quarterly`, `annual`. Should never
    /// occur with validated input.
    #[error("unrecognized cadence: {0}")]
    InvalidCadence(String),

    /// Underlying document store failure. Transaction conflicts are retried
    /// inside the store adapter; this surfaces only exhausted or
    /// non-retryable faults.
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    /// A stored document no longer deserializes into its expected shape.
    #[error("corrupt document in {collection} at '{key}': {source}")]
    Corrupt {
        collection: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A per-user reconciliation sub-step could not read its source data.
    /// Caught at the per-user boundary; the user is skipped until the next
    /// scheduled sweep.
    #[error("upstream read failed: {0}")]
    UpstreamRead(String),
}

/// Unwraps sled's transaction wrapper: aborts carry our error, storage faults
/// map onto [`InsightsError::Store`].
impl From<sled::transaction::TransactionError<InsightsError>> for InsightsError {
    fn from(err: sled::transaction::TransactionError<InsightsError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => InsightsError::Store(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, InsightsError>;
