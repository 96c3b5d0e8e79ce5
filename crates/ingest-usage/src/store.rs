use chrono::NaiveDate;

use crate::error::UsageError;

/// The usage recorder's sole I/O boundary: one upsert per key, per flush
/// cycle. Mirrors `ingest_model::Repository` in spirit (storage-agnostic
/// trait, async-trait object-safe) but is kept in its own crate since the
/// recorder has nothing to do with the ingest transaction.
#[async_trait::async_trait]
pub trait UsageStore: Send + Sync {
    /// Adds `requests`/`errors` to whatever is already on record for `key_id`
    /// on `date`. Must be additive (two flushes for the same key and date
    /// accumulate rather than clobber), since a key can span more than one
    /// flush cycle within a day.
    async fn record_usage(
        &self,
        key_id: &str,
        date: NaiveDate,
        requests: u64,
        errors: u64,
    ) -> Result<(), UsageError>;
}
