use chrono::NaiveDate;
use sqlx::PgPool;

use ingest_usage::{UsageError, UsageStore};

/// Postgres-backed implementation of `ingest_usage::UsageStore`. One row per
/// `(key_id, usage_date)`; a flush upsert adds its deltas onto whatever is
/// already there rather than overwriting, since a key's counters for a given
/// day are typically flushed more than once.
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UsageStore for PgUsageStore {
    async fn record_usage(
        &self,
        key_id: &str,
        date: NaiveDate,
        requests: u64,
        errors: u64,
    ) -> Result<(), UsageError> {
        sqlx::query(
            r#"insert into api_key_usage (key_id, usage_date, request_count, error_count)
               values ($1, $2, $3, $4)
               on conflict (key_id, usage_date) do update set
                   request_count = api_key_usage.request_count + excluded.request_count,
                   error_count = api_key_usage.error_count + excluded.error_count"#,
        )
        .bind(key_id)
        .bind(date)
        .bind(requests as i64)
        .bind(errors as i64)
        .execute(&self.pool)
        .await
        .map_err(|err| UsageError::from(anyhow::Error::new(err)))?;
        Ok(())
    }
}
