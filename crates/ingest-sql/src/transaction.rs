use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};

use ingest_model::{
    Event, EventId, EventUpdate, IngestError, NewEvent, NewEventSource, NewOccurrence,
    NewReviewEntry, ReviewEntryId, ReviewQueueEntry, ReviewStatusUpdate, Tombstone, Transaction,
};

use crate::id::SqlUlid;
use crate::repository::sql_err;
use crate::rows::{
    domain_to_sql, license_status_to_sql, lifecycle_to_sql, review_status_to_sql, EventRow,
    ReviewEntryRow,
};

/// Wraps a single live `sqlx` transaction. Every method borrows `&mut self`
/// so the caller can't interleave two in-flight statements on the same
/// connection; `commit`/`rollback` consume it, matching the `Repository`
/// capability-set design (a transactional handle is the same capabilities
/// plus a terminal commit/rollback).
pub struct PgTransaction<'c> {
    inner: sqlx::Transaction<'c, Postgres>,
}

impl<'c> PgTransaction<'c> {
    pub fn new(inner: sqlx::Transaction<'c, Postgres>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<'c> Transaction for PgTransaction<'c> {
    async fn create_event(&mut self, new: NewEvent) -> Result<Event, IngestError> {
        let id = EventId::new();
        let now = Utc::now();
        let keywords: Vec<String> = new.keywords.into_iter().collect();
        let row = sqlx::query_as::<_, EventRow>(
            r#"insert into events (
                   id, name, description, lifecycle, domain, organizer_id, venue_id,
                   virtual_url, image_url, public_url, keywords, license_url,
                   license_status, confidence, dedup_hash, created_at, updated_at, merged_into
               ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $16, null)
               returning id, name, description, lifecycle, domain, organizer_id, venue_id,
                         virtual_url, image_url, public_url, keywords, license_url,
                         license_status, confidence, dedup_hash, created_at, updated_at, merged_into"#,
        )
        .bind(SqlUlid::from(id))
        .bind(&new.name)
        .bind(&new.description)
        .bind(lifecycle_to_sql(new.lifecycle))
        .bind(domain_to_sql(new.domain))
        .bind(new.organizer_id.map(SqlUlid::from))
        .bind(new.venue_id.map(SqlUlid::from))
        .bind(&new.virtual_url)
        .bind(&new.image_url)
        .bind(&new.public_url)
        .bind(&keywords)
        .bind(&new.license_url)
        .bind(license_status_to_sql(new.license_status))
        .bind(new.confidence)
        .bind(&new.dedup_hash)
        .bind(now)
        .fetch_one(&mut *self.inner)
        .await
        .map_err(sql_err)?;
        Event::try_from(row)
    }

    async fn create_occurrence(&mut self, new: NewOccurrence) -> Result<(), IngestError> {
        sqlx::query(
            r#"insert into occurrences (
                   event_id, start_at, end_at, timezone, door_time, venue_id,
                   virtual_url, ticket_url, price_min, price_max, currency
               ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"#,
        )
        .bind(SqlUlid::from(new.event_id))
        .bind(new.start)
        .bind(new.end)
        .bind(&new.timezone)
        .bind(new.door_time)
        .bind(new.venue_id.map(SqlUlid::from))
        .bind(&new.virtual_url)
        .bind(&new.ticket_url)
        .bind(new.price_min)
        .bind(new.price_max)
        .bind(&new.currency)
        .execute(&mut *self.inner)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn create_event_source(&mut self, new: NewEventSource) -> Result<(), IngestError> {
        sqlx::query(
            r#"insert into event_sources (event_id, source_id, external_id, payload, payload_hash, created_at)
               values ($1, $2, $3, $4, $5, now())
               on conflict (event_id, source_id) do update set
                   external_id = excluded.external_id,
                   payload = excluded.payload,
                   payload_hash = excluded.payload_hash,
                   created_at = now()"#,
        )
        .bind(SqlUlid::from(new.event_id))
        .bind(SqlUlid::from(new.source_id))
        .bind(&new.external_id)
        .bind(&new.payload)
        .bind(&new.payload_hash)
        .execute(&mut *self.inner)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn create_review_entry(
        &mut self,
        new: NewReviewEntry,
    ) -> Result<ReviewQueueEntry, IngestError> {
        let id = ReviewEntryId::new();
        let warnings = serde_json::to_value(&new.warnings)
            .map_err(|e| IngestError::Repository(anyhow::Error::new(e)))?;
        let row = sqlx::query_as::<_, ReviewEntryRow>(
            r#"insert into review_queue_entries (
                   id, event_id, original_payload, normalized_payload, warnings, source_id,
                   source_external_id, dedup_hash, start_at, end_at, status,
                   reviewer, reviewed_at, rejection_reason, merged_into
               ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', null, null, null, null)
               returning id, event_id, original_payload, normalized_payload, warnings, source_id,
                         source_external_id, dedup_hash, start_at as start, end_at as end, status,
                         reviewer, reviewed_at, rejection_reason, merged_into"#,
        )
        .bind(SqlUlid::from(id))
        .bind(SqlUlid::from(new.event_id))
        .bind(&new.original_payload)
        .bind(&new.normalized_payload)
        .bind(&warnings)
        .bind(new.source_id.map(SqlUlid::from))
        .bind(&new.source_external_id)
        .bind(&new.dedup_hash)
        .bind(new.start)
        .bind(new.end)
        .fetch_one(&mut *self.inner)
        .await
        .map_err(sql_err)?;
        ReviewQueueEntry::try_from(row)
    }

    async fn upsert_idempotency_key(
        &mut self,
        key: &str,
        request_hash: &str,
        event_id: Option<EventId>,
    ) -> Result<(), IngestError> {
        sqlx::query(
            r#"insert into idempotency_keys (key, request_hash, event_id)
               values ($1, $2, $3)
               on conflict (key) do update set event_id = excluded.event_id
               where idempotency_keys.request_hash = excluded.request_hash"#,
        )
        .bind(key)
        .bind(request_hash)
        .bind(event_id.map(SqlUlid::from))
        .execute(&mut *self.inner)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn update_event(&mut self, id: EventId, update: EventUpdate) -> Result<(), IngestError> {
        if update.is_empty() {
            return Ok(());
        }
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("update events set updated_at = now()");

        if let Some(description) = &update.description {
            qb.push(", description = ").push_bind(description.clone());
        }
        if let Some(organizer_id) = update.organizer_id {
            qb.push(", organizer_id = ").push_bind(organizer_id.map(SqlUlid::from));
        }
        if let Some(venue_id) = update.venue_id {
            qb.push(", venue_id = ").push_bind(venue_id.map(SqlUlid::from));
        }
        if let Some(virtual_url) = &update.virtual_url {
            qb.push(", virtual_url = ").push_bind(virtual_url.clone());
        }
        if let Some(image_url) = &update.image_url {
            qb.push(", image_url = ").push_bind(image_url.clone());
        }
        if let Some(public_url) = &update.public_url {
            qb.push(", public_url = ").push_bind(public_url.clone());
        }
        if let Some(keywords) = &update.keywords {
            let keywords: Vec<String> = keywords.iter().cloned().collect();
            qb.push(", keywords = ").push_bind(keywords);
        }
        if let Some(license_url) = &update.license_url {
            qb.push(", license_url = ").push_bind(license_url.clone());
        }
        if let Some(confidence) = update.confidence {
            qb.push(", confidence = ").push_bind(confidence);
        }
        if let Some(lifecycle) = update.lifecycle {
            qb.push(", lifecycle = ").push_bind(lifecycle_to_sql(lifecycle));
        }
        if let Some(merged_into) = update.merged_into {
            qb.push(", merged_into = ").push_bind(merged_into.map(SqlUlid::from));
        }

        qb.push(" where id = ").push_bind(SqlUlid::from(id));
        qb.build().execute(&mut *self.inner).await.map_err(sql_err)?;
        Ok(())
    }

    async fn update_review_status(
        &mut self,
        id: ReviewEntryId,
        update: ReviewStatusUpdate,
    ) -> Result<(), IngestError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("update review_queue_entries set status = ");
        qb.push_bind(review_status_to_sql(update.status))
            .push(", reviewer = ")
            .push_bind(update.reviewer)
            .push(", reviewed_at = now(), rejection_reason = ")
            .push_bind(update.rejection_reason)
            .push(", merged_into = ")
            .push_bind(update.merged_into.map(SqlUlid::from));

        if let Some((original_payload, normalized_payload, warnings)) = update.refreshed_payloads {
            let warnings = serde_json::to_value(&warnings)
                .map_err(|e| IngestError::Repository(anyhow::Error::new(e)))?;
            qb.push(", original_payload = ")
                .push_bind(original_payload)
                .push(", normalized_payload = ")
                .push_bind(normalized_payload)
                .push(", warnings = ")
                .push_bind(warnings);
        }

        qb.push(" where id = ").push_bind(SqlUlid::from(id));
        qb.build().execute(&mut *self.inner).await.map_err(sql_err)?;
        Ok(())
    }

    async fn fix_occurrence_dates(
        &mut self,
        event_id: EventId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(), IngestError> {
        // The primary occurrence is the earliest recorded for the event;
        // admin date fixes target that row rather than every occurrence.
        sqlx::query(
            r#"update occurrences set start_at = $2, end_at = $3
               where event_id = $1 and id = (
                   select id from occurrences where event_id = $1 order by start_at asc limit 1
               )"#,
        )
        .bind(SqlUlid::from(event_id))
        .bind(start)
        .bind(end)
        .execute(&mut *self.inner)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn create_tombstone(&mut self, tombstone: Tombstone) -> Result<(), IngestError> {
        let doc = tombstone.to_json_ld();
        sqlx::query(
            r#"insert into tombstones (event_id, event_uri, name, deleted_at, reason, superseded_by, document)
               values ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(SqlUlid::from(tombstone.event_id))
        .bind(&tombstone.event_uri)
        .bind(&tombstone.name)
        .bind(tombstone.deleted_at)
        .bind(&tombstone.reason)
        .bind(&tombstone.superseded_by)
        .bind(&doc)
        .execute(&mut *self.inner)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IngestError> {
        self.inner.commit().await.map_err(sql_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), IngestError> {
        self.inner.rollback().await.map_err(sql_err)
    }
}
