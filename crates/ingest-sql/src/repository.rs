use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use ingest_model::{
    Event, IdempotencyKey, IngestError, NearDuplicate, NewOrganization, NewPlace, NewSource,
    Organization, Place, PlaceId, Repository, ReviewQueueEntry, Source, SourceId, Transaction,
};

use crate::id::SqlUlid;
use crate::rows::{EventRow, OrganizationRow, PlaceRow, ReviewEntryRow, SourceRow};
use crate::transaction::PgTransaction;
use crate::{near_duplicate, review};

/// Postgres-backed implementation of the ingest core's `Repository`
/// boundary. Reads run directly against the pool; every write goes through
/// `begin`, which hands back a `PgTransaction` wrapping a live `sqlx`
/// transaction so an ingest either commits in full or leaves no trace.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_event_by_id(&self, id: ingest_model::EventId) -> Result<Option<Event>, IngestError> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"select id, name, description, lifecycle, domain, organizer_id, venue_id,
                      virtual_url, image_url, public_url, keywords, license_url,
                      license_status, confidence, dedup_hash, created_at, updated_at, merged_into
               from events where id = $1"#,
        )
        .bind(SqlUlid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        row.map(Event::try_from).transpose()
    }

    async fn find_event_by_dedup_hash(&self, hash: &str) -> Result<Option<Event>, IngestError> {
        // Invariant 1: at most one *live* (non-deleted, non-merged-away)
        // canonical event per dedup hash. A hash that matches only a
        // tombstoned event doesn't block a fresh ingest from claiming it.
        let row = sqlx::query_as::<_, EventRow>(
            r#"select id, name, description, lifecycle, domain, organizer_id, venue_id,
                      virtual_url, image_url, public_url, keywords, license_url,
                      license_status, confidence, dedup_hash, created_at, updated_at, merged_into
               from events
               where dedup_hash = $1 and lifecycle <> 'deleted' and merged_into is null"#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        row.map(Event::try_from).transpose()
    }

    async fn find_event_by_source_external_id(
        &self,
        source_id: SourceId,
        external_id: &str,
    ) -> Result<Option<Event>, IngestError> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"select e.id, e.name, e.description, e.lifecycle, e.domain, e.organizer_id, e.venue_id,
                      e.virtual_url, e.image_url, e.public_url, e.keywords, e.license_url,
                      e.license_status, e.confidence, e.dedup_hash, e.created_at, e.updated_at, e.merged_into
               from events e
               join event_sources es on es.event_id = e.id
               where es.source_id = $1 and es.external_id = $2
               order by es.created_at desc
               limit 1"#,
        )
        .bind(SqlUlid::from(source_id))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        row.map(Event::try_from).transpose()
    }

    async fn find_idempotency_key(&self, key: &str) -> Result<Option<IdempotencyKey>, IngestError> {
        let row = sqlx::query_as::<_, (String, String, Option<SqlUlid>)>(
            r#"select key, request_hash, event_id from idempotency_keys where key = $1"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.map(|(key, request_hash, event_id)| IdempotencyKey {
            key,
            request_hash,
            event_id: event_id.map(Into::into),
        }))
    }

    async fn find_primary_source(&self, event_id: ingest_model::EventId) -> Result<Option<Source>, IngestError> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"select s.id, s.name, s.base_url, s.license, s.trust_level
               from sources s
               join event_sources es on es.source_id = s.id
               where es.event_id = $1
               order by es.created_at desc
               limit 1"#,
        )
        .bind(SqlUlid::from(event_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.map(Source::from))
    }

    async fn find_review_entry(
        &self,
        dedup_hash: Option<&str>,
        source_id: Option<SourceId>,
        external_id: Option<&str>,
    ) -> Result<Option<ReviewQueueEntry>, IngestError> {
        review::find_matching(&self.pool, dedup_hash, source_id, external_id).await
    }

    async fn find_near_duplicates(
        &self,
        venue_id: PlaceId,
        start: DateTime<Utc>,
        name: &str,
        threshold: f64,
    ) -> Result<Vec<NearDuplicate>, IngestError> {
        near_duplicate::find(&self.pool, venue_id, start, name, threshold).await
    }

    async fn upsert_source(&self, new: NewSource) -> Result<Source, IngestError> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"insert into sources (id, name, base_url, license, trust_level)
               values ($1, $2, $3, $4, $5)
               on conflict (name, base_url) do update set name = sources.name
               returning id, name, base_url, license, trust_level"#,
        )
        .bind(SqlUlid::from(SourceId::new()))
        .bind(&new.name)
        .bind(&new.base_url)
        .bind(&new.license)
        .bind(new.trust_level)
        .fetch_one(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.into())
    }

    async fn upsert_place(&self, new: NewPlace) -> Result<Place, IngestError> {
        let row = sqlx::query_as::<_, PlaceRow>(
            r#"insert into places (id, name, locality, address, latitude, longitude)
               values ($1, $2, $3, $4, $5, $6)
               on conflict (name, coalesce(locality, '')) do update set name = places.name
               returning id, name, locality, address, latitude, longitude"#,
        )
        .bind(SqlUlid::from(PlaceId::new()))
        .bind(&new.name)
        .bind(&new.locality)
        .bind(&new.address)
        .bind(new.latitude)
        .bind(new.longitude)
        .fetch_one(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.into())
    }

    async fn upsert_organization(&self, new: NewOrganization) -> Result<Organization, IngestError> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"insert into organizations (id, name, locality, url)
               values ($1, $2, $3, $4)
               on conflict (name, coalesce(locality, '')) do update set name = organizations.name
               returning id, name, locality, url"#,
        )
        .bind(SqlUlid::from(ingest_model::OrganizationId::new()))
        .bind(&new.name)
        .bind(&new.locality)
        .bind(&new.url)
        .fetch_one(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.into())
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, IngestError> {
        let txn = self.pool.begin().await.map_err(sql_err)?;
        Ok(Box::new(PgTransaction::new(txn)))
    }
}

pub(crate) fn sql_err(err: sqlx::Error) -> IngestError {
    IngestError::Repository(anyhow::Error::new(err))
}
