use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IngestError;
use crate::id::{EventId, OrganizationId, PlaceId, ReviewEntryId, SourceId};
use crate::model::{
    Event, EventLifecycle, IdempotencyKey, Organization, Place, ReviewQueueEntry, ReviewStatus,
    Source, Tombstone,
};
use crate::warning::ValidationWarning;

#[derive(Debug, Clone, PartialEq)]
pub struct NearDuplicate {
    pub event_id: EventId,
    pub name: String,
    /// Similarity in (0, 1], descending-sorted by the repository.
    pub similarity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NewPlace {
    pub name: String,
    pub locality: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewOrganization {
    pub name: String,
    pub locality: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSource {
    pub name: String,
    pub base_url: String,
    pub license: Option<String>,
    pub trust_level: i16,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub description: String,
    pub lifecycle: EventLifecycle,
    pub domain: crate::model::EventDomain,
    pub organizer_id: Option<OrganizationId>,
    pub venue_id: Option<PlaceId>,
    pub virtual_url: Option<String>,
    pub image_url: Option<String>,
    pub public_url: Option<String>,
    pub keywords: BTreeSet<String>,
    pub license_url: Option<String>,
    pub license_status: crate::model::LicenseStatus,
    pub confidence: f64,
    pub dedup_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewOccurrence {
    pub event_id: EventId,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub timezone: String,
    pub door_time: Option<DateTime<Utc>>,
    pub venue_id: Option<PlaceId>,
    pub virtual_url: Option<String>,
    pub ticket_url: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEventSource {
    pub event_id: EventId,
    pub source_id: SourceId,
    pub external_id: Option<String>,
    pub payload: serde_json::Value,
    pub payload_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewReviewEntry {
    pub event_id: EventId,
    pub original_payload: Vec<u8>,
    pub normalized_payload: Vec<u8>,
    pub warnings: Vec<ValidationWarning>,
    pub source_id: Option<SourceId>,
    pub source_external_id: Option<String>,
    pub dedup_hash: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// Sparse field update for an existing event. `None` leaves the column
/// untouched; fields that are themselves nullable use a nested `Option` so
/// "set to empty" is distinguishable from "don't touch" (see the
/// sentinel-zero-value pitfall called out in the data model design notes).
#[derive(Debug, Clone, Default)]
pub struct EventUpdate {
    pub description: Option<String>,
    pub organizer_id: Option<Option<OrganizationId>>,
    pub venue_id: Option<Option<PlaceId>>,
    pub virtual_url: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
    pub public_url: Option<Option<String>>,
    pub keywords: Option<BTreeSet<String>>,
    pub license_url: Option<Option<String>>,
    pub confidence: Option<f64>,
    pub lifecycle: Option<EventLifecycle>,
    pub merged_into: Option<Option<EventId>>,
}

impl EventUpdate {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.organizer_id.is_none()
            && self.venue_id.is_none()
            && self.virtual_url.is_none()
            && self.image_url.is_none()
            && self.public_url.is_none()
            && self.keywords.is_none()
            && self.license_url.is_none()
            && self.confidence.is_none()
            && self.lifecycle.is_none()
            && self.merged_into.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ReviewStatusUpdate {
    pub status: ReviewStatus,
    pub reviewer: String,
    pub rejection_reason: Option<String>,
    pub merged_into: Option<EventId>,
    /// Replace the stored payloads/warnings (used when re-queuing a pending entry).
    pub refreshed_payloads: Option<(Vec<u8>, Vec<u8>, Vec<ValidationWarning>)>,
}

/// The single I/O boundary of the ingestion core. Reads are exposed directly
/// on `Repository`; every write happens through a `Transaction` obtained via
/// `begin`, so an ingest either commits atomically or leaves no trace.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_event_by_id(&self, id: EventId) -> Result<Option<Event>, IngestError>;
    async fn find_event_by_dedup_hash(&self, hash: &str) -> Result<Option<Event>, IngestError>;
    async fn find_event_by_source_external_id(
        &self,
        source_id: SourceId,
        external_id: &str,
    ) -> Result<Option<Event>, IngestError>;
    async fn find_idempotency_key(&self, key: &str) -> Result<Option<IdempotencyKey>, IngestError>;
    /// The trust level the merge engine compares against: the source
    /// attached to `event_id`'s most recent contribution, if any.
    async fn find_primary_source(&self, event_id: EventId) -> Result<Option<Source>, IngestError>;
    async fn find_review_entry(
        &self,
        dedup_hash: Option<&str>,
        source_id: Option<SourceId>,
        external_id: Option<&str>,
    ) -> Result<Option<ReviewQueueEntry>, IngestError>;

    /// Advisory fuzzy lookup. Implementations should return an empty vec
    /// rather than erroring whenever reasonable; callers already treat a
    /// hard error here as log-and-continue.
    async fn find_near_duplicates(
        &self,
        venue_id: PlaceId,
        start: DateTime<Utc>,
        name: &str,
        threshold: f64,
    ) -> Result<Vec<NearDuplicate>, IngestError>;

    /// Resolves `(name, base_url)` to a `Source` row, creating it with the
    /// given trust level if absent. Idempotent and safe to call outside a
    /// transaction; it never mutates an existing source's trust level.
    async fn upsert_source(&self, new: NewSource) -> Result<Source, IngestError>;

    /// Resolves a venue by name+address, creating it if absent. Idempotent
    /// and safe to call outside a transaction -- the dedup engine needs a
    /// resolved `PlaceId` for near-duplicate search before it knows whether
    /// this submission will become a new event or a merge into an existing
    /// one.
    async fn upsert_place(&self, new: NewPlace) -> Result<Place, IngestError>;
    async fn upsert_organization(&self, new: NewOrganization) -> Result<Organization, IngestError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, IngestError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn create_event(&mut self, new: NewEvent) -> Result<Event, IngestError>;
    async fn create_occurrence(&mut self, new: NewOccurrence) -> Result<(), IngestError>;
    async fn create_event_source(&mut self, new: NewEventSource) -> Result<(), IngestError>;
    async fn create_review_entry(
        &mut self,
        new: NewReviewEntry,
    ) -> Result<ReviewQueueEntry, IngestError>;
    async fn upsert_idempotency_key(
        &mut self,
        key: &str,
        request_hash: &str,
        event_id: Option<EventId>,
    ) -> Result<(), IngestError>;

    async fn update_event(&mut self, id: EventId, update: EventUpdate) -> Result<(), IngestError>;
    async fn update_review_status(
        &mut self,
        id: ReviewEntryId,
        update: ReviewStatusUpdate,
    ) -> Result<(), IngestError>;
    async fn fix_occurrence_dates(
        &mut self,
        event_id: EventId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(), IngestError>;
    async fn create_tombstone(&mut self, tombstone: Tombstone) -> Result<(), IngestError>;

    async fn commit(self: Box<Self>) -> Result<(), IngestError>;
    async fn rollback(self: Box<Self>) -> Result<(), IngestError>;
}
