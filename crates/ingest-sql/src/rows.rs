//! `FromRow` projections and the plain-string encodings used for the few
//! enums that cross the SQL boundary. Kept separate from the repository
//! methods so the column shapes are visible in one place.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use ingest_model::{
    Event, EventDomain, EventLifecycle, IngestError, LicenseStatus, Organization, Place,
    ReviewQueueEntry, ReviewStatus, Source, ValidationWarning,
};

use crate::id::SqlUlid;

pub fn lifecycle_to_sql(v: EventLifecycle) -> &'static str {
    match v {
        EventLifecycle::Published => "published",
        EventLifecycle::PendingReview => "pending_review",
        EventLifecycle::Draft => "draft",
        EventLifecycle::Deleted => "deleted",
    }
}

pub fn lifecycle_from_sql(s: &str) -> Result<EventLifecycle, IngestError> {
    match s {
        "published" => Ok(EventLifecycle::Published),
        "pending_review" => Ok(EventLifecycle::PendingReview),
        "draft" => Ok(EventLifecycle::Draft),
        "deleted" => Ok(EventLifecycle::Deleted),
        other => Err(IngestError::Repository(anyhow::anyhow!(
            "unrecognized event lifecycle {other:?} in storage"
        ))),
    }
}

pub fn domain_to_sql(v: EventDomain) -> &'static str {
    match v {
        EventDomain::Music => "music",
        EventDomain::Sports => "sports",
        EventDomain::Arts => "arts",
        EventDomain::Food => "food",
        EventDomain::Family => "family",
        EventDomain::Business => "business",
        EventDomain::Community => "community",
        EventDomain::Other => "other",
    }
}

pub fn domain_from_sql(s: &str) -> EventDomain {
    match s {
        "music" => EventDomain::Music,
        "sports" => EventDomain::Sports,
        "arts" => EventDomain::Arts,
        "food" => EventDomain::Food,
        "family" => EventDomain::Family,
        "business" => EventDomain::Business,
        "community" => EventDomain::Community,
        _ => EventDomain::Other,
    }
}

pub fn license_status_to_sql(v: LicenseStatus) -> &'static str {
    match v {
        LicenseStatus::Cc0 => "cc0",
        LicenseStatus::Unknown => "unknown",
    }
}

pub fn license_status_from_sql(s: &str) -> LicenseStatus {
    match s {
        "cc0" => LicenseStatus::Cc0,
        _ => LicenseStatus::Unknown,
    }
}

pub fn review_status_to_sql(v: ReviewStatus) -> &'static str {
    match v {
        ReviewStatus::Pending => "pending",
        ReviewStatus::Approved => "approved",
        ReviewStatus::Rejected => "rejected",
        ReviewStatus::Merged => "merged",
    }
}

pub fn review_status_from_sql(s: &str) -> Result<ReviewStatus, IngestError> {
    match s {
        "pending" => Ok(ReviewStatus::Pending),
        "approved" => Ok(ReviewStatus::Approved),
        "rejected" => Ok(ReviewStatus::Rejected),
        "merged" => Ok(ReviewStatus::Merged),
        other => Err(IngestError::Repository(anyhow::anyhow!(
            "unrecognized review status {other:?} in storage"
        ))),
    }
}

#[derive(Debug, FromRow)]
pub struct EventRow {
    pub id: SqlUlid,
    pub name: String,
    pub description: String,
    pub lifecycle: String,
    pub domain: String,
    pub organizer_id: Option<SqlUlid>,
    pub venue_id: Option<SqlUlid>,
    pub virtual_url: Option<String>,
    pub image_url: Option<String>,
    pub public_url: Option<String>,
    pub keywords: Vec<String>,
    pub license_url: Option<String>,
    pub license_status: String,
    pub confidence: f64,
    pub dedup_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_into: Option<SqlUlid>,
}

impl TryFrom<EventRow> for Event {
    type Error = IngestError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id.into(),
            name: row.name,
            description: row.description,
            lifecycle: lifecycle_from_sql(&row.lifecycle)?,
            domain: domain_from_sql(&row.domain),
            organizer_id: row.organizer_id.map(Into::into),
            venue_id: row.venue_id.map(Into::into),
            virtual_url: row.virtual_url,
            image_url: row.image_url,
            public_url: row.public_url,
            keywords: row.keywords.into_iter().collect(),
            license_url: row.license_url,
            license_status: license_status_from_sql(&row.license_status),
            confidence: row.confidence,
            dedup_hash: row.dedup_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
            merged_into: row.merged_into.map(Into::into),
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PlaceRow {
    pub id: SqlUlid,
    pub name: String,
    pub locality: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl From<PlaceRow> for Place {
    fn from(row: PlaceRow) -> Self {
        Place {
            id: row.id.into(),
            name: row.name,
            locality: row.locality,
            address: row.address,
            latitude: row.latitude,
            longitude: row.longitude,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct OrganizationRow {
    pub id: SqlUlid,
    pub name: String,
    pub locality: Option<String>,
    pub url: Option<String>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: row.id.into(),
            name: row.name,
            locality: row.locality,
            url: row.url,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct SourceRow {
    pub id: SqlUlid,
    pub name: String,
    pub base_url: String,
    pub license: Option<String>,
    pub trust_level: i16,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id.into(),
            name: row.name,
            base_url: row.base_url,
            license: row.license,
            trust_level: row.trust_level,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ReviewEntryRow {
    pub id: SqlUlid,
    pub event_id: SqlUlid,
    pub original_payload: Vec<u8>,
    pub normalized_payload: Vec<u8>,
    pub warnings: serde_json::Value,
    pub source_id: Option<SqlUlid>,
    pub source_external_id: Option<String>,
    pub dedup_hash: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: String,
    pub reviewer: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub merged_into: Option<SqlUlid>,
}

impl TryFrom<ReviewEntryRow> for ReviewQueueEntry {
    type Error = IngestError;

    fn try_from(row: ReviewEntryRow) -> Result<Self, Self::Error> {
        let warnings: Vec<ValidationWarning> = serde_json::from_value(row.warnings)
            .map_err(|e| IngestError::Repository(anyhow::Error::new(e)))?;
        Ok(ReviewQueueEntry {
            id: row.id.into(),
            event_id: row.event_id.into(),
            original_payload: row.original_payload,
            normalized_payload: row.normalized_payload,
            warnings,
            source_id: row.source_id.map(Into::into),
            source_external_id: row.source_external_id,
            dedup_hash: row.dedup_hash,
            start: row.start,
            end: row.end,
            status: review_status_from_sql(&row.status)?,
            reviewer: row.reviewer,
            reviewed_at: row.reviewed_at,
            rejection_reason: row.rejection_reason,
            merged_into: row.merged_into.map(Into::into),
        })
    }
}
