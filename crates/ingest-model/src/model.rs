use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EventId, OrganizationId, PlaceId, ReviewEntryId, SourceId};
use crate::warning::ValidationWarning;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLifecycle {
    Published,
    PendingReview,
    Draft,
    Deleted,
}

/// The coarse subject-matter bucket an event is filed under, derived from
/// its schema.org event subtype unless the caller supplied one explicitly.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDomain {
    Music,
    Sports,
    Arts,
    Food,
    Family,
    Business,
    Community,
    Other,
}

impl EventDomain {
    /// Maps a schema.org `@type`/`eventDomain`-ish subtype string to a
    /// coarse domain. Unknown subtypes fall back to `Other`.
    pub fn from_subtype(subtype: &str) -> Self {
        match subtype {
            "MusicEvent" => EventDomain::Music,
            "SportsEvent" => EventDomain::Sports,
            "DanceEvent" | "ComedyEvent" | "TheaterEvent" | "VisualArtsEvent" | "ScreeningEvent" => {
                EventDomain::Arts
            }
            "FoodEvent" => EventDomain::Food,
            "ChildrensEvent" | "FamilyEvent" => EventDomain::Family,
            "BusinessEvent" | "SaleEvent" => EventDomain::Business,
            "SocialEvent" | "CourseInstance" | "Festival" | "ExhibitionEvent" => {
                EventDomain::Community
            }
            _ => EventDomain::Other,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Cc0,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub description: String,
    pub lifecycle: EventLifecycle,
    pub domain: EventDomain,
    pub organizer_id: Option<OrganizationId>,
    pub venue_id: Option<PlaceId>,
    pub virtual_url: Option<String>,
    pub image_url: Option<String>,
    pub public_url: Option<String>,
    pub keywords: BTreeSet<String>,
    pub license_url: Option<String>,
    pub license_status: LicenseStatus,
    pub confidence: f64,
    pub dedup_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_into: Option<EventId>,
}

impl Event {
    /// Is any non-empty, gap-fillable content present for `field`? Auto-merge
    /// uses this to decide whether an incoming value may only fill a gap
    /// (empty) or must clear the trust bar to overwrite (non-empty).
    pub fn is_blank(s: &str) -> bool {
        s.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub event_id: EventId,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    /// IANA timezone identifier, e.g. `America/Toronto`.
    pub timezone: String,
    pub door_time: Option<DateTime<Utc>>,
    pub venue_id: Option<PlaceId>,
    pub virtual_url: Option<String>,
    pub ticket_url: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub currency: Option<String>,
}

impl Occurrence {
    pub fn is_chronological(&self) -> bool {
        match self.end {
            Some(end) => end >= self.start,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub name: String,
    pub locality: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub locality: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub name: String,
    pub base_url: String,
    pub license: Option<String>,
    /// Trust level in [0, 10]; higher trust wins field overwrites during auto-merge.
    pub trust_level: i16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSource {
    pub event_id: EventId,
    pub source_id: SourceId,
    pub external_id: Option<String>,
    pub payload: serde_json::Value,
    pub payload_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub key: String,
    pub request_hash: String,
    pub event_id: Option<EventId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Merged,
}

impl ReviewStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub id: ReviewEntryId,
    pub event_id: EventId,
    pub original_payload: Vec<u8>,
    pub normalized_payload: Vec<u8>,
    pub warnings: Vec<ValidationWarning>,
    pub source_id: Option<SourceId>,
    pub source_external_id: Option<String>,
    pub dedup_hash: Option<String>,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: ReviewStatus,
    pub reviewer: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub merged_into: Option<EventId>,
}

/// A JSON-LD tombstone published in place of a deleted or merged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub event_id: EventId,
    pub event_uri: String,
    pub name: String,
    pub deleted_at: DateTime<Utc>,
    pub reason: String,
    /// Present only for merges: the URI of the canonical event this one was folded into.
    pub superseded_by: Option<String>,
}

impl Tombstone {
    pub fn to_json_ld(&self) -> serde_json::Value {
        let mut doc = serde_json::json!({
            "@context": "https://schema.org",
            "@type": "Event",
            "@id": self.event_uri,
            "name": self.name,
            "eventStatus": "https://schema.org/EventCancelled",
            "sel:tombstone": true,
            "sel:deletedAt": self.deleted_at.to_rfc3339(),
            "sel:deletionReason": self.reason,
        });
        if let Some(ref superseded_by) = self.superseded_by {
            doc.as_object_mut()
                .expect("tombstone doc is always an object")
                .insert(
                    "sel:supersededBy".to_string(),
                    serde_json::Value::String(superseded_by.clone()),
                );
        }
        doc
    }
}
