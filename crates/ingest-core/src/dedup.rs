//! The Dedup & Merge Engine (component E). Runs an ordered, short-circuiting
//! lookup -- idempotency key, then source+external-id, then content dedup
//! hash, then fuzzy near-duplicate search -- and, for a confirmed match,
//! computes a trust-ranked field merge rather than blindly overwriting.
//!
//! Source+external-id is checked before the content hash: it's a stronger
//! identity signal (the source told us directly this is the same thing it
//! saw before) than two submissions merely normalizing to the same name,
//! venue and start time.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use ingest_model::{
    Event, EventId, IngestError, NearDuplicate, NewEvent, PlaceId, Repository, SourceId,
    ValidationWarning, WarningCode,
};

/// The outcome of the layered lookup.
pub enum Match {
    /// Same idempotency key, identical request hash: the caller is retrying
    /// a request we already completed. Safe to return the prior result
    /// without touching storage again.
    IdempotentReplay(EventId),
    /// Same idempotency key, different request hash: the caller reused a
    /// key for a materially different submission.
    IdempotencyConflict,
    /// Source+external-id or content dedup hash resolved to an existing
    /// event. Always merges rather than creating a duplicate row.
    ExactMatch(Event),
    /// Fuzzy search turned up similarly-named events at the same venue and
    /// time, above the configured threshold, but nothing exact. A new event
    /// is still created; the caller should attach a `PotentialDuplicate`
    /// warning and force review.
    NearDuplicates(Vec<NearDuplicate>),
    /// Nothing matched.
    New,
}

#[allow(clippy::too_many_arguments)]
pub async fn find_match(
    repo: &dyn Repository,
    idempotency_key: Option<&str>,
    request_hash: &str,
    source_id: Option<SourceId>,
    external_id: Option<&str>,
    dedup_hash: &str,
    venue_id: Option<PlaceId>,
    start: DateTime<Utc>,
    name: &str,
    near_duplicate_threshold: f64,
) -> Result<Match, IngestError> {
    if let Some(key) = idempotency_key {
        if let Some(existing) = repo.find_idempotency_key(key).await? {
            if existing.request_hash != request_hash {
                return Ok(Match::IdempotencyConflict);
            }
            return match existing.event_id {
                Some(id) => Ok(Match::IdempotentReplay(id)),
                // Key reserved by an in-flight submission that hasn't
                // resolved to an event yet; treat as a fresh attempt.
                None => Ok(Match::New),
            };
        }
    }

    if let (Some(source_id), Some(external_id)) = (source_id, external_id) {
        if let Some(event) = repo
            .find_event_by_source_external_id(source_id, external_id)
            .await?
        {
            return Ok(Match::ExactMatch(event));
        }
    }

    if let Some(event) = repo.find_event_by_dedup_hash(dedup_hash).await? {
        return Ok(Match::ExactMatch(event));
    }

    if near_duplicate_threshold > 0.0 {
        if let Some(venue_id) = venue_id {
            let candidates = repo
                .find_near_duplicates(venue_id, start, name, near_duplicate_threshold)
                .await?;
            if !candidates.is_empty() {
                return Ok(Match::NearDuplicates(candidates));
            }
        }
    }

    Ok(Match::New)
}

/// Builds a `PotentialDuplicate` warning naming the closest fuzzy match.
/// `candidates` must be non-empty and sorted descending by similarity.
pub fn near_duplicate_warning(candidates: &[NearDuplicate]) -> ValidationWarning {
    let top = &candidates[0];
    ValidationWarning::new(
        "name",
        format!(
            "{:.0}% similar to existing event \"{}\" ({})",
            top.similarity * 100.0,
            top.name,
            top.event_id
        ),
        WarningCode::PotentialDuplicate,
    )
}

/// Computes a sparse `EventUpdate` merging `incoming`'s resolved fields into
/// `existing`. When `incoming_trust > existing_trust` a non-empty incoming
/// value always wins; otherwise it only fills a field `existing` left blank.
/// An incoming value that is itself empty never overwrites or clears data
/// already on record, regardless of trust.
pub fn merge_fields(
    existing: &Event,
    incoming: &NewEvent,
    incoming_trust: i16,
    existing_trust: i16,
) -> ingest_model::EventUpdate {
    let overwrite = incoming_trust > existing_trust;
    let mut update = ingest_model::EventUpdate::default();

    if !incoming.description.trim().is_empty()
        && incoming.description != existing.description
        && (overwrite || Event::is_blank(&existing.description))
    {
        update.description = Some(incoming.description.clone());
    }

    if incoming.organizer_id.is_some()
        && incoming.organizer_id != existing.organizer_id
        && (overwrite || existing.organizer_id.is_none())
    {
        update.organizer_id = Some(incoming.organizer_id);
    }

    if incoming.venue_id.is_some()
        && incoming.venue_id != existing.venue_id
        && (overwrite || existing.venue_id.is_none())
    {
        update.venue_id = Some(incoming.venue_id);
    }

    if incoming.virtual_url.is_some()
        && incoming.virtual_url != existing.virtual_url
        && (overwrite || existing.virtual_url.is_none())
    {
        update.virtual_url = Some(incoming.virtual_url.clone());
    }

    if incoming.image_url.is_some()
        && incoming.image_url != existing.image_url
        && (overwrite || existing.image_url.is_none())
    {
        update.image_url = Some(incoming.image_url.clone());
    }

    if incoming.public_url.is_some()
        && incoming.public_url != existing.public_url
        && (overwrite || existing.public_url.is_none())
    {
        update.public_url = Some(incoming.public_url.clone());
    }

    if incoming.license_url.is_some()
        && incoming.license_url != existing.license_url
        && (overwrite || existing.license_url.is_none())
    {
        update.license_url = Some(incoming.license_url.clone());
    }

    if !incoming.keywords.is_empty() {
        let merged: BTreeSet<String> = existing
            .keywords
            .union(&incoming.keywords)
            .cloned()
            .collect();
        if merged != existing.keywords {
            update.keywords = Some(merged);
        }
    }

    if overwrite && incoming.confidence > existing.confidence {
        update.confidence = Some(incoming.confidence);
    }

    update
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use ingest_model::{EventDomain, EventLifecycle, LicenseStatus};

    fn sample_event() -> Event {
        Event {
            id: EventId::new(),
            name: "Jazz Night".to_string(),
            description: String::new(),
            lifecycle: EventLifecycle::Published,
            domain: EventDomain::Music,
            organizer_id: None,
            venue_id: None,
            virtual_url: None,
            image_url: None,
            public_url: None,
            keywords: BTreeSet::from(["jazz".to_string()]),
            license_url: None,
            license_status: LicenseStatus::Unknown,
            confidence: 0.5,
            dedup_hash: "hash".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            merged_into: None,
        }
    }

    fn sample_new_event() -> NewEvent {
        NewEvent {
            name: "Jazz Night".to_string(),
            description: "An evening of jazz.".to_string(),
            lifecycle: EventLifecycle::Published,
            domain: EventDomain::Music,
            organizer_id: None,
            venue_id: None,
            virtual_url: None,
            image_url: Some("https://example.com/a.png".to_string()),
            public_url: None,
            keywords: BTreeSet::from(["swing".to_string()]),
            license_url: None,
            license_status: LicenseStatus::Unknown,
            confidence: 0.9,
            dedup_hash: "hash".to_string(),
        }
    }

    #[test]
    fn low_trust_incoming_only_fills_gaps() {
        let existing = sample_event();
        let incoming = sample_new_event();
        let update = merge_fields(&existing, &incoming, 1, 5);
        // description was blank on the existing row, so it's filled in.
        assert_eq!(update.description.as_deref(), Some("An evening of jazz."));
        // image_url was also blank, so it's filled.
        assert_eq!(update.image_url, Some(Some("https://example.com/a.png".to_string())));
        // confidence is never lowered/raised on a non-overwrite merge.
        assert!(update.confidence.is_none());
        // keywords merge additively regardless of trust.
        assert_eq!(
            update.keywords,
            Some(BTreeSet::from(["jazz".to_string(), "swing".to_string()]))
        );
    }

    #[test]
    fn low_trust_incoming_never_clobbers_existing_content() {
        let mut existing = sample_event();
        existing.description = "Original description.".to_string();
        let incoming = sample_new_event();
        let update = merge_fields(&existing, &incoming, 1, 5);
        assert!(update.description.is_none());
    }

    #[test]
    fn higher_trust_incoming_overwrites_nonempty_fields() {
        let mut existing = sample_event();
        existing.description = "Stale description.".to_string();
        let incoming = sample_new_event();
        let update = merge_fields(&existing, &incoming, 5, 1);
        assert_eq!(update.description.as_deref(), Some("An evening of jazz."));
    }

    #[test]
    fn equal_trust_does_not_overwrite() {
        let mut existing = sample_event();
        existing.description = "Stale description.".to_string();
        let incoming = sample_new_event();
        let update = merge_fields(&existing, &incoming, 3, 3);
        assert!(update.description.is_none());
    }

    #[test]
    fn empty_incoming_value_never_overwrites() {
        let mut existing = sample_event();
        existing.description = "Stale description.".to_string();
        let mut incoming = sample_new_event();
        incoming.description = String::new();
        let update = merge_fields(&existing, &incoming, 9, 1);
        assert!(update.description.is_none());
    }
}
