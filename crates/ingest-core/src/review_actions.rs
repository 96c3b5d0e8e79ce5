//! Admin-triggered review transitions (approve / reject / merge /
//! fix-and-approve). Each wraps the event mutation, the review status
//! update, and (for merge) a tombstone write in one transaction -- the
//! surrounding HTTP/admin-UI layer only needs to supply the decision.

use chrono::{DateTime, Utc};

use ingest_model::{
    Event, EventId, EventLifecycle, EventUpdate, IngestError, NewEvent, Repository,
    ReviewQueueEntry, Tombstone,
};

use crate::dedup;
use crate::review;

fn event_to_new(event: &Event) -> NewEvent {
    NewEvent {
        name: event.name.clone(),
        description: event.description.clone(),
        lifecycle: event.lifecycle,
        domain: event.domain,
        organizer_id: event.organizer_id,
        venue_id: event.venue_id,
        virtual_url: event.virtual_url.clone(),
        image_url: event.image_url.clone(),
        public_url: event.public_url.clone(),
        keywords: event.keywords.clone(),
        license_url: event.license_url.clone(),
        license_status: event.license_status,
        confidence: event.confidence,
        dedup_hash: event.dedup_hash.clone(),
    }
}

fn event_uri(node_domain: &str, id: EventId) -> String {
    format!("https://{node_domain}/events/{id}")
}

/// Approves a pending entry: flips the event to `published`, marks the
/// entry approved.
pub async fn approve(repo: &dyn Repository, entry: &ReviewQueueEntry, reviewer: &str) -> Result<(), IngestError> {
    let update = review::approve(entry, reviewer)?;
    let mut txn = repo.begin().await?;
    let result: Result<(), IngestError> = async {
        txn.update_event(
            entry.event_id,
            EventUpdate {
                lifecycle: Some(EventLifecycle::Published),
                ..Default::default()
            },
        )
        .await?;
        txn.update_review_status(entry.id, update).await?;
        Ok(())
    }
    .await;
    match result {
        Ok(()) => txn.commit().await,
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}

/// Rejects a pending entry: drops the event to `draft` so it stops
/// claiming its dedup hash / source identity, freeing a corrected
/// resubmission to land as a brand new event.
pub async fn reject(
    repo: &dyn Repository,
    entry: &ReviewQueueEntry,
    reviewer: &str,
    reason: impl Into<String>,
) -> Result<(), IngestError> {
    let update = review::reject(entry, reviewer, reason)?;
    let mut txn = repo.begin().await?;
    let result: Result<(), IngestError> = async {
        txn.update_event(
            entry.event_id,
            EventUpdate {
                lifecycle: Some(EventLifecycle::Draft),
                ..Default::default()
            },
        )
        .await?;
        txn.update_review_status(entry.id, update).await?;
        Ok(())
    }
    .await;
    match result {
        Ok(()) => txn.commit().await,
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}

/// Merges a pending entry's event into an existing canonical `target`:
/// gap-fills the target from the duplicate's fields (trust 0 vs 0, so
/// only empty fields move), soft-deletes the duplicate, and tombstones it.
pub async fn merge_into(
    repo: &dyn Repository,
    entry: &ReviewQueueEntry,
    reviewer: &str,
    target: EventId,
    node_domain: &str,
    now: DateTime<Utc>,
) -> Result<(), IngestError> {
    let update = review::merge_into(entry, reviewer, target)?;
    let duplicate = repo
        .find_event_by_id(entry.event_id)
        .await?
        .ok_or_else(|| IngestError::NotFound(format!("event {}", entry.event_id)))?;
    let canonical = repo
        .find_event_by_id(target)
        .await?
        .ok_or_else(|| IngestError::NotFound(format!("event {target}")))?;
    let gap_fill = dedup::merge_fields(&canonical, &event_to_new(&duplicate), 0, 0);

    let mut txn = repo.begin().await?;
    let result: Result<(), IngestError> = async {
        if !gap_fill.is_empty() {
            txn.update_event(target, gap_fill).await?;
        }
        txn.update_event(
            entry.event_id,
            EventUpdate {
                lifecycle: Some(EventLifecycle::Deleted),
                merged_into: Some(Some(target)),
                ..Default::default()
            },
        )
        .await?;
        txn.update_review_status(entry.id, update).await?;
        txn.create_tombstone(Tombstone {
            event_id: duplicate.id,
            event_uri: event_uri(node_domain, duplicate.id),
            name: duplicate.name.clone(),
            deleted_at: now,
            reason: "merged into canonical event".to_string(),
            superseded_by: Some(event_uri(node_domain, target)),
        })
        .await?;
        Ok(())
    }
    .await;
    match result {
        Ok(()) => txn.commit().await,
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}

/// Corrects an event's primary occurrence dates and approves the entry in
/// one shot -- the common "the scraper swapped start/end, admin fixes it"
/// workflow.
pub async fn fix_and_approve(
    repo: &dyn Repository,
    entry: &ReviewQueueEntry,
    reviewer: &str,
    corrected_start: DateTime<Utc>,
    corrected_end: Option<DateTime<Utc>>,
) -> Result<(), IngestError> {
    let update = review::approve(entry, reviewer)?;
    let mut txn = repo.begin().await?;
    let result: Result<(), IngestError> = async {
        txn.fix_occurrence_dates(entry.event_id, corrected_start, corrected_end)
            .await?;
        txn.update_event(
            entry.event_id,
            EventUpdate {
                lifecycle: Some(EventLifecycle::Published),
                ..Default::default()
            },
        )
        .await?;
        txn.update_review_status(entry.id, update).await?;
        Ok(())
    }
    .await;
    match result {
        Ok(()) => txn.commit().await,
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}

/// Soft-deletes a published event and records its tombstone.
pub async fn delete(
    repo: &dyn Repository,
    event: &Event,
    reason: impl Into<String>,
    node_domain: &str,
    now: DateTime<Utc>,
) -> Result<(), IngestError> {
    let mut txn = repo.begin().await?;
    let result: Result<(), IngestError> = async {
        txn.update_event(
            event.id,
            EventUpdate {
                lifecycle: Some(EventLifecycle::Deleted),
                ..Default::default()
            },
        )
        .await?;
        txn.create_tombstone(Tombstone {
            event_id: event.id,
            event_uri: event_uri(node_domain, event.id),
            name: event.name.clone(),
            deleted_at: now,
            reason: reason.into(),
            superseded_by: None,
        })
        .await?;
        Ok(())
    }
    .await;
    match result {
        Ok(()) => txn.commit().await,
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::MockRepo;
    use chrono::TimeZone;
    use ingest_model::{EventDomain, EventLifecycle, LicenseStatus, ReviewEntryId, ReviewStatus};
    use std::collections::BTreeSet;

    fn sample_event(id: EventId) -> Event {
        Event {
            id,
            name: "Jazz Night".to_string(),
            description: String::new(),
            lifecycle: EventLifecycle::PendingReview,
            domain: EventDomain::Music,
            organizer_id: None,
            venue_id: None,
            virtual_url: None,
            image_url: None,
            public_url: None,
            keywords: BTreeSet::new(),
            license_url: None,
            license_status: LicenseStatus::Unknown,
            confidence: 0.5,
            dedup_hash: "hash".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            merged_into: None,
        }
    }

    fn sample_entry(event_id: EventId) -> ReviewQueueEntry {
        ReviewQueueEntry {
            id: ReviewEntryId::new(),
            event_id,
            original_payload: b"{}".to_vec(),
            normalized_payload: b"{}".to_vec(),
            warnings: Vec::new(),
            source_id: None,
            source_external_id: None,
            dedup_hash: Some("hash".to_string()),
            start: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            end: None,
            status: ReviewStatus::Pending,
            reviewer: None,
            reviewed_at: None,
            rejection_reason: None,
            merged_into: None,
        }
    }

    #[tokio::test]
    async fn approving_publishes_the_event() {
        let repo = MockRepo::default();
        let event = sample_event(EventId::new());
        repo.seed_event(event.clone());
        let entry = sample_entry(event.id);
        repo.seed_review_entry(entry.clone());

        approve(&repo, &entry, "admin").await.unwrap();

        let updated = repo.find_event_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.lifecycle, EventLifecycle::Published);
    }

    #[tokio::test]
    async fn rejecting_drops_the_event_to_draft() {
        let repo = MockRepo::default();
        let event = sample_event(EventId::new());
        repo.seed_event(event.clone());
        let entry = sample_entry(event.id);
        repo.seed_review_entry(entry.clone());

        reject(&repo, &entry, "admin", "spam").await.unwrap();

        let updated = repo.find_event_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(updated.lifecycle, EventLifecycle::Draft);
    }

    #[tokio::test]
    async fn merging_gap_fills_the_canonical_event_and_deletes_the_duplicate() {
        let repo = MockRepo::default();
        let mut canonical = sample_event(EventId::new());
        canonical.lifecycle = EventLifecycle::Published;
        canonical.description = String::new();
        repo.seed_event(canonical.clone());

        let mut duplicate = sample_event(EventId::new());
        duplicate.description = "An evening of jazz.".to_string();
        repo.seed_event(duplicate.clone());
        let entry = sample_entry(duplicate.id);
        repo.seed_review_entry(entry.clone());

        merge_into(&repo, &entry, "admin", canonical.id, "example.org", Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap())
            .await
            .unwrap();

        let updated_canonical = repo.find_event_by_id(canonical.id).await.unwrap().unwrap();
        assert_eq!(updated_canonical.description, "An evening of jazz.");
        let updated_duplicate = repo.find_event_by_id(duplicate.id).await.unwrap().unwrap();
        assert_eq!(updated_duplicate.merged_into, Some(canonical.id));
        assert_eq!(updated_duplicate.lifecycle, EventLifecycle::Deleted);
    }
}
