//! The Transactional Persister (component G): runs decode -> normalize ->
//! validate -> fingerprint -> dedup/merge, then commits the result -- a new
//! event, a merge into an existing one, or nothing at all -- as a single
//! transaction. A hard error anywhere before `repo.begin()` never touches
//! storage; a hard error after it rolls the transaction back.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use ingest_model::{
    EventId, EventLifecycle, IngestError, NewEvent, NewEventSource, NewOccurrence, NewOrganization,
    NewPlace, NewReviewEntry, NewSource, PlaceId, Repository, ReviewStatus, Source, Transaction,
    ValidationWarning, WarningCode,
};

use crate::config::IngestConfig;
use crate::dedup::{self, Match};
use crate::decode;
use crate::fingerprint;
use crate::normalize;
use crate::review;
use crate::validate::{self, ValidatedEvent};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub event_id: EventId,
    pub needs_review: bool,
    /// `false` for an idempotent replay or a merge into an existing event.
    pub created: bool,
}

/// A fully-resolved occurrence ready to persist, minus the event id it will
/// be attached to (which doesn't exist until `create_event` runs).
struct OccurrencePlan {
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    timezone: String,
    door_time: Option<DateTime<Utc>>,
    venue_id: Option<PlaceId>,
    virtual_url: Option<String>,
    ticket_url: Option<String>,
    price_min: Option<f64>,
    price_max: Option<f64>,
    currency: Option<String>,
}

impl OccurrencePlan {
    fn into_new(self, event_id: EventId) -> NewOccurrence {
        NewOccurrence {
            event_id,
            start: self.start,
            end: self.end,
            timezone: self.timezone,
            door_time: self.door_time,
            venue_id: self.venue_id,
            virtual_url: self.virtual_url,
            ticket_url: self.ticket_url,
            price_min: self.price_min,
            price_max: self.price_max,
            currency: self.currency,
        }
    }
}

/// Parses an event-level or occurrence-level offer price. Empty is "no
/// price"; `free` (any case) is `0.0`; a leading currency symbol is
/// stripped before parsing. Anything else that doesn't parse as a float is
/// a hard error -- unlike a missing price, a garbled one signals bad data.
fn parse_price(raw: &str) -> Result<Option<f64>, IngestError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.eq_ignore_ascii_case("free") {
        return Ok(Some(0.0));
    }
    let stripped = trimmed.trim_start_matches(['$', '\u{20ac}', '\u{a3}', '\u{a5}']).trim();
    stripped
        .parse::<f64>()
        .map(Some)
        .map_err(|_| IngestError::validation("offers.price", format!("could not parse price {raw:?}")))
}

async fn resolve_occurrence_plans(
    repo: &dyn Repository,
    validated: &ValidatedEvent,
    default_venue_id: Option<PlaceId>,
    config: &IngestConfig,
) -> Result<Vec<OccurrencePlan>, IngestError> {
    let mut plans = Vec::new();

    let primary_chronological = validated.end.map_or(true, |end| end >= validated.start);
    if primary_chronological {
        let (price, ticket_url) = match &validated.offer {
            Some(offer) => (
                offer.price.as_deref().map(parse_price).transpose()?.flatten(),
                offer.url.clone(),
            ),
            None => (None, None),
        };
        plans.push(OccurrencePlan {
            start: validated.start,
            end: validated.end,
            timezone: config.default_timezone.clone(),
            door_time: validated.door_time,
            venue_id: default_venue_id,
            virtual_url: validated.virtual_url.clone(),
            ticket_url,
            price_min: price,
            price_max: price,
            currency: None,
        });
    } else {
        tracing::warn!("skipping primary occurrence: endDate precedes startDate after normalization");
    }

    for (idx, occ) in validated.occurrences.iter().enumerate() {
        if let Some(end) = occ.end {
            if end < occ.start {
                tracing::warn!(idx, "skipping occurrence: endDate precedes startDate");
                continue;
            }
        }
        let venue_id = match &occ.location {
            Some(loc) if !loc.name.as_deref().unwrap_or("").trim().is_empty() => {
                let place = repo
                    .upsert_place(NewPlace {
                        name: loc.name.clone().unwrap_or_default(),
                        locality: None,
                        address: loc.address.clone(),
                        latitude: loc.latitude,
                        longitude: loc.longitude,
                    })
                    .await?;
                Some(place.id)
            }
            _ => default_venue_id,
        };
        let price_min = occ.price_min.as_deref().map(parse_price).transpose()?.flatten();
        let price_max = occ.price_max.as_deref().map(parse_price).transpose()?.flatten();
        plans.push(OccurrencePlan {
            start: occ.start,
            end: occ.end,
            timezone: occ
                .timezone
                .clone()
                .unwrap_or_else(|| config.default_timezone.clone()),
            door_time: occ.door_time,
            venue_id,
            virtual_url: occ.virtual_url.clone(),
            ticket_url: occ.ticket_url.clone(),
            price_min,
            price_max,
            currency: occ.currency.clone(),
        });
    }

    Ok(plans)
}

#[allow(clippy::too_many_arguments)]
async fn do_merge(
    txn: &mut dyn Transaction,
    existing_id: EventId,
    update: ingest_model::EventUpdate,
    source: Option<&Source>,
    external_id: Option<&str>,
    raw_payload: &serde_json::Value,
    request_hash: &str,
    idempotency_key: Option<&str>,
) -> Result<(), IngestError> {
    if !update.is_empty() {
        txn.update_event(existing_id, update).await?;
    }
    if let Some(src) = source {
        txn.create_event_source(NewEventSource {
            event_id: existing_id,
            source_id: src.id,
            external_id: external_id.map(str::to_string),
            payload: raw_payload.clone(),
            payload_hash: request_hash.to_string(),
        })
        .await?;
    }
    if let Some(key) = idempotency_key {
        txn.upsert_idempotency_key(key, request_hash, Some(existing_id)).await?;
    }
    Ok(())
}

async fn do_reconcile(
    txn: &mut dyn Transaction,
    event_id: EventId,
    review_id: ingest_model::ReviewEntryId,
    approved: bool,
    update: ingest_model::ReviewStatusUpdate,
) -> Result<(), IngestError> {
    if approved {
        txn.update_event(
            event_id,
            ingest_model::EventUpdate {
                lifecycle: Some(EventLifecycle::Published),
                ..Default::default()
            },
        )
        .await?;
    }
    txn.update_review_status(review_id, update).await?;
    Ok(())
}

struct CreatePlan {
    new_event: NewEvent,
    occurrences: Vec<OccurrencePlan>,
    source: Option<Source>,
    external_id: Option<String>,
    raw_payload: serde_json::Value,
    request_hash: String,
    needs_review: bool,
    warnings: Vec<ValidationWarning>,
    dedup_hash: String,
    normalized_payload: Vec<u8>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    idempotency_key: Option<String>,
}

async fn do_create(txn: &mut dyn Transaction, plan: CreatePlan) -> Result<EventId, IngestError> {
    let event = txn.create_event(plan.new_event).await?;
    for occurrence in plan.occurrences {
        txn.create_occurrence(occurrence.into_new(event.id)).await?;
    }
    if let Some(src) = &plan.source {
        txn.create_event_source(NewEventSource {
            event_id: event.id,
            source_id: src.id,
            external_id: plan.external_id.clone(),
            payload: plan.raw_payload.clone(),
            payload_hash: plan.request_hash.clone(),
        })
        .await?;
    }
    if plan.needs_review {
        txn.create_review_entry(NewReviewEntry {
            event_id: event.id,
            original_payload: serde_json::to_vec(&plan.raw_payload)
                .expect("serde_json::Value always serializes"),
            normalized_payload: plan.normalized_payload,
            warnings: plan.warnings,
            source_id: plan.source.as_ref().map(|s| s.id),
            source_external_id: plan.external_id.clone(),
            dedup_hash: Some(plan.dedup_hash),
            start: plan.start,
            end: plan.end,
        })
        .await?;
    }
    if let Some(key) = &plan.idempotency_key {
        txn.upsert_idempotency_key(key, &plan.request_hash, Some(event.id)).await?;
    }
    Ok(event.id)
}

pub async fn ingest(
    repo: &dyn Repository,
    config: &IngestConfig,
    raw_payload: &serde_json::Value,
    idempotency_key: Option<&str>,
    link_check_failed: bool,
    now: DateTime<Utc>,
) -> Result<IngestOutcome, IngestError> {
    let decoded =
        decode::decode(raw_payload).map_err(|e| IngestError::validation("payload", e.to_string()))?;
    let normalized = normalize::normalize(decoded.clone());
    let request_hash = fingerprint::request_hash(&normalized);
    let validated = validate::validate(&normalized, Some(&decoded), config, now, link_check_failed)?;

    let source = match &validated.source {
        Some(desc) => Some(
            repo.upsert_source(NewSource {
                name: desc.name.clone().unwrap_or_default(),
                base_url: desc.base_url.clone().unwrap_or_default(),
                license: desc.license.clone(),
                trust_level: desc.trust_level.unwrap_or(0),
            })
            .await?,
        ),
        None => None,
    };
    let external_id = validated
        .source
        .as_ref()
        .and_then(|s| s.external_id.clone());

    let venue = match &validated.location {
        Some(loc) if !loc.name.as_deref().unwrap_or("").trim().is_empty() => Some(
            repo.upsert_place(NewPlace {
                name: loc.name.clone().unwrap_or_default(),
                locality: None,
                address: loc.address.clone(),
                latitude: loc.latitude,
                longitude: loc.longitude,
            })
            .await?,
        ),
        _ => None,
    };

    let organizer = match &validated.organizer {
        Some(org) if !org.name.as_deref().unwrap_or("").trim().is_empty() => Some(
            repo.upsert_organization(NewOrganization {
                name: org.name.clone().unwrap_or_default(),
                locality: None,
                url: org.url.clone(),
            })
            .await?,
        ),
        _ => None,
    };

    let venue_key = fingerprint::venue_key(validated.location.as_ref(), validated.virtual_url.as_deref());
    let dedup_hash = fingerprint::dedup_hash(&validated.name, &venue_key, &validated.start.to_rfc3339());

    let matched = dedup::find_match(
        repo,
        idempotency_key,
        &request_hash,
        source.as_ref().map(|s| s.id),
        external_id.as_deref(),
        &dedup_hash,
        venue.as_ref().map(|v| v.id),
        validated.start,
        &validated.name,
        config.near_duplicate_threshold,
    )
    .await?;

    if let Match::IdempotentReplay(event_id) = matched {
        return Ok(IngestOutcome {
            event_id,
            needs_review: false,
            created: false,
        });
    }
    if matches!(matched, Match::IdempotencyConflict) {
        return Err(IngestError::Conflict);
    }

    let normalized_payload =
        serde_json::to_vec(&normalized).expect("EventInput always serializes");

    let mut warnings = validated.warnings.clone();
    let mut needs_review = validated.needs_review;
    if let Match::NearDuplicates(ref candidates) = matched {
        warnings.push(dedup::near_duplicate_warning(candidates));
        needs_review = true;
    }

    // A review entry sharing this submission's identity (dedup hash, or
    // source + external-id) overrides the dedup engine's own verdict: a
    // still-`rejected` entry may bounce the resubmission outright, and a
    // still-`pending` one is reconciled in place rather than treated as a
    // fresh event, even if it happens to still be the dedup engine's
    // `ExactMatch` target.
    if needs_review {
        if let Some(entry) = repo
            .find_review_entry(Some(&dedup_hash), source.as_ref().map(|s| s.id), external_id.as_deref())
            .await?
        {
            match entry.status {
                ReviewStatus::Rejected => {
                    let event_ended = entry.end.unwrap_or(entry.start) < now;
                    let new_codes: BTreeSet<WarningCode> = warnings.iter().map(|w| w.code).collect();
                    review::check_rejected_resubmission(&entry, event_ended, &new_codes)?;
                }
                ReviewStatus::Pending => {
                    let update = review::reconcile_resubmission(
                        &entry,
                        &warnings,
                        "system",
                        (
                            serde_json::to_vec(raw_payload).expect("serde_json::Value always serializes"),
                            normalized_payload.clone(),
                            warnings.clone(),
                        ),
                    );
                    let approved = update.status == ReviewStatus::Approved;
                    let mut txn = repo.begin().await?;
                    let result = do_reconcile(txn.as_mut(), entry.event_id, entry.id, approved, update).await;
                    return match result {
                        Ok(()) => {
                            txn.commit().await?;
                            Ok(IngestOutcome {
                                event_id: entry.event_id,
                                needs_review: !approved,
                                created: false,
                            })
                        }
                        Err(e) => {
                            txn.rollback().await?;
                            Err(e)
                        }
                    };
                }
                ReviewStatus::Approved | ReviewStatus::Merged => {}
            }
        }
    }

    match matched {
        Match::ExactMatch(existing) => {
            let incoming_trust = source.as_ref().map(|s| s.trust_level).unwrap_or(0);
            let existing_trust = repo
                .find_primary_source(existing.id)
                .await?
                .map(|s| s.trust_level)
                .unwrap_or(0);

            let resolved = NewEvent {
                name: validated.name.clone(),
                description: validated.description.clone(),
                lifecycle: existing.lifecycle,
                domain: validated.domain,
                organizer_id: organizer.as_ref().map(|o| o.id),
                venue_id: venue.as_ref().map(|v| v.id),
                virtual_url: validated.virtual_url.clone(),
                image_url: validated.image_url.clone(),
                public_url: validated.public_url.clone(),
                keywords: validated.keywords.iter().cloned().collect(),
                license_url: validated.license_url.clone(),
                license_status: validated.license_status,
                confidence: validated.confidence,
                dedup_hash: dedup_hash.clone(),
            };
            let update = dedup::merge_fields(&existing, &resolved, incoming_trust, existing_trust);

            let mut txn = repo.begin().await?;
            let result = do_merge(
                txn.as_mut(),
                existing.id,
                update,
                source.as_ref(),
                external_id.as_deref(),
                raw_payload,
                &request_hash,
                idempotency_key,
            )
            .await;
            match result {
                Ok(()) => {
                    txn.commit().await?;
                    Ok(IngestOutcome {
                        event_id: existing.id,
                        needs_review,
                        created: false,
                    })
                }
                Err(e) => {
                    txn.rollback().await?;
                    Err(e)
                }
            }
        }
        Match::New | Match::NearDuplicates(_) => {
            let lifecycle = if needs_review {
                EventLifecycle::PendingReview
            } else {
                EventLifecycle::Published
            };

            let new_event = NewEvent {
                name: validated.name.clone(),
                description: validated.description.clone(),
                lifecycle,
                domain: validated.domain,
                organizer_id: organizer.as_ref().map(|o| o.id),
                venue_id: venue.as_ref().map(|v| v.id),
                virtual_url: validated.virtual_url.clone(),
                image_url: validated.image_url.clone(),
                public_url: validated.public_url.clone(),
                keywords: validated.keywords.iter().cloned().collect(),
                license_url: validated.license_url.clone(),
                license_status: validated.license_status,
                confidence: validated.confidence,
                dedup_hash: dedup_hash.clone(),
            };

            let occurrences =
                resolve_occurrence_plans(repo, &validated, venue.as_ref().map(|v| v.id), config).await?;

            let plan = CreatePlan {
                new_event,
                occurrences,
                source: source.clone(),
                external_id: external_id.clone(),
                raw_payload: raw_payload.clone(),
                request_hash: request_hash.clone(),
                needs_review,
                warnings,
                dedup_hash: dedup_hash.clone(),
                normalized_payload,
                start: validated.start,
                end: validated.end,
                idempotency_key: idempotency_key.map(str::to_string),
            };

            let mut txn = repo.begin().await?;
            let result = do_create(txn.as_mut(), plan).await;
            match result {
                Ok(event_id) => {
                    txn.commit().await?;
                    Ok(IngestOutcome {
                        event_id,
                        needs_review,
                        created: true,
                    })
                }
                Err(e) => {
                    txn.rollback().await?;
                    Err(e)
                }
            }
        }
        Match::IdempotentReplay(_) | Match::IdempotencyConflict => {
            unreachable!("handled above")
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_support::MockRepo;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn valid_payload() -> serde_json::Value {
        json!({
            "name": "Jazz Night",
            "description": "An evening of jazz.",
            "startDate": "2026-02-01T20:00:00-05:00",
            "location": {"name": "Club X", "address": "1 Main St"},
        })
    }

    #[tokio::test]
    async fn fresh_event_is_created_and_published_when_clean() {
        let repo = MockRepo::default();
        let config = IngestConfig::default();
        let outcome = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();
        assert!(outcome.created);
        assert!(!outcome.needs_review);
        let event = repo.find_event_by_id(outcome.event_id).await.unwrap().unwrap();
        assert_eq!(event.lifecycle, EventLifecycle::Published);
    }

    #[tokio::test]
    async fn event_needing_review_is_filed_pending_with_a_review_entry() {
        let repo = MockRepo::default();
        let config = IngestConfig {
            require_image: true,
            ..IngestConfig::default()
        };
        let outcome = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();
        assert!(outcome.needs_review);
        let event = repo.find_event_by_id(outcome.event_id).await.unwrap().unwrap();
        assert_eq!(event.lifecycle, EventLifecycle::PendingReview);
        assert_eq!(repo.state.lock().unwrap().review_entries.len(), 1);
    }

    #[tokio::test]
    async fn repeated_idempotency_key_replays_without_duplicating() {
        let repo = MockRepo::default();
        let config = IngestConfig::default();
        let first = ingest(&repo, &config, &valid_payload(), Some("key-1"), false, now())
            .await
            .unwrap();
        let second = ingest(&repo, &config, &valid_payload(), Some("key-1"), false, now())
            .await
            .unwrap();
        assert_eq!(first.event_id, second.event_id);
        assert!(!second.created);
        assert_eq!(repo.state.lock().unwrap().events.len(), 1);
    }

    #[tokio::test]
    async fn reused_idempotency_key_with_different_payload_conflicts() {
        let repo = MockRepo::default();
        let config = IngestConfig::default();
        ingest(&repo, &config, &valid_payload(), Some("key-1"), false, now())
            .await
            .unwrap();
        let mut other = valid_payload();
        other["name"] = json!("Rock Night");
        let err = ingest(&repo, &config, &other, Some("key-1"), false, now())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Conflict));
    }

    #[tokio::test]
    async fn resubmission_with_same_content_merges_into_existing_event() {
        let repo = MockRepo::default();
        let config = IngestConfig::default();
        let first = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();
        let second = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();
        assert_eq!(first.event_id, second.event_id);
        assert!(!second.created);
        assert_eq!(repo.state.lock().unwrap().events.len(), 1);
    }

    #[tokio::test]
    async fn invalid_payload_never_touches_storage() {
        let repo = MockRepo::default();
        let config = IngestConfig::default();
        let mut bad = valid_payload();
        bad["name"] = json!("");
        let err = ingest(&repo, &config, &bad, None, false, now()).await.unwrap_err();
        assert!(matches!(err, IngestError::Validation { .. }));
        assert!(repo.state.lock().unwrap().events.is_empty());
    }

    #[tokio::test]
    async fn pending_resubmission_with_fix_auto_approves_in_place() {
        let repo = MockRepo::default();
        let config = IngestConfig {
            require_image: true,
            ..IngestConfig::default()
        };
        let first = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();
        assert!(first.needs_review);

        let mut fixed = valid_payload();
        fixed["image"] = json!("https://example.com/a.png");
        let second = ingest(&repo, &config, &fixed, None, false, now()).await.unwrap();

        assert_eq!(second.event_id, first.event_id);
        assert!(!second.created);
        assert!(!second.needs_review);
        let event = repo.find_event_by_id(first.event_id).await.unwrap().unwrap();
        assert_eq!(event.lifecycle, EventLifecycle::Published);
        let entries = repo.state.lock().unwrap().review_entries.clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, ReviewStatus::Approved);
    }

    #[tokio::test]
    async fn pending_resubmission_still_missing_image_stays_pending() {
        let repo = MockRepo::default();
        let config = IngestConfig {
            require_image: true,
            ..IngestConfig::default()
        };
        let first = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();

        let second = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();

        assert_eq!(second.event_id, first.event_id);
        assert!(second.needs_review);
        let event = repo.find_event_by_id(first.event_id).await.unwrap().unwrap();
        assert_eq!(event.lifecycle, EventLifecycle::PendingReview);
    }

    #[tokio::test]
    async fn resubmission_rejected_for_the_same_reason_is_bounced() {
        let repo = MockRepo::default();
        let config = IngestConfig {
            require_image: true,
            ..IngestConfig::default()
        };
        let first = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();

        {
            let mut state = repo.state.lock().unwrap();
            state.events.get_mut(&first.event_id).unwrap().lifecycle = EventLifecycle::Draft;
            let entry = state
                .review_entries
                .iter_mut()
                .find(|e| e.event_id == first.event_id)
                .unwrap();
            entry.status = ReviewStatus::Rejected;
            entry.reviewer = Some("admin".to_string());
            entry.reviewed_at = Some(now());
            entry.rejection_reason = Some("needs an image".to_string());
        }

        let err = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::PreviouslyRejected { .. }));
    }

    #[tokio::test]
    async fn resubmission_fixing_a_rejected_complaint_creates_a_fresh_event() {
        let repo = MockRepo::default();
        let config = IngestConfig {
            require_image: true,
            ..IngestConfig::default()
        };
        let first = ingest(&repo, &config, &valid_payload(), None, false, now())
            .await
            .unwrap();

        {
            let mut state = repo.state.lock().unwrap();
            state.events.get_mut(&first.event_id).unwrap().lifecycle = EventLifecycle::Draft;
            let entry = state
                .review_entries
                .iter_mut()
                .find(|e| e.event_id == first.event_id)
                .unwrap();
            entry.status = ReviewStatus::Rejected;
            entry.reviewer = Some("admin".to_string());
            entry.reviewed_at = Some(now());
            entry.rejection_reason = Some("needs an image".to_string());
        }

        let mut fixed = valid_payload();
        fixed["image"] = json!("https://example.com/a.png");
        let second = ingest(&repo, &config, &fixed, None, false, now()).await.unwrap();

        assert!(second.created);
        assert_ne!(second.event_id, first.event_id);
        assert!(!second.needs_review);
    }
}
