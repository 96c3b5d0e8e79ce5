//! An in-memory `Repository`/`Transaction` pair shared by the unit tests of
//! this crate's orchestration modules (`ingest`, `review_actions`). Not a
//! faithful model of transactional isolation -- each mutation lands in a
//! shared `Mutex`-guarded map immediately -- just enough behavior for the
//! orchestrator logic above it to be exercised without a real database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ingest_model::{
    Event, EventId, EventUpdate, IdempotencyKey, IngestError, NearDuplicate, NewEvent,
    NewEventSource, NewOccurrence, NewOrganization, NewPlace, NewReviewEntry, NewSource,
    Occurrence, Organization, Place, PlaceId, Repository, ReviewQueueEntry, ReviewStatus,
    ReviewStatusUpdate, Source, SourceId, Tombstone, Transaction,
};

#[derive(Default)]
pub(crate) struct MockState {
    pub(crate) events: HashMap<EventId, Event>,
    pub(crate) sources: HashMap<String, Source>,
    pub(crate) places: HashMap<String, Place>,
    pub(crate) organizations: HashMap<String, Organization>,
    pub(crate) idempotency_keys: HashMap<String, IdempotencyKey>,
    pub(crate) review_entries: Vec<ReviewQueueEntry>,
    pub(crate) external_ids: HashMap<(SourceId, String), EventId>,
    pub(crate) primary_source: HashMap<EventId, SourceId>,
    pub(crate) occurrences: Vec<Occurrence>,
}

#[derive(Default)]
pub(crate) struct MockRepo {
    pub(crate) state: Mutex<MockState>,
}

impl MockRepo {
    pub(crate) fn seed_event(&self, event: Event) {
        self.state.lock().unwrap().events.insert(event.id, event);
    }

    pub(crate) fn seed_review_entry(&self, entry: ReviewQueueEntry) {
        self.state.lock().unwrap().review_entries.push(entry);
    }
}

pub(crate) struct MockTxn<'a> {
    repo: &'a MockRepo,
}

#[async_trait]
impl Repository for MockRepo {
    async fn find_event_by_id(&self, id: EventId) -> Result<Option<Event>, IngestError> {
        Ok(self.state.lock().unwrap().events.get(&id).cloned())
    }

    async fn find_event_by_dedup_hash(&self, hash: &str) -> Result<Option<Event>, IngestError> {
        use ingest_model::EventLifecycle;
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .values()
            .find(|e| {
                e.dedup_hash == hash
                    && matches!(e.lifecycle, EventLifecycle::Published | EventLifecycle::PendingReview)
                    && e.merged_into.is_none()
            })
            .cloned())
    }

    async fn find_event_by_source_external_id(
        &self,
        source_id: SourceId,
        external_id: &str,
    ) -> Result<Option<Event>, IngestError> {
        use ingest_model::EventLifecycle;
        let state = self.state.lock().unwrap();
        Ok(state
            .external_ids
            .get(&(source_id, external_id.to_string()))
            .and_then(|id| state.events.get(id))
            .filter(|e| {
                matches!(e.lifecycle, EventLifecycle::Published | EventLifecycle::PendingReview)
                    && e.merged_into.is_none()
            })
            .cloned())
    }

    async fn find_idempotency_key(&self, key: &str) -> Result<Option<IdempotencyKey>, IngestError> {
        Ok(self.state.lock().unwrap().idempotency_keys.get(key).cloned())
    }

    async fn find_primary_source(&self, event_id: EventId) -> Result<Option<Source>, IngestError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .primary_source
            .get(&event_id)
            .and_then(|sid| state.sources.values().find(|s| s.id == *sid))
            .cloned())
    }

    async fn find_review_entry(
        &self,
        dedup_hash: Option<&str>,
        source_id: Option<SourceId>,
        external_id: Option<&str>,
    ) -> Result<Option<ReviewQueueEntry>, IngestError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .review_entries
            .iter()
            .find(|e| {
                (dedup_hash.is_some() && e.dedup_hash.as_deref() == dedup_hash)
                    || (source_id.is_some()
                        && e.source_id == source_id
                        && e.source_external_id.as_deref() == external_id)
            })
            .cloned())
    }

    async fn find_near_duplicates(
        &self,
        _venue_id: PlaceId,
        _start: DateTime<Utc>,
        _name: &str,
        _threshold: f64,
    ) -> Result<Vec<NearDuplicate>, IngestError> {
        Ok(Vec::new())
    }

    async fn upsert_source(&self, new: NewSource) -> Result<Source, IngestError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.sources.get(&new.base_url) {
            return Ok(existing.clone());
        }
        let source = Source {
            id: ingest_model::SourceId::new(),
            name: new.name,
            base_url: new.base_url.clone(),
            license: new.license,
            trust_level: new.trust_level,
        };
        state.sources.insert(new.base_url, source.clone());
        Ok(source)
    }

    async fn upsert_place(&self, new: NewPlace) -> Result<Place, IngestError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.places.get(&new.name) {
            return Ok(existing.clone());
        }
        let place = Place {
            id: PlaceId::new(),
            name: new.name.clone(),
            locality: new.locality,
            address: new.address,
            latitude: new.latitude,
            longitude: new.longitude,
        };
        state.places.insert(new.name, place.clone());
        Ok(place)
    }

    async fn upsert_organization(&self, new: NewOrganization) -> Result<Organization, IngestError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.organizations.get(&new.name) {
            return Ok(existing.clone());
        }
        let org = Organization {
            id: ingest_model::OrganizationId::new(),
            name: new.name.clone(),
            locality: new.locality,
            url: new.url,
        };
        state.organizations.insert(new.name, org.clone());
        Ok(org)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, IngestError> {
        Ok(Box::new(MockTxn { repo: self }))
    }
}

#[async_trait]
impl<'a> Transaction for MockTxn<'a> {
    async fn create_event(&mut self, new: NewEvent) -> Result<Event, IngestError> {
        let now = "2026-01-01T00:00:00Z".parse().unwrap();
        let event = Event {
            id: EventId::new(),
            name: new.name,
            description: new.description,
            lifecycle: new.lifecycle,
            domain: new.domain,
            organizer_id: new.organizer_id,
            venue_id: new.venue_id,
            virtual_url: new.virtual_url,
            image_url: new.image_url,
            public_url: new.public_url,
            keywords: new.keywords,
            license_url: new.license_url,
            license_status: new.license_status,
            confidence: new.confidence,
            dedup_hash: new.dedup_hash,
            created_at: now,
            updated_at: now,
            merged_into: None,
        };
        self.repo
            .state
            .lock()
            .unwrap()
            .events
            .insert(event.id, event.clone());
        Ok(event)
    }

    async fn create_occurrence(&mut self, new: NewOccurrence) -> Result<(), IngestError> {
        self.repo.state.lock().unwrap().occurrences.push(Occurrence {
            event_id: new.event_id,
            start: new.start,
            end: new.end,
            timezone: new.timezone,
            door_time: new.door_time,
            venue_id: new.venue_id,
            virtual_url: new.virtual_url,
            ticket_url: new.ticket_url,
            price_min: new.price_min,
            price_max: new.price_max,
            currency: new.currency,
        });
        Ok(())
    }

    async fn create_event_source(&mut self, new: NewEventSource) -> Result<(), IngestError> {
        let mut state = self.repo.state.lock().unwrap();
        if let Some(ext) = &new.external_id {
            state
                .external_ids
                .insert((new.source_id, ext.clone()), new.event_id);
        }
        state.primary_source.insert(new.event_id, new.source_id);
        Ok(())
    }

    async fn create_review_entry(&mut self, new: NewReviewEntry) -> Result<ReviewQueueEntry, IngestError> {
        let entry = ReviewQueueEntry {
            id: ingest_model::ReviewEntryId::new(),
            event_id: new.event_id,
            original_payload: new.original_payload,
            normalized_payload: new.normalized_payload,
            warnings: new.warnings,
            source_id: new.source_id,
            source_external_id: new.source_external_id,
            dedup_hash: new.dedup_hash,
            start: new.start,
            end: new.end,
            status: ReviewStatus::Pending,
            reviewer: None,
            reviewed_at: None,
            rejection_reason: None,
            merged_into: None,
        };
        self.repo.state.lock().unwrap().review_entries.push(entry.clone());
        Ok(entry)
    }

    async fn upsert_idempotency_key(
        &mut self,
        key: &str,
        request_hash: &str,
        event_id: Option<EventId>,
    ) -> Result<(), IngestError> {
        self.repo.state.lock().unwrap().idempotency_keys.insert(
            key.to_string(),
            IdempotencyKey {
                key: key.to_string(),
                request_hash: request_hash.to_string(),
                event_id,
            },
        );
        Ok(())
    }

    async fn update_event(&mut self, id: EventId, update: EventUpdate) -> Result<(), IngestError> {
        let mut state = self.repo.state.lock().unwrap();
        let event = state.events.get_mut(&id).expect("event exists");
        if let Some(description) = update.description {
            event.description = description;
        }
        if let Some(keywords) = update.keywords {
            event.keywords = keywords;
        }
        if let Some(image_url) = update.image_url {
            event.image_url = image_url;
        }
        if let Some(lifecycle) = update.lifecycle {
            event.lifecycle = lifecycle;
        }
        if let Some(merged_into) = update.merged_into {
            event.merged_into = merged_into;
        }
        Ok(())
    }

    async fn update_review_status(
        &mut self,
        id: ingest_model::ReviewEntryId,
        update: ReviewStatusUpdate,
    ) -> Result<(), IngestError> {
        let mut state = self.repo.state.lock().unwrap();
        if let Some(entry) = state.review_entries.iter_mut().find(|e| e.id == id) {
            entry.status = update.status;
            entry.reviewer = Some(update.reviewer);
            entry.reviewed_at = Some("2026-01-01T00:00:00Z".parse().unwrap());
            entry.rejection_reason = update.rejection_reason;
            entry.merged_into = update.merged_into;
            if let Some((original, normalized, warnings)) = update.refreshed_payloads {
                entry.original_payload = original;
                entry.normalized_payload = normalized;
                entry.warnings = warnings;
            }
        }
        Ok(())
    }

    async fn fix_occurrence_dates(
        &mut self,
        _event_id: EventId,
        _start: DateTime<Utc>,
        _end: Option<DateTime<Utc>>,
    ) -> Result<(), IngestError> {
        Ok(())
    }

    async fn create_tombstone(&mut self, _tombstone: Tombstone) -> Result<(), IngestError> {
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IngestError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IngestError> {
        Ok(())
    }
}
