pub mod error;
pub mod id;
pub mod model;
pub mod repository;
pub mod warning;

pub use error::IngestError;
pub use id::{
    EventId, OrganizationId, PlaceId, ReviewEntryId, SourceId, Ulid, EVENT_ENTITY,
    ORGANIZATION_ENTITY, PLACE_ENTITY,
};
pub use model::{
    Event, EventDomain, EventLifecycle, EventSource, IdempotencyKey, LicenseStatus, Occurrence,
    Organization, Place, ReviewQueueEntry, ReviewStatus, Source, Tombstone,
};
pub use repository::{
    EventUpdate, NearDuplicate, NewEvent, NewEventSource, NewOccurrence, NewOrganization,
    NewPlace, NewReviewEntry, NewSource, Repository, ReviewStatusUpdate, Transaction,
};
pub use warning::{ValidationWarning, WarningCode};
