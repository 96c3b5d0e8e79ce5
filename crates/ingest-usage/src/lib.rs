//! Concurrent in-memory per-API-key usage aggregator (component H): a
//! sidecar to the ingest pipeline, not a participant in its transactions.
//! `RecordRequest` is the hot path and never touches storage directly; a
//! background ticker and occasional overflow-triggered tasks do.

mod config;
mod error;
mod recorder;
mod store;

pub use config::RecorderConfig;
pub use error::UsageError;
pub use recorder::{FlushReport, UsageRecorder};
pub use store::UsageStore;
