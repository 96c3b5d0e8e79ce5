//! Postgres-backed implementation of `ingest_model::Repository`. This is the
//! core ingestion pipeline's only concrete binding to storage; the schema
//! itself (migrations, indexes, the `pg_trgm`-free fuzzy layer) lives
//! outside this crate's concern beyond the column shapes assumed here.

mod id;
mod near_duplicate;
mod repository;
mod review;
mod rows;
mod transaction;
mod usage;

pub use repository::PgRepository;
pub use transaction::PgTransaction;
pub use usage::PgUsageStore;
