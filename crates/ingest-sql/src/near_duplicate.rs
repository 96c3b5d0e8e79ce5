use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use ingest_model::{IngestError, NearDuplicate, PlaceId};

use crate::id::SqlUlid;
use crate::repository::sql_err;

/// The fuzzy layer only ever compares events already narrowed to the same
/// venue and a tight window around the candidate's start time; running
/// string similarity over the whole table would be both slow and mostly
/// meaningless (a different day isn't a near-duplicate regardless of name).
const WINDOW: Duration = Duration::hours(12);

/// Advisory near-duplicate search (spec §4.E step 4): candidates are
/// pre-filtered in SQL by venue and time window, then scored with
/// Jaro-Winkler similarity and filtered against `threshold` in Rust, since
/// Postgres has no builtin for it without the `pg_trgm` extension.
pub async fn find(
    pool: &PgPool,
    venue_id: PlaceId,
    start: DateTime<Utc>,
    name: &str,
    threshold: f64,
) -> Result<Vec<NearDuplicate>, IngestError> {
    let candidates = sqlx::query_as::<_, (SqlUlid, String)>(
        r#"select distinct e.id, e.name
           from events e
           join occurrences o on o.event_id = e.id
           where e.venue_id = $1
             and e.lifecycle <> 'deleted'
             and e.merged_into is null
             and o.start_at between $2 and $3"#,
    )
    .bind(SqlUlid::from(venue_id))
    .bind(start - WINDOW)
    .bind(start + WINDOW)
    .fetch_all(pool)
    .await
    .map_err(sql_err)?;

    let needle = name.trim().to_lowercase();
    let mut scored: Vec<NearDuplicate> = candidates
        .into_iter()
        .map(|(id, candidate_name)| {
            let similarity = strsim::jaro_winkler(&needle, &candidate_name.trim().to_lowercase());
            NearDuplicate {
                event_id: id.into(),
                name: candidate_name,
                similarity,
            }
        })
        .filter(|c| c.similarity > threshold)
        .collect();

    scored.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored)
}
