use sqlx::PgPool;

use ingest_model::{IngestError, ReviewQueueEntry, SourceId};

use crate::id::SqlUlid;
use crate::repository::sql_err;
use crate::rows::ReviewEntryRow;

/// Looks up a review entry by dedup hash or by `(source, external id)`.
/// The spec leaves the behavior unspecified when both are present and
/// disagree; we treat either match as sufficient (see the open question in
/// the design notes) and prefer the most recently created match if more
/// than one row satisfies the `or`.
pub async fn find_matching(
    pool: &PgPool,
    dedup_hash: Option<&str>,
    source_id: Option<SourceId>,
    external_id: Option<&str>,
) -> Result<Option<ReviewQueueEntry>, IngestError> {
    let row = sqlx::query_as::<_, ReviewEntryRow>(
        r#"select id, event_id, original_payload, normalized_payload, warnings, source_id,
                  source_external_id, dedup_hash, start_at as start, end_at as end, status,
                  reviewer, reviewed_at, rejection_reason, merged_into
           from review_queue_entries
           where ($1::text is not null and dedup_hash = $1)
              or ($2::bytea is not null and $3::text is not null
                  and source_id = $2 and source_external_id = $3)
           order by created_at desc
           limit 1"#,
    )
    .bind(dedup_hash)
    .bind(source_id.map(SqlUlid::from))
    .bind(external_id)
    .fetch_optional(pool)
    .await
    .map_err(sql_err)?;
    row.map(ReviewQueueEntry::try_from).transpose()
}
