/// Error surfaced by a `UsageStore` upsert. Kept separate from
/// `ingest_model::IngestError` since the usage recorder is an orthogonal
/// sidecar: it never touches the `Repository` transaction boundary and a
/// flush failure here must never fail (or even reach) an ingest call.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("usage store error")]
    Store(#[source] anyhow::Error),
}

impl From<anyhow::Error> for UsageError {
    fn from(err: anyhow::Error) -> Self {
        UsageError::Store(err)
    }
}
