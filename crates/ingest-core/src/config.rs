/// Tunables that influence normalization, validation and dedup decisions.
/// These are the ingest-facing options from the external interface; CLI
/// parsing and env loading for the surrounding service are out of scope here.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// When true, a missing `image` produces a `missing_image` warning and
    /// forces the event into review.
    pub require_image: bool,
    /// Similarity cutoff for the near-duplicate layer; 0 disables it.
    pub near_duplicate_threshold: f64,
    /// IANA zone used when an occurrence omits one.
    pub default_timezone: String,
    /// Host used to validate canonical `@id` URIs, e.g. `example.dev`.
    pub node_domain: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            require_image: false,
            near_duplicate_threshold: 0.0,
            default_timezone: "America/Toronto".to_string(),
            node_domain: "example.dev".to_string(),
        }
    }
}
