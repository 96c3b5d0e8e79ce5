use std::time::Duration;

/// Tunables for a `UsageRecorder`. Defaults match §4.H of the ingestion spec.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// How often the background ticker flushes the live map.
    pub flush_interval: Duration,
    /// Distinct-key count at which a `record_request` call triggers an
    /// immediate overflow flush instead of waiting for the next tick.
    pub max_buffer_size: usize,
    /// Deadline budgeted to a single flush cycle, independent of any
    /// request's own deadline.
    pub flush_deadline: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            flush_interval: Duration::from_secs(30),
            max_buffer_size: 100,
            flush_deadline: Duration::from_secs(10),
        }
    }
}
