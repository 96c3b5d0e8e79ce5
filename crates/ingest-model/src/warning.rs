use serde::{Deserialize, Serialize};

/// Machine-readable warning codes. These round-trip into the review entry so
/// admins (and the previously-rejected comparison in the review state
/// machine) can reason about *which* warnings fired, not just their prose.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    ReversedDatesTimezoneLikely,
    ReversedDatesCorrectedNeedsReview,
    MissingDescription,
    MissingImage,
    TooFarFuture,
    LowConfidence,
    LinkCheckFailed,
    PotentialDuplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub code: WarningCode,
}

impl ValidationWarning {
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: WarningCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }
}
