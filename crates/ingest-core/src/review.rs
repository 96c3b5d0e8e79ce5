//! The Review-Queue State Machine (component F). A review entry starts
//! `Pending` and moves exactly once to a terminal status (`Approved`,
//! `Rejected`, `Merged`); nothing transitions out of a terminal status.
//! Resubmission of a payload identical to one already rejected is bounced
//! without re-running the rest of the pipeline.

use std::collections::BTreeSet;

use ingest_model::{
    EventId, IngestError, ReviewQueueEntry, ReviewStatus, ReviewStatusUpdate, ValidationWarning,
    WarningCode,
};

/// Decides whether a resubmission against a `rejected` review entry may
/// proceed. Two escapes: the associated event's occurrence has already
/// ended (the world moved on, so a fresh submission starts clean), or the
/// new warning *codes* differ from what was rejected (something changed).
/// Otherwise it's the same complaint resubmitted unchanged and is bounced.
pub fn check_rejected_resubmission(
    entry: &ReviewQueueEntry,
    event_ended: bool,
    new_warning_codes: &BTreeSet<WarningCode>,
) -> Result<(), IngestError> {
    if entry.status != ReviewStatus::Rejected || event_ended {
        return Ok(());
    }
    let old_codes: BTreeSet<WarningCode> = entry.warnings.iter().map(|w| w.code).collect();
    if &old_codes == new_warning_codes {
        return Err(IngestError::PreviouslyRejected {
            reason: entry
                .rejection_reason
                .clone()
                .unwrap_or_else(|| "no reason recorded".to_string()),
            reviewed_at: entry
                .reviewed_at
                .expect("rejected entries always record when they were reviewed"),
            reviewed_by: entry
                .reviewer
                .clone()
                .expect("rejected entries always record who reviewed them"),
        });
    }
    Ok(())
}

/// Guards against transitioning an entry that's already left `Pending`.
fn require_pending(entry: &ReviewQueueEntry) -> Result<(), IngestError> {
    if entry.status.is_terminal() {
        return Err(IngestError::Conflict);
    }
    Ok(())
}

pub fn approve(entry: &ReviewQueueEntry, reviewer: &str) -> Result<ReviewStatusUpdate, IngestError> {
    require_pending(entry)?;
    Ok(ReviewStatusUpdate {
        status: ReviewStatus::Approved,
        reviewer: reviewer.to_string(),
        rejection_reason: None,
        merged_into: None,
        refreshed_payloads: None,
    })
}

pub fn reject(
    entry: &ReviewQueueEntry,
    reviewer: &str,
    reason: impl Into<String>,
) -> Result<ReviewStatusUpdate, IngestError> {
    require_pending(entry)?;
    Ok(ReviewStatusUpdate {
        status: ReviewStatus::Rejected,
        reviewer: reviewer.to_string(),
        rejection_reason: Some(reason.into()),
        merged_into: None,
        refreshed_payloads: None,
    })
}

pub fn merge_into(
    entry: &ReviewQueueEntry,
    reviewer: &str,
    target: EventId,
) -> Result<ReviewStatusUpdate, IngestError> {
    require_pending(entry)?;
    Ok(ReviewStatusUpdate {
        status: ReviewStatus::Merged,
        reviewer: reviewer.to_string(),
        rejection_reason: None,
        merged_into: Some(target),
        refreshed_payloads: None,
    })
}

/// When a still-`Pending` entry is resubmitted with corrected data, a clean
/// re-validation (no warnings) auto-approves it rather than leaving a human
/// to rubber-stamp an already-fixed submission.
pub fn reconcile_resubmission(
    entry: &ReviewQueueEntry,
    new_warnings: &[ValidationWarning],
    system_reviewer: &str,
    refreshed_payloads: (Vec<u8>, Vec<u8>, Vec<ValidationWarning>),
) -> ReviewStatusUpdate {
    if entry.status == ReviewStatus::Pending && new_warnings.is_empty() {
        ReviewStatusUpdate {
            status: ReviewStatus::Approved,
            reviewer: system_reviewer.to_string(),
            rejection_reason: None,
            merged_into: None,
            refreshed_payloads: Some(refreshed_payloads),
        }
    } else {
        ReviewStatusUpdate {
            status: ReviewStatus::Pending,
            reviewer: system_reviewer.to_string(),
            rejection_reason: None,
            merged_into: None,
            refreshed_payloads: Some(refreshed_payloads),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ingest_model::ReviewEntryId;

    fn pending_entry() -> ReviewQueueEntry {
        ReviewQueueEntry {
            id: ReviewEntryId::new(),
            event_id: EventId::new(),
            original_payload: b"{}".to_vec(),
            normalized_payload: b"{}".to_vec(),
            warnings: Vec::new(),
            source_id: None,
            source_external_id: None,
            dedup_hash: Some("hash".to_string()),
            start: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            end: None,
            status: ReviewStatus::Pending,
            reviewer: None,
            reviewed_at: None,
            rejection_reason: None,
            merged_into: None,
        }
    }

    fn rejected_entry(warnings: Vec<ValidationWarning>) -> ReviewQueueEntry {
        ReviewQueueEntry {
            status: ReviewStatus::Rejected,
            warnings,
            reviewer: Some("admin".to_string()),
            reviewed_at: Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()),
            rejection_reason: Some("spam".to_string()),
            ..pending_entry()
        }
    }

    #[test]
    fn unchanged_resubmission_of_rejected_entry_is_bounced() {
        let warning = ValidationWarning::new("description", "missing", ingest_model::WarningCode::MissingDescription);
        let entry = rejected_entry(vec![warning]);
        let codes: std::collections::BTreeSet<_> = [ingest_model::WarningCode::MissingDescription].into_iter().collect();
        let err = check_rejected_resubmission(&entry, false, &codes).unwrap_err();
        assert!(matches!(err, IngestError::PreviouslyRejected { .. }));
    }

    #[test]
    fn changed_resubmission_of_rejected_entry_is_allowed() {
        let warning = ValidationWarning::new("description", "missing", ingest_model::WarningCode::MissingDescription);
        let entry = rejected_entry(vec![warning]);
        let codes: std::collections::BTreeSet<_> = [ingest_model::WarningCode::MissingImage].into_iter().collect();
        assert!(check_rejected_resubmission(&entry, false, &codes).is_ok());
    }

    #[test]
    fn ended_event_resubmission_of_rejected_entry_is_allowed() {
        let warning = ValidationWarning::new("description", "missing", ingest_model::WarningCode::MissingDescription);
        let entry = rejected_entry(vec![warning]);
        let codes: std::collections::BTreeSet<_> = [ingest_model::WarningCode::MissingDescription].into_iter().collect();
        assert!(check_rejected_resubmission(&entry, true, &codes).is_ok());
    }

    #[test]
    fn resubmission_of_pending_entry_is_always_allowed() {
        let entry = pending_entry();
        assert!(check_rejected_resubmission(&entry, false, &BTreeSet::new()).is_ok());
    }

    #[test]
    fn pending_entry_can_be_approved() {
        let entry = pending_entry();
        let update = approve(&entry, "admin").unwrap();
        assert_eq!(update.status, ReviewStatus::Approved);
    }

    #[test]
    fn terminal_entry_cannot_be_transitioned_again() {
        let entry = rejected_entry(vec![]);
        assert!(matches!(approve(&entry, "admin"), Err(IngestError::Conflict)));
        assert!(matches!(reject(&entry, "admin", "spam"), Err(IngestError::Conflict)));
        assert!(matches!(
            merge_into(&entry, "admin", EventId::new()),
            Err(IngestError::Conflict)
        ));
    }

    #[test]
    fn clean_resubmission_of_pending_entry_auto_approves() {
        let entry = pending_entry();
        let update = reconcile_resubmission(&entry, &[], "system", (b"{}".to_vec(), b"{}".to_vec(), vec![]));
        assert_eq!(update.status, ReviewStatus::Approved);
    }

    #[test]
    fn still_warned_resubmission_of_pending_entry_stays_pending() {
        let entry = pending_entry();
        let warning = ValidationWarning::new("x", "still missing", ingest_model::WarningCode::MissingImage);
        let update = reconcile_resubmission(
            &entry,
            std::slice::from_ref(&warning),
            "system",
            (b"{}".to_vec(), b"{}".to_vec(), vec![warning]),
        );
        assert_eq!(update.status, ReviewStatus::Pending);
    }
}
