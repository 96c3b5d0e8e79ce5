//! The Validator (component C): checks a normalized `EventInput` against the
//! hard-error rules, raises soft warnings, and scores a confidence value used
//! to decide whether the event needs human review. Hard errors reject the
//! whole submission; soft warnings ride along into the review queue entry.

use chrono::{DateTime, Duration, Utc};

use ingest_model::{IngestError, LicenseStatus, ValidationWarning, WarningCode};

use crate::config::IngestConfig;
use crate::decode::{EventInput, OccurrenceInput, Organizer, OfferInput, PhysicalLocation, SourceDescriptor};
use crate::normalize::{classify_reversal, Reversal};

#[derive(Debug, Clone)]
pub struct ValidatedOccurrence {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub door_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub location: Option<PhysicalLocation>,
    pub virtual_url: Option<String>,
    pub ticket_url: Option<String>,
    pub price_min: Option<String>,
    pub price_max: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidatedEvent {
    pub name: String,
    pub description: String,
    pub domain: ingest_model::EventDomain,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub door_time: Option<DateTime<Utc>>,
    pub location: Option<PhysicalLocation>,
    pub virtual_url: Option<String>,
    pub organizer: Option<Organizer>,
    pub image_url: Option<String>,
    pub public_url: Option<String>,
    pub keywords: Vec<String>,
    pub offer: Option<OfferInput>,
    pub same_as: Vec<String>,
    pub license_url: Option<String>,
    pub license_status: LicenseStatus,
    pub source: Option<SourceDescriptor>,
    pub occurrences: Vec<ValidatedOccurrence>,
    pub confidence: f64,
    pub needs_review: bool,
    pub warnings: Vec<ValidationWarning>,
}

const MAX_NAME_CHARS: usize = 500;
const MAX_DESCRIPTION_CHARS: usize = 10_000;
const TOO_FAR_FUTURE: i64 = 730;

/// `original` is the pre-normalization decode of the same payload, used only
/// to classify a reversed `startDate`/`endDate` pair from the `endDate` the
/// caller actually sent -- by the time `input` reaches here, the normalizer
/// has already overwritten a timezone-likely `endDate` with its corrected,
/// now-chronological value, so reclassifying from `input` alone would never
/// see a reversal. Pass `None` when no pre-normalization input is available;
/// the classification then falls back to `input`'s own `endDate`.
///
/// `link_check_failed` reflects a caller-supplied HTTP status check against
/// the event's referenced links (image, url, organizer url, offer url,
/// virtual location url); callers that don't perform link checks pass `false`.
pub fn validate(
    input: &EventInput,
    original: Option<&EventInput>,
    config: &IngestConfig,
    now: DateTime<Utc>,
    link_check_failed: bool,
) -> Result<ValidatedEvent, IngestError> {
    if input.name.trim().is_empty() {
        return Err(IngestError::validation("name", "must not be empty"));
    }
    if input.name.chars().count() > MAX_NAME_CHARS {
        return Err(IngestError::validation(
            "name",
            format!("must be at most {MAX_NAME_CHARS} characters"),
        ));
    }
    if input.description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(IngestError::validation(
            "description",
            format!("must be at most {MAX_DESCRIPTION_CHARS} characters"),
        ));
    }

    let start_raw = input
        .start_date
        .as_deref()
        .ok_or_else(|| IngestError::validation("startDate", "is required"))?;
    let start = parse_date(start_raw, "startDate")?;
    let end = match &input.end_date {
        Some(raw) => Some(parse_date(raw, "endDate")?),
        None => None,
    };
    let door_time = match &input.door_time {
        Some(raw) => Some(parse_date(raw, "doorTime")?),
        None => None,
    };

    let has_physical = input.location.is_some();
    if let Some(virt) = &input.virtual_location {
        match virt.url.as_deref() {
            None => return Err(IngestError::validation("virtualLocation.url", "is required")),
            Some(u) if u.trim().is_empty() => {
                return Err(IngestError::validation("virtualLocation.url", "is required"))
            }
            Some(u) if !is_http_url(u) => {
                return Err(IngestError::validation("virtualLocation.url", "must be an http(s) URL"))
            }
            _ => {}
        }
    }
    let has_virtual = input.virtual_location.is_some();
    if !has_physical && !has_virtual {
        return Err(IngestError::validation(
            "location",
            "either a physical or virtual location is required",
        ));
    }

    check_optional_url("image", input.image.as_deref())?;
    check_optional_url("url", input.url.as_deref())?;
    if let Some(org) = &input.organizer {
        check_optional_url("organizer.url", org.url.as_deref())?;
        check_canonical_id("organizer.@id", org.id.as_deref(), &config.node_domain)?;
    }
    if let Some(offer) = &input.offer {
        check_optional_url("offers.url", offer.url.as_deref())?;
    }
    if let Some(loc) = &input.location {
        check_canonical_id("location.@id", loc.id.as_deref(), &config.node_domain)?;
    }
    check_canonical_id("@id", input.id.as_deref(), &config.node_domain)?;

    let license_status = match &input.license {
        None => LicenseStatus::Unknown,
        Some(lic) if is_cc0_license(lic) => LicenseStatus::Cc0,
        Some(_) => {
            return Err(IngestError::validation(
                "license",
                "must be CC0 (\"cc0\", \"cc0-1.0\", or the CC0 1.0 public-domain URL)",
            ))
        }
    };

    if let Some(source) = &input.source {
        if source
            .external_id
            .as_deref()
            .map_or(true, |s| s.trim().is_empty())
        {
            return Err(IngestError::validation(
                "source.externalId",
                "is required when source is present",
            ));
        }
    }

    let occurrences = input
        .occurrences
        .iter()
        .enumerate()
        .map(|(idx, occ)| validate_occurrence(occ, idx))
        .collect::<Result<Vec<_>, _>>()?;

    let mut warnings = Vec::new();
    let mut confidence: f64 = 0.9;

    let original_end_date = original
        .and_then(|o| o.end_date.as_deref())
        .or(input.end_date.as_deref());
    if let (Some(s), Some(e)) = (input.start_date.as_deref(), original_end_date) {
        if let Some(reversal) = classify_reversal(s, e) {
            warnings.push(match reversal {
                Reversal::TimezoneLikely(_) => ValidationWarning::new(
                    "endDate",
                    "endDate preceded startDate; corrected assuming an after-midnight timezone slip",
                    WarningCode::ReversedDatesTimezoneLikely,
                ),
                Reversal::NeedsReview => ValidationWarning::new(
                    "endDate",
                    "endDate precedes startDate and was not auto-corrected",
                    WarningCode::ReversedDatesCorrectedNeedsReview,
                ),
            });
        }
    }

    let description_empty = input.description.trim().is_empty();
    if description_empty {
        warnings.push(ValidationWarning::new(
            "description",
            "description is empty",
            WarningCode::MissingDescription,
        ));
        confidence -= 0.2;
    }

    let image_empty = input.image.as_deref().map_or(true, |s| s.trim().is_empty());
    let missing_required_image = config.require_image && image_empty;
    if missing_required_image {
        warnings.push(ValidationWarning::new(
            "image",
            "image is required but missing",
            WarningCode::MissingImage,
        ));
        confidence -= 0.2;
    }

    let too_far_future = start > now + Duration::days(TOO_FAR_FUTURE);
    if too_far_future {
        warnings.push(ValidationWarning::new(
            "startDate",
            format!("startDate is more than {TOO_FAR_FUTURE} days in the future"),
            WarningCode::TooFarFuture,
        ));
        confidence -= 0.2;
    }

    if link_check_failed {
        confidence -= 0.1;
        warnings.push(ValidationWarning::new(
            "links",
            "a referenced link returned an HTTP error status",
            WarningCode::LinkCheckFailed,
        ));
    }

    confidence = confidence.max(0.0);
    let low_confidence = confidence < 0.6;
    if low_confidence {
        warnings.push(ValidationWarning::new(
            "confidence",
            format!("confidence score {confidence:.2} is below the review threshold"),
            WarningCode::LowConfidence,
        ));
    }

    let needs_review = low_confidence
        || !warnings.is_empty()
        || description_empty
        || missing_required_image
        || too_far_future
        || link_check_failed;

    Ok(ValidatedEvent {
        name: input.name.clone(),
        description: input.description.clone(),
        domain: domain_enum(input.event_domain.as_deref()),
        start,
        end,
        door_time,
        location: input.location.clone(),
        virtual_url: input
            .virtual_location
            .as_ref()
            .and_then(|v| v.url.clone()),
        organizer: input.organizer.clone(),
        image_url: input.image.clone(),
        public_url: input.url.clone(),
        keywords: input.keywords.clone(),
        offer: input.offer.clone(),
        same_as: input.same_as.clone(),
        license_url: input.license.clone(),
        license_status,
        source: input.source.clone(),
        occurrences,
        confidence,
        needs_review,
        warnings,
    })
}

fn validate_occurrence(occ: &OccurrenceInput, idx: usize) -> Result<ValidatedOccurrence, IngestError> {
    let start_raw = occ
        .start_date
        .as_deref()
        .ok_or_else(|| IngestError::validation(format!("occurrences[{idx}].startDate"), "is required"))?;
    let start = parse_date(start_raw, &format!("occurrences[{idx}].startDate"))?;
    let end = match &occ.end_date {
        Some(raw) => Some(parse_date(raw, &format!("occurrences[{idx}].endDate"))?),
        None => None,
    };
    if let Some(end) = end {
        if end < start {
            return Err(IngestError::validation(
                format!("occurrences[{idx}].endDate"),
                "must not be before startDate",
            ));
        }
    }
    let door_time = match &occ.door_time {
        Some(raw) => Some(parse_date(raw, &format!("occurrences[{idx}].doorTime"))?),
        None => None,
    };
    check_optional_url(&format!("occurrences[{idx}].virtualUrl"), occ.virtual_url.as_deref())?;
    check_optional_url(&format!("occurrences[{idx}].ticketUrl"), occ.ticket_url.as_deref())?;
    if let Some(tz) = occ.timezone.as_deref().filter(|s| !s.trim().is_empty()) {
        if tz.parse::<chrono_tz::Tz>().is_err() {
            return Err(IngestError::validation(
                format!("occurrences[{idx}].timezone"),
                "must be a valid IANA timezone name",
            ));
        }
    }

    Ok(ValidatedOccurrence {
        start,
        end,
        door_time,
        timezone: occ.timezone.clone(),
        location: occ.location.clone(),
        virtual_url: occ.virtual_url.clone(),
        ticket_url: occ.ticket_url.clone(),
        price_min: occ.price_min.clone(),
        price_max: occ.price_max.clone(),
        currency: occ.currency.clone(),
    })
}

fn parse_date(raw: &str, field: &str) -> Result<DateTime<Utc>, IngestError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| IngestError::validation(field.to_string(), "must be RFC3339"))
}

fn is_http_url(s: &str) -> bool {
    url::Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn check_optional_url(field: &str, value: Option<&str>) -> Result<(), IngestError> {
    match value {
        Some(u) if !u.trim().is_empty() && !is_http_url(u) => {
            Err(IngestError::validation(field.to_string(), "must be an http(s) URL"))
        }
        _ => Ok(()),
    }
}

fn check_canonical_id(field: &str, id: Option<&str>, node_domain: &str) -> Result<(), IngestError> {
    match id {
        Some(id) if !is_canonical_id(id, node_domain) => Err(IngestError::validation(
            field.to_string(),
            "must be a canonical https://<node-domain>/<entity>/<ulid> URI",
        )),
        _ => Ok(()),
    }
}

/// `https://<node_domain>/(events|places|organizations)/<26-char ULID>`.
fn is_canonical_id(id: &str, node_domain: &str) -> bool {
    let prefix = format!("https://{node_domain}/");
    let Some(rest) = id.strip_prefix(&prefix) else {
        return false;
    };
    let Some((entity, ulid_str)) = rest.split_once('/') else {
        return false;
    };
    if ulid_str.contains('/') {
        return false;
    }
    let valid_entity = entity == ingest_model::EVENT_ENTITY
        || entity == ingest_model::PLACE_ENTITY
        || entity == ingest_model::ORGANIZATION_ENTITY;
    valid_entity && ulid_str.parse::<ingest_model::Ulid>().is_ok()
}

fn is_cc0_license(license: &str) -> bool {
    let normalized = license.trim().trim_end_matches('/').to_lowercase();
    matches!(
        normalized.as_str(),
        "cc0"
            | "cc0-1.0"
            | "https://creativecommons.org/publicdomain/zero/1.0"
            | "http://creativecommons.org/publicdomain/zero/1.0"
    )
}

fn domain_enum(tag: Option<&str>) -> ingest_model::EventDomain {
    use ingest_model::EventDomain;
    match tag.map(str::to_lowercase).as_deref() {
        Some("music") => EventDomain::Music,
        Some("sports") => EventDomain::Sports,
        Some("arts") => EventDomain::Arts,
        Some("food") => EventDomain::Food,
        Some("family") => EventDomain::Family,
        Some("business") => EventDomain::Business,
        Some("community") => EventDomain::Community,
        _ => EventDomain::Other,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode;
    use serde_json::json;

    fn base_now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn validate_json(v: serde_json::Value) -> Result<ValidatedEvent, IngestError> {
        let original = decode::decode(&v).unwrap();
        let input = crate::normalize::normalize(original.clone());
        validate(&input, Some(&original), &IngestConfig::default(), base_now(), false)
    }

    fn minimal_valid() -> serde_json::Value {
        json!({
            "name": "Jazz Night",
            "description": "An evening of jazz.",
            "startDate": "2026-02-01T20:00:00-05:00",
            "location": {"name": "Club X"},
        })
    }

    #[test]
    fn minimal_valid_event_passes_with_full_confidence() {
        let validated = validate_json(minimal_valid()).unwrap();
        assert_eq!(validated.confidence, 0.9);
        assert!(!validated.needs_review);
        assert!(validated.warnings.is_empty());
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut v = minimal_valid();
        v["name"] = json!("   ");
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn missing_start_date_is_rejected() {
        let mut v = minimal_valid();
        v.as_object_mut().unwrap().remove("startDate");
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn malformed_start_date_is_rejected() {
        let mut v = minimal_valid();
        v["startDate"] = json!("not a date");
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn missing_both_locations_is_rejected() {
        let mut v = minimal_valid();
        v.as_object_mut().unwrap().remove("location");
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn virtual_location_without_url_is_rejected() {
        let mut v = minimal_valid();
        v.as_object_mut().unwrap().remove("location");
        v["virtualLocation"] = json!({});
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn virtual_location_satisfies_the_location_requirement() {
        let mut v = minimal_valid();
        v.as_object_mut().unwrap().remove("location");
        v["virtualLocation"] = json!({"url": "https://stream.example.com/x"});
        assert!(validate_json(v).is_ok());
    }

    #[test]
    fn non_http_image_url_is_rejected() {
        let mut v = minimal_valid();
        v["image"] = json!("ftp://example.com/a.png");
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn cc0_license_variants_are_accepted() {
        for lic in [
            "cc0",
            "CC0-1.0",
            "https://creativecommons.org/publicdomain/zero/1.0/",
            "http://creativecommons.org/publicdomain/zero/1.0",
        ] {
            let mut v = minimal_valid();
            v["license"] = json!(lic);
            assert!(validate_json(v).is_ok(), "expected {lic} to be accepted");
        }
    }

    #[test]
    fn non_cc0_license_is_rejected() {
        let mut v = minimal_valid();
        v["license"] = json!("CC-BY-4.0");
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn malformed_canonical_id_is_rejected() {
        let mut v = minimal_valid();
        v["@id"] = json!("https://example.dev/events/not-a-ulid");
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn well_formed_canonical_id_is_accepted() {
        let mut v = minimal_valid();
        v["@id"] = json!(format!(
            "https://example.dev/events/{}",
            ingest_model::Ulid::new()
        ));
        assert!(validate_json(v).is_ok());
    }

    #[test]
    fn source_without_external_id_is_rejected() {
        let mut v = minimal_valid();
        v["source"] = json!({"name": "example feed", "baseUrl": "https://feed.example.com"});
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn occurrence_reversed_dates_are_a_hard_error() {
        let mut v = minimal_valid();
        v["occurrences"] = json!([{
            "startDate": "2026-03-01T20:00:00Z",
            "endDate": "2026-03-01T12:00:00Z",
        }]);
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn occurrence_with_bogus_timezone_is_rejected() {
        let mut v = minimal_valid();
        v["occurrences"] = json!([{
            "startDate": "2026-03-01T20:00:00Z",
            "timezone": "Mars/Olympus_Mons",
        }]);
        assert!(matches!(validate_json(v), Err(IngestError::Validation { .. })));
    }

    #[test]
    fn occurrence_with_valid_iana_timezone_is_accepted() {
        let mut v = minimal_valid();
        v["occurrences"] = json!([{
            "startDate": "2026-03-01T20:00:00Z",
            "timezone": "America/Toronto",
        }]);
        assert!(validate_json(v).is_ok());
    }

    #[test]
    fn empty_description_warns_and_forces_review() {
        let mut v = minimal_valid();
        v["description"] = json!("");
        let validated = validate_json(v).unwrap();
        assert!(validated.needs_review);
        assert!((validated.confidence - 0.7).abs() < 1e-9);
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::MissingDescription));
    }

    #[test]
    fn missing_image_only_warns_when_required() {
        let input = crate::normalize::normalize(decode::decode(&minimal_valid()).unwrap());
        let lenient = validate(&input, None, &IngestConfig::default(), base_now(), false).unwrap();
        assert!(!lenient.needs_review);

        let strict_config = IngestConfig {
            require_image: true,
            ..IngestConfig::default()
        };
        let strict = validate(&input, None, &strict_config, base_now(), false).unwrap();
        assert!(strict.needs_review);
        assert!((strict.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn start_date_at_exactly_730_days_does_not_warn() {
        let mut v = minimal_valid();
        v["startDate"] = json!((base_now() + Duration::days(730)).to_rfc3339());
        let validated = validate_json(v).unwrap();
        assert!(!validated
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::TooFarFuture));
        assert!(!validated.needs_review);
    }

    #[test]
    fn start_date_at_731_days_warns_and_forces_review() {
        let mut v = minimal_valid();
        v["startDate"] = json!((base_now() + Duration::days(731)).to_rfc3339());
        let validated = validate_json(v).unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::TooFarFuture));
        assert!(validated.needs_review);
        assert!((validated.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn link_check_failure_docks_confidence_and_forces_review() {
        let input = crate::normalize::normalize(decode::decode(&minimal_valid()).unwrap());
        let validated = validate(&input, None, &IngestConfig::default(), base_now(), true).unwrap();
        assert!(validated.needs_review);
        assert!((validated.confidence - 0.8).abs() < 1e-9);
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::LinkCheckFailed));
    }

    #[test]
    fn reversed_top_level_dates_classify_by_heuristic() {
        let mut timezone_likely = minimal_valid();
        timezone_likely["startDate"] = json!("2026-03-31T23:00:00Z");
        timezone_likely["endDate"] = json!("2026-03-31T02:00:00Z");
        let validated = validate_json(timezone_likely).unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::ReversedDatesTimezoneLikely));

        let mut needs_review = minimal_valid();
        needs_review["startDate"] = json!("2026-03-31T20:00:00Z");
        needs_review["endDate"] = json!("2026-03-31T10:00:00Z");
        let validated = validate_json(needs_review).unwrap();
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::ReversedDatesCorrectedNeedsReview));
    }

    #[test]
    fn stacked_penalties_floor_at_zero_confidence() {
        let mut v = minimal_valid();
        v["description"] = json!("");
        v["startDate"] = json!((base_now() + Duration::days(800)).to_rfc3339());
        let strict_config = IngestConfig {
            require_image: true,
            ..IngestConfig::default()
        };
        let input = crate::normalize::normalize(decode::decode(&v).unwrap());
        let validated = validate(&input, None, &strict_config, base_now(), true).unwrap();
        // 0.9 - 0.2 (description) - 0.2 (image) - 0.2 (too far future) - 0.1 (link check) = 0.2
        assert!((validated.confidence - 0.2).abs() < 1e-9);
        assert!(validated.needs_review);
        assert!(validated
            .warnings
            .iter()
            .any(|w| w.code == WarningCode::LowConfidence));
    }
}
