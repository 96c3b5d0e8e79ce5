//! The Normalizer (component B): a pure `EventInput -> EventInput` pass.
//! Every operation here must be idempotent -- running it twice must equal
//! running it once -- since the orchestrator normalizes both the top-level
//! input and explicit occurrences independently, and fingerprinting depends
//! on normalization having already settled.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Timelike};

use crate::decode::{EventInput, OccurrenceInput};

pub fn normalize(mut input: EventInput) -> EventInput {
    input.name = collapse_whitespace(input.name.trim());
    input.description = input.description.trim().to_string();
    input.start_date = input.start_date.map(|s| s.trim().to_string());
    input.end_date = input.end_date.map(|s| s.trim().to_string());
    input.door_time = input.door_time.map(|s| s.trim().to_string());
    input.license = input.license.map(|s| s.trim().to_string());
    input.url = input.url.map(|s| normalize_url(&s));
    input.image = input.image.map(|s| normalize_url(&s));

    if let Some(ref mut loc) = input.location {
        if let Some(ref mut name) = loc.name {
            *name = collapse_whitespace(name.trim());
        }
        loc.address = loc.address.take().map(|s| s.trim().to_string());
        loc.id = loc.id.take().map(|s| s.trim().to_string());
    }
    if let Some(ref mut virt) = input.virtual_location {
        virt.url = virt.url.take().map(|s| normalize_url(s.trim()));
    }
    if let Some(ref mut org) = input.organizer {
        org.name = org.name.take().map(|s| collapse_whitespace(s.trim()));
        org.url = org.url.take().map(|s| normalize_url(s.trim()));
        org.id = org.id.take().map(|s| s.trim().to_string());
    }
    if let Some(ref mut offer) = input.offer {
        offer.url = offer.url.take().map(|s| normalize_url(s.trim()));
        offer.price = offer.price.take().map(|s| s.trim().to_string());
    }
    if let Some(ref mut source) = input.source {
        source.name = source.name.take().map(|s| s.trim().to_string());
        source.base_url = source.base_url.take().map(|s| normalize_url(s.trim()));
        source.external_id = source.external_id.take().map(|s| s.trim().to_string());
    }

    input.keywords = normalize_string_list(&input.keywords, true);
    input.in_language = normalize_string_list(&input.in_language, true);
    input.same_as = input
        .same_as
        .iter()
        .map(|s| normalize_url(s.trim()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if input.event_domain.is_none() {
        if let Some(subtype) = input.event_subtype.as_deref() {
            input.event_domain = Some(domain_tag(subtype));
        }
    }

    if let (Some(start), Some(end)) = (input.start_date.clone(), input.end_date.clone()) {
        if let Some(corrected) = autocorrect_end_date(&start, &end) {
            input.end_date = Some(corrected);
        }
    }

    input.occurrences = input
        .occurrences
        .into_iter()
        .map(normalize_occurrence)
        .collect();

    input
}

fn normalize_occurrence(mut occ: OccurrenceInput) -> OccurrenceInput {
    occ.start_date = occ.start_date.map(|s| s.trim().to_string());
    occ.end_date = occ.end_date.map(|s| s.trim().to_string());
    occ.door_time = occ.door_time.map(|s| s.trim().to_string());
    occ.timezone = occ.timezone.map(|s| s.trim().to_string());
    occ.virtual_url = occ.virtual_url.map(|s| normalize_url(s.trim()));
    occ.ticket_url = occ.ticket_url.map(|s| normalize_url(s.trim()));
    occ.currency = occ.currency.map(|s| s.trim().to_uppercase());
    if let Some(ref mut loc) = occ.location {
        if let Some(ref mut name) = loc.name {
            *name = collapse_whitespace(name.trim());
        }
    }
    if let (Some(start), Some(end)) = (occ.start_date.clone(), occ.end_date.clone()) {
        if let Some(corrected) = autocorrect_end_date(&start, &end) {
            occ.end_date = Some(corrected);
        } else {
            occ.end_date = Some(end);
        }
    }
    occ
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Prefixes `https://` onto a bare domain. Leaves `mailto:`, relative paths,
/// anchors, already-scheme'd URLs, and anything containing a space alone.
fn normalize_url(raw: &str) -> String {
    let s = raw.trim();
    if s.is_empty() || s.starts_with("mailto:") {
        return s.to_string();
    }
    if s.starts_with('/') || s.starts_with('#') || s.starts_with('@') {
        return s.to_string();
    }
    if s.contains(' ') {
        return s.to_string();
    }
    if has_scheme(s) {
        return s.to_string();
    }
    if s.contains('.') {
        format!("https://{s}")
    } else {
        s.to_string()
    }
}

fn has_scheme(s: &str) -> bool {
    match s.find(':') {
        Some(idx) if idx > 0 => {
            let scheme = &s[..idx];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn domain_tag(subtype: &str) -> String {
    let domain = ingest_model::EventDomain::from_subtype(subtype);
    match serde_json::to_value(domain).expect("EventDomain always serializes") {
        serde_json::Value::String(s) => s,
        _ => unreachable!("EventDomain serializes as a string"),
    }
}

fn normalize_string_list(items: &[String], case_insensitive: bool) -> Vec<String> {
    use itertools::Itertools;
    items
        .iter()
        .map(|item| item.trim())
        .filter(|s| !s.is_empty())
        .map(|s| if case_insensitive { s.to_lowercase() } else { s.to_string() })
        .sorted()
        .dedup()
        .collect()
}

/// How a reversed `startDate`/`endDate` pair should be treated. Shared with
/// the validator, which raises a different warning code depending on which
/// arm fired (see `validate::classify_occurrence`).
pub(crate) enum Reversal {
    /// Hour-of-day and corrected-duration both fit the timezone-slip
    /// heuristic; the normalizer applies the correction automatically.
    TimezoneLikely(String),
    /// Dates are reversed but don't fit the heuristic; left untouched.
    NeedsReview,
}

/// Classifies a reversed `start`/`end` pair, or returns `None` if `end >= start`
/// (or either date fails to parse).
pub(crate) fn classify_reversal(start_date: &str, end_date: &str) -> Option<Reversal> {
    let start = DateTime::parse_from_rfc3339(start_date).ok()?;
    let end = DateTime::parse_from_rfc3339(end_date).ok()?;
    if end >= start {
        return None;
    }
    if !(0..=4).contains(&end.hour()) {
        return Some(Reversal::NeedsReview);
    }
    let corrected = end + Duration::hours(24);
    let corrected_duration = corrected - start;
    if corrected_duration > Duration::zero() && corrected_duration < Duration::hours(7) {
        Some(Reversal::TimezoneLikely(corrected.to_rfc3339()))
    } else {
        Some(Reversal::NeedsReview)
    }
}

/// Returns a corrected `endDate` if it looks like a timezone-reversed date
/// rather than a genuinely invalid range. See the validator for the warning
/// emitted when a correction is *not* applied but the dates are still reversed.
fn autocorrect_end_date(start_date: &str, end_date: &str) -> Option<String> {
    match classify_reversal(start_date, end_date)? {
        Reversal::TimezoneLikely(corrected) => Some(corrected),
        Reversal::NeedsReview => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode;
    use serde_json::json;

    fn normalize_json(v: serde_json::Value) -> EventInput {
        normalize(decode::decode(&v).unwrap())
    }

    #[test]
    fn collapses_internal_whitespace_in_name() {
        let input = normalize_json(json!({"name": "  Jazz    Night  "}));
        assert_eq!(input.name, "Jazz Night");
    }

    #[test]
    fn bare_domain_gets_https_prefix() {
        let input = normalize_json(json!({"name": "x", "url": "example.com/tickets"}));
        assert_eq!(input.url.as_deref(), Some("https://example.com/tickets"));
    }

    #[test]
    fn mailto_is_preserved() {
        let input = normalize_json(json!({"name": "x", "url": "mailto:a@b.com"}));
        assert_eq!(input.url.as_deref(), Some("mailto:a@b.com"));
    }

    #[test]
    fn relative_path_is_preserved() {
        let input = normalize_json(json!({"name": "x", "url": "/tickets/1"}));
        assert_eq!(input.url.as_deref(), Some("/tickets/1"));
    }

    #[test]
    fn string_with_space_is_not_a_url() {
        let input = normalize_json(json!({"name": "x", "url": "not a url"}));
        assert_eq!(input.url.as_deref(), Some("not a url"));
    }

    #[test]
    fn explicit_event_domain_is_never_overwritten() {
        let input = normalize_json(json!({
            "name": "x",
            "@type": "MusicEvent",
            "eventDomain": "custom",
        }));
        assert_eq!(input.event_domain.as_deref(), Some("custom"));
    }

    #[test]
    fn subtype_maps_to_domain_when_absent() {
        let input = normalize_json(json!({"name": "x", "@type": "SportsEvent"}));
        assert_eq!(input.event_domain.as_deref(), Some("sports"));
    }

    #[test]
    fn timezone_autocorrect_applies_when_hour_and_gap_qualify() {
        let input = normalize_json(json!({
            "name": "x",
            "startDate": "2025-03-31T23:00:00Z",
            "endDate": "2025-03-31T02:00:00Z",
        }));
        assert_eq!(input.end_date.as_deref(), Some("2025-04-01T02:00:00+00:00"));
    }

    #[test]
    fn timezone_autocorrect_skips_hour_five() {
        let input = normalize_json(json!({
            "name": "x",
            "startDate": "2025-03-31T23:00:00Z",
            "endDate": "2025-03-31T05:00:00Z",
        }));
        assert_eq!(input.end_date.as_deref(), Some("2025-03-31T05:00:00Z"));
    }

    #[test]
    fn timezone_autocorrect_skips_exact_24h_gap() {
        let input = normalize_json(json!({
            "name": "x",
            "startDate": "2025-04-01T02:00:00Z",
            "endDate": "2025-03-31T02:00:00Z",
        }));
        assert_eq!(input.end_date.as_deref(), Some("2025-03-31T02:00:00Z"));
    }

    #[test]
    fn timezone_autocorrect_applies_at_hour_four_with_six_hour_gap() {
        let input = normalize_json(json!({
            "name": "x",
            "startDate": "2025-03-31T22:00:00Z",
            "endDate": "2025-03-31T04:00:00Z",
        }));
        assert_eq!(input.end_date.as_deref(), Some("2025-04-01T04:00:00+00:00"));
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize_json(json!({
            "name": "  Jazz   Night ",
            "startDate": "2025-03-31T23:00:00Z",
            "endDate": "2025-03-31T02:00:00Z",
            "keywords": "a, ,A",
            "url": "example.com",
        }));
        let twice = normalize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn keywords_dedupe_case_insensitively() {
        let input = normalize_json(json!({"name": "x", "keywords": "a, ,A"}));
        assert_eq!(input.keywords, vec!["a".to_string()]);
    }
}
