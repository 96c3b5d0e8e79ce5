//! The Fingerprinter (component D): derives the two hashes the rest of the
//! pipeline keys off of. The request hash backs idempotency-key conflict
//! detection; the dedup hash backs content-based duplicate lookup.

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::decode::{EventInput, PhysicalLocation};

/// SHA-256 over the canonical (key-sorted) JSON encoding of the *normalized*
/// input. Two submissions that normalize to the same shape hash identically
/// regardless of incidental whitespace or field ordering in the original
/// payload.
pub fn request_hash(input: &EventInput) -> String {
    let canonical = serde_json::to_vec(input).expect("EventInput always serializes");
    hex_digest(&canonical)
}

/// SHA-256 over `lower(trim(name)) | venue_key | trim(startDate)`. Two events
/// at the same place and moment, under the same name, collide here even if
/// everything else about the payload differs.
pub fn dedup_hash(name: &str, venue_key: &str, start_date: &str) -> String {
    let material = format!(
        "{}|{}|{}",
        name.trim().to_lowercase(),
        venue_key,
        start_date.trim()
    );
    hex_digest(material.as_bytes())
}

fn hex_digest(bytes: &[u8]) -> String {
    HEXLOWER.encode(Sha256::digest(bytes).as_slice())
}

/// Identifies "the same place" for dedup purposes: the first of (location
/// `@id`, collapsed-lowercased location name, virtual URL, empty).
pub fn venue_key(location: Option<&PhysicalLocation>, virtual_url: Option<&str>) -> String {
    if let Some(loc) = location {
        if let Some(id) = loc.id.as_deref().filter(|s| !s.trim().is_empty()) {
            return id.trim().to_string();
        }
        if let Some(name) = loc.name.as_deref().filter(|s| !s.trim().is_empty()) {
            return collapse_lowercase(name);
        }
    }
    if let Some(url) = virtual_url {
        return url.trim().to_lowercase();
    }
    String::new()
}

fn collapse_lowercase(s: &str) -> String {
    s.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode;
    use crate::normalize::normalize;
    use serde_json::json;

    #[test]
    fn request_hash_is_64_lowercase_hex_chars() {
        let input = normalize(decode::decode(&json!({"name": "x", "startDate": "2026-01-01T00:00:00Z"})).unwrap());
        let hash = request_hash(&input);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn request_hash_is_deterministic() {
        let input = normalize(decode::decode(&json!({"name": "x", "startDate": "2026-01-01T00:00:00Z"})).unwrap());
        assert_eq!(request_hash(&input), request_hash(&input.clone()));
    }

    #[test]
    fn request_hash_differs_on_meaningful_change() {
        let a = normalize(decode::decode(&json!({"name": "x", "startDate": "2026-01-01T00:00:00Z"})).unwrap());
        let b = normalize(decode::decode(&json!({"name": "y", "startDate": "2026-01-01T00:00:00Z"})).unwrap());
        assert_ne!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn dedup_hash_is_case_insensitive_on_name() {
        let key = venue_key(
            Some(&decode::PhysicalLocation {
                name: Some("Club X".to_string()),
                ..Default::default()
            }),
            None,
        );
        let a = dedup_hash("Jazz Night", &key, "2026-01-01T00:00:00Z");
        let b = dedup_hash("JAZZ NIGHT", &key, "2026-01-01T00:00:00Z");
        assert_eq!(a, b);
    }

    #[test]
    fn venue_key_prefers_id_over_name() {
        let loc = decode::PhysicalLocation {
            id: Some("https://example.org/place/01H".to_string()),
            name: Some("Club X".to_string()),
            ..Default::default()
        };
        assert_eq!(venue_key(Some(&loc), None), "https://example.org/place/01H");
    }

    #[test]
    fn venue_key_collapses_and_lowercases_name() {
        let loc = decode::PhysicalLocation {
            name: Some("  Club   X  ".to_string()),
            ..Default::default()
        };
        assert_eq!(venue_key(Some(&loc), None), "club x");
    }

    #[test]
    fn venue_key_for_virtual_location_uses_url() {
        assert_eq!(
            venue_key(None, Some("https://Stream.Example.com/X")),
            "https://stream.example.com/x"
        );
    }

    #[test]
    fn different_venues_with_same_name_and_time_do_not_collide() {
        let loc_a = decode::PhysicalLocation {
            id: Some("https://example.org/place/01H".to_string()),
            name: Some("Club X".to_string()),
            ..Default::default()
        };
        let loc_b = decode::PhysicalLocation {
            id: Some("https://example.org/place/01J".to_string()),
            name: Some("Club X".to_string()),
            ..Default::default()
        };
        let a = dedup_hash("Jazz Night", &venue_key(Some(&loc_a), None), "2026-01-01T00:00:00Z");
        let b = dedup_hash("Jazz Night", &venue_key(Some(&loc_b), None), "2026-01-01T00:00:00Z");
        assert_ne!(a, b);
    }
}
