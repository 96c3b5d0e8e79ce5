//! The Input Decoder (component A): turns a permissive, polymorphic JSON
//! payload into a canonical in-memory `EventInput`. Each polymorphic field
//! gets its own small decoder rather than a single reflective pass, per the
//! "tagged variants with explicit decoders" design note -- it keeps each
//! shape's edge cases (empty array, numeric string, nested-overrides-flat)
//! readable in isolation.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhysicalLocation {
    pub id: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VirtualLocation {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Organizer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OfferInput {
    pub url: Option<String>,
    pub price: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceDescriptor {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub license: Option<String>,
    pub trust_level: Option<i16>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OccurrenceInput {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub door_time: Option<String>,
    pub timezone: Option<String>,
    pub location: Option<PhysicalLocation>,
    pub virtual_url: Option<String>,
    pub ticket_url: Option<String>,
    pub price_min: Option<String>,
    pub price_max: Option<String>,
    pub currency: Option<String>,
}

/// The canonical in-memory shape of an inbound event, still pre-normalization.
///
/// `Serialize` is derived only so the fingerprinter can hash a canonical
/// encoding of it (`serde_json`'s default map is key-sorted); nothing here
/// is ever sent back out over the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventInput {
    /// Retained opaquely; never interpreted.
    pub context: Option<String>,
    pub id: Option<String>,
    pub event_subtype: Option<String>,
    pub name: String,
    pub description: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub door_time: Option<String>,
    pub event_domain: Option<String>,
    pub location: Option<PhysicalLocation>,
    pub virtual_location: Option<VirtualLocation>,
    pub organizer: Option<Organizer>,
    pub image: Option<String>,
    pub url: Option<String>,
    pub keywords: Vec<String>,
    pub in_language: Vec<String>,
    pub is_accessible_for_free: Option<bool>,
    pub offer: Option<OfferInput>,
    pub same_as: Vec<String>,
    pub license: Option<String>,
    pub source: Option<SourceDescriptor>,
    pub occurrences: Vec<OccurrenceInput>,
}

pub fn decode(value: &Value) -> Result<EventInput, DecodeError> {
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    Ok(EventInput {
        context: obj.get("@context").map(value_to_opaque_string),
        id: string_field(obj, "@id"),
        event_subtype: string_field(obj, "@type"),
        name: string_field(obj, "name").unwrap_or_default(),
        description: string_field(obj, "description").unwrap_or_default(),
        start_date: string_field(obj, "startDate"),
        end_date: string_field(obj, "endDate"),
        door_time: string_field(obj, "doorTime"),
        event_domain: string_field(obj, "eventDomain"),
        location: obj.get("location").map(decode_physical_location),
        virtual_location: obj.get("virtualLocation").map(decode_virtual_location),
        organizer: obj.get("organizer").map(decode_organizer),
        image: obj.get("image").map(decode_image),
        url: string_field(obj, "url"),
        keywords: obj.get("keywords").map(decode_keywords).unwrap_or_default(),
        in_language: obj
            .get("inLanguage")
            .map(decode_string_or_array)
            .unwrap_or_default(),
        is_accessible_for_free: obj.get("isAccessibleForFree").and_then(Value::as_bool),
        offer: obj.get("offers").and_then(decode_offer),
        same_as: obj.get("sameAs").map(decode_string_or_array).unwrap_or_default(),
        license: string_field(obj, "license"),
        source: obj.get("source").map(decode_source),
        occurrences: obj
            .get("occurrences")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(decode_occurrence).collect())
            .unwrap_or_default(),
    })
}

fn value_to_opaque_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn decode_geo_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

fn decode_address(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("streetAddress").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn decode_physical_location(v: &Value) -> PhysicalLocation {
    match v {
        Value::String(s) => PhysicalLocation {
            name: Some(s.clone()),
            ..Default::default()
        },
        Value::Object(o) => {
            let mut loc = PhysicalLocation {
                id: o.get("@id").and_then(Value::as_str).map(str::to_string),
                name: o.get("name").and_then(Value::as_str).map(str::to_string),
                address: o.get("address").map(decode_address).or_else(|| {
                    o.get("streetAddress").and_then(Value::as_str).map(str::to_string)
                }),
                latitude: o.get("latitude").and_then(decode_geo_number),
                longitude: o.get("longitude").and_then(decode_geo_number),
            };
            // Nested `geo` object overrides flat lat/long when both appear.
            if let Some(geo) = o.get("geo").and_then(Value::as_object) {
                if let Some(lat) = geo.get("latitude").and_then(decode_geo_number) {
                    loc.latitude = Some(lat);
                }
                if let Some(lng) = geo.get("longitude").and_then(decode_geo_number) {
                    loc.longitude = Some(lng);
                }
            }
            loc
        }
        _ => PhysicalLocation::default(),
    }
}

fn decode_virtual_location(v: &Value) -> VirtualLocation {
    match v {
        Value::String(s) => VirtualLocation { url: Some(s.clone()) },
        Value::Object(o) => VirtualLocation {
            url: o.get("url").and_then(Value::as_str).map(str::to_string),
        },
        _ => VirtualLocation::default(),
    }
}

fn decode_organizer(v: &Value) -> Organizer {
    match v {
        Value::String(s) => Organizer {
            id: Some(s.clone()),
            ..Default::default()
        },
        Value::Object(o) => Organizer {
            id: o.get("@id").and_then(Value::as_str).map(str::to_string),
            name: o.get("name").and_then(Value::as_str).map(str::to_string),
            url: o.get("url").and_then(Value::as_str).map(str::to_string),
        },
        _ => Organizer::default(),
    }
}

fn decode_image(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Object(o) => o
            .get("url")
            .or_else(|| o.get("contentUrl"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn decode_keywords(v: &Value) -> Vec<String> {
    match v {
        Value::Array(arr) => arr
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_string_or_array(v: &Value) -> Vec<String> {
    match v {
        Value::Array(arr) => arr
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn decode_price(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => n.as_f64().map(|f| format!("{f}")),
        _ => None,
    }
}

fn decode_offer(v: &Value) -> Option<OfferInput> {
    let offer_obj = match v {
        Value::Object(_) => Some(v),
        Value::Array(arr) => arr.first(),
        _ => None,
    }?;
    let o = offer_obj.as_object()?;
    Some(OfferInput {
        url: o.get("url").and_then(Value::as_str).map(str::to_string),
        price: o.get("price").and_then(decode_price),
    })
}

fn decode_source(v: &Value) -> SourceDescriptor {
    let Some(o) = v.as_object() else {
        return SourceDescriptor::default();
    };
    SourceDescriptor {
        name: o.get("name").and_then(Value::as_str).map(str::to_string),
        base_url: o.get("baseUrl").and_then(Value::as_str).map(str::to_string),
        license: o.get("license").and_then(Value::as_str).map(str::to_string),
        trust_level: o.get("trustLevel").and_then(Value::as_i64).map(|n| n as i16),
        external_id: o
            .get("externalId")
            .or_else(|| o.get("externalEventId"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn decode_occurrence(v: &Value) -> OccurrenceInput {
    let Some(o) = v.as_object() else {
        return OccurrenceInput::default();
    };
    OccurrenceInput {
        start_date: o.get("startDate").and_then(Value::as_str).map(str::to_string),
        end_date: o.get("endDate").and_then(Value::as_str).map(str::to_string),
        door_time: o.get("doorTime").and_then(Value::as_str).map(str::to_string),
        timezone: o.get("timezone").and_then(Value::as_str).map(str::to_string),
        location: o.get("location").map(decode_physical_location),
        virtual_url: o.get("virtualUrl").and_then(Value::as_str).map(str::to_string),
        ticket_url: o.get("ticketUrl").and_then(Value::as_str).map(str::to_string),
        price_min: o.get("priceMin").and_then(decode_price),
        price_max: o.get("priceMax").and_then(decode_price),
        currency: o.get("currency").and_then(Value::as_str).map(str::to_string),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn location_accepts_bare_string() {
        let input = decode(&json!({"name": "x", "location": "Club X"})).unwrap();
        assert_eq!(input.location.unwrap().name.as_deref(), Some("Club X"));
    }

    #[test]
    fn nested_geo_overrides_flat_latlong() {
        let input = decode(&json!({
            "name": "x",
            "location": {
                "name": "Club X",
                "latitude": "1.0",
                "longitude": "2.0",
                "geo": {"latitude": 10.5, "longitude": 20.5},
            }
        }))
        .unwrap();
        let loc = input.location.unwrap();
        assert_eq!(loc.latitude, Some(10.5));
        assert_eq!(loc.longitude, Some(20.5));
    }

    #[test]
    fn empty_numeric_string_is_zero() {
        let input = decode(&json!({"name": "x", "location": {"latitude": "", "longitude": ""}}))
            .unwrap();
        let loc = input.location.unwrap();
        assert_eq!(loc.latitude, Some(0.0));
        assert_eq!(loc.longitude, Some(0.0));
    }

    #[test]
    fn keywords_split_comma_string() {
        let input = decode(&json!({"name": "x", "keywords": "a, ,A"})).unwrap();
        assert_eq!(input.keywords, vec!["a".to_string(), "A".to_string()]);
    }

    #[test]
    fn offers_array_takes_first_element() {
        let input = decode(&json!({
            "name": "x",
            "offers": [{"url": "https://a", "price": 5}, {"url": "https://b"}],
        }))
        .unwrap();
        let offer = input.offer.unwrap();
        assert_eq!(offer.url.as_deref(), Some("https://a"));
        assert_eq!(offer.price.as_deref(), Some("5"));
    }

    #[test]
    fn empty_offers_array_is_absent() {
        let input = decode(&json!({"name": "x", "offers": []})).unwrap();
        assert!(input.offer.is_none());
    }

    #[test]
    fn image_object_prefers_url_then_content_url() {
        let input = decode(&json!({"name": "x", "image": {"contentUrl": "https://c"}})).unwrap();
        assert_eq!(input.image.as_deref(), Some("https://c"));
    }

    #[test]
    fn non_object_payload_errors() {
        assert!(matches!(decode(&json!([1, 2, 3])), Err(DecodeError::NotAnObject)));
    }
}
