// 🏷️ Field Tagger - mark non-standard scraped fields
//
// Scrapers are free to emit fields the canonical schema doesn't know about.
// Those survive the import under a '+' prefix so nothing is lost and readers
// of the canonical store never mistake them for standard fields.
//
// Also home of the small clean-ups every scraped document gets before
// tagging: unix timestamps become RFC 3339 strings and legislators get
// their name split when the scraper didn't do it.

use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Value};

use crate::record::EXTRA_PREFIX;
use crate::schema::{FieldSchema, SchemaRegistry};

/// Result of tagging a top-level document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tagged {
    /// Canonical and internal fields. Nested non-canonical keys stay inline
    /// with the '+' prefix.
    pub fields: Map<String, Value>,
    /// Non-canonical top-level fields, without prefix.
    pub extras: Map<String, Value>,
}

/// Tag a scraped document using the schema named by its `_type`.
pub fn tag(registry: &SchemaRegistry, doc: Map<String, Value>) -> Tagged {
    let type_name = doc.get("_type").and_then(Value::as_str).unwrap_or_default();
    tag_with(registry.get(type_name), doc)
}

/// Tag a document against an explicit schema.
pub fn tag_with(schema: &FieldSchema, doc: Map<String, Value>) -> Tagged {
    let mut tagged = Tagged::default();
    for (key, value) in doc {
        if is_internal(&key) || schema.contains(&key) {
            let value = match schema.child(&key) {
                Some(sub) => tag_nested(sub, value),
                None => value,
            };
            tagged.fields.insert(key, value);
        } else {
            tagged.extras.insert(key, value);
        }
    }
    tagged
}

/// Same transformation for nested values, with extras kept inline.
fn tag_nested(schema: &FieldSchema, value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(|item| tag_nested(schema, item)).collect()),
        Value::Object(map) => {
            let Tagged { mut fields, extras } = tag_with(schema, map);
            for (key, value) in extras {
                fields.insert(format!("{EXTRA_PREFIX}{key}"), value);
            }
            Value::Object(fields)
        }
        other => other,
    }
}

/// Undo tagging: strip the '+' prefix everywhere and fold extras back in.
pub fn untag(tagged: Tagged) -> Map<String, Value> {
    let mut doc = Map::new();
    for (key, value) in tagged.fields {
        doc.insert(key, strip_prefixes(value));
    }
    for (key, value) in tagged.extras {
        doc.insert(key, strip_prefixes(value));
    }
    doc
}

fn strip_prefixes(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(strip_prefixes).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let key = key.strip_prefix(EXTRA_PREFIX).map(str::to_string).unwrap_or(key);
                    (key, strip_prefixes(value))
                })
                .collect(),
        ),
        other => other,
    }
}

fn is_internal(key: &str) -> bool {
    key.starts_with('_')
}

// ============================================================================
// PREPARATION
// ============================================================================

const TIME_KEYS: [&str; 5] = ["date", "when", "end", "start_date", "end_date"];
const TIMED_CHILDREN: [&str; 5] = ["sources", "actions", "votes", "terms", "roles"];

/// Convert unix timestamps in the well-known date keys to RFC 3339 UTC
/// strings, recursing into the sub-records that carry dates.
pub fn convert_timestamps(doc: &mut Map<String, Value>) {
    for key in TIME_KEYS {
        if let Some(value) = doc.get_mut(key) {
            if let Some(converted) = timestamp_to_rfc3339(value) {
                *value = Value::String(converted);
            }
        }
    }

    for key in TIMED_CHILDREN {
        if let Some(Value::Array(children)) = doc.get_mut(key) {
            for child in children.iter_mut() {
                if let Value::Object(child) = child {
                    convert_timestamps(child);
                }
            }
        }
    }

    if let Some(Value::Object(details)) = doc.get_mut("session_details") {
        for detail in details.values_mut() {
            if let Value::Object(detail) = detail {
                convert_timestamps(detail);
            }
        }
    }
}

fn timestamp_to_rfc3339(value: &Value) -> Option<String> {
    let seconds = value.as_f64()?;
    let whole = seconds.trunc() as i64;
    let nanos = ((seconds - seconds.trunc()) * 1e9).round() as u32;
    DateTime::from_timestamp(whole, nanos.min(999_999_999))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

const NAME_SUFFIXES: [&str; 8] = ["jr", "sr", "ii", "iii", "iv", "v", "md", "phd"];

/// Fill `first_name` / `last_name` / `suffixes` from `full_name` when the
/// scraper left either name part empty.
pub fn split_name(doc: &mut Map<String, Value>) {
    let missing = ["first_name", "last_name"]
        .iter()
        .any(|key| doc.get(*key).and_then(Value::as_str).map_or(true, str::is_empty));
    if !missing {
        return;
    }
    let Some(full_name) = doc.get("full_name").and_then(Value::as_str) else {
        return;
    };

    let (first, last, suffixes) = split_full_name(full_name);
    doc.insert("first_name".into(), Value::String(first));
    doc.insert("last_name".into(), Value::String(last));
    doc.insert("suffixes".into(), Value::String(suffixes));
}

/// "Michael J. Stephens, Jr." -> ("Michael", "Stephens", "Jr.")
pub fn split_full_name(full_name: &str) -> (String, String, String) {
    let mut tokens: Vec<&str> = full_name
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    let mut suffixes = Vec::new();
    while tokens.len() > 2 {
        let Some(last) = tokens.last() else { break };
        let bare = last.trim_end_matches('.').to_lowercase();
        if NAME_SUFFIXES.contains(&bare.as_str()) {
            suffixes.insert(0, *last);
            tokens.pop();
        } else {
            break;
        }
    }

    match tokens.as_slice() {
        [] => (String::new(), String::new(), suffixes.join(" ")),
        [only] => (String::new(), only.to_string(), suffixes.join(" ")),
        [first, .., last] => (first.to_string(), last.to_string(), suffixes.join(" ")),
    }
}
