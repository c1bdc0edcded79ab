// 🗂️ Records - canonical entity documents
//
// A record is split in three parts:
// - bookkeeping (id, all ids, timestamps, locks) owned by the importer
// - canonical fields known to the schema for its kind
// - extension fields the schema doesn't know, kept aside and written back
//   with the '+' prefix so downstream readers never confuse them

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{ImportError, Result};

/// Prefix marking a non-canonical field in stored documents.
pub const EXTRA_PREFIX: char = '+';

// ============================================================================
// ENTITY KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bill,
    Legislator,
    Committee,
    Event,
}

impl Kind {
    pub const ALL: [Kind; 4] = [Kind::Bill, Kind::Legislator, Kind::Committee, Kind::Event];

    /// Letter used in ids: CAB000001, CAL000001, ...
    pub fn letter(&self) -> char {
        match self {
            Kind::Bill => 'B',
            Kind::Legislator => 'L',
            Kind::Committee => 'C',
            Kind::Event => 'E',
        }
    }

    /// Table holding documents of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            Kind::Bill => "bills",
            Kind::Legislator => "legislators",
            Kind::Committee => "committees",
            Kind::Event => "events",
        }
    }

    /// Value of `_type` and name of the schema describing this kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            Kind::Bill => "bill",
            Kind::Legislator => "person",
            Kind::Committee => "committee",
            Kind::Event => "event",
        }
    }

    pub fn from_type(type_name: &str) -> Option<Kind> {
        match type_name {
            "bill" => Some(Kind::Bill),
            "person" | "legislator" => Some(Kind::Legislator),
            "committee" => Some(Kind::Committee),
            "event" => Some(Kind::Event),
            _ => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

// ============================================================================
// CHAMBER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chamber {
    Upper,
    Lower,
}

impl Chamber {
    /// "joint" and "both" resolve to no chamber, i.e. cross-chamber scope.
    pub fn parse(value: &str) -> Option<Chamber> {
        match value {
            "upper" => Some(Chamber::Upper),
            "lower" => Some(Chamber::Lower),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chamber::Upper => "upper",
            Chamber::Lower => "lower",
        }
    }
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: Kind,

    /// Stable identity. Never changes once assigned.
    pub id: Option<String>,

    /// Every id this logical entity has carried.
    pub all_ids: Vec<String>,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Fields edited by a human; imports never overwrite them.
    pub locked_fields: BTreeSet<String>,

    /// Canonical fields (plus internal `_` fields like `_term`).
    pub fields: Map<String, Value>,

    /// Non-canonical top-level fields, keyed without the '+' prefix.
    pub extras: Map<String, Value>,
}

impl Record {
    pub fn new(kind: Kind) -> Self {
        Record {
            kind,
            id: None,
            all_ids: Vec::new(),
            created_at: None,
            updated_at: None,
            locked_fields: BTreeSet::new(),
            fields: Map::new(),
            extras: Map::new(),
        }
    }

    /// Build a fresh record from tagged fields.
    pub fn scraped(kind: Kind, fields: Map<String, Value>, extras: Map<String, Value>) -> Self {
        let mut record = Record::new(kind);
        record.fields = fields;
        record.extras = extras;
        record
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locked_fields.contains(key)
    }

    /// Required string field, for natural keys.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.get_str(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ImportError::missing(self.kind.type_name(), key)),
        }
    }

    /// Jurisdiction abbreviation this record belongs to.
    pub fn state(&self) -> Option<&str> {
        self.get_str("state")
    }

    /// Mutable access to an array field, creating it if absent.
    pub fn array_mut(&mut self, key: &str) -> &mut Vec<Value> {
        let slot = self
            .fields
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        match slot {
            Value::Array(items) => items,
            _ => unreachable!("slot was just made an array"),
        }
    }

    /// Mutable access to an array field the record already has.
    pub fn try_array_mut(&mut self, key: &str) -> Option<&mut Vec<Value>> {
        self.fields.get_mut(key).and_then(Value::as_array_mut)
    }

    pub fn array(&self, key: &str) -> &[Value] {
        self.fields
            .get(key)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ========================================================================
    // DOCUMENT CONVERSION
    // ========================================================================

    /// Flatten into the stored JSON document.
    pub fn to_document(&self) -> Value {
        let mut doc = Map::new();
        if let Some(id) = &self.id {
            doc.insert("_id".into(), Value::String(id.clone()));
        }
        doc.insert("_type".into(), Value::String(self.kind.type_name().into()));
        doc.insert("_all_ids".into(), serde_json::json!(self.all_ids));
        if !self.locked_fields.is_empty() {
            doc.insert("_locked_fields".into(), serde_json::json!(self.locked_fields));
        }
        if let Some(created_at) = self.created_at {
            doc.insert("created_at".into(), Value::String(created_at.to_rfc3339()));
        }
        if let Some(updated_at) = self.updated_at {
            doc.insert("updated_at".into(), Value::String(updated_at.to_rfc3339()));
        }
        for (key, value) in &self.fields {
            doc.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.extras {
            doc.insert(format!("{EXTRA_PREFIX}{key}"), value.clone());
        }
        Value::Object(doc)
    }

    /// Rebuild a record from a stored JSON document.
    pub fn from_document(kind: Kind, doc: Value) -> Result<Self> {
        let Value::Object(map) = doc else {
            return Err(ImportError::Malformed {
                path: kind.collection().into(),
                reason: "stored document is not an object".into(),
            });
        };

        let mut record = Record::new(kind);
        for (key, value) in map {
            match key.as_str() {
                "_id" => record.id = value.as_str().map(str::to_string),
                "_type" => {}
                "_all_ids" => record.all_ids = string_list(&value),
                "_locked_fields" => record.locked_fields = string_list(&value).into_iter().collect(),
                "created_at" => record.created_at = parse_time(&value),
                "updated_at" => record.updated_at = parse_time(&value),
                _ => {
                    if let Some(bare) = key.strip_prefix(EXTRA_PREFIX) {
                        record.extras.insert(bare.to_string(), value);
                    } else {
                        record.fields.insert(key, value);
                    }
                }
            }
        }
        Ok(record)
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_round_trip_keeps_extras_apart() {
        let mut record = Record::new(Kind::Bill);
        record.id = Some("CAB000001".into());
        record.all_ids = vec!["CAB000001".into()];
        record.locked_fields.insert("title".into());
        record.set("title", "An Act");
        record.extras.insert("short_title".into(), json!("Act"));

        let doc = record.to_document();
        assert_eq!(doc["_id"], "CAB000001");
        assert_eq!(doc["_type"], "bill");
        assert_eq!(doc["+short_title"], "Act");
        assert_eq!(doc["_locked_fields"], json!(["title"]));

        let back = Record::from_document(Kind::Bill, doc).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_chamber_parse() {
        assert_eq!(Chamber::parse("upper"), Some(Chamber::Upper));
        assert_eq!(Chamber::parse("joint"), None);
        assert_eq!(Chamber::parse("both"), None);
    }

    #[test]
    fn test_require_str_rejects_empty() {
        let mut record = Record::new(Kind::Committee);
        record.set("committee", "");
        assert!(record.require_str("committee").is_err());
        assert!(record.require_str("chamber").is_err());
    }
}
