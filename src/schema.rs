// 📐 Shape Layer - canonical field trees per document type
// Loaded from JSON Schema files; only the property names (and the property
// names of list items / sub-objects) matter to the importer.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{ImportError, Result};

/// Document types with a schema file.
pub const SCHEMA_TYPES: [&str; 6] = ["bill", "person", "committee", "metadata", "vote", "event"];

const BUILTIN: [(&str, &str); 6] = [
    ("bill", include_str!("../schemas/bill.json")),
    ("person", include_str!("../schemas/person.json")),
    ("committee", include_str!("../schemas/committee.json")),
    ("metadata", include_str!("../schemas/metadata.json")),
    ("vote", include_str!("../schemas/vote.json")),
    ("event", include_str!("../schemas/event.json")),
];

static EMPTY: FieldSchema = FieldSchema {
    children: BTreeMap::new(),
};

// ============================================================================
// FIELD SCHEMA
// ============================================================================

/// Canonical field names at one nesting level, each with the canonical
/// sub-fields of its list items or sub-object (empty when the value is flat).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSchema {
    children: BTreeMap<String, FieldSchema>,
}

impl FieldSchema {
    /// Build from a JSON Schema object with a `properties` member.
    pub fn from_json_schema(schema: &Value) -> FieldSchema {
        let mut children = BTreeMap::new();
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                let sub = match property.get("items") {
                    Some(items) if items.get("properties").is_some() => FieldSchema::from_json_schema(items),
                    _ if property.get("properties").is_some() => FieldSchema::from_json_schema(property),
                    _ => FieldSchema::default(),
                };
                children.insert(name.clone(), sub);
            }
        }
        FieldSchema { children }
    }

    pub fn empty() -> &'static FieldSchema {
        &EMPTY
    }

    pub fn contains(&self, field: &str) -> bool {
        self.children.contains_key(field)
    }

    /// Schema fragment for a field's nested values, if it has any.
    pub fn child(&self, field: &str) -> Option<&FieldSchema> {
        self.children.get(field).filter(|sub| !sub.children.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

// ============================================================================
// SCHEMA REGISTRY
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, FieldSchema>,
}

impl SchemaRegistry {
    /// Schemas compiled into the binary.
    pub fn builtin() -> Result<Self> {
        let mut schemas = HashMap::new();
        for (name, text) in BUILTIN {
            schemas.insert(name.to_string(), parse_schema(name, text)?);
        }
        Ok(SchemaRegistry { schemas })
    }

    /// Load `<dir>/<type>.json` for every schema type. Any missing or broken
    /// file fails the whole load.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut schemas = HashMap::new();
        for name in SCHEMA_TYPES {
            let path = dir.join(format!("{name}.json"));
            let text = fs::read_to_string(&path).map_err(|e| ImportError::Schema {
                name: name.to_string(),
                reason: format!("{}: {e}", path.display()),
            })?;
            schemas.insert(name.to_string(), parse_schema(name, &text)?);
        }
        Ok(SchemaRegistry { schemas })
    }

    /// Schema for a `_type`; unknown types get the empty schema.
    pub fn get(&self, type_name: &str) -> &FieldSchema {
        self.schemas.get(type_name).unwrap_or(&EMPTY)
    }
}

fn parse_schema(name: &str, text: &str) -> Result<FieldSchema> {
    let value: Value = serde_json::from_str(text).map_err(|e| ImportError::Schema {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    if value.get("properties").and_then(Value::as_object).is_none() {
        return Err(ImportError::Schema {
            name: name.to_string(),
            reason: "schema has no properties".into(),
        });
    }
    Ok(FieldSchema::from_json_schema(&value))
}
