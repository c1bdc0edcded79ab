// 📅 Jurisdiction metadata - terms, sessions and what is current
//
// Every jurisdiction ships a metadata.json next to its scraped data. The
// terms list is ordered oldest first: the last term is the current one and
// its last session the current session.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::info;

use crate::db::Store;
use crate::error::{ImportError, Result};
use crate::record::EXTRA_PREFIX;
use crate::schema::SchemaRegistry;
use crate::tagger;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Term {
    pub name: String,
    #[serde(default)]
    pub start_year: Option<i64>,
    #[serde(default)]
    pub end_year: Option<i64>,
    #[serde(default)]
    pub sessions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    pub abbreviation: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub terms: Vec<Term>,
    /// Everything else the jurisdiction publishes, kept as is.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Metadata {
    /// Load the stored metadata for a jurisdiction. Missing metadata fails
    /// the whole run: nothing can be scoped to a term without it.
    pub fn load(store: &Store, abbr: &str) -> Result<Metadata> {
        let doc = store
            .get_metadata(abbr)?
            .ok_or_else(|| ImportError::UnknownJurisdiction(abbr.to_string()))?;
        Ok(serde_json::from_value(doc)?)
    }

    pub fn term_for_session(&self, session: &str) -> Option<&str> {
        self.terms
            .iter()
            .find(|term| term.sessions.iter().any(|s| s == session))
            .map(|term| term.name.as_str())
    }

    pub fn current_term(&self) -> Option<&Term> {
        self.terms.last()
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current_term()?.sessions.last().map(String::as_str)
    }

    pub fn previous_term(&self, term: &str) -> Option<&str> {
        let index = self.terms.iter().position(|t| t.name == term)?;
        index.checked_sub(1).map(|i| self.terms[i].name.as_str())
    }

    pub fn next_term(&self, term: &str) -> Option<&str> {
        let index = self.terms.iter().position(|t| t.name == term)?;
        self.terms.get(index + 1).map(|t| t.name.as_str())
    }

    /// Whether `session` belongs to the current term.
    pub fn in_current_term(&self, session: &str) -> bool {
        self.current_term()
            .is_some_and(|term| term.sessions.iter().any(|s| s == session))
    }
}

/// Read `<jurisdiction dir>/metadata.json`, tag it and store it.
pub fn import_metadata(store: &Store, registry: &SchemaRegistry, jurisdiction_dir: &Path, abbr: &str) -> Result<Metadata> {
    let path = jurisdiction_dir.join("metadata.json");
    if !path.exists() {
        return Err(ImportError::UnknownJurisdiction(abbr.to_string()));
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ImportError::Io {
        path: path.clone(),
        source,
    })?;
    let Value::Object(mut doc) = serde_json::from_str::<Value>(&text)? else {
        return Err(ImportError::Malformed {
            path,
            reason: "metadata is not an object".into(),
        });
    };

    doc.insert("_type".into(), Value::String("metadata".into()));
    doc.entry("abbreviation").or_insert_with(|| Value::String(abbr.to_string()));
    tagger::convert_timestamps(&mut doc);

    let tagged = tagger::tag(registry, doc);
    let mut stored = tagged.fields;
    for (key, value) in tagged.extras {
        stored.insert(format!("{EXTRA_PREFIX}{key}"), value);
    }
    let stored = Value::Object(stored);

    let metadata: Metadata = serde_json::from_value(stored.clone()).map_err(|e| ImportError::Malformed {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    if metadata.terms.is_empty() {
        return Err(ImportError::Malformed {
            path,
            reason: "metadata lists no terms".into(),
        });
    }

    store.put_metadata(abbr, &stored)?;
    info!(
        state = abbr,
        terms = metadata.terms.len(),
        current_session = metadata.current_session().unwrap_or_default(),
        "imported metadata"
    );
    Ok(metadata)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Two terms: 2009-2010 (sessions 2009, 2010) and 2011-2012 (2011, 2012).
    pub(crate) fn sample_metadata(abbr: &str) -> Value {
        json!({
            "abbreviation": abbr,
            "name": "Example",
            "legislature_name": "Example Legislature",
            "terms": [
                {"name": "2009-2010", "start_year": 2009, "end_year": 2010, "sessions": ["2009", "2010"]},
                {"name": "2011-2012", "start_year": 2011, "end_year": 2012, "sessions": ["2011", "2012"]}
            ]
        })
    }

    #[test]
    fn test_term_navigation() {
        let meta: Metadata = serde_json::from_value(sample_metadata("ex")).unwrap();

        assert_eq!(meta.term_for_session("2010"), Some("2009-2010"));
        assert_eq!(meta.term_for_session("1999"), None);
        assert_eq!(meta.current_term().map(|t| t.name.as_str()), Some("2011-2012"));
        assert_eq!(meta.current_session(), Some("2012"));
        assert_eq!(meta.previous_term("2011-2012"), Some("2009-2010"));
        assert_eq!(meta.previous_term("2009-2010"), None);
        assert_eq!(meta.next_term("2009-2010"), Some("2011-2012"));
        assert_eq!(meta.next_term("2011-2012"), None);
        assert!(meta.in_current_term("2011"));
        assert!(!meta.in_current_term("2009"));
        assert_eq!(meta.rest["legislature_name"], "Example Legislature");
    }

    #[test]
    fn test_import_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = sample_metadata("ex");
        doc["feature_flags"] = json!(["events"]);
        std::fs::write(dir.path().join("metadata.json"), doc.to_string()).unwrap();

        let store = Store::open_in_memory().unwrap();
        let registry = SchemaRegistry::builtin().unwrap();
        import_metadata(&store, &registry, dir.path(), "ex").unwrap();

        let loaded = Metadata::load(&store, "ex").unwrap();
        assert_eq!(loaded.terms.len(), 2);
        assert_eq!(loaded.rest["+feature_flags"], json!(["events"]));
    }

    #[test]
    fn test_missing_metadata_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let registry = SchemaRegistry::builtin().unwrap();

        let err = import_metadata(&store, &registry, dir.path(), "zz").unwrap_err();
        assert!(matches!(err, ImportError::UnknownJurisdiction(_)));
        assert!(!err.is_file_fatal());
        assert!(matches!(Metadata::load(&store, "zz"), Err(ImportError::UnknownJurisdiction(_))));
    }
}
