// ⚖️ Merge Engine - fold a fresh scrape into the stored record
//
// Two flags come out of a merge:
//   touched: something in the stored document differs, it must be saved
//   changed: something substantive differs, `updated_at` must advance
// Only `sources` is provenance: keeping it current must not make a record
// look freshly changed on every scrape.

use chrono::Utc;
use serde_json::Value;

use crate::db::Store;
use crate::error::Result;
use crate::record::{Record, EXTRA_PREFIX};

/// Fields whose change alone doesn't advance `updated_at`.
const PROVENANCE_FIELDS: [&str; 1] = ["sources"];

/// Fields an empty scrape must never clear (partial re-scrapes are common).
const NEVER_CLEARED: [&str; 1] = ["votes"];

// ============================================================================
// MERGE OUTCOME
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// A substantive field changed.
    pub changed: bool,
    /// The stored document differs and has to be persisted.
    pub touched: bool,
    /// Names of the fields that were written or dropped.
    pub fields: Vec<String>,
}

// ============================================================================
// MERGE
// ============================================================================

/// Merge `new` into `old` in place, honoring `old.locked_fields`.
pub fn merge(old: &mut Record, mut new: Record) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for key in NEVER_CLEARED {
        if matches!(new.fields.get(key), Some(Value::Array(items)) if items.is_empty()) {
            new.fields.remove(key);
        }
    }

    for (key, value) in new.fields {
        if old.locked_fields.contains(&key) {
            continue;
        }

        if old.fields.get(&key) != Some(&value) {
            old.fields.insert(key.clone(), value);
            outcome.touched = true;
            if !PROVENANCE_FIELDS.contains(&key.as_str()) {
                outcome.changed = true;
            }
            outcome.fields.push(key.clone());
        }

        // the field used to be non-standard and has graduated
        if old.extras.remove(&key).is_some() {
            outcome.touched = true;
            outcome.fields.push(format!("{EXTRA_PREFIX}{key}"));
        }
    }

    for (key, value) in new.extras {
        let shadow = format!("{EXTRA_PREFIX}{key}");
        if old.locked_fields.contains(&key) || old.locked_fields.contains(&shadow) {
            continue;
        }
        if old.extras.get(&key) != Some(&value) {
            old.extras.insert(key, value);
            outcome.touched = true;
            outcome.changed = true;
            outcome.fields.push(shadow);
        }
    }

    if outcome.changed {
        old.updated_at = Some(Utc::now());
    }

    outcome
}

/// Merge and persist when the stored document has to change.
pub fn update(store: &Store, old: &mut Record, new: Record) -> Result<MergeOutcome> {
    let outcome = merge(old, new);
    if outcome.touched {
        store.save_with_audit(old, &outcome.fields)?;
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;
    use crate::record::Kind;
    use serde_json::json;

    fn bill(fields: Value) -> Record {
        let mut record = Record::new(Kind::Bill);
        if let Value::Object(map) = fields {
            record.fields = map;
        }
        record
    }

    fn stored_bill(store: &Store, fields: Value, locked: &[&str]) -> Record {
        let mut record = bill(fields);
        record.locked_fields = locked.iter().map(|s| s.to_string()).collect();
        let id = IdAllocator::default().insert_with_id(store, &mut record).unwrap();
        store.get(Kind::Bill, &id).unwrap().unwrap()
    }

    #[test]
    fn test_update_with_itself_keeps_timestamps() {
        let store = Store::open_in_memory().unwrap();
        let mut old = stored_bill(&store, json!({"state": "ex", "field1": "stuff"}), &[]);
        let same = old.clone();

        let outcome = update(&store, &mut old, same).unwrap();

        assert!(!outcome.touched);
        assert!(!outcome.changed);
        let reloaded = store.get(Kind::Bill, old.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(reloaded.created_at, reloaded.updated_at);
    }

    #[test]
    fn test_locked_fields_survive_and_others_change() {
        let store = Store::open_in_memory().unwrap();
        let mut old = stored_bill(
            &store,
            json!({"state": "ex", "field1": "stuff", "field2": "original"}),
            &["field2"],
        );
        let created_at = old.created_at;

        let outcome = update(&store, &mut old, bill(json!({"field1": "more stuff", "field2": "a change"}))).unwrap();

        assert!(outcome.changed);
        let reloaded = store.get(Kind::Bill, old.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(reloaded.get_str("field1"), Some("more stuff"));
        assert_eq!(reloaded.get_str("field2"), Some("original"));
        assert!(reloaded.updated_at > created_at);
    }

    #[test]
    fn test_locked_field_ignores_every_new_value() {
        for candidate in [json!("x"), json!(null), json!([]), json!({"a": 1})] {
            let mut old = bill(json!({"title": "Kept"}));
            old.locked_fields.insert("title".into());
            merge(&mut old, bill(json!({ "title": candidate })));
            assert_eq!(old.get_str("title"), Some("Kept"));
        }
    }

    #[test]
    fn test_sources_only_change_is_silent() {
        let mut old = bill(json!({"title": "T", "sources": [{"url": "http://a"}]}));
        let outcome = merge(&mut old, bill(json!({"title": "T", "sources": [{"url": "http://b"}]})));

        assert!(outcome.touched, "sources must still be persisted");
        assert!(!outcome.changed);
        assert!(old.updated_at.is_none());
        assert_eq!(old.fields["sources"], json!([{"url": "http://b"}]));
    }

    #[test]
    fn test_empty_votes_are_ignored() {
        let mut old = bill(json!({"votes": [{"motion": "pass"}]}));
        let outcome = merge(&mut old, bill(json!({"votes": []})));
        assert!(!outcome.touched);
        assert_eq!(old.array("votes").len(), 1);
    }

    #[test]
    fn test_graduated_field_drops_shadow_key() {
        let mut old = bill(json!({"title": "T"}));
        old.extras.insert("summary".into(), json!("old summary"));
        old.extras.insert("other".into(), json!(1));

        let outcome = merge(&mut old, bill(json!({"summary": "new summary"})));

        assert!(outcome.touched);
        assert!(!old.extras.contains_key("summary"));
        assert!(old.extras.contains_key("other"));
        assert_eq!(old.get_str("summary"), Some("new summary"));
    }

    #[test]
    fn test_new_extras_are_merged() {
        let mut old = bill(json!({"title": "T"}));
        let mut new = bill(json!({"title": "T"}));
        new.extras.insert("short_title".into(), json!("Short"));
        let outcome = merge(&mut old, new);
        assert!(outcome.changed);
        assert_eq!(old.extras["short_title"], "Short");
    }
}
