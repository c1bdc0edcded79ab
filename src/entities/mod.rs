// Entity Importers - one module per entity kind
//
// Every importer follows the same lifecycle per scraped document:
//   Scraped -> Tagged -> Matched | Unmatched -> Merged | Created
// The natural key used for matching is what differs between kinds.

pub mod bill;
pub mod committee;
pub mod event;
pub mod legislator;

use chrono::Utc;
use serde_json::Value;

use crate::db::Store;
use crate::error::Result;
use crate::importer::{Applied, ImportContext};
use crate::merge;
use crate::record::Record;

/// Merge `new` into the matched record, or insert it with a fresh id.
pub fn upsert(ctx: &ImportContext, existing: Option<Record>, mut new: Record) -> Result<(Record, Applied)> {
    match existing {
        Some(mut old) => {
            let outcome = merge::update(ctx.store, &mut old, new)?;
            let applied = if outcome.changed {
                Applied::Updated
            } else {
                Applied::Unchanged
            };
            Ok((old, applied))
        }
        None => {
            ctx.allocator.insert_with_id(ctx.store, &mut new)?;
            Ok((new, Applied::Inserted))
        }
    }
}

// ============================================================================
// WRITES OUTSIDE THE MERGE
// ============================================================================
// Sweeps and cross-links edit stored records directly. They honor
// `locked_fields` the same way the merge engine does.

/// Set `key` unless it is locked or already holds `value`.
/// Returns whether the record changed.
pub(crate) fn set_unlocked(record: &mut Record, key: &str, value: impl Into<Value>) -> bool {
    let value = value.into();
    if record.is_locked(key) || record.get(key) == Some(&value) {
        return false;
    }
    record.set(key, value);
    true
}

/// Drop `key` unless it is locked. Returns whether the record changed.
pub(crate) fn remove_unlocked(record: &mut Record, key: &str) -> bool {
    !record.is_locked(key) && record.remove(key).is_some()
}

/// Persist a change made outside the merge engine, advancing `updated_at`.
///
/// Callers check locks before editing; a locked field reaching this point is
/// a bug in the caller.
pub(crate) fn save_changed(store: &Store, record: &mut Record, fields: &[&str]) -> Result<()> {
    debug_assert!(
        fields.iter().all(|f| !record.is_locked(f)),
        "locked field written outside the merge"
    );
    record.updated_at = Some(Utc::now());
    let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
    store.save_with_audit(record, &fields)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::Value;
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::db::Store;
    use crate::importer::ImportContext;
    use crate::metadata::{self, Metadata};
    use crate::schema::SchemaRegistry;

    /// A data directory with metadata for one jurisdiction and a fresh store.
    pub(crate) struct Fixture {
        pub abbr: String,
        pub dir: TempDir,
        pub store: Store,
        pub registry: SchemaRegistry,
    }

    impl Fixture {
        pub(crate) fn new(abbr: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let fixture = Fixture {
                abbr: abbr.to_string(),
                dir,
                store: Store::open_in_memory().unwrap(),
                registry: SchemaRegistry::builtin().unwrap(),
            };
            std::fs::create_dir_all(fixture.jurisdiction_dir()).unwrap();
            std::fs::write(
                fixture.jurisdiction_dir().join("metadata.json"),
                metadata::tests::sample_metadata(abbr).to_string(),
            )
            .unwrap();
            metadata::import_metadata(&fixture.store, &fixture.registry, &fixture.jurisdiction_dir(), abbr).unwrap();
            fixture
        }

        pub(crate) fn jurisdiction_dir(&self) -> PathBuf {
            self.dir.path().join(&self.abbr)
        }

        pub(crate) fn write(&self, subdir: &str, name: &str, doc: Value) {
            let dir = self.jurisdiction_dir().join(subdir);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(name), doc.to_string()).unwrap();
        }

        pub(crate) fn remove(&self, subdir: &str, name: &str) {
            std::fs::remove_file(self.jurisdiction_dir().join(subdir).join(name)).unwrap();
        }

        /// A fresh context, as a new run would build it.
        pub(crate) fn context(&self) -> ImportContext<'_> {
            let metadata = Metadata::load(&self.store, &self.abbr).unwrap();
            ImportContext::new(&self.store, &self.registry, metadata, self.jurisdiction_dir())
        }
    }
}
