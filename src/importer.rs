// 🚚 Import run - one jurisdiction, one batch
//
// A run imports metadata first, then each selected kind in dependency order:
// legislators, committees, bills (with standalone votes), events. Each kind
// walks its directory of scraped JSON files. A file that cannot be imported
// on its own terms (bad JSON, missing natural key, unknown session) is
// logged, counted and skipped. Anything else aborts the run.

use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::committees::CommitteeResolver;
use crate::config::Config;
use crate::db::Store;
use crate::documents::{DocumentFetcher, RetryPolicy};
use crate::entities;
use crate::error::{ImportError, Result};
use crate::ids::IdAllocator;
use crate::metadata::{self, Metadata};
use crate::names::NameResolver;
use crate::record::{Kind, EXTRA_PREFIX};
use crate::schema::SchemaRegistry;
use crate::tagger::{self, Tagged};

// ============================================================================
// CONTEXT
// ============================================================================

/// Fetcher and retry policy for bill version documents.
#[derive(Clone, Copy)]
pub struct VersionFetch<'a> {
    pub fetcher: &'a dyn DocumentFetcher,
    pub policy: RetryPolicy,
}

/// Everything an entity importer needs, owned by one run.
pub struct ImportContext<'a> {
    pub store: &'a Store,
    pub registry: &'a SchemaRegistry,
    pub metadata: Metadata,
    pub allocator: IdAllocator,
    pub names: NameResolver,
    pub committees: CommitteeResolver,
    pub versions: Option<VersionFetch<'a>>,
    /// `<data_dir>/<abbr>`
    pub dir: PathBuf,
}

impl<'a> ImportContext<'a> {
    pub fn new(store: &'a Store, registry: &'a SchemaRegistry, metadata: Metadata, dir: PathBuf) -> Self {
        ImportContext {
            store,
            registry,
            names: NameResolver::new(metadata.clone(), None),
            metadata,
            allocator: IdAllocator::default(),
            committees: CommitteeResolver::new(),
            versions: None,
            dir,
        }
    }

    /// Builder pattern: custom id allocation settings
    pub fn with_allocator(mut self, allocator: IdAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Builder pattern: hand-maintained legislator ids
    pub fn with_manual_dir(mut self, manual_dir: PathBuf) -> Self {
        self.names = NameResolver::new(self.metadata.clone(), Some(manual_dir));
        self
    }

    /// Builder pattern: fetch bill versions into the blob store
    pub fn with_fetcher(mut self, fetcher: &'a dyn DocumentFetcher, policy: RetryPolicy) -> Self {
        self.versions = Some(VersionFetch { fetcher, policy });
        self
    }

    pub fn abbr(&self) -> &str {
        &self.metadata.abbreviation
    }

    /// Scraped files of one kind: `<dir>/<subdir>/*.json`.
    pub fn kind_dir(&self, subdir: &str) -> PathBuf {
        self.dir.join(subdir)
    }

    pub fn current_term(&self) -> Result<String> {
        self.metadata
            .current_term()
            .map(|term| term.name.clone())
            .ok_or_else(|| ImportError::UnknownJurisdiction(self.abbr().to_string()))
    }

    pub fn current_session(&self) -> Result<String> {
        self.metadata
            .current_session()
            .map(str::to_string)
            .ok_or_else(|| ImportError::UnknownJurisdiction(self.abbr().to_string()))
    }

    /// References left unresolved so far in this run.
    pub fn unresolved(&self) -> usize {
        self.names.unresolved + self.committees.unresolved
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// What happened to one imported document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KindReport {
    pub files: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub unresolved: usize,
}

impl KindReport {
    pub fn applied(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted => self.inserted += 1,
            Applied::Updated => self.updated += 1,
            Applied::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub state: String,
    pub kinds: Vec<(&'static str, KindReport)>,
}

impl ImportReport {
    pub fn new(state: &str) -> Self {
        ImportReport {
            state: state.to_string(),
            kinds: Vec::new(),
        }
    }

    pub fn push(&mut self, name: &'static str, report: KindReport) {
        self.kinds.push((name, report));
    }

    pub fn get(&self, name: &str) -> Option<&KindReport> {
        self.kinds.iter().find(|(n, _)| *n == name).map(|(_, r)| r)
    }

    pub fn summary(&self) -> String {
        let mut out = format!("📊 Import summary for {}\n", self.state);
        for (name, r) in &self.kinds {
            let _ = writeln!(
                out,
                "   {name:<12} files: {:>5}  inserted: {:>5}  updated: {:>5}  unchanged: {:>5}  skipped: {:>4}  unresolved: {:>4}",
                r.files, r.inserted, r.updated, r.unchanged, r.skipped, r.unresolved
            );
        }
        out
    }
}

// ============================================================================
// FILES
// ============================================================================

/// `*.json` files of a directory, sorted by name. A missing directory has
/// no files.
pub fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_error = |source| ImportError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Read one scraped JSON object.
pub fn read_document(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match serde_json::from_str(&text) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(_) => Err(ImportError::Malformed {
            path: path.to_path_buf(),
            reason: "expected a JSON object".into(),
        }),
        Err(e) => Err(ImportError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Timestamps, name split for legislators, then tagging against the
/// schema of `kind`.
pub fn prepare(registry: &SchemaRegistry, kind: Kind, mut doc: Map<String, Value>) -> Tagged {
    doc.insert("_type".into(), Value::String(kind.type_name().into()));
    tagger::convert_timestamps(&mut doc);
    if kind == Kind::Legislator {
        tagger::split_name(&mut doc);
    }
    let mut tagged = tagger::tag(registry, doc);
    // the kind is carried by the record, not its fields
    tagged.fields.remove("_type");
    tagged
}

/// Like [`prepare`] for documents that end up nested in another record:
/// extras stay inline with their '+' prefix.
pub fn prepare_nested(registry: &SchemaRegistry, mut doc: Map<String, Value>) -> Map<String, Value> {
    tagger::convert_timestamps(&mut doc);
    let Tagged { mut fields, extras } = tagger::tag(registry, doc);
    for (key, value) in extras {
        fields.insert(format!("{EXTRA_PREFIX}{key}"), value);
    }
    fields
}

/// Import every file of a directory with `import`, skipping files that fail
/// on their own.
pub fn import_files<F>(dir: &Path, report: &mut KindReport, mut import: F) -> Result<()>
where
    F: FnMut(&Path, Map<String, Value>) -> Result<Applied>,
{
    for path in json_files(dir)? {
        report.files += 1;
        let outcome = read_document(&path).and_then(|doc| import(&path, doc));
        match outcome {
            Ok(applied) => {
                debug!(path = %path.display(), ?applied, "imported");
                report.applied(applied);
            }
            Err(err) if err.is_file_fatal() => {
                warn!(path = %path.display(), error = %err, "skipping file");
                report.skipped += 1;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

// ============================================================================
// RUN
// ============================================================================

/// Kinds selected for a run. Metadata is always imported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub legislators: bool,
    pub committees: bool,
    pub bills: bool,
    pub events: bool,
}

impl Selection {
    pub fn all() -> Self {
        Selection {
            legislators: true,
            committees: true,
            bills: true,
            events: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Selection::default()
    }
}

pub fn load_registry(config: &Config) -> Result<SchemaRegistry> {
    match &config.schema_dir {
        Some(dir) => SchemaRegistry::load_dir(dir),
        None => SchemaRegistry::builtin(),
    }
}

/// Metadata from `metadata.json`, or what an earlier run stored.
fn load_metadata(store: &Store, registry: &SchemaRegistry, dir: &Path, abbr: &str) -> Result<Metadata> {
    match metadata::import_metadata(store, registry, dir, abbr) {
        Err(ImportError::UnknownJurisdiction(_)) => {
            warn!(state = abbr, "no metadata.json, using stored metadata");
            Metadata::load(store, abbr)
        }
        other => other,
    }
}

/// Run one import for one jurisdiction.
pub fn run(store: &Store, config: &Config, abbr: &str, selection: Selection) -> Result<ImportReport> {
    let registry = load_registry(config)?;
    let dir = config.jurisdiction_dir(abbr);
    let metadata = load_metadata(store, &registry, &dir, abbr)?;

    #[cfg(feature = "fetch")]
    let http = if config.fetch.enabled {
        Some(crate::documents::HttpFetcher::new(config.fetch.timeout())?)
    } else {
        None
    };

    let ctx = ImportContext::new(store, &registry, metadata, dir)
        .with_allocator(config.ids.allocator())
        .with_manual_dir(config.manual_data_dir.clone());

    #[cfg(feature = "fetch")]
    let ctx = match &http {
        Some(http) => ctx.with_fetcher(http, config.fetch.retry_policy()),
        None => ctx,
    };

    let mut ctx = ctx;
    import_selected(&mut ctx, selection)
}

/// Import the selected kinds in dependency order.
pub fn import_selected(ctx: &mut ImportContext, selection: Selection) -> Result<ImportReport> {
    let mut report = ImportReport::new(ctx.abbr());
    info!(state = ctx.abbr(), ?selection, "starting import");

    if selection.legislators {
        report.push("legislators", entities::legislator::import_legislators(ctx)?);
    }
    if selection.committees {
        report.push("committees", entities::committee::import_committees(ctx)?);
    }
    if selection.bills {
        let (bills, votes) = entities::bill::import_bills(ctx)?;
        report.push("bills", bills);
        report.push("votes", votes);
    }
    if selection.events {
        report.push("events", entities::event::import_events(ctx)?);
    }

    info!(state = ctx.abbr(), "import finished");
    Ok(report)
}
