// Capitol Import - Core Library
// Reconciles scraped legislative data into a canonical store.
// Exposes all modules for use in the CLI and tests.

pub mod committees;  // Committee Resolver - names to committee ids
pub mod config;      // Configuration - capitol.toml
pub mod db;          // Canonical store - SQLite + WAL
pub mod documents;   // Bill version documents - blob store + fetching
pub mod entities;    // Entity Importers - bills, legislators, committees, events
pub mod error;
pub mod ids;         // ID Allocator - <STATE><LETTER><NUMBER>
pub mod importer;    // Import runs - context, reports, file loop
pub mod merge;       // Merge Engine - locked fields, timestamps
pub mod metadata;    // Jurisdiction metadata - terms and sessions
pub mod names;       // Name Resolver - scraped names to legislator ids
pub mod record;
pub mod schema;
pub mod tagger;      // Field Tagger - '+' prefix for non-standard fields
pub mod text;
pub mod votes;       // Vote Fingerprinter - stable vote ids

// Re-export commonly used types
pub use config::{Config, FetchConfig, IdsConfig};
pub use db::{AuditAction, AuditEntry, Store};
pub use documents::{BlobStore, DocumentFetcher, RetryPolicy};
pub use error::{ImportError, Result};
pub use ids::IdAllocator;
pub use importer::{run, Applied, ImportContext, ImportReport, KindReport, Selection};
pub use merge::MergeOutcome;
pub use metadata::{Metadata, Term};
pub use names::{NameMatcher, NameResolver};
pub use record::{Chamber, Kind, Record};
pub use schema::SchemaRegistry;
pub use tagger::Tagged;
pub use votes::{PendingVotes, VoteMatcher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
