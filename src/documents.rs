// 📄 Bill version documents - fetch once, store by content hash
//
// The importer keeps only the blob id (`doc_id`) on each bill version. The
// bytes live in a blob store keyed by their sha256, so refetching the same
// document never creates a second copy.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::Store;
#[cfg(feature = "fetch")]
use crate::error::ImportError;
use crate::error::Result;

// ============================================================================
// TRAITS
// ============================================================================

/// BlobStore - where fetched documents end up.
pub trait BlobStore {
    /// Store `data` and return its id. Storing identical bytes twice returns
    /// the same id.
    fn put(&self, data: &[u8], content_type: &str, metadata: &Value) -> Result<String>;

    fn get_blob(&self, id: &str) -> Result<Option<Blob>>;
}

/// DocumentFetcher - how documents are retrieved. Tests plug in fakes.
pub trait DocumentFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Fetched>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub id: String,
    pub content_type: String,
    pub metadata: Value,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub data: Vec<u8>,
    pub content_type: String,
}

pub fn blob_id(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ============================================================================
// SQLITE BLOB STORE
// ============================================================================

impl BlobStore for Store {
    fn put(&self, data: &[u8], content_type: &str, metadata: &Value) -> Result<String> {
        let id = blob_id(data);
        self.conn().execute(
            "INSERT OR IGNORE INTO blobs (id, content_type, metadata, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                content_type,
                serde_json::to_string(metadata)?,
                data,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(id)
    }

    fn get_blob(&self, id: &str) -> Result<Option<Blob>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, content_type, metadata, data FROM blobs WHERE id = ?1",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, content_type, metadata, data)| {
            Ok(Blob {
                id,
                content_type,
                metadata: serde_json::from_str(&metadata)?,
                data,
            })
        })
        .transpose()
    }
}

// ============================================================================
// FETCHING
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Wait before retry n is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

pub fn fetch_with_retry(fetcher: &dyn DocumentFetcher, url: &str, policy: RetryPolicy) -> Result<Fetched> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(url) {
            Ok(fetched) => return Ok(fetched),
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(url, attempt, error = %err, "fetch failed, retrying");
                std::thread::sleep(policy.backoff * attempt);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Fetch a bill version and store it, returning the blob id.
///
/// A failed fetch is logged and yields `None`: the version is kept without
/// a `doc_id` and the next run tries again.
pub fn store_version(
    blobs: &dyn BlobStore,
    fetcher: &dyn DocumentFetcher,
    policy: RetryPolicy,
    bill_id: &str,
    version: &Value,
) -> Result<Option<String>> {
    let Some(url) = version.get("url").and_then(Value::as_str) else {
        return Ok(None);
    };

    let fetched = match fetch_with_retry(fetcher, url, policy) {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!(bill_id, url, error = %err, "giving up on bill version");
            return Ok(None);
        }
    };

    let metadata = serde_json::json!({
        "bill_id": bill_id,
        "name": version.get("name").cloned().unwrap_or(Value::Null),
        "url": url,
    });
    let id = blobs.put(&fetched.data, &fetched.content_type, &metadata)?;
    debug!(bill_id, url, doc_id = id.as_str(), "stored bill version");
    Ok(Some(id))
}

// ============================================================================
// HTTP
// ============================================================================

#[cfg(feature = "fetch")]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "fetch")]
impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("capitol-import/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ImportError::Config(format!("http client: {e}")))?;
        Ok(HttpFetcher { client })
    }
}

#[cfg(feature = "fetch")]
impl DocumentFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched> {
        let fetch_error = |e: reqwest::Error| ImportError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = response.bytes().map_err(fetch_error)?.to_vec();
        Ok(Fetched { data, content_type })
    }
}
