use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Unparsable or structurally wrong scraped document.
    #[error("malformed document {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("{kind} document is missing required field '{field}'")]
    MissingField { kind: &'static str, field: String },

    #[error("session '{session}' is not part of any term for {state}")]
    UnknownSession { state: String, session: String },

    #[error("no metadata for jurisdiction '{0}'")]
    UnknownJurisdiction(String),

    #[error("no {kind} with id {id}")]
    UnknownRecord { kind: &'static str, id: String },

    #[error("record already has id {0}")]
    AlreadyHasId(String),

    #[error("unable to allocate an id for prefix {prefix} after {attempts} attempts")]
    IdExhausted { prefix: String, attempts: u64 },

    #[error("schema '{name}' failed to load: {reason}")]
    Schema { name: String, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
}

impl ImportError {
    /// Errors that only invalidate the file being imported. The run logs them
    /// and moves on to the next file.
    pub fn is_file_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::Json(_)
                | ImportError::Malformed { .. }
                | ImportError::MissingField { .. }
                | ImportError::UnknownSession { .. }
                | ImportError::Io { .. }
        )
    }

    pub fn missing(kind: &'static str, field: &str) -> Self {
        ImportError::MissingField {
            kind,
            field: field.to_string(),
        }
    }
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_fatal_classification() {
        assert!(ImportError::missing("bill", "bill_id").is_file_fatal());
        assert!(ImportError::UnknownSession {
            state: "ca".into(),
            session: "1850".into()
        }
        .is_file_fatal());
        assert!(!ImportError::UnknownJurisdiction("zz".into()).is_file_fatal());
        assert!(!ImportError::Store(rusqlite::Error::InvalidQuery).is_file_fatal());
    }
}
