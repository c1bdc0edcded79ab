// 🔑 Id Allocator - stable, human-readable entity ids
//
// Ids look like CAB000123: jurisdiction, kind letter, zero-padded sequence.
// Allocation is optimistic: propose max + 1, insert, and on a key conflict
// (another run got there first) try the next number. An optional counter row
// hands out numbers without scanning; it falls back to the scan loop on any
// conflict and is then moved past whatever the scan allocated.

use chrono::Utc;
use tracing::debug;

use crate::db::Store;
use crate::error::{ImportError, Result};
use crate::record::{Kind, Record};

const ID_DIGITS: usize = 6;
const VOTE_DIGITS: usize = 8;

#[derive(Debug, Clone)]
pub struct IdAllocator {
    /// Try the counter row before scanning for the max id.
    pub use_counters: bool,
    /// Extra attempts allowed beyond the number of ids already in use.
    pub retry_slack: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator {
            use_counters: true,
            retry_slack: 64,
        }
    }
}

/// `<JUR><letter>`, e.g. "CAB".
pub fn id_prefix(state: &str, letter: char) -> String {
    format!("{}{}", state.to_uppercase(), letter)
}

pub fn format_id(prefix: &str, number: u64) -> String {
    format!("{prefix}{number:0width$}", width = ID_DIGITS)
}

/// Numeric part of an id with the given prefix.
pub fn id_number(prefix: &str, id: &str) -> Option<u64> {
    id.strip_prefix(prefix)?.parse().ok()
}

impl IdAllocator {
    /// Assign the next free id to `record` and insert it.
    ///
    /// Sets `_all_ids`, timestamps and, for legislators, `leg_id`.
    pub fn insert_with_id(&self, store: &Store, record: &mut Record) -> Result<String> {
        if let Some(id) = &record.id {
            return Err(ImportError::AlreadyHasId(id.clone()));
        }
        let state = record.require_str("state")?.to_string();
        let prefix = id_prefix(&state, record.kind.letter());

        let now = Utc::now();
        record.created_at = Some(now);
        record.updated_at = Some(now);

        if self.use_counters {
            let number = store.next_sequence(&prefix)?;
            if self.try_number(store, record, &prefix, number)? {
                return Ok(format_id(&prefix, number));
            }
            debug!(prefix = prefix.as_str(), number, "counter collided, falling back to scan");
        }

        let number = self.scan_and_insert(store, record, &prefix)?;
        if self.use_counters {
            store.raise_sequence(&prefix, number)?;
        }
        Ok(format_id(&prefix, number))
    }

    /// Find the max id, then insert at max + 1, moving up on each conflict.
    fn scan_and_insert(&self, store: &Store, record: &mut Record, prefix: &str) -> Result<u64> {
        let start = store
            .max_id(record.kind, prefix)?
            .and_then(|id| id_number(prefix, &id))
            .unwrap_or(0)
            + 1;
        self.insert_from(store, record, prefix, start)
    }

    /// Retry loop starting at `candidate`. Bounded by the ids in use plus slack,
    /// since every conflict means one more id exists past the previous guess.
    pub(crate) fn insert_from(&self, store: &Store, record: &mut Record, prefix: &str, mut candidate: u64) -> Result<u64> {
        let attempts = store.count_ids(record.kind, prefix)? + self.retry_slack + 1;
        for _ in 0..attempts {
            if self.try_number(store, record, prefix, candidate)? {
                return Ok(candidate);
            }
            candidate += 1;
        }
        record.id = None;
        record.all_ids.clear();
        Err(ImportError::IdExhausted {
            prefix: prefix.to_string(),
            attempts,
        })
    }

    fn try_number(&self, store: &Store, record: &mut Record, prefix: &str, number: u64) -> Result<bool> {
        let id = format_id(prefix, number);
        record.id = Some(id.clone());
        if !record.all_ids.contains(&id) {
            record.all_ids = vec![id.clone()];
        }
        if record.kind == Kind::Legislator {
            record.set("leg_id", id.clone());
        }
        let inserted = store.try_insert(record)?;
        if !inserted {
            record.id = None;
        }
        Ok(inserted)
    }

    /// Ids for sub-records (votes) that have no table of their own:
    /// counter only, e.g. CAV00000001.
    pub fn next_big_id(&self, store: &Store, state: &str, letter: char) -> Result<String> {
        let prefix = id_prefix(state, letter);
        let seq = store.next_sequence(&prefix)?;
        Ok(format!("{prefix}{seq:0width$}", width = VOTE_DIGITS))
    }
}
