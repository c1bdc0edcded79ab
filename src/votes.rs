// 🗳️ Vote Fingerprinter - stable vote ids across runs
//
// Votes live inside bills and carry no natural key of their own. A vote is
// fingerprinted by (motion, chamber, date, yes_count, no_count, other_count)
// and the n-th occurrence of a fingerprint within one bill is told apart by
// its occurrence index. Two identical roll calls on the same day keep their
// ids as long as the scraper lists them in the same order.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::error::{ImportError, Result};
use crate::ids::IdAllocator;
use crate::importer::{self, KindReport};
use crate::schema::SchemaRegistry;
use crate::text::fix_bill_id;

const FINGERPRINT_FIELDS: [&str; 6] = ["motion", "chamber", "date", "yes_count", "no_count", "other_count"];

/// Letter used in vote ids: CAV00000001.
pub const VOTE_LETTER: char = 'V';

type Fingerprint = [String; 6];

pub fn fingerprint(vote: &Value) -> Fingerprint {
    FINGERPRINT_FIELDS.map(|field| match vote.get(field) {
        Some(value) => value.to_string(),
        None => Value::Null.to_string(),
    })
}

// ============================================================================
// VOTE MATCHER
// ============================================================================

pub struct VoteMatcher {
    state: String,
    vote_ids: HashMap<(Fingerprint, usize), String>,
    seen: HashMap<Fingerprint, usize>,
}

impl VoteMatcher {
    pub fn new(state: &str) -> Self {
        VoteMatcher {
            state: state.to_string(),
            vote_ids: HashMap::new(),
            seen: HashMap::new(),
        }
    }

    fn key(&mut self, vote: &Value) -> (Fingerprint, usize) {
        let fp = fingerprint(vote);
        let count = self.seen.entry(fp.clone()).or_insert(0);
        let occurrence = *count;
        *count += 1;
        (fp, occurrence)
    }

    /// Remember the ids of already stored votes.
    pub fn learn_existing(&mut self, votes: &[Value]) {
        self.seen.clear();
        for vote in votes {
            let key = self.key(vote);
            if let Some(id) = vote.get("vote_id").and_then(Value::as_str) {
                self.vote_ids.insert(key, id.to_string());
            }
        }
    }

    /// Set `vote_id` on every vote: learned ids are reused, unseen votes get
    /// a fresh id. Returns how many fresh ids were allocated.
    pub fn assign_ids(&mut self, store: &Store, allocator: &IdAllocator, votes: &mut [Value]) -> Result<usize> {
        self.seen.clear();
        let mut fresh = 0;
        for vote in votes.iter_mut() {
            let key = self.key(vote);
            let id = match self.vote_ids.get(&key) {
                Some(id) => id.clone(),
                None => {
                    let id = allocator.next_big_id(store, &self.state, VOTE_LETTER)?;
                    self.vote_ids.insert(key, id.clone());
                    fresh += 1;
                    id
                }
            };
            if let Value::Object(vote) = vote {
                vote.insert("vote_id".into(), Value::String(id));
            }
        }
        Ok(fresh)
    }
}

// ============================================================================
// STANDALONE VOTE FILES
// ============================================================================

/// (chamber, session, bill_id) of the bill a standalone vote belongs to.
pub type BillKey = (String, String, String);

/// Standalone votes waiting for their bill.
#[derive(Debug, Default)]
pub struct PendingVotes {
    by_bill: HashMap<BillKey, Vec<Value>>,
}

impl PendingVotes {
    /// Load `<dir>/*.json`, grouped by the bill each vote names.
    pub fn load(registry: &SchemaRegistry, dir: &Path, report: &mut KindReport) -> Result<Self> {
        let mut pending = PendingVotes::default();
        for path in importer::json_files(dir)? {
            report.files += 1;
            match pending.add_file(registry, &path) {
                Ok(()) => {}
                Err(err) if err.is_file_fatal() => {
                    warn!(path = %path.display(), error = %err, "skipping vote file");
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        info!(files = report.files, bills = pending.by_bill.len(), "loaded standalone votes");
        Ok(pending)
    }

    fn add_file(&mut self, registry: &SchemaRegistry, path: &Path) -> Result<()> {
        let mut doc = importer::read_document(path)?;
        doc.insert("_type".into(), Value::String("vote".into()));
        let mut vote = importer::prepare_nested(registry, doc);

        let bill_id = take_str(&mut vote, "bill_id").ok_or_else(|| ImportError::missing("vote", "bill_id"))?;
        let session = vote
            .get("session")
            .and_then(Value::as_str)
            .ok_or_else(|| ImportError::missing("vote", "session"))?
            .to_string();
        let chamber = vote
            .get("bill_chamber")
            .or_else(|| vote.get("chamber"))
            .and_then(Value::as_str)
            .ok_or_else(|| ImportError::missing("vote", "bill_chamber"))?
            .to_string();
        vote.remove("_type");

        debug!(path = %path.display(), bill_id = bill_id.as_str(), "standalone vote");
        self.add((chamber, session, fix_bill_id(&bill_id)), Value::Object(vote));
        Ok(())
    }

    pub fn add(&mut self, key: BillKey, vote: Value) {
        self.by_bill.entry(key).or_default().push(vote);
    }

    /// Votes for one bill, removed from the pending set.
    pub fn take(&mut self, chamber: &str, session: &str, bill_id: &str) -> Vec<Value> {
        self.by_bill
            .remove(&(chamber.to_string(), session.to_string(), bill_id.to_string()))
            .unwrap_or_default()
    }

    /// Warn about every vote whose bill never showed up. Returns the count.
    pub fn report_leftovers(&self) -> usize {
        let mut count = 0;
        for ((chamber, session, bill_id), votes) in &self.by_bill {
            warn!(
                chamber = chamber.as_str(),
                session = session.as_str(),
                bill_id = bill_id.as_str(),
                votes = votes.len(),
                "failed to match votes to a bill"
            );
            count += votes.len();
        }
        count
    }
}

fn take_str(doc: &mut Map<String, Value>, key: &str) -> Option<String> {
    match doc.remove(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vote(motion: &str, yes: u32) -> Value {
        json!({"motion": motion, "chamber": "upper", "date": "2011-03-01T00:00:00Z",
               "yes_count": yes, "no_count": 0, "other_count": 0})
    }

    fn ids(votes: &[Value]) -> Vec<String> {
        votes.iter().map(|v| v["vote_id"].as_str().unwrap().to_string()).collect()
    }

    #[test]
    fn test_identical_fingerprints_get_distinct_stable_ids() {
        let store = Store::open_in_memory().unwrap();
        let allocator = IdAllocator::default();

        let mut first_run = vec![vote("pass", 30), vote("pass", 30)];
        VoteMatcher::new("ca").assign_ids(&store, &allocator, &mut first_run).unwrap();
        let first_ids = ids(&first_run);
        assert_eq!(first_ids, vec!["CAV00000001", "CAV00000002"]);

        // rerun with a third identical vote appended
        let mut matcher = VoteMatcher::new("ca");
        matcher.learn_existing(&first_run);
        let mut second_run = vec![vote("pass", 30), vote("pass", 30), vote("pass", 30)];
        let fresh = matcher.assign_ids(&store, &allocator, &mut second_run).unwrap();

        assert_eq!(fresh, 1);
        let second_ids = ids(&second_run);
        assert_eq!(&second_ids[..2], &first_ids[..]);
        assert_eq!(second_ids[2], "CAV00000003");

        // and an unchanged rerun allocates nothing
        let mut matcher = VoteMatcher::new("ca");
        matcher.learn_existing(&second_run);
        let mut third_run = vec![vote("pass", 30), vote("pass", 30), vote("pass", 30)];
        assert_eq!(matcher.assign_ids(&store, &allocator, &mut third_run).unwrap(), 0);
        assert_eq!(ids(&third_run), second_ids);
    }

    #[test]
    fn test_different_counts_are_different_votes() {
        assert_ne!(fingerprint(&vote("pass", 30)), fingerprint(&vote("pass", 31)));
        assert_ne!(fingerprint(&vote("pass", 30)), fingerprint(&vote("amend", 30)));
        assert_eq!(fingerprint(&json!({}))[0], "null");
    }

    #[test]
    fn test_pending_votes_grouped_by_bill() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SchemaRegistry::builtin().unwrap();
        std::fs::write(
            dir.path().join("v1.json"),
            json!({"bill_id": "S.B. 70", "bill_chamber": "upper", "session": "2011", "chamber": "lower",
                   "motion": "pass", "date": 1299000000, "yes_count": 1, "no_count": 0, "other_count": 0,
                   "yes_votes": ["Stephens"], "no_votes": [], "other_votes": [], "note": "x"})
            .to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(
            dir.path().join("orphan.json"),
            json!({"bill_id": "HB 9", "chamber": "lower", "session": "2011", "motion": "pass"}).to_string(),
        )
        .unwrap();

        let mut report = KindReport::default();
        let mut pending = PendingVotes::load(&registry, dir.path(), &mut report).unwrap();
        assert_eq!(report.files, 3);
        assert_eq!(report.skipped, 1);

        let votes = pending.take("upper", "2011", "SB 70");
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0]["date"], "2011-03-01T17:20:00Z");
        assert_eq!(votes[0]["+note"], "x");
        assert!(votes[0].get("bill_id").is_none());
        assert!(pending.take("upper", "2011", "SB 70").is_empty());

        assert_eq!(pending.report_leftovers(), 1);
    }
}
