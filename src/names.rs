// 🧑‍⚖️ Name Resolver - legislator names to legislator ids
//
// Scraped votes, sponsors and committee rosters name legislators however the
// source site likes: "Stephens", "Stephens, M", "Sen. Michael J. Stephens".
// For every legislator serving in a term we generate the usual textual forms
// and map each normalized form to the legislator's id. A form produced by two
// different legislators maps to nobody: abstaining beats guessing.
//
// Given a legislator named Michael J. Stephens, the forms include
//   Michael J. Stephens, Stephens, Stephens, Michael, Stephens, M,
//   M Stephens, M J Stephens, Michael Joseph Stephens, Stephens (M)
// Once a Matthew J. Stephens is learned too, every form built from the
// initial alone (Stephens, M / M Stephens / ...) stops matching.

use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::db::Store;
use crate::error::Result;
use crate::metadata::Metadata;
use crate::record::{Chamber, Kind, Record};

// ============================================================================
// NORMALIZATION
// ============================================================================

fn honorific_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(senator|sen\.?|representative|rep\.?|delegate|del\.?|assembly(member|man|woman)|councilmember)\s+")
            .expect("honorific pattern is valid")
    })
}

/// Strip a leading title, lowercase, drop periods, squeeze whitespace.
pub fn normalize(name: &str) -> String {
    let name = honorific_re().replace(name.trim(), "");
    name.to_lowercase()
        .replace('.', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// All textual forms of a legislator's name, normalized.
pub fn name_forms(legislator: &Record) -> HashSet<String> {
    let text = |key: &str| legislator.get_str(key).unwrap_or_default().trim().to_string();
    let full = text("full_name");
    let scraped = text("_scraped_name");
    let mut first = text("first_name");
    let mut last = text("last_name");
    let middle = text("middle_name");

    if (first.is_empty() || last.is_empty()) && !full.is_empty() {
        let (f, l, _) = crate::tagger::split_full_name(&full);
        if first.is_empty() {
            first = f;
        }
        if last.is_empty() {
            last = l;
        }
    }

    let mut forms = HashSet::new();
    let mut add = |form: String| {
        let form = normalize(&form);
        if !form.is_empty() {
            forms.insert(form);
        }
    };

    add(full);
    add(scraped);
    add(last.clone());

    if let Some(f) = first.chars().next() {
        add(format!("{last}, {first}"));
        add(format!("{first} {last}"));
        add(format!("{last}, {f}"));
        add(format!("{last} ({first})"));
        add(format!("{f} {last}"));
        add(format!("{last} ({f})"));

        if let Some(m) = middle.chars().next() {
            add(format!("{last}, {first} {middle}"));
            add(format!("{last}, {f} {middle}"));
            add(format!("{first} {middle} {last}"));
            add(format!("{last}, {f} {m}"));
            add(format!("{first} {m} {last}"));
            add(format!("{last}, {first} {m}"));
            add(format!("{last}, {f}.{m}."));
            add(format!("{f} {m} {last}"));
        }
    }

    forms
}

// ============================================================================
// NAME MATCHER
// ============================================================================

/// `Some(id)` for a unique form, `None` once two legislators share it.
type FormIndex = HashMap<String, Option<String>>;

/// Forms index for one jurisdiction and term, split by chamber. The `None`
/// chamber slot is the cross-chamber index.
#[derive(Debug, Default)]
pub struct NameMatcher {
    term: String,
    names: HashMap<Option<Chamber>, FormIndex>,
    codes: HashMap<Option<Chamber>, FormIndex>,
    manual: HashMap<Option<Chamber>, HashMap<String, String>>,
}

impl NameMatcher {
    pub fn new(term: &str) -> Self {
        NameMatcher {
            term: term.to_string(),
            ..Default::default()
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    /// Learn a legislator, taking the chamber from its role in this term.
    ///
    /// Returns false (and learns nothing) when the legislator has no role in
    /// the term.
    pub fn learn(&mut self, legislator: &Record) -> bool {
        match chamber_in_term(legislator, &self.term) {
            Some(chamber) => {
                self.learn_in(chamber, legislator);
                true
            }
            None => {
                warn!(
                    id = legislator.id.as_deref().unwrap_or_default(),
                    term = self.term.as_str(),
                    "legislator has no role in term, not learned"
                );
                false
            }
        }
    }

    /// Learn a legislator under an explicit chamber.
    pub fn learn_in(&mut self, chamber: Option<Chamber>, legislator: &Record) {
        let Some(id) = legislator.id.clone() else {
            return;
        };

        if let Some(code) = legislator.get_str("_code") {
            insert_form(self.codes.entry(chamber).or_default(), code.to_string(), &id);
            insert_form(self.codes.entry(None).or_default(), code.to_string(), &id);
        }

        for form in name_forms(legislator) {
            if chamber.is_some() {
                insert_form(self.names.entry(chamber).or_default(), form.clone(), &id);
            }
            insert_form(self.names.entry(None).or_default(), form, &id);
        }
    }

    /// Hand-curated name to id pair. Always beats the generated forms.
    pub fn learn_manual(&mut self, chamber: Option<Chamber>, name: &str, leg_id: &str) {
        for slot in [chamber, None] {
            let table = self.manual.entry(slot).or_default();
            table.insert(name.to_string(), leg_id.to_string());
            table.insert(normalize(name), leg_id.to_string());
        }
    }

    /// Load `term,chamber,name,leg_id` rows for this term from a CSV file.
    /// A missing file is not an error.
    pub fn learn_manual_file(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| csv_error(path, e))?;

        let mut learned = 0;
        for row in reader.records() {
            let row = row.map_err(|e| csv_error(path, e))?;
            let (Some(term), Some(chamber), Some(name), Some(leg_id)) = (row.get(0), row.get(1), row.get(2), row.get(3))
            else {
                continue;
            };
            if term.trim() == self.term && !leg_id.trim().is_empty() {
                self.learn_manual(Chamber::parse(chamber.trim()), name.trim(), leg_id.trim());
                learned += 1;
            }
        }
        Ok(learned)
    }

    /// Unique id for a name, or `None` when unknown or ambiguous.
    pub fn match_name(&self, name: &str, chamber: Option<Chamber>) -> Option<String> {
        let normalized = normalize(name);

        if let Some(manual) = self.manual.get(&chamber) {
            if let Some(id) = manual.get(name).or_else(|| manual.get(&normalized)) {
                return Some(id.clone());
            }
        }

        if let Some(Some(id)) = self.codes.get(&chamber).and_then(|codes| codes.get(name)) {
            return Some(id.clone());
        }

        self.names
            .get(&chamber)
            .and_then(|names| names.get(&normalized))
            .cloned()
            .flatten()
    }
}

fn insert_form(index: &mut FormIndex, form: String, id: &str) {
    match index.get(&form) {
        None => {
            index.insert(form, Some(id.to_string()));
        }
        Some(Some(existing)) if existing != id => {
            index.insert(form, None);
        }
        _ => {}
    }
}

fn csv_error(path: &Path, err: csv::Error) -> crate::error::ImportError {
    crate::error::ImportError::Malformed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Chamber of the legislator's member role in `term`, current or archived.
/// The outer option is "has a role in the term", the inner the chamber.
fn chamber_in_term(legislator: &Record, term: &str) -> Option<Option<Chamber>> {
    let current = legislator.array("roles").first();
    if let Some(role) = current.filter(|role| role.get("term").and_then(Value::as_str) == Some(term)) {
        return Some(role_chamber(role));
    }
    legislator
        .get("old_roles")
        .and_then(|old| old.get(term))
        .and_then(Value::as_array)
        .and_then(|roles| roles.first())
        .map(role_chamber)
}

fn role_chamber(role: &Value) -> Option<Chamber> {
    role.get("chamber").and_then(Value::as_str).and_then(Chamber::parse)
}

/// Whether the legislator held a member role in `term`, current or archived.
pub fn served_in_term(legislator: &Record, term: &str) -> bool {
    let is_member_in = |role: &Value, check_term: bool| {
        role.get("type").and_then(Value::as_str) == Some("member")
            && (!check_term || role.get("term").and_then(Value::as_str) == Some(term))
    };
    let current = legislator.array("roles").iter().any(|role| is_member_in(role, true));
    let archived = legislator
        .get("old_roles")
        .and_then(|old| old.get(term))
        .and_then(Value::as_array)
        .is_some_and(|roles| roles.iter().any(|role| is_member_in(role, false)));
    current || archived
}

// ============================================================================
// NAME RESOLVER
// ============================================================================

/// Per-run, per-jurisdiction resolver: builds one matcher per term on demand.
pub struct NameResolver {
    state: String,
    metadata: Metadata,
    manual_dir: Option<PathBuf>,
    matchers: HashMap<String, NameMatcher>,
    /// Names that found no confident match during this run.
    pub unresolved: usize,
}

impl NameResolver {
    pub fn new(metadata: Metadata, manual_dir: Option<PathBuf>) -> Self {
        NameResolver {
            state: metadata.abbreviation.clone(),
            metadata,
            manual_dir,
            matchers: HashMap::new(),
            unresolved: 0,
        }
    }

    /// Resolve a name used in `session`. Unknown sessions, unknown names and
    /// ambiguous names all come back as `None`.
    pub fn legislator_id(
        &mut self,
        store: &Store,
        session: &str,
        chamber: Option<Chamber>,
        name: &str,
    ) -> Result<Option<String>> {
        let Some(term) = self.metadata.term_for_session(session).map(str::to_string) else {
            warn!(state = self.state.as_str(), session, "unknown session, cannot resolve legislator names");
            self.unresolved += 1;
            return Ok(None);
        };
        self.legislator_id_in_term(store, &term, chamber, name)
    }

    pub fn legislator_id_in_term(
        &mut self,
        store: &Store,
        term: &str,
        chamber: Option<Chamber>,
        name: &str,
    ) -> Result<Option<String>> {
        if !self.matchers.contains_key(term) {
            let matcher = self.build_matcher(store, term)?;
            self.matchers.insert(term.to_string(), matcher);
        }
        let found = self.matchers.get(term).and_then(|m| m.match_name(name, chamber));
        if found.is_none() {
            self.unresolved += 1;
            warn!(state = self.state.as_str(), term, name, "no unique legislator match");
        }
        Ok(found)
    }

    /// Drop the built matchers so the next lookup sees newly stored legislators.
    pub fn reset(&mut self) {
        self.matchers.clear();
    }

    fn build_matcher(&self, store: &Store, term: &str) -> Result<NameMatcher> {
        let mut matcher = NameMatcher::new(term);
        let mut learned = 0;
        for legislator in store.find_by_state(Kind::Legislator, &self.state)? {
            if served_in_term(&legislator, term) && matcher.learn(&legislator) {
                learned += 1;
            }
        }
        if let Some(dir) = &self.manual_dir {
            let path = dir.join("leg_ids").join(format!("{}.csv", self.state));
            let manual = matcher.learn_manual_file(&path)?;
            debug!(path = %path.display(), manual, "loaded manual legislator ids");
        }
        debug!(state = self.state.as_str(), term, learned, "built name matcher");
        Ok(matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn legislator(id: &str, full: &str, first: &str, middle: &str, last: &str, chamber: &str) -> Record {
        let mut record = Record::new(Kind::Legislator);
        record.id = Some(id.to_string());
        record.set("state", "ex");
        record.set("full_name", full);
        record.set("_scraped_name", full);
        record.set("first_name", first);
        record.set("middle_name", middle);
        record.set("last_name", last);
        record.set(
            "roles",
            json!([{"type": "member", "term": "2011-2012", "chamber": chamber, "district": "1"}]),
        );
        record
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Senator Michael J. Stephens"), "michael j stephens");
        assert_eq!(normalize("  Rep. Smith "), "smith");
        assert_eq!(normalize("Assemblywoman Lee"), "lee");
        assert_eq!(normalize("Stephens,  M."), "stephens, m");
    }

    #[test]
    fn test_single_legislator_forms_match() {
        let mut matcher = NameMatcher::new("2011-2012");
        assert!(matcher.learn(&legislator("EXL000001", "Michael J. Stephens", "Michael", "J.", "Stephens", "upper")));

        for name in ["Stephens", "Stephens, M", "M Stephens", "Michael J. Stephens", "Stephens (Michael)", "Senator Stephens"] {
            assert_eq!(matcher.match_name(name, None).as_deref(), Some("EXL000001"), "{name}");
        }
        assert_eq!(matcher.match_name("Stephens", Some(Chamber::Upper)).as_deref(), Some("EXL000001"));
        assert_eq!(matcher.match_name("Stephens", Some(Chamber::Lower)), None);
        assert_eq!(matcher.match_name("Stevens", None), None);
    }

    #[test]
    fn test_shared_forms_become_ambiguous() {
        let mut matcher = NameMatcher::new("2011-2012");
        matcher.learn(&legislator("EXL000001", "Michael J. Stephens", "Michael", "J.", "Stephens", "upper"));
        matcher.learn(&legislator("EXL000002", "Mike J. Stephens", "Mike", "J.", "Stephens", "upper"));

        assert_eq!(matcher.match_name("Stephens", None), None);
        assert_eq!(matcher.match_name("Stephens, M", None), None);
        assert_eq!(matcher.match_name("M Stephens", None), None);
        assert_eq!(matcher.match_name("Mike J. Stephens", None).as_deref(), Some("EXL000002"));
        assert_eq!(matcher.match_name("Michael J. Stephens", None).as_deref(), Some("EXL000001"));
    }

    #[test]
    fn test_ambiguity_is_scoped_per_chamber() {
        let mut matcher = NameMatcher::new("2011-2012");
        matcher.learn(&legislator("EXL000001", "Ann Lee", "Ann", "", "Lee", "upper"));
        matcher.learn(&legislator("EXL000002", "Bob Lee", "Bob", "", "Lee", "lower"));

        assert_eq!(matcher.match_name("Lee", None), None);
        assert_eq!(matcher.match_name("Lee", Some(Chamber::Upper)).as_deref(), Some("EXL000001"));
        assert_eq!(matcher.match_name("Lee", Some(Chamber::Lower)).as_deref(), Some("EXL000002"));
    }

    #[test]
    fn test_every_shared_form_abstains() {
        let a = legislator("EXL000001", "Michael J. Stephens", "Michael", "J.", "Stephens", "upper");
        let b = legislator("EXL000002", "Matthew J. Stephens", "Matthew", "Joseph", "Stephens", "upper");
        let mut matcher = NameMatcher::new("2011-2012");
        matcher.learn(&a);
        matcher.learn(&b);

        let shared: Vec<String> = name_forms(&a).intersection(&name_forms(&b)).cloned().collect();
        assert!(!shared.is_empty());
        for form in shared {
            assert_eq!(matcher.match_name(&form, None), None, "{form}");
        }
    }

    #[test]
    fn test_manual_matches_win() {
        let mut matcher = NameMatcher::new("2011-2012");
        matcher.learn(&legislator("EXL000001", "Michael J. Stephens", "Michael", "J.", "Stephens", "upper"));
        matcher.learn_manual(Some(Chamber::Upper), "Stephens", "EXL000099");

        assert_eq!(matcher.match_name("Stephens", None).as_deref(), Some("EXL000099"));
        assert_eq!(matcher.match_name("Stephens", Some(Chamber::Upper)).as_deref(), Some("EXL000099"));
    }

    #[test]
    fn test_manual_file_filters_by_term() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ex.csv");
        std::fs::write(
            &path,
            "2011-2012,upper,Big Mike,EXL000007\n2009-2010,upper,Old Mike,EXL000008\n2011-2012,lower,Nobody,\n",
        )
        .unwrap();

        let mut matcher = NameMatcher::new("2011-2012");
        assert_eq!(matcher.learn_manual_file(&path).unwrap(), 1);
        assert_eq!(matcher.match_name("Big Mike", None).as_deref(), Some("EXL000007"));
        assert_eq!(matcher.match_name("Old Mike", None), None);
        assert_eq!(matcher.learn_manual_file(&dir.path().join("missing.csv")).unwrap(), 0);
    }

    #[test]
    fn test_codes() {
        let mut matcher = NameMatcher::new("2011-2012");
        let mut leg = legislator("EXL000001", "Ann Lee", "Ann", "", "Lee", "upper");
        leg.set("_code", "S12");
        matcher.learn(&leg);
        assert_eq!(matcher.match_name("S12", None).as_deref(), Some("EXL000001"));
    }

    #[test]
    fn test_learn_from_old_roles() {
        let mut leg = legislator("EXL000001", "Ann Lee", "Ann", "", "Lee", "upper");
        let roles = leg.remove("roles").unwrap();
        leg.set("roles", json!([]));
        leg.set("old_roles", json!({ "2011-2012": roles }));

        assert!(served_in_term(&leg, "2011-2012"));
        let mut matcher = NameMatcher::new("2011-2012");
        assert!(matcher.learn(&leg));
        assert_eq!(matcher.match_name("Lee", Some(Chamber::Upper)).as_deref(), Some("EXL000001"));

        let mut other_term = NameMatcher::new("2013-2014");
        assert!(!other_term.learn(&leg));
    }
}
