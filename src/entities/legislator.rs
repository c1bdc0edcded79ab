// 🧑‍💼 Legislator Importer
//
// Natural key: a name match among legislators holding a role of the same
// type (and district/chamber when known) in the scraped term or one of its
// neighbours, current or archived. The neighbour terms let a re-elected
// legislator keep their id across terms, with the superseded roles archived
// under `old_roles`.
//
// After all files, two sweeps bring the derived flags in line with the
// current term:
//   activate   - current members get active/party/district/chamber
//   deactivate - everyone else has their roles archived and flags cleared
// A scrape of someone no longer serving is archived before the merge, so the
// stored record already looks the way the deactivate sweep leaves it.

use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::error::{ImportError, Result};
use crate::importer::{import_files, prepare, Applied, ImportContext, KindReport};
use crate::names::NameMatcher;
use crate::record::{Chamber, Kind, Record};
use crate::tagger::Tagged;

use super::{remove_unlocked, save_changed, set_unlocked, upsert};

pub const MEMBER: &str = "member";
pub const COMMITTEE_MEMBER: &str = "committee member";

/// Top-level copies of the current seat, owned by the sweeps.
const SEAT_FIELDS: [&str; 3] = ["district", "chamber", "party"];

pub fn import_legislators(ctx: &mut ImportContext) -> Result<KindReport> {
    let mut report = KindReport::default();
    let before = ctx.unresolved();
    let current_term = ctx.current_term()?;

    let dir = ctx.kind_dir("legislators");
    import_files(&dir, &mut report, |_, doc| import_legislator(ctx, doc))?;

    let activated = activate_legislators(ctx.store, ctx.abbr(), &current_term)?;
    let deactivated = deactivate_legislators(ctx.store, ctx.abbr(), &current_term)?;

    // matchers built earlier in the run don't know the new legislators
    ctx.names.reset();

    report.unresolved = ctx.unresolved() - before;
    info!(
        state = ctx.abbr(),
        files = report.files,
        inserted = report.inserted,
        updated = report.updated,
        activated,
        deactivated,
        "imported legislators"
    );
    Ok(report)
}

pub fn import_legislator(ctx: &mut ImportContext, doc: Map<String, Value>) -> Result<Applied> {
    let Tagged { fields, extras } = prepare(ctx.registry, Kind::Legislator, doc);
    let mut leg = Record::scraped(Kind::Legislator, fields, extras);

    let state = leg.require_str("state")?.to_string();
    let full_name = leg.require_str("full_name")?.to_string();
    leg.set("_scraped_name", full_name.as_str());

    for role in leg.array_mut("roles").iter_mut() {
        if let Value::Object(role) = role {
            if let Some(role_type) = role.remove("role") {
                role.insert("type".into(), role_type);
            }
            role.insert("state".into(), Value::String(state.clone()));
        }
    }

    let current_role = leg
        .array("roles")
        .first()
        .cloned()
        .ok_or_else(|| ImportError::missing("person", "roles"))?;
    let term = str_field(&current_role, "term")
        .ok_or_else(|| ImportError::missing("person", "roles.term"))?
        .to_string();
    let current_term = ctx.current_term()?;
    let prev_term = ctx.metadata.previous_term(&term).map(str::to_string);
    let next_term = ctx.metadata.next_term(&term).map(str::to_string);

    let terms: Vec<&str> = [Some(term.as_str()), prev_term.as_deref(), next_term.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    let existing = find_existing(ctx.store, &state, &full_name, &current_role, &terms)?;

    let mut archive = existing.as_ref().map(archived_roles).unwrap_or_default();
    let mut archive_changed = false;

    if let Some(old) = &existing {
        let old_roles = old.array("roles").to_vec();
        let old_term = first_term(&old_roles);

        if old_term.is_some() && old_term == prev_term {
            // re-elected: the stored roles are history now
            if let Some(prev) = &prev_term {
                archive.insert(prev.clone(), Value::Array(old_roles));
                archive_changed = true;
            }
        } else if old_term.is_some() && old_term == next_term {
            // an older scrape: keep the newer roles current
            let scraped_roles = take_roles(&mut leg);
            archive.insert(term.clone(), Value::Array(scraped_roles));
            leg.set("roles", old_roles);
            archive_changed = true;
        } else {
            carry_committee_roles(&mut leg, &old_roles);
        }
    }

    if no_longer_serving(leg.array("roles"), &current_term) {
        let roles = take_roles(&mut leg);
        let roles_term = first_term(&roles).unwrap_or_else(|| term.clone());
        archive_roles(&mut archive, &roles_term, roles);
        leg.set("roles", json!([]));
        leg.set("active", false);
        for key in SEAT_FIELDS {
            leg.remove(key);
        }
        archive_changed = true;
    }

    if archive_changed {
        leg.set("old_roles", archive);
    }

    let (record, applied) = upsert(ctx, existing, leg)?;
    debug!(id = record.id.as_deref().unwrap_or_default(), ?applied, "legislator");
    Ok(applied)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn take_roles(leg: &mut Record) -> Vec<Value> {
    match leg.remove("roles") {
        Some(Value::Array(roles)) => roles,
        _ => Vec::new(),
    }
}

fn archived_roles(leg: &Record) -> Map<String, Value> {
    leg.get("old_roles").and_then(Value::as_object).cloned().unwrap_or_default()
}

/// Term a list of roles belongs to: the term of its first role.
fn first_term(roles: &[Value]) -> Option<String> {
    roles.first().and_then(|role| str_field(role, "term")).map(str::to_string)
}

/// Append `roles` to the archive under `term`, skipping roles already
/// archived there.
fn archive_roles(archive: &mut Map<String, Value>, term: &str, roles: Vec<Value>) {
    let archived = archive.entry(term.to_string()).or_insert_with(|| json!([]));
    if !archived.is_array() {
        *archived = json!([]);
    }
    if let Value::Array(archived) = archived {
        for role in roles {
            if !archived.contains(&role) {
                archived.push(role);
            }
        }
    }
}

/// Current roles followed by every archived role.
fn all_roles(leg: &Record) -> impl Iterator<Item = &Value> {
    let archived = leg
        .get("old_roles")
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|archive| archive.values())
        .filter_map(Value::as_array)
        .flatten();
    leg.array("roles").iter().chain(archived)
}

/// Whether `role` could be the stored counterpart of the scraped current role.
fn role_matches(role: &Value, current: &Value, terms: &[&str]) -> bool {
    let same = |key: &str| match str_field(current, key) {
        Some(wanted) => str_field(role, key) == Some(wanted),
        None => true,
    };
    str_field(role, "type") == str_field(current, "type")
        && str_field(role, "term").is_some_and(|term| terms.contains(&term))
        && same("district")
        && same("chamber")
}

fn find_existing(
    store: &Store,
    state: &str,
    full_name: &str,
    current_role: &Value,
    terms: &[&str],
) -> Result<Option<Record>> {
    let candidates: Vec<Record> = store
        .find_by_state(Kind::Legislator, state)?
        .into_iter()
        .filter(|leg| all_roles(leg).any(|role| role_matches(role, current_role, terms)))
        .collect();

    let mut exact: Vec<&Record> = candidates
        .iter()
        .filter(|leg| leg.get_str("_scraped_name") == Some(full_name))
        .collect();
    if exact.len() > 1 {
        warn!(state, full_name, matches = exact.len(), "several legislators share a scraped name, using the first");
    }
    if !exact.is_empty() {
        return Ok(Some(exact.swap_remove(0).clone()));
    }

    // no exact hit: fall back to the name forms, scoped to the candidates
    let chamber = str_field(current_role, "chamber").and_then(Chamber::parse);
    let mut matcher = NameMatcher::new(str_field(current_role, "term").unwrap_or_default());
    for candidate in &candidates {
        matcher.learn_in(chamber, candidate);
    }
    let Some(id) = matcher.match_name(full_name, chamber) else {
        return Ok(None);
    };
    Ok(candidates.into_iter().find(|leg| leg.id.as_deref() == Some(id.as_str())))
}

/// Committee roles linked by the committee importer aren't part of the
/// scrape: keep them, and keep their link on scraped roles for the same
/// committee.
fn carry_committee_roles(leg: &mut Record, old_roles: &[Value]) {
    let roles = leg.array_mut("roles");
    for old in old_roles {
        let Some(committee_id) = old.get("committee_id").filter(|id| !id.is_null()) else {
            continue;
        };
        if str_field(old, "type") != Some(COMMITTEE_MEMBER) {
            continue;
        }
        let same_committee = |role: &Value| {
            str_field(role, "type") == Some(COMMITTEE_MEMBER)
                && str_field(role, "term") == str_field(old, "term")
                && (role.get("committee_id") == Some(committee_id)
                    || (str_field(role, "committee") == str_field(old, "committee")
                        && str_field(role, "subcommittee") == str_field(old, "subcommittee")))
        };
        match roles.iter_mut().find(|role| same_committee(role)) {
            Some(role) => {
                if let Some(role) = role.as_object_mut() {
                    role.entry("committee_id").or_insert_with(|| committee_id.clone());
                }
            }
            None => roles.push(old.clone()),
        }
    }
}

// ============================================================================
// SWEEPS
// ============================================================================
// Both sweeps only touch unlocked fields and only save what they changed.

fn is_member_role(role: &Value) -> bool {
    str_field(role, "type") == Some(MEMBER)
}

fn has_end_date(role: &Value) -> bool {
    role.get("end_date").is_some_and(|end| !end.is_null())
}

/// A member role from another term, or a current-term role that has ended.
fn no_longer_serving(roles: &[Value], current_term: &str) -> bool {
    roles
        .iter()
        .any(|role| is_member_role(role) && (str_field(role, "term") != Some(current_term) || has_end_date(role)))
}

fn serving(roles: &[Value], current_term: &str) -> bool {
    roles
        .iter()
        .any(|role| is_member_role(role) && str_field(role, "term") == Some(current_term) && !has_end_date(role))
}

/// Flag legislators serving in the current term as active and copy their
/// party, district and chamber to the top level.
pub fn activate_legislators(store: &Store, state: &str, current_term: &str) -> Result<usize> {
    let mut activated = 0;
    for mut leg in store.find_by_state(Kind::Legislator, state)? {
        let Some(active_role) = leg.array("roles").first().cloned() else {
            continue;
        };
        if !serving(leg.array("roles"), current_term) || has_end_date(&active_role) {
            continue;
        }

        let mut changed = Vec::new();
        let wanted = [
            ("active", Value::Bool(true)),
            ("party", active_role.get("party").cloned().unwrap_or(Value::Null)),
            ("district", active_role.get("district").cloned().unwrap_or(Value::Null)),
            ("chamber", active_role.get("chamber").cloned().unwrap_or(Value::Null)),
        ];
        for (key, value) in wanted {
            if set_unlocked(&mut leg, key, value) {
                changed.push(key);
            }
        }

        if !changed.is_empty() {
            save_changed(store, &mut leg, &changed)?;
            activated += 1;
        }
    }
    Ok(activated)
}

/// Archive the roles of legislators no longer serving and clear the flags
/// of everyone without a current seat.
pub fn deactivate_legislators(store: &Store, state: &str, current_term: &str) -> Result<usize> {
    let mut deactivated = 0;
    for mut leg in store.find_by_state(Kind::Legislator, state)? {
        let mut changed = Vec::new();

        // history is only moved when both ends of the move are writable
        let roles = leg.array("roles").to_vec();
        if no_longer_serving(&roles, current_term) && !leg.is_locked("roles") && !leg.is_locked("old_roles") {
            let mut archive = archived_roles(&leg);
            let roles_term = first_term(&roles).unwrap_or_else(|| current_term.to_string());
            archive_roles(&mut archive, &roles_term, roles);
            if set_unlocked(&mut leg, "old_roles", archive) {
                changed.push("old_roles");
            }
            if set_unlocked(&mut leg, "roles", json!([])) {
                changed.push("roles");
            }
        }

        if !serving(leg.array("roles"), current_term) {
            if set_unlocked(&mut leg, "active", false) {
                changed.push("active");
            }
            for key in SEAT_FIELDS {
                if remove_unlocked(&mut leg, key) {
                    changed.push(key);
                }
            }
        }

        if !changed.is_empty() {
            save_changed(store, &mut leg, &changed)?;
            deactivated += 1;
        }
    }
    Ok(deactivated)
}

// ============================================================================
// FOLDING DUPLICATES
// ============================================================================

/// Fold `duplicate_id` into `keep_id` when two ids turn out to be the same
/// person.
///
/// The duplicate's document carries on under the kept id: `all_ids` gains
/// every id either record had, `leg_id` stays the kept id, archived roles of
/// both are kept, and fields locked on the kept record keep their values.
/// The duplicate record is deleted.
pub fn merge_legislators(store: &Store, keep_id: &str, duplicate_id: &str) -> Result<Record> {
    let load = |id: &str| -> Result<Record> {
        store.get(Kind::Legislator, id)?.ok_or_else(|| ImportError::UnknownRecord {
            kind: Kind::Legislator.type_name(),
            id: id.to_string(),
        })
    };
    let keep = load(keep_id)?;
    if keep_id == duplicate_id {
        return Ok(keep);
    }
    let duplicate = load(duplicate_id)?;

    let mut survivor = duplicate.clone();
    survivor.id = keep.id.clone();
    survivor.created_at = match (keep.created_at, duplicate.created_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    survivor.updated_at = Some(Utc::now());

    let all_ids: BTreeSet<String> = keep
        .all_ids
        .iter()
        .chain(&duplicate.all_ids)
        .cloned()
        .chain([keep_id.to_string(), duplicate_id.to_string()])
        .collect();
    survivor.all_ids = all_ids.into_iter().collect();
    survivor.set("leg_id", keep_id);

    let mut archive = archived_roles(&duplicate);
    for (term, roles) in archived_roles(&keep) {
        if let Value::Array(roles) = roles {
            archive_roles(&mut archive, &term, roles);
        }
    }
    if !archive.is_empty() {
        survivor.set("old_roles", archive);
    }

    survivor.locked_fields.extend(keep.locked_fields.iter().cloned());
    for key in &keep.locked_fields {
        match keep.get(key) {
            Some(value) => survivor.set(key, value.clone()),
            None => {
                survivor.remove(key);
            }
        }
    }

    store.delete(Kind::Legislator, duplicate_id, keep_id)?;
    store.save_with_audit(&survivor, &["_all_ids".to_string()])?;
    info!(keep = keep_id, folded = duplicate_id, "merged legislators");
    Ok(survivor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::Fixture;
    use crate::ids::IdAllocator;

    fn scraped(name: &str, term: &str, chamber: &str, district: &str) -> Value {
        json!({
            "_type": "person",
            "state": "ex",
            "full_name": name,
            "roles": [{"role": "member", "term": term, "chamber": chamber,
                       "district": district, "party": "Democratic", "end_date": null}],
            "sources": [{"url": "http://example.com/leg"}],
            "hobby": "fishing"
        })
    }

    fn import(fixture: &Fixture, doc: Value) -> Applied {
        let Value::Object(doc) = doc else { unreachable!() };
        import_legislator(&mut fixture.context(), doc).unwrap()
    }

    fn only_legislator(fixture: &Fixture) -> Record {
        let mut all = fixture.store.find_by_state(Kind::Legislator, "ex").unwrap();
        assert_eq!(all.len(), 1, "expected one legislator");
        all.remove(0)
    }

    fn stored_legislator(store: &Store, fields: Value) -> Record {
        let mut leg = Record::new(Kind::Legislator);
        if let Value::Object(map) = fields {
            leg.fields = map;
        }
        IdAllocator::default().insert_with_id(store, &mut leg).unwrap();
        leg
    }

    #[test]
    fn test_import_and_reimport() {
        let fixture = Fixture::new("ex");
        assert_eq!(import(&fixture, scraped("Michael J. Stephens", "2011-2012", "upper", "5")), Applied::Inserted);

        let leg = only_legislator(&fixture);
        assert_eq!(leg.id.as_deref(), Some("EXL000001"));
        assert_eq!(leg.get_str("leg_id"), Some("EXL000001"));
        assert_eq!(leg.get_str("_scraped_name"), Some("Michael J. Stephens"));
        assert_eq!(leg.get_str("first_name"), Some("Michael"));
        assert_eq!(leg.extras["hobby"], "fishing");
        let role = &leg.array("roles")[0];
        assert_eq!(role["type"], "member");
        assert_eq!(role["state"], "ex");
        assert!(role.get("role").is_none());

        assert_eq!(import(&fixture, scraped("Michael J. Stephens", "2011-2012", "upper", "5")), Applied::Unchanged);
        let again = only_legislator(&fixture);
        assert_eq!(again.updated_at, leg.updated_at);
    }

    #[test]
    fn test_name_variant_in_same_seat_matches() {
        let fixture = Fixture::new("ex");
        import(&fixture, scraped("Michael J. Stephens", "2011-2012", "upper", "5"));
        import(&fixture, scraped("Sen. Michael J. Stephens", "2011-2012", "upper", "5"));
        assert_eq!(only_legislator(&fixture).id.as_deref(), Some("EXL000001"));

        // a different seat is a different legislator
        import(&fixture, scraped("Michael J. Stephens", "2011-2012", "upper", "6"));
        assert_eq!(fixture.store.count(Kind::Legislator, "ex").unwrap(), 2);
    }

    #[test]
    fn test_reelection_archives_previous_term() {
        let fixture = Fixture::new("ex");
        import(&fixture, scraped("Ann Lee", "2009-2010", "lower", "3"));
        assert_eq!(import(&fixture, scraped("Ann Lee", "2011-2012", "lower", "3")), Applied::Updated);

        let leg = only_legislator(&fixture);
        assert_eq!(leg.array("roles")[0]["term"], "2011-2012");
        assert_eq!(leg.fields["old_roles"]["2009-2010"][0]["term"], "2009-2010");
    }

    #[test]
    fn test_older_scrape_keeps_newer_roles() {
        let fixture = Fixture::new("ex");
        import(&fixture, scraped("Ann Lee", "2011-2012", "lower", "3"));
        import(&fixture, scraped("Ann Lee", "2009-2010", "lower", "3"));

        let leg = only_legislator(&fixture);
        assert_eq!(leg.array("roles")[0]["term"], "2011-2012");
        assert_eq!(leg.fields["old_roles"]["2009-2010"][0]["term"], "2009-2010");
    }

    #[test]
    fn test_committee_roles_survive_reimport() {
        let fixture = Fixture::new("ex");
        import(&fixture, scraped("Ann Lee", "2011-2012", "lower", "3"));
        let mut leg = only_legislator(&fixture);
        leg.array_mut("roles").push(json!({
            "type": "committee member", "term": "2011-2012", "chamber": "lower",
            "committee": "Finance", "committee_id": "EXC000001", "state": "ex"
        }));
        fixture.store.save(&leg).unwrap();

        assert_eq!(import(&fixture, scraped("Ann Lee", "2011-2012", "lower", "3")), Applied::Unchanged);
        assert_eq!(only_legislator(&fixture).array("roles").len(), 2);
    }

    #[test]
    fn test_missing_roles_is_file_fatal() {
        let fixture = Fixture::new("ex");
        let Value::Object(doc) = json!({"state": "ex", "full_name": "No Roles", "roles": []}) else {
            unreachable!()
        };
        let err = import_legislator(&mut fixture.context(), doc).unwrap_err();
        assert!(err.is_file_fatal());
    }

    #[test]
    fn test_activate_legislators() {
        let store = Store::open_in_memory().unwrap();
        let leg = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Active Person", "roles": [
                {"type": "member", "term": "2011-2012", "chamber": "upper", "district": "1",
                 "party": "Republican", "end_date": null, "state": "ex"}
            ]}),
        );

        assert_eq!(activate_legislators(&store, "ex", "2011-2012").unwrap(), 1);
        let stored = store.get(Kind::Legislator, leg.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(stored.fields["active"], true);
        assert_eq!(stored.get_str("party"), Some("Republican"));
        assert_eq!(stored.get_str("district"), Some("1"));
        assert_eq!(stored.get_str("chamber"), Some("upper"));

        // nothing left to change
        assert_eq!(activate_legislators(&store, "ex", "2011-2012").unwrap(), 0);
        let again = store.get(Kind::Legislator, leg.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(again.updated_at, stored.updated_at);
    }

    #[test]
    fn test_deactivate_legislators() {
        let store = Store::open_in_memory().unwrap();
        let old_term = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Retired Person", "active": true, "party": "Democratic",
                   "district": "2", "chamber": "lower", "roles": [
                {"type": "member", "term": "2009-2010", "chamber": "lower", "district": "2",
                 "party": "Democratic", "end_date": null, "state": "ex"}
            ]}),
        );
        let resigned = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Resigned Person", "roles": [
                {"type": "member", "term": "2011-2012", "chamber": "upper", "district": "9",
                 "party": "Independent", "end_date": "2011-06-01T00:00:00Z", "state": "ex"}
            ]}),
        );
        let current = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Current Person", "roles": [
                {"type": "member", "term": "2011-2012", "chamber": "upper", "district": "1",
                 "party": "Republican", "end_date": null, "state": "ex"}
            ]}),
        );

        assert_eq!(deactivate_legislators(&store, "ex", "2011-2012").unwrap(), 2);

        let retired = store.get(Kind::Legislator, old_term.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(retired.fields["active"], false);
        assert!(retired.array("roles").is_empty());
        assert_eq!(retired.fields["old_roles"]["2009-2010"][0]["district"], "2");
        for key in ["district", "chamber", "party"] {
            assert!(retired.get(key).is_none(), "{key} should be cleared");
        }

        let resigned = store.get(Kind::Legislator, resigned.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(resigned.fields["old_roles"]["2011-2012"][0]["district"], "9");

        let current = store.get(Kind::Legislator, current.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(current.array("roles").len(), 1);

        // idempotent
        assert_eq!(deactivate_legislators(&store, "ex", "2011-2012").unwrap(), 0);
    }

    fn resigned(name: &str) -> Value {
        let mut doc = scraped(name, "2011-2012", "upper", "9");
        doc["roles"][0]["end_date"] = json!(1306886400);
        doc
    }

    fn run_twice(fixture: &Fixture) -> (Record, KindReport) {
        import_legislators(&mut fixture.context()).unwrap();
        let first = only_legislator(fixture);
        let report = import_legislators(&mut fixture.context()).unwrap();
        let second = only_legislator(fixture);
        assert_eq!(second.id, first.id);
        assert_eq!(second.updated_at, first.updated_at, "a rerun must not touch the record");
        (second, report)
    }

    #[test]
    fn test_resigned_legislator_rerun_keeps_one_record() {
        let fixture = Fixture::new("ex");
        fixture.write("legislators", "1.json", resigned("Ann Lee"));

        let (leg, report) = run_twice(&fixture);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.inserted + report.updated, 0);
        assert!(leg.array("roles").is_empty());
        assert_eq!(leg.fields["active"], false);
        assert_eq!(leg.fields["old_roles"]["2011-2012"][0]["district"], "9");
        assert_eq!(leg.fields["old_roles"]["2011-2012"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_past_term_legislator_rerun_keeps_one_record() {
        let fixture = Fixture::new("ex");
        fixture.write("legislators", "1.json", scraped("Ann Lee", "2009-2010", "lower", "3"));

        let (leg, report) = run_twice(&fixture);
        assert_eq!(report.unchanged, 1);
        assert_eq!(leg.fields["old_roles"]["2009-2010"][0]["term"], "2009-2010");
    }

    #[test]
    fn test_resignation_clears_seat_once() {
        let fixture = Fixture::new("ex");
        fixture.write("legislators", "1.json", scraped("Ann Lee", "2011-2012", "upper", "9"));
        import_legislators(&mut fixture.context()).unwrap();
        assert_eq!(only_legislator(&fixture).get_str("party"), Some("Democratic"));

        fixture.write("legislators", "1.json", resigned("Ann Lee"));
        let report = import_legislators(&mut fixture.context()).unwrap();
        assert_eq!(report.updated, 1);

        let leg = only_legislator(&fixture);
        assert_eq!(leg.id.as_deref(), Some("EXL000001"));
        assert_eq!(leg.fields["active"], false);
        for key in SEAT_FIELDS {
            assert!(leg.get(key).is_none(), "{key} should be cleared");
        }

        let report = import_legislators(&mut fixture.context()).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(only_legislator(&fixture).updated_at, leg.updated_at);
    }

    #[test]
    fn test_activate_keeps_locked_fields() {
        let fixture = Fixture::new("ex");
        fixture.write("legislators", "1.json", scraped("Ann Lee", "2011-2012", "upper", "9"));
        import_legislators(&mut fixture.context()).unwrap();

        let mut leg = only_legislator(&fixture);
        leg.set("party", "Corrected Party");
        leg.locked_fields.insert("party".into());
        leg.remove("district");
        fixture.store.save(&leg).unwrap();

        import_legislators(&mut fixture.context()).unwrap();
        let leg = only_legislator(&fixture);
        assert_eq!(leg.get_str("party"), Some("Corrected Party"));
        assert_eq!(leg.get_str("district"), Some("9"), "unlocked fields are still refreshed");
    }

    #[test]
    fn test_deactivate_keeps_locked_fields() {
        let store = Store::open_in_memory().unwrap();
        let mut seat_locked = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Retired Person", "active": true, "party": "Democratic",
                   "district": "2", "chamber": "lower", "roles": [
                {"type": "member", "term": "2009-2010", "chamber": "lower", "district": "2",
                 "party": "Democratic", "end_date": null, "state": "ex"}
            ]}),
        );
        seat_locked.locked_fields.insert("district".into());
        store.save(&seat_locked).unwrap();

        let mut roles_locked = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Kept Roles", "roles": [
                {"type": "member", "term": "2009-2010", "chamber": "upper", "district": "4",
                 "party": "Republican", "end_date": null, "state": "ex"}
            ]}),
        );
        roles_locked.locked_fields.insert("roles".into());
        store.save(&roles_locked).unwrap();

        assert_eq!(deactivate_legislators(&store, "ex", "2011-2012").unwrap(), 2);

        let seat = store.get(Kind::Legislator, seat_locked.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(seat.get_str("district"), Some("2"));
        assert!(seat.get("party").is_none());
        assert!(seat.array("roles").is_empty());

        let roles = store.get(Kind::Legislator, roles_locked.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(roles.array("roles").len(), 1);
        assert!(roles.get("old_roles").is_none());
        assert_eq!(roles.fields["active"], false);

        assert_eq!(deactivate_legislators(&store, "ex", "2011-2012").unwrap(), 0);
    }

    #[test]
    fn test_merge_legislators_folds_duplicate() {
        let store = Store::open_in_memory().unwrap();
        let mut keep = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Mike Stephens", "party": "Hand Checked",
                   "old_roles": {"2009-2010": [{"type": "member", "term": "2009-2010", "district": "5"}]}}),
        );
        keep.locked_fields.insert("party".into());
        store.save(&keep).unwrap();
        let duplicate = stored_legislator(
            &store,
            json!({"state": "ex", "full_name": "Michael J. Stephens", "party": "Democratic",
                   "roles": [{"type": "member", "term": "2011-2012", "district": "5"}]}),
        );
        let keep_id = keep.id.clone().unwrap();
        let duplicate_id = duplicate.id.clone().unwrap();

        let merged = merge_legislators(&store, &keep_id, &duplicate_id).unwrap();
        assert_eq!(merged.id.as_deref(), Some("EXL000001"));
        assert_eq!(merged.all_ids, vec!["EXL000001".to_string(), "EXL000002".to_string()]);

        let stored = store.get(Kind::Legislator, &keep_id).unwrap().unwrap();
        assert_eq!(stored.all_ids, merged.all_ids);
        assert_eq!(stored.get_str("leg_id"), Some("EXL000001"));
        assert_eq!(stored.get_str("full_name"), Some("Michael J. Stephens"));
        assert_eq!(stored.get_str("party"), Some("Hand Checked"));
        assert_eq!(stored.array("roles")[0]["term"], "2011-2012");
        assert_eq!(stored.fields["old_roles"]["2009-2010"][0]["district"], "5");
        assert_eq!(stored.created_at, keep.created_at);

        assert!(store.get(Kind::Legislator, &duplicate_id).unwrap().is_none());
        assert_eq!(store.count(Kind::Legislator, "ex").unwrap(), 1);

        let err = merge_legislators(&store, &keep_id, &duplicate_id).unwrap_err();
        assert!(matches!(err, ImportError::UnknownRecord { .. }));
    }
}
