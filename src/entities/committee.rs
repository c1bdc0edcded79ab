// 🏛️ Committee Importer
//
// Natural key: (state, chamber, committee, subcommittee). Members are
// resolved to legislators before the merge so an unchanged roster compares
// equal, and every resolved member gets a matching committee-member role.
// Jurisdictions without committee files get their committees built from the
// committee roles legislators were scraped with.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::error::Result;
use crate::importer::{import_files, json_files, prepare, Applied, ImportContext, KindReport};
use crate::record::{Chamber, Kind, Record};
use crate::tagger::Tagged;

use super::legislator::COMMITTEE_MEMBER;
use super::{save_changed, set_unlocked, upsert};

pub fn import_committees(ctx: &mut ImportContext) -> Result<KindReport> {
    let mut report = KindReport::default();
    let before = ctx.unresolved();
    let current_term = ctx.current_term()?;
    let current_session = ctx.current_session()?;

    let dir = ctx.kind_dir("committees");
    if json_files(&dir)?.is_empty() {
        info!(state = ctx.abbr(), "no committee files, building committees from legislator roles");
        import_committees_from_legislators(ctx, &current_term, &mut report)?;
    } else {
        let mut seen = HashSet::new();
        import_files(&dir, &mut report, |_, doc| {
            let (id, applied) = import_committee(ctx, doc, &current_term, &current_session)?;
            seen.insert(id);
            Ok(applied)
        })?;
        let cleared = clear_unseen_members(ctx.store, ctx.abbr(), &seen)?;
        debug!(cleared, "cleared rosters of committees missing from this run");
    }

    // new committees must be visible to votes and events
    ctx.committees.clear();
    link_parents(ctx.store, ctx.abbr())?;

    report.unresolved = ctx.unresolved() - before;
    info!(
        state = ctx.abbr(),
        files = report.files,
        inserted = report.inserted,
        updated = report.updated,
        "imported committees"
    );
    Ok(report)
}

/// Import one committee document, returning its id.
pub fn import_committee(
    ctx: &mut ImportContext,
    doc: Map<String, Value>,
    current_term: &str,
    current_session: &str,
) -> Result<(String, Applied)> {
    let Tagged { fields, extras } = prepare(ctx.registry, Kind::Committee, doc);
    let mut committee = Record::scraped(Kind::Committee, fields, extras);

    let state = committee.require_str("state")?.to_string();
    let chamber = committee.require_str("chamber")?.to_string();
    let name = committee.require_str("committee")?.to_string();
    let subcommittee = committee
        .get_str("subcommittee")
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    committee.set("subcommittee", subcommittee.clone());

    let scope = Chamber::parse(&chamber);
    for member in committee.array_mut("members").iter_mut() {
        let Value::Object(member) = member else { continue };
        let name = member.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let leg_id = if name.trim().is_empty() {
            None
        } else {
            ctx.names.legislator_id(ctx.store, current_session, scope, &name)?
        };
        member.insert("leg_id".into(), leg_id.into());
    }

    let existing = ctx.store.find_one(
        Kind::Committee,
        &state,
        &[
            ("chamber", Some(chamber.as_str())),
            ("committee", Some(name.as_str())),
            ("subcommittee", subcommittee.as_deref()),
        ],
    )?;
    let (committee, applied) = upsert(ctx, existing, committee)?;
    let committee_id = committee.id.clone().unwrap_or_default();

    for member in committee.array("members") {
        let Some(leg_id) = member.get("leg_id").and_then(Value::as_str) else {
            continue;
        };
        let position = member.get("role").and_then(Value::as_str);
        add_committee_role(ctx.store, leg_id, &committee, current_term, position)?;
    }

    Ok((committee_id, applied))
}

/// Give a legislator the committee-member role for `committee` unless they
/// already have it for the term.
fn add_committee_role(
    store: &Store,
    leg_id: &str,
    committee: &Record,
    term: &str,
    position: Option<&str>,
) -> Result<bool> {
    let Some(mut leg) = store.get(Kind::Legislator, leg_id)? else {
        warn!(leg_id, "committee member refers to an unknown legislator");
        return Ok(false);
    };
    if leg.is_locked("roles") {
        debug!(leg_id, "roles are locked, committee role not added");
        return Ok(false);
    }

    let field = |role: &Value, key: &str| role.get(key).and_then(Value::as_str).map(str::to_string);

    // archived with the legislator's other roles for the term
    let archived = leg
        .get("old_roles")
        .and_then(|archive| archive.get(term))
        .and_then(Value::as_array)
        .is_some_and(|roles| {
            roles.iter().any(|role| {
                field(role, "type").as_deref() == Some(COMMITTEE_MEMBER)
                    && field(role, "committee_id").as_deref() == committee.id.as_deref()
            })
        });
    if archived {
        return Ok(false);
    }

    let mut unlinked = None;
    for (index, role) in leg.array("roles").iter().enumerate() {
        if field(role, "type").as_deref() != Some(COMMITTEE_MEMBER) || field(role, "term").as_deref() != Some(term) {
            continue;
        }
        match field(role, "committee_id") {
            Some(id) if Some(id.as_str()) == committee.id.as_deref() => return Ok(false),
            None if field(role, "committee").as_deref() == committee.get_str("committee")
                && field(role, "subcommittee").as_deref() == committee.get_str("subcommittee") =>
            {
                unlinked = Some(index);
            }
            _ => {}
        }
    }

    if let Some(index) = unlinked {
        // scraped with the legislator, not linked yet
        leg.array_mut("roles")[index]["committee_id"] = json!(committee.id);
        save_changed(store, &mut leg, &["roles"])?;
        return Ok(true);
    }

    let mut role = json!({
        "type": COMMITTEE_MEMBER,
        "committee": committee.get("committee").cloned().unwrap_or(Value::Null),
        "term": term,
        "chamber": committee.get("chamber").cloned().unwrap_or(Value::Null),
        "committee_id": committee.id,
        "state": committee.state(),
    });
    if let Some(sub) = committee.get_str("subcommittee") {
        role["subcommittee"] = Value::String(sub.to_string());
    }
    if let Some(position) = position {
        role["position"] = Value::String(position.to_string());
    }

    leg.array_mut("roles").push(role);
    save_changed(store, &mut leg, &["roles"])?;
    Ok(true)
}

/// Build committees from legislators' committee roles and link both ways.
pub fn import_committees_from_legislators(
    ctx: &ImportContext,
    current_term: &str,
    report: &mut KindReport,
) -> Result<()> {
    let state = ctx.abbr().to_string();
    for mut leg in ctx.store.find_by_state(Kind::Legislator, &state)? {
        let Some(leg_id) = leg.id.clone() else { continue };
        let full_name = leg.get_str("full_name").unwrap_or_default().to_string();
        let mut roles = leg.array("roles").to_vec();
        let mut linked = false;

        for role in roles.iter_mut() {
            let field = |key: &str| role.get(key).and_then(Value::as_str).map(str::to_string);
            if field("type").as_deref() != Some(COMMITTEE_MEMBER) || field("term").as_deref() != Some(current_term) {
                continue;
            }
            let Some(name) = field("committee") else { continue };
            let chamber = field("chamber");
            let subcommittee = field("subcommittee");
            let position = field("position").unwrap_or_else(|| "member".to_string());

            let filters = [
                ("chamber", chamber.as_deref()),
                ("committee", Some(name.as_str())),
                ("subcommittee", subcommittee.as_deref()),
            ];
            let mut committee = match ctx.store.find_one(Kind::Committee, &state, &filters)? {
                Some(committee) => committee,
                None => {
                    let mut committee = Record::new(Kind::Committee);
                    committee.set("state", state.as_str());
                    committee.set("chamber", chamber.clone());
                    committee.set("committee", name.as_str());
                    committee.set("subcommittee", subcommittee.clone());
                    committee.set("members", json!([]));
                    committee.set("sources", json!([]));
                    ctx.allocator.insert_with_id(ctx.store, &mut committee)?;
                    report.inserted += 1;
                    committee
                }
            };

            let is_member = committee
                .array("members")
                .iter()
                .any(|m| m.get("leg_id").and_then(Value::as_str) == Some(leg_id.as_str()));
            if !is_member && !committee.is_locked("members") {
                committee
                    .array_mut("members")
                    .push(json!({"name": full_name, "leg_id": leg_id, "role": position}));
                save_changed(ctx.store, &mut committee, &["members"])?;
                report.updated += 1;
            }

            let committee_id = json!(committee.id);
            if role.get("committee_id") != Some(&committee_id) {
                role["committee_id"] = committee_id;
                linked = true;
            }
        }

        if linked && !leg.is_locked("roles") {
            leg.set("roles", roles);
            save_changed(ctx.store, &mut leg, &["roles"])?;
        }
    }
    Ok(())
}

/// Empty the rosters of committees that no file mentioned in this run.
fn clear_unseen_members(store: &Store, state: &str, seen: &HashSet<String>) -> Result<usize> {
    let mut cleared = 0;
    for mut committee in store.find_by_state(Kind::Committee, state)? {
        let unseen = committee.id.as_ref().is_some_and(|id| !seen.contains(id));
        if unseen && !committee.array("members").is_empty() && set_unlocked(&mut committee, "members", json!([])) {
            save_changed(store, &mut committee, &["members"])?;
            cleared += 1;
        }
    }
    Ok(cleared)
}

/// Point subcommittees at their parent committee. Derived data, so
/// `updated_at` stays put.
pub fn link_parents(store: &Store, state: &str) -> Result<usize> {
    let mut linked = 0;
    for mut committee in store.find_by_state(Kind::Committee, state)? {
        let parent_id = match committee.get_str("subcommittee").filter(|s| !s.is_empty()) {
            None => Value::Null,
            Some(sub) => {
                let chamber = committee.get_str("chamber");
                let name = committee.get_str("committee");
                let parent = store.find_one(
                    Kind::Committee,
                    state,
                    &[("chamber", chamber), ("committee", name), ("subcommittee", None)],
                )?;
                match parent.and_then(|p| p.id) {
                    Some(id) => Value::String(id),
                    None => {
                        warn!(state, subcommittee = sub, "failed to find parent committee");
                        Value::Null
                    }
                }
            }
        };

        if set_unlocked(&mut committee, "parent_id", parent_id) {
            store.save(&committee)?;
            linked += 1;
        }
    }
    Ok(linked)
}
