// 📜 Bill Importer
//
// Natural key: (state, session, chamber, bill_id) with the bill id
// normalized first. Standalone vote files are attached to their bill before
// the merge, vote ids come from the fingerprint matcher, and sponsor and
// voter names are resolved to legislator ids. Everything derived from the
// scrape is computed deterministically (sorted lists, ids carried over) so
// that importing the same file twice changes nothing.

use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::documents;
use crate::error::{ImportError, Result};
use crate::importer::{import_files, prepare, Applied, ImportContext, KindReport};
use crate::record::{Chamber, Kind, Record, EXTRA_PREFIX};
use crate::tagger::Tagged;
use crate::text::{fix_bill_id, keywordize};
use crate::votes::{PendingVotes, VoteMatcher};

use super::{set_unlocked, upsert};

const REQUIRED: [&str; 5] = ["state", "session", "chamber", "bill_id", "title"];
const VOTE_LISTS: [&str; 3] = ["yes_votes", "no_votes", "other_votes"];

/// Import bills and the standalone votes attached to them.
/// Returns the bill report and the vote report.
pub fn import_bills(ctx: &mut ImportContext) -> Result<(KindReport, KindReport)> {
    let mut votes_report = KindReport::default();
    let mut pending = PendingVotes::load(ctx.registry, &ctx.kind_dir("votes"), &mut votes_report)?;

    let mut report = KindReport::default();
    let before = ctx.unresolved();
    let dir = ctx.kind_dir("bills");
    import_files(&dir, &mut report, |_, doc| {
        import_bill(ctx, doc, &mut pending, &mut votes_report)
    })?;

    votes_report.skipped += pending.report_leftovers();
    let flagged = populate_current_fields(ctx)?;

    report.unresolved = ctx.unresolved() - before;
    info!(
        state = ctx.abbr(),
        files = report.files,
        inserted = report.inserted,
        updated = report.updated,
        new_votes = votes_report.inserted,
        flagged,
        "imported bills"
    );
    Ok((report, votes_report))
}

pub fn import_bill(
    ctx: &mut ImportContext,
    doc: Map<String, Value>,
    pending: &mut PendingVotes,
    votes_report: &mut KindReport,
) -> Result<Applied> {
    let Tagged { fields, extras } = prepare(ctx.registry, Kind::Bill, doc);
    let mut bill = Record::scraped(Kind::Bill, fields, extras);
    for field in REQUIRED {
        bill.require_str(field)?;
    }

    let bill_id = fix_bill_id(bill.require_str("bill_id")?);
    bill.set("bill_id", bill_id.as_str());
    let state = bill.require_str("state")?.to_string();
    let session = bill.require_str("session")?.to_string();
    let chamber = bill.require_str("chamber")?.to_string();
    let term = ctx
        .metadata
        .term_for_session(&session)
        .ok_or_else(|| ImportError::UnknownSession {
            state: state.clone(),
            session: session.clone(),
        })?
        .to_string();

    if let Some(subjects) = bill.remove("subjects") {
        if subjects.as_array().is_some_and(|s| !s.is_empty()) {
            bill.set("scraped_subjects", subjects);
        }
    }

    // ========================================================================
    // VOTES
    // ========================================================================
    let attached = pending.take(&chamber, &session, &bill_id);
    bill.array_mut("votes").extend(attached);

    let existing = ctx.store.find_one(
        Kind::Bill,
        &state,
        &[
            ("session", Some(session.as_str())),
            ("chamber", Some(chamber.as_str())),
            ("bill_id", Some(bill_id.as_str())),
        ],
    )?;

    let mut matcher = VoteMatcher::new(&state);
    if let Some(old) = &existing {
        matcher.learn_existing(old.array("votes"));
    }
    let total = bill.array("votes").len();
    let fresh = matcher.assign_ids(ctx.store, &ctx.allocator, bill.array_mut("votes"))?;
    votes_report.inserted += fresh;
    votes_report.unchanged += total - fresh;

    for vote in bill.array_mut("votes").iter_mut() {
        let Value::Object(vote) = vote else { continue };
        resolve_vote(ctx, &state, &session, vote)?;
    }

    // ========================================================================
    // SPONSORS
    // ========================================================================
    // a scrape without sponsors must not wipe the stored list
    for sponsor in bill.try_array_mut("sponsors").into_iter().flatten() {
        let Value::Object(sponsor) = sponsor else { continue };
        let Some(name) = sponsor.get("name").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let leg_id = ctx.names.legislator_id(ctx.store, &session, None, &name)?;
        sponsor.insert("leg_id".into(), leg_id.into());
    }

    // ========================================================================
    // DERIVED FIELDS
    // ========================================================================
    bill.set("_term", term);

    let title = bill.require_str("title")?.to_string();
    // versions left out of the scrape keep the stored ones, titles included
    let versions = match bill.get("versions") {
        Some(_) => bill.array("versions"),
        None => existing.as_ref().map(|old| old.array("versions")).unwrap_or_default(),
    };
    let alternate_titles = alternate_titles(&bill, versions, &title);
    let mut keywords = keywordize(&title);
    for alternate in &alternate_titles {
        keywords.extend(keywordize(alternate));
    }
    bill.set("alternate_titles", alternate_titles.into_iter().collect::<Vec<_>>());
    bill.set("_keywords", keywords.into_iter().collect::<Vec<_>>());

    attach_version_documents(ctx, &mut bill, existing.as_ref(), &bill_id)?;

    let (record, applied) = upsert(ctx, existing, bill)?;
    debug!(id = record.id.as_deref().unwrap_or_default(), bill_id = bill_id.as_str(), ?applied, "bill");
    Ok(applied)
}

/// Committee id and voter leg ids for one vote.
fn resolve_vote(ctx: &mut ImportContext, state: &str, session: &str, vote: &mut Map<String, Value>) -> Result<()> {
    let vote_chamber = vote.get("chamber").and_then(Value::as_str).map(str::to_string);

    if let Some(committee) = vote.get("committee").and_then(Value::as_str).map(str::to_string) {
        let committee_id = ctx
            .committees
            .committee_id(ctx.store, state, vote_chamber.as_deref(), &committee)?;
        vote.insert("committee_id".into(), committee_id.into());
    }

    let scope = vote_chamber.as_deref().and_then(Chamber::parse);
    for list in VOTE_LISTS {
        let Some(Value::Array(voters)) = vote.get_mut(list) else { continue };
        for voter in voters.iter_mut() {
            // already resolved entries come from a stored bill
            let Value::String(name) = voter else { continue };
            let name = name.clone();
            let leg_id = ctx.names.legislator_id(ctx.store, session, scope, &name)?;
            *voter = json!({ "name": name, "leg_id": leg_id });
        }
    }
    Ok(())
}

/// Version titles and short titles, sorted, without the primary title.
fn alternate_titles(bill: &Record, versions: &[Value], title: &str) -> BTreeSet<String> {
    let mut titles: BTreeSet<String> = bill
        .array("alternate_titles")
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    let short_title = format!("{EXTRA_PREFIX}short_title");
    for version in versions {
        for key in ["title", short_title.as_str()] {
            if let Some(t) = version.get(key).and_then(Value::as_str) {
                titles.insert(t.to_string());
            }
        }
    }
    titles.remove(title);
    titles
}

/// Give every version a `doc_id`: carried over from the stored bill by url,
/// or fetched into the blob store when fetching is enabled.
fn attach_version_documents(
    ctx: &ImportContext,
    bill: &mut Record,
    existing: Option<&Record>,
    bill_id: &str,
) -> Result<()> {
    let known: HashMap<String, Value> = existing
        .map(|old| old.array("versions"))
        .unwrap_or_default()
        .iter()
        .filter_map(|version| {
            let url = version.get("url")?.as_str()?;
            let doc_id = version.get("doc_id").filter(|id| !id.is_null())?;
            Some((url.to_string(), doc_id.clone()))
        })
        .collect();

    let Some(versions) = bill.try_array_mut("versions") else {
        return Ok(());
    };
    for version in versions.iter_mut() {
        if version.get("doc_id").is_some_and(|id| !id.is_null()) {
            continue;
        }
        let url = version.get("url").and_then(Value::as_str).unwrap_or_default().to_string();
        let doc_id = match (known.get(&url), ctx.versions) {
            (Some(doc_id), _) => Some(doc_id.clone()),
            (None, Some(fetch)) => {
                documents::store_version(ctx.store, fetch.fetcher, fetch.policy, bill_id, version)?.map(Value::String)
            }
            (None, None) => None,
        };
        if let (Some(doc_id), Some(version)) = (doc_id, version.as_object_mut()) {
            version.insert("doc_id".into(), doc_id);
        }
    }
    Ok(())
}

/// Flag every bill of the jurisdiction with `_current_term` and
/// `_current_session`. Derived data: `updated_at` stays put.
pub fn populate_current_fields(ctx: &ImportContext) -> Result<usize> {
    let current_session = ctx.current_session()?;
    let mut flagged = 0;
    for mut bill in ctx.store.find_by_state(Kind::Bill, ctx.abbr())? {
        let session = bill.get_str("session").unwrap_or_default();
        let current = [
            ("_current_session", Value::Bool(session == current_session)),
            ("_current_term", Value::Bool(ctx.metadata.in_current_term(session))),
        ];
        let mut changed = false;
        for (key, value) in current {
            changed |= set_unlocked(&mut bill, key, value);
        }
        if changed {
            ctx.store.save(&bill)?;
            flagged += 1;
        }
    }
    Ok(flagged)
}
