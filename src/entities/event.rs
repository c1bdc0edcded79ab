// 📆 Event Importer
//
// Natural key: (state, when, type, description). Participants naming a
// committee get a `committee_id`, participants naming a legislator a
// `leg_id`. Either stays null when the name doesn't resolve.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::Result;
use crate::importer::{import_files, prepare, Applied, ImportContext, KindReport};
use crate::record::{Chamber, Kind, Record};
use crate::tagger::Tagged;

use super::upsert;

pub fn import_events(ctx: &mut ImportContext) -> Result<KindReport> {
    let mut report = KindReport::default();
    let before = ctx.unresolved();
    let current_session = ctx.current_session()?;

    let dir = ctx.kind_dir("events");
    import_files(&dir, &mut report, |_, doc| import_event(ctx, doc, &current_session))?;

    report.unresolved = ctx.unresolved() - before;
    info!(
        state = ctx.abbr(),
        files = report.files,
        inserted = report.inserted,
        updated = report.updated,
        "imported events"
    );
    Ok(report)
}

pub fn import_event(ctx: &mut ImportContext, doc: Map<String, Value>, current_session: &str) -> Result<Applied> {
    let Tagged { fields, extras } = prepare(ctx.registry, Kind::Event, doc);
    let mut event = Record::scraped(Kind::Event, fields, extras);

    let state = event.require_str("state")?.to_string();
    let when = event.require_str("when")?.to_string();
    let event_type = event.require_str("type")?.to_string();
    let description = event.require_str("description")?.to_string();
    let session = event.get_str("session").unwrap_or(current_session).to_string();

    for participant in event.array_mut("participants").iter_mut() {
        let Value::Object(participant) = participant else { continue };
        let Some(name) = participant.get("participant").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let chamber = participant.get("chamber").and_then(Value::as_str).map(str::to_string);

        match participant.get("participant_type").and_then(Value::as_str) {
            Some("committee") => {
                let id = ctx.committees.committee_id(ctx.store, &state, chamber.as_deref(), &name)?;
                participant.insert("committee_id".into(), id.into());
            }
            Some("legislator") => {
                let scope = chamber.as_deref().and_then(Chamber::parse);
                let id = ctx.names.legislator_id(ctx.store, &session, scope, &name)?;
                participant.insert("leg_id".into(), id.into());
            }
            _ => {}
        }
    }

    let existing = ctx.store.find_one(
        Kind::Event,
        &state,
        &[
            ("when", Some(when.as_str())),
            ("type", Some(event_type.as_str())),
            ("description", Some(description.as_str())),
        ],
    )?;
    let (record, applied) = upsert(ctx, existing, event)?;
    debug!(id = record.id.as_deref().unwrap_or_default(), ?applied, "event");
    Ok(applied)
}
