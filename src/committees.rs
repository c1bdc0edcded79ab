// 🏛️ Committee Resolver - committee names to committee ids
//
// Votes and events name committees in free text. Lookups are exact on
// (jurisdiction, chamber, committee) for top-level committees, with one
// retry using the "Committee on ..." form. Every answer, including "no
// match", is cached for the rest of the run.

use std::collections::HashMap;
use tracing::warn;

use crate::db::Store;
use crate::error::Result;
use crate::record::Kind;

#[derive(Debug, Default)]
pub struct CommitteeResolver {
    cache: HashMap<(String, Option<String>, String), Option<String>>,
    /// Names that found no unique committee during this run.
    pub unresolved: usize,
}

impl CommitteeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committee_id(
        &mut self,
        store: &Store,
        state: &str,
        chamber: Option<&str>,
        name: &str,
    ) -> Result<Option<String>> {
        let key = (state.to_string(), chamber.map(str::to_string), name.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let mut found = unique_committee(store, state, chamber, name)?;
        if found.is_none() {
            found = unique_committee(store, state, chamber, &format!("Committee on {name}"))?;
        }
        if found.is_none() {
            self.unresolved += 1;
            warn!(state, chamber = chamber.unwrap_or_default(), committee = name, "no unique committee match");
        }

        self.cache.insert(key, found.clone());
        Ok(found)
    }

    /// Forget cached answers, e.g. after committees were inserted.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

fn unique_committee(store: &Store, state: &str, chamber: Option<&str>, name: &str) -> Result<Option<String>> {
    let matches = store.find_matching(
        Kind::Committee,
        state,
        &[("chamber", chamber), ("committee", Some(name)), ("subcommittee", None)],
    )?;
    Ok(match matches.as_slice() {
        [only] => only.id.clone(),
        _ => None,
    })
}
