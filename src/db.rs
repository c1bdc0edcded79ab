use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::error::Result;
use crate::record::{Kind, Record};

// ============================================================================
// STORE
// ============================================================================

/// Document store: one table per entity kind, each row one JSON document.
///
/// Several stores (processes) may point at the same database file. The only
/// cross-writer coordination is the `id` primary key and the counter rows.
pub struct Store {
    conn: Connection,
}

/// Field filter for natural-key lookups. `None` matches a missing or null field.
pub type FieldFilter<'a> = (&'a str, Option<&'a str>);

impl Store {
    pub fn open(path: &Path) -> Result<Store> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        setup_database(&conn)?;
        Ok(Store { conn })
    }

    pub fn open_in_memory() -> Result<Store> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Store { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // ENTITY DOCUMENTS
    // ========================================================================

    /// Insert a record that already carries its id.
    ///
    /// Returns `false` when the id is taken (someone else got there first).
    pub fn try_insert(&self, record: &Record) -> Result<bool> {
        let id = record.id.as_deref().unwrap_or_default();
        let doc = serde_json::to_string(&record.to_document())?;
        let result = self.conn.execute(
            &format!(
                "INSERT INTO {} (id, state, doc, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                record.kind.collection()
            ),
            params![
                id,
                record.state().unwrap_or_default(),
                doc,
                record.created_at.map(|dt| dt.to_rfc3339()),
                record.updated_at.map(|dt| dt.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => {
                self.audit(AuditAction::Inserted, record.kind, id, &[])?;
                Ok(true)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite a stored record with its current state.
    pub fn save(&self, record: &Record) -> Result<()> {
        let id = record.id.as_deref().unwrap_or_default();
        let doc = serde_json::to_string(&record.to_document())?;
        self.conn.execute(
            &format!(
                "UPDATE {} SET state = ?2, doc = ?3, updated_at = ?4 WHERE id = ?1",
                record.kind.collection()
            ),
            params![
                id,
                record.state().unwrap_or_default(),
                doc,
                record.updated_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Save and record the change in the audit trail.
    pub fn save_with_audit(&self, record: &Record, changed_fields: &[String]) -> Result<()> {
        self.save(record)?;
        self.audit(
            AuditAction::Updated,
            record.kind,
            record.id.as_deref().unwrap_or_default(),
            changed_fields,
        )
    }

    /// Remove a record folded into another one. Returns whether it existed.
    pub fn delete(&self, kind: Kind, id: &str, folded_into: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE id = ?1", kind.collection()), [id])?;
        if removed > 0 {
            self.audit(AuditAction::Folded, kind, id, &[folded_into.to_string()])?;
        }
        Ok(removed > 0)
    }

    pub fn get(&self, kind: Kind, id: &str) -> Result<Option<Record>> {
        let doc: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT doc FROM {} WHERE id = ?1", kind.collection()),
                [id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|doc| Record::from_document(kind, serde_json::from_str(&doc)?))
            .transpose()
    }

    /// Every record of a kind for one jurisdiction, ordered by id.
    pub fn find_by_state(&self, kind: Kind, state: &str) -> Result<Vec<Record>> {
        self.find_matching(kind, state, &[])
    }

    /// Records of a jurisdiction whose document fields equal the filters.
    pub fn find_matching(&self, kind: Kind, state: &str, filters: &[FieldFilter]) -> Result<Vec<Record>> {
        let mut sql = format!("SELECT doc FROM {} WHERE state = ?", kind.collection());
        let mut args: Vec<String> = vec![state.to_string()];
        for (field, value) in filters {
            match value {
                Some(value) => {
                    sql.push_str(" AND json_extract(doc, ?) = ?");
                    args.push(format!("$.\"{field}\""));
                    args.push(value.to_string());
                }
                None => {
                    sql.push_str(" AND json_extract(doc, ?) IS NULL");
                    args.push(format!("$.\"{field}\""));
                }
            }
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(args.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        docs.into_iter()
            .map(|doc| Record::from_document(kind, serde_json::from_str(&doc)?))
            .collect()
    }

    pub fn find_one(&self, kind: Kind, state: &str, filters: &[FieldFilter]) -> Result<Option<Record>> {
        Ok(self.find_matching(kind, state, filters)?.into_iter().next())
    }

    pub fn count(&self, kind: Kind, state: &str) -> Result<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE state = ?1", kind.collection()),
            [state],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // ID SUPPORT
    // ========================================================================

    /// Highest id with the given prefix, comparing the numeric suffix.
    pub fn max_id(&self, kind: Kind, prefix: &str) -> Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE id LIKE ?1 || '%'
                     ORDER BY length(id) DESC, id DESC LIMIT 1",
                    kind.collection()
                ),
                [prefix],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn count_ids(&self, kind: Kind, prefix: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id LIKE ?1 || '%'", kind.collection()),
            [prefix],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Atomically increment and return the counter for `name`.
    pub fn next_sequence(&self, name: &str) -> Result<u64> {
        let seq: i64 = self.conn.query_row(
            "INSERT INTO id_counters (name, seq) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET seq = seq + 1
             RETURNING seq",
            [name],
            |row| row.get(0),
        )?;
        Ok(seq as u64)
    }

    /// Move the counter forward to at least `seq`. Never moves it back.
    pub fn raise_sequence(&self, name: &str, seq: u64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO id_counters (name, seq) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET seq = max(seq, excluded.seq)",
            params![name, seq as i64],
        )?;
        Ok(())
    }

    // ========================================================================
    // JURISDICTION METADATA
    // ========================================================================

    pub fn get_metadata(&self, abbr: &str) -> Result<Option<Value>> {
        let doc: Option<String> = self
            .conn
            .query_row("SELECT doc FROM metadata WHERE abbr = ?1", [abbr], |row| row.get(0))
            .optional()?;
        Ok(doc.map(|doc| serde_json::from_str(&doc)).transpose()?)
    }

    pub fn put_metadata(&self, abbr: &str, doc: &Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO metadata (abbr, doc, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(abbr) DO UPDATE SET doc = excluded.doc, updated_at = excluded.updated_at
             WHERE metadata.doc != excluded.doc",
            params![abbr, serde_json::to_string(doc)?, now],
        )?;
        Ok(())
    }

    // ========================================================================
    // AUDIT TRAIL
    // ========================================================================

    fn audit(&self, action: AuditAction, kind: Kind, entity_id: &str, fields: &[String]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_log (event_id, at, action, collection, entity_id, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                Utc::now().to_rfc3339(),
                action.as_str(),
                kind.collection(),
                entity_id,
                serde_json::to_string(fields)?,
            ],
        )?;
        Ok(())
    }

    /// Every write an import made to one record, oldest first.
    pub fn audit_trail(&self, kind: Kind, entity_id: &str) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, at, action, fields FROM audit_log
             WHERE collection = ?1 AND entity_id = ?2
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![kind.collection(), entity_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(event_id, at, action, fields)| -> Result<AuditEntry> {
                Ok(AuditEntry {
                    event_id,
                    at: DateTime::parse_from_rfc3339(&at)
                        .map(|at| at.with_timezone(&Utc))
                        .ok(),
                    action: AuditAction::parse(&action),
                    entity_id: entity_id.to_string(),
                    fields: serde_json::from_str(&fields)?,
                })
            })
            .collect()
    }
}

/// What an import did to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Inserted,
    Updated,
    /// Deleted after being folded into another record.
    Folded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Inserted => "inserted",
            AuditAction::Updated => "updated",
            AuditAction::Folded => "folded",
        }
    }

    fn parse(value: &str) -> AuditAction {
        match value {
            "inserted" => AuditAction::Inserted,
            "folded" => AuditAction::Folded,
            _ => AuditAction::Updated,
        }
    }
}

/// One row of the audit trail. `fields` lists the fields written by an
/// update, or the surviving id for a fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: String,
    pub at: Option<DateTime<Utc>>,
    pub action: AuditAction,
    pub entity_id: String,
    pub fields: Vec<String>,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL lets overlapping runs read while one writes
    conn.pragma_update(None, "journal_mode", "WAL")?;

    for kind in Kind::ALL {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    doc TEXT NOT NULL,
                    created_at TEXT,
                    updated_at TEXT
                )",
                table = kind.collection()
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_state ON {table}(state)",
                table = kind.collection()
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
            abbr TEXT PRIMARY KEY,
            doc TEXT NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Id counters (fast path of the id allocator)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS id_counters (
            name TEXT PRIMARY KEY,
            seq INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Blobs (bill version documents)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS blobs (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            metadata TEXT NOT NULL,
            data BLOB NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Audit trail
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            at TEXT NOT NULL,
            action TEXT NOT NULL,
            collection TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            fields TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_log(collection, entity_id)",
        [],
    )?;

    Ok(())
}
