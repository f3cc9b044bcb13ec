//! Index store — queryable SQLite projection of the journal.
//!
//! Strictly a cache: every row mirrors one committed journal entry, `put` is
//! idempotent on `sequence_id`, and any divergence is repaired only by
//! dropping everything and replaying the journal from 0. The journal remains
//! the sole source of truth.

use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{AuditError, Result};
use crate::journal::JournalWriter;
use crate::types::{ts_from_millis, ts_to_millis, FieldMap, IndexRow, JournalEntry, QueryFilter};

pub struct IndexStore {
    conn: Connection,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS audit_index (
                sequence_id INTEGER PRIMARY KEY,
                source      TEXT NOT NULL,
                ts          INTEGER NOT NULL,
                fields      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_source ON audit_index(source);
            CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_index(ts);
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Project one committed entry into the table. Re-applying an already
    /// indexed entry is a no-op, so journal replay converges with live
    /// application.
    pub fn put(&self, entry: &JournalEntry) -> Result<()> {
        let row = IndexRow::project(entry);
        let fields = serde_json::to_string(&row.fields)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO audit_index (sequence_id, source, ts, fields)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                row.sequence_id as i64,
                row.source,
                ts_to_millis(row.ts),
                fields
            ],
        )?;
        Ok(())
    }

    /// Filtered lookup, ordered by `sequence_id` (ascending unless the filter
    /// asks for newest-first). Source and time range are pushed down to SQL;
    /// field equality is checked against the decoded field map.
    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<IndexRow>> {
        let mut sql =
            String::from("SELECT sequence_id, source, ts, fields FROM audit_index");
        let since = filter.since.map(ts_to_millis);
        let until = filter.until.map(ts_to_millis);
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(ref source) = filter.source {
            clauses.push("source = ?");
            args.push(source);
        }
        if let Some(ref since) = since {
            clauses.push("ts >= ?");
            args.push(since);
        }
        if let Some(ref until) = until {
            clauses.push("ts <= ?");
            args.push(until);
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(if filter.newest_first {
            " ORDER BY sequence_id DESC"
        } else {
            " ORDER BY sequence_id ASC"
        });

        let mut stmt = self.conn.prepare(&sql)?;
        let mut raw = stmt.query(rusqlite::params_from_iter(args))?;

        let mut rows = Vec::new();
        while let Some(row) = raw.next()? {
            // Checked before the push so a zero limit yields an empty set.
            if let Some(limit) = filter.limit {
                if rows.len() >= limit {
                    break;
                }
            }
            let sequence_id: i64 = row.get(0)?;
            let source: String = row.get(1)?;
            let ts: i64 = row.get(2)?;
            let fields_json: String = row.get(3)?;
            let fields: FieldMap = serde_json::from_str(&fields_json)?;

            if !filter
                .fields
                .iter()
                .all(|(k, v)| fields.get(k) == Some(v))
            {
                continue;
            }
            rows.push(IndexRow {
                sequence_id: sequence_id as u64,
                source,
                ts: ts_from_millis(ts),
                fields,
            });
        }
        Ok(rows)
    }

    /// Substring match over the stored field JSON, newest first. The match is
    /// pushed down as a SQL `LIKE`, so it covers both keys and values.
    pub fn search(&self, term: &str, limit: usize) -> Result<Vec<IndexRow>> {
        let pattern = format!("%{term}%");
        let mut stmt = self.conn.prepare(
            "SELECT sequence_id, source, ts, fields FROM audit_index
             WHERE fields LIKE ?1 ORDER BY sequence_id DESC LIMIT ?2",
        )?;
        let mut raw = stmt.query(params![pattern, limit as i64])?;

        let mut rows = Vec::new();
        while let Some(row) = raw.next()? {
            let sequence_id: i64 = row.get(0)?;
            let source: String = row.get(1)?;
            let ts: i64 = row.get(2)?;
            let fields_json: String = row.get(3)?;
            rows.push(IndexRow {
                sequence_id: sequence_id as u64,
                source,
                ts: ts_from_millis(ts),
                fields: serde_json::from_str(&fields_json)?,
            });
        }
        Ok(rows)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_index", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn max_sequence_id(&self) -> Result<Option<u64>> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(sequence_id) FROM audit_index",
            [],
            |row| row.get(0),
        )?;
        Ok(max.map(|m| m as u64))
    }

    /// Check the subset-consistency contract against the journal head
    /// (`journal_next_seq` = number of committed entries). Rows past the
    /// head are phantoms; a row-count mismatch means gaps. Either way the
    /// only repair is [`IndexStore::rebuild`].
    pub fn verify(&self, journal_next_seq: u64) -> Result<()> {
        if let Some(max) = self.max_sequence_id()? {
            if max >= journal_next_seq {
                return Err(AuditError::IndexInconsistency(format!(
                    "index row {max} has no journal entry (journal head {journal_next_seq})"
                )));
            }
        }
        let count = self.count()?;
        if count != journal_next_seq {
            return Err(AuditError::IndexInconsistency(format!(
                "index holds {count} rows, journal holds {journal_next_seq} entries"
            )));
        }
        Ok(())
    }

    /// Drop every row and replay the journal from sequence 0. Full replay is
    /// the only recovery path; partial patching is never attempted.
    pub fn rebuild(&mut self, journal: &JournalWriter) -> Result<u64> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM audit_index", [])?;
        let mut applied = 0u64;
        for entry in journal.read_from(0)? {
            let entry = entry?;
            let row = IndexRow::project(&entry);
            let fields = serde_json::to_string(&row.fields)?;
            tx.execute(
                "INSERT OR IGNORE INTO audit_index (sequence_id, source, ts, fields)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.sequence_id as i64,
                    row.source,
                    ts_to_millis(row.ts),
                    fields
                ],
            )?;
            applied += 1;
        }
        tx.commit()?;
        info!(rows = applied, "index rebuilt from journal");
        Ok(applied)
    }

    /// Flush SQLite's WAL so the table is durable before process exit.
    pub fn flush(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
