//! Ingestion coordinator — owns the journal/index pair and the consistency
//! contract between them.
//!
//! Ingestion is a two-phase append-then-index protocol. The journal append is
//! the durability contract: once it succeeds, the caller's `sequence_id` is
//! final. Indexing is best-effort behind it — a failed projection is retried
//! once, then the index is flagged stale pending a full rebuild, and the
//! caller still sees success.
//!
//! Lifecycle is explicit: `open` → serve → `flush`/`close`, driven by the
//! embedding process. One coordinator instance exists per journal/index pair
//! and is shared by reference (`Arc`).

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::StorageConfig;
use crate::error::{AuditError, Result};
use crate::extractor;
use crate::index::IndexStore;
use crate::journal::JournalWriter;
use crate::types::{
    field_map_to_json, monotonic_ns, Event, FieldMap, FieldValue, IndexRow, Locale, QueryFilter,
};

/// What a caller hands to `ingest`: either structured fields, or raw text to
/// run through the extractor first.
#[derive(Debug, Clone)]
pub enum IngestPayload {
    Structured(FieldMap),
    Text { raw: String, locale: Option<Locale> },
}

/// Query output plus the staleness signal: when the index could not be kept
/// in step with the journal, callers get told rather than silently served a
/// narrower view.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub rows: Vec<IndexRow>,
    pub index_stale: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub journal_entries: u64,
    pub index_rows: u64,
    pub index_stale: bool,
}

pub struct Coordinator {
    journal: Mutex<JournalWriter>,
    index: Mutex<IndexStore>,
    index_stale: AtomicBool,
}

impl Coordinator {
    /// Open the journal and index under `storage`, recovering a corrupt
    /// journal tail and rebuilding the index if it has diverged.
    pub fn open(storage: &StorageConfig) -> Result<Self> {
        let journal = JournalWriter::open(&storage.journal_path())?;
        let mut index = IndexStore::open(&storage.index_path())?;

        if let Err(e) = index.verify(journal.next_sequence_id()) {
            warn!(error = %e, "index out of step with journal, rebuilding");
            index.rebuild(&journal)?;
        }

        Ok(Self {
            journal: Mutex::new(journal),
            index: Mutex::new(index),
            index_stale: AtomicBool::new(false),
        })
    }

    /// Durably record one event and return its assigned sequence number.
    ///
    /// The journal mutex is held only for the physical append. The index
    /// lock is acquired before the journal lock is released, so projections
    /// are applied in append order without SQLite work ever blocking the
    /// journal.
    pub fn ingest(&self, source: &str, payload: IngestPayload) -> Result<u64> {
        if source.is_empty() {
            return Err(AuditError::MalformedPayload(
                "source must be a non-empty string".to_string(),
            ));
        }
        let event = build_event(source, payload);

        let mut journal = self.journal.lock().unwrap();
        let entry = journal.append(&event)?;
        let index = self.index.lock().unwrap();
        drop(journal);

        let seq = entry.sequence_id;
        // Best-effort projection: one retry, then flag the index stale. The
        // append already succeeded, so this must not fail the request.
        if let Err(first) = index.put(&entry) {
            match index.put(&entry) {
                Ok(()) => {}
                Err(second) => {
                    warn!(
                        sequence_id = seq,
                        first = %first,
                        second = %second,
                        "index projection failed, marking index stale"
                    );
                    self.index_stale.store(true, Ordering::SeqCst);
                }
            }
        }
        Ok(seq)
    }

    /// Stateless parse passthrough, so hub callers reach the extractor
    /// through the same instance they ingest through.
    pub fn parse(&self, text: &str, locale: Locale) -> crate::types::ParsedRecord {
        extractor::extract(text, locale)
    }

    pub fn query(&self, filter: &QueryFilter) -> Result<QueryOutcome> {
        let index = self.index.lock().unwrap();
        let rows = index.query(filter)?;
        Ok(QueryOutcome {
            rows,
            index_stale: self.index_stale.load(Ordering::SeqCst),
        })
    }

    /// Last `n` entries, newest first.
    pub fn tail(&self, n: usize) -> Result<QueryOutcome> {
        self.query(&QueryFilter {
            newest_first: true,
            limit: Some(n),
            ..Default::default()
        })
    }

    /// Substring search over stored fields, newest first, capped at `limit`.
    pub fn search(&self, term: &str, limit: usize) -> Result<QueryOutcome> {
        let index = self.index.lock().unwrap();
        let rows = index.search(term, limit)?;
        Ok(QueryOutcome {
            rows,
            index_stale: self.index_stale.load(Ordering::SeqCst),
        })
    }

    pub fn stats(&self) -> Result<Stats> {
        let journal_entries = self.journal.lock().unwrap().next_sequence_id();
        let index_rows = self.index.lock().unwrap().count()?;
        Ok(Stats {
            journal_entries,
            index_rows,
            index_stale: self.index_stale.load(Ordering::SeqCst),
        })
    }

    /// Drop and replay the index from the journal, clearing the stale flag.
    pub fn rebuild_index(&self) -> Result<u64> {
        let journal = self.journal.lock().unwrap();
        let mut index = self.index.lock().unwrap();
        let applied = index.rebuild(&journal)?;
        self.index_stale.store(false, Ordering::SeqCst);
        info!(rows = applied, "index rebuild complete");
        Ok(applied)
    }

    pub fn index_stale(&self) -> bool {
        self.index_stale.load(Ordering::SeqCst)
    }

    /// Flush both stores; the shutdown sequencer calls this before exit.
    pub fn flush(&self) -> Result<()> {
        self.journal.lock().unwrap().flush()?;
        self.index.lock().unwrap().flush()?;
        Ok(())
    }

    /// Explicit close: flush everything. Dropping afterwards releases the
    /// file handles.
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

fn build_event(source: &str, payload: IngestPayload) -> Event {
    let (payload, parsed) = match payload {
        IngestPayload::Structured(fields) => (fields, None),
        IngestPayload::Text { raw, locale } => {
            let parsed = locale.map(|locale| extractor::extract(&raw, locale));
            let mut fields = FieldMap::new();
            fields.insert("text".to_string(), FieldValue::Str(raw));
            (fields, parsed)
        }
    };

    let canonical = serde_json::to_string(&field_map_to_json(&payload))
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let payload_sha256 = hex::encode(hasher.finalize());

    Event {
        source: source.to_string(),
        payload,
        parsed,
        payload_sha256,
        captured_at: chrono::Utc::now(),
        captured_mono_ns: monotonic_ns(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn structured(value: serde_json::Value) -> IngestPayload {
        IngestPayload::Structured(crate::types::field_map_from_json(&value).unwrap())
    }

    #[test]
    fn first_ingest_on_empty_journal_is_sequence_zero() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::open(&StorageConfig::at_root(dir.path())).unwrap();
        let first = coordinator
            .ingest("demo", structured(json!({"value": 123})))
            .unwrap();
        assert_eq!(first, 0);
        let second = coordinator
            .ingest("demo", structured(json!({"value": 456})))
            .unwrap();
        assert_eq!(second, 1);
    }

    #[test]
    fn text_payload_with_locale_embeds_parsed_record() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::open(&StorageConfig::at_root(dir.path())).unwrap();
        coordinator
            .ingest(
                "demo",
                IngestPayload::Text {
                    raw: "alice created /reports/q3".to_string(),
                    locale: Some(Locale::En),
                },
            )
            .unwrap();
        let outcome = coordinator.query(&QueryFilter::default()).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        // Index rows carry the extracted fields, not the raw text wrapper.
        assert_eq!(
            outcome.rows[0].fields.get("actor"),
            Some(&FieldValue::Str("alice".to_string()))
        );
    }

    #[test]
    fn reopen_continues_sequence_numbering() {
        let dir = tempdir().unwrap();
        let storage = StorageConfig::at_root(dir.path());
        {
            let coordinator = Coordinator::open(&storage).unwrap();
            coordinator
                .ingest("demo", structured(json!({"n": 0})))
                .unwrap();
            coordinator.close().unwrap();
        }
        let coordinator = Coordinator::open(&storage).unwrap();
        let seq = coordinator
            .ingest("demo", structured(json!({"n": 1})))
            .unwrap();
        assert_eq!(seq, 1);
    }

    #[test]
    fn empty_source_is_rejected_before_the_journal() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::open(&StorageConfig::at_root(dir.path())).unwrap();
        assert!(matches!(
            coordinator.ingest("", structured(json!({}))),
            Err(AuditError::MalformedPayload(_))
        ));
        assert_eq!(coordinator.stats().unwrap().journal_entries, 0);
    }

    #[test]
    fn zero_limit_tail_returns_nothing() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::open(&StorageConfig::at_root(dir.path())).unwrap();
        coordinator
            .ingest("demo", structured(json!({"value": 1})))
            .unwrap();
        let outcome = coordinator
            .query(&QueryFilter {
                limit: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert!(outcome.rows.is_empty());
        assert!(coordinator.tail(0).unwrap().rows.is_empty());
    }

    #[test]
    fn search_finds_ingested_field_text() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::open(&StorageConfig::at_root(dir.path())).unwrap();
        coordinator
            .ingest("demo", structured(json!({"note": "disk replaced"})))
            .unwrap();
        coordinator
            .ingest("demo", structured(json!({"note": "reboot scheduled"})))
            .unwrap();
        let outcome = coordinator.search("replaced", 10).unwrap();
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.rows[0].sequence_id, 0);
    }

    #[test]
    fn stats_report_both_stores() {
        let dir = tempdir().unwrap();
        let coordinator = Coordinator::open(&StorageConfig::at_root(dir.path())).unwrap();
        for n in 0..3 {
            coordinator
                .ingest("demo", structured(json!({"n": n})))
                .unwrap();
        }
        let stats = coordinator.stats().unwrap();
        assert_eq!(stats.journal_entries, 3);
        assert_eq!(stats.index_rows, 3);
        assert!(!stats.index_stale);
    }

    #[test]
    fn payload_sha_is_stable_for_identical_payloads() {
        let a = build_event("demo", structured(json!({"b": 2, "a": 1})));
        let b = build_event("demo", structured(json!({"a": 1, "b": 2})));
        assert_eq!(a.payload_sha256, b.payload_sha256);
    }
}
