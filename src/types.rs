use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::{AuditError, Result};

/// Which parsing rule set applies to a piece of raw text. Exactly two
/// locales are supported; anything else is rejected at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Ja,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ja => "ja",
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Locale {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "en" => Ok(Locale::En),
            "ja" => Ok(Locale::Ja),
            other => Err(AuditError::UnsupportedLocale(other.to_string())),
        }
    }
}

/// Permitted value kinds for event payloads and extracted fields.
///
/// Payloads are a flat map of scalars rather than arbitrary JSON so the hub's
/// shape validation has a concrete contract: nested arrays/objects are
/// rejected before anything reaches the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl FieldValue {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(FieldValue::Null),
            serde_json::Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(FieldValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(FieldValue::Float(f))
                } else {
                    Err(AuditError::MalformedPayload(format!(
                        "number out of range: {n}"
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(FieldValue::Str(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Err(AuditError::MalformedPayload(
                    "nested arrays/objects are not permitted in payload fields".to_string(),
                ))
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Int(i) => serde_json::Value::from(*i),
            FieldValue::Float(f) => serde_json::Value::from(*f),
            FieldValue::Str(s) => serde_json::Value::from(s.clone()),
        }
    }
}

/// Ordered field name → scalar value mapping.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// Validate a JSON object into a [`FieldMap`], rejecting non-objects and
/// nested values.
pub fn field_map_from_json(value: &serde_json::Value) -> Result<FieldMap> {
    let obj = value.as_object().ok_or_else(|| {
        AuditError::MalformedPayload("payload must be a JSON object of scalar fields".to_string())
    })?;
    let mut map = FieldMap::new();
    for (k, v) in obj {
        map.insert(k.clone(), FieldValue::from_json(v)?);
    }
    Ok(map)
}

pub fn field_map_to_json(map: &FieldMap) -> serde_json::Value {
    serde_json::Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Structured extraction result for one piece of raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub locale: Locale,
    /// Locale-specific word tokens, in text order.
    pub tokens: Vec<String>,
    /// Named-capture fields from the first matching rule.
    pub fields: FieldMap,
    /// Name of the rule that fired; `None` when only the catch-all matched.
    pub matched_rule: Option<String>,
}

/// The unit of ingestion. Immutable once appended, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub source: String,
    /// Caller-supplied structured data; opaque to the journal.
    pub payload: FieldMap,
    /// Extraction result, present when the caller supplied raw text plus a
    /// locale.
    pub parsed: Option<ParsedRecord>,
    /// SHA-256 over the canonical JSON payload, hex-encoded.
    pub payload_sha256: String,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Utc>,
    /// Monotonic nanoseconds since process start, for intra-process ordering
    /// diagnostics.
    pub captured_mono_ns: u64,
}

static MONO_ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds from a process-wide monotonic anchor.
pub fn monotonic_ns() -> u64 {
    MONO_ANCHOR.elapsed().as_nanos() as u64
}

/// One committed record in the journal: the assigned sequence number plus the
/// decoded event. Frame-level length/checksum metadata lives in the journal
/// file format, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub sequence_id: u64,
    pub event: Event,
}

impl JournalEntry {
    /// The fields a lookup should match against: extracted fields when the
    /// event was parsed, the raw payload otherwise.
    pub fn lookup_fields(&self) -> &FieldMap {
        match &self.event.parsed {
            Some(parsed) if !parsed.fields.is_empty() => &parsed.fields,
            _ => &self.event.payload,
        }
    }
}

/// Derived, queryable projection of a [`JournalEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub sequence_id: u64,
    pub source: String,
    pub ts: DateTime<Utc>,
    pub fields: FieldMap,
}

impl IndexRow {
    pub fn project(entry: &JournalEntry) -> Self {
        Self {
            sequence_id: entry.sequence_id,
            source: entry.event.source.clone(),
            ts: entry.event.captured_at,
            fields: entry.lookup_fields().clone(),
        }
    }
}

/// Lookup filter for the index store. All present clauses must hold.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub source: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Field equality constraints, applied to each row's extracted fields.
    pub fields: FieldMap,
    pub limit: Option<usize>,
    /// Reverse ingestion order (used by `tail`); default is ascending
    /// `sequence_id`.
    pub newest_first: bool,
}

/// Millisecond timestamps are what the index persists; helpers keep the
/// conversion in one place.
pub fn ts_to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn ts_from_millis(millis: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(ts) => ts,
        _ => Utc.timestamp_opt(0, 0).unwrap(),
    }
}
