//! Hub dispatcher — the request/response surface over the coordinator.
//!
//! Requests carry an operation name and a JSON payload. The dispatcher
//! validates the operation against the closed set of supported ones, shape-
//! checks the payload, routes to the right component, and maps every inner
//! failure to a taxonomy kind. Callers only ever see structured responses;
//! one bad request never affects the session.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::coordinator::{Coordinator, IngestPayload};
use crate::error::{AuditError, Result};
use crate::types::{field_map_from_json, field_map_to_json, Locale, QueryFilter};

#[derive(Debug, Clone, Deserialize)]
pub struct HubRequest {
    pub op: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct HubResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HubError>,
}

#[derive(Debug, Serialize)]
pub struct HubError {
    pub kind: String,
    pub message: String,
}

impl HubResponse {
    fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(err: &AuditError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(HubError {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }
}

pub struct Hub {
    coordinator: Arc<Coordinator>,
}

impl Hub {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Route one request. Never panics, never leaks inner error types.
    pub fn dispatch(&self, request: &HubRequest) -> HubResponse {
        debug!(op = %request.op, "hub request");
        let outcome = match request.op.as_str() {
            "parse" => self.op_parse(&request.payload),
            "ingest" => self.op_ingest(&request.payload),
            "query" => self.op_query(&request.payload),
            "search" => self.op_search(&request.payload),
            "tail" => self.op_tail(&request.payload),
            "stats" => self.op_stats(),
            other => Err(AuditError::UnknownOperation(other.to_string())),
        };
        match outcome {
            Ok(result) => HubResponse::success(result),
            Err(e) => HubResponse::failure(&e),
        }
    }

    fn op_parse(&self, payload: &Value) -> Result<Value> {
        let locale: Locale = require_str(payload, "locale")?.parse()?;
        let text = require_str(payload, "text")?;
        let record = self.coordinator.parse(text, locale);
        Ok(json!({
            "locale": record.locale,
            "tokens": record.tokens,
            "fields": field_map_to_json(&record.fields),
            "matched_rule": record.matched_rule,
        }))
    }

    fn op_ingest(&self, payload: &Value) -> Result<Value> {
        let source = require_str(payload, "source")?.to_string();
        let locale = optional_str(payload, "locale")?
            .map(str::parse::<Locale>)
            .transpose()?;
        let body = payload.get("payload").ok_or_else(|| {
            AuditError::MalformedPayload("ingest requires a payload".to_string())
        })?;

        let ingest_payload = match body {
            Value::String(raw) => IngestPayload::Text {
                raw: raw.clone(),
                locale,
            },
            Value::Object(_) => {
                if locale.is_some() {
                    return Err(AuditError::MalformedPayload(
                        "locale only applies to raw text payloads".to_string(),
                    ));
                }
                IngestPayload::Structured(field_map_from_json(body)?)
            }
            _ => {
                return Err(AuditError::MalformedPayload(
                    "payload must be a JSON object or a raw text string".to_string(),
                ))
            }
        };

        let sequence_id = self.coordinator.ingest(&source, ingest_payload)?;
        Ok(json!({ "sequence_id": sequence_id }))
    }

    fn op_query(&self, payload: &Value) -> Result<Value> {
        let filter = QueryFilter {
            source: optional_str(payload, "source")?.map(str::to_string),
            since: optional_timestamp(payload, "since")?,
            until: optional_timestamp(payload, "until")?,
            fields: match payload.get("fields") {
                Some(fields) => field_map_from_json(fields)?,
                None => Default::default(),
            },
            limit: optional_limit(payload)?,
            newest_first: false,
        };
        let outcome = self.coordinator.query(&filter)?;
        Ok(rows_to_json(outcome))
    }

    fn op_search(&self, payload: &Value) -> Result<Value> {
        let term = require_str(payload, "term")?;
        let limit = optional_limit(payload)?.unwrap_or(10);
        let outcome = self.coordinator.search(term, limit)?;
        Ok(rows_to_json(outcome))
    }

    fn op_tail(&self, payload: &Value) -> Result<Value> {
        let n = match payload.get("n") {
            None => 10,
            Some(v) => v.as_u64().ok_or_else(|| {
                AuditError::MalformedPayload("n must be a non-negative integer".to_string())
            })? as usize,
        };
        let outcome = self.coordinator.tail(n)?;
        Ok(rows_to_json(outcome))
    }

    fn op_stats(&self) -> Result<Value> {
        let stats = self.coordinator.stats()?;
        Ok(json!({
            "journal_entries": stats.journal_entries,
            "index_rows": stats.index_rows,
            "index_stale": stats.index_stale,
        }))
    }
}

fn rows_to_json(outcome: crate::coordinator::QueryOutcome) -> Value {
    let rows: Vec<Value> = outcome
        .rows
        .iter()
        .map(|row| {
            json!({
                "sequence_id": row.sequence_id,
                "source": row.source,
                "ts": row.ts.to_rfc3339(),
                "fields": field_map_to_json(&row.fields),
            })
        })
        .collect();
    json!({ "rows": rows, "index_stale": outcome.index_stale })
}

fn require_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AuditError::MalformedPayload(format!("missing string field '{key}'")))
}

fn optional_str<'a>(payload: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AuditError::MalformedPayload(format!(
            "field '{key}' must be a string"
        ))),
    }
}

fn optional_timestamp(payload: &Value, key: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match optional_str(payload, key)? {
        None => Ok(None),
        Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.with_timezone(&chrono::Utc)))
            .map_err(|e| {
                AuditError::MalformedPayload(format!("field '{key}' is not an RFC3339 time: {e}"))
            }),
    }
}

fn optional_limit(payload: &Value) -> Result<Option<usize>> {
    match payload.get("limit") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                AuditError::MalformedPayload("limit must be a non-negative integer".to_string())
            }),
    }
}
