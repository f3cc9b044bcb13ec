//! audit_hub — append-only audit trail with locale-aware field extraction
//! and a JSON request hub.
//!
//! The pipeline is: extractor → journal → index, orchestrated by the
//! coordinator and exposed to external callers through the hub dispatcher.
//! The journal is the durable source of truth; the index is a rebuildable
//! projection of it.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod hub;
pub mod index;
pub mod journal;
pub mod logging;
pub mod server;
pub mod types;

pub use error::{AuditError, Result};
