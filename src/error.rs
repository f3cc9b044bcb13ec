use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("unsupported locale: {0}")]
    UnsupportedLocale(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("journal write failed: {0}")]
    JournalWrite(String),

    #[error("index diverged from journal: {0}")]
    IndexInconsistency(String),

    #[error("corrupt journal tail at byte offset {offset}")]
    CorruptTail { offset: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("index database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl AuditError {
    /// Stable identifier used in hub error envelopes. Wrapped low-level
    /// errors are folded into the taxonomy kind of the layer they occur in.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::UnsupportedLocale(_) => "unsupported_locale",
            AuditError::MalformedPayload(_) | AuditError::Json(_) | AuditError::Toml(_) => {
                "malformed_payload"
            }
            AuditError::UnknownOperation(_) => "unknown_operation",
            AuditError::JournalWrite(_) | AuditError::Io(_) => "journal_write",
            AuditError::IndexInconsistency(_) | AuditError::Sqlite(_) => "index_inconsistency",
            AuditError::CorruptTail { .. } => "corrupt_tail",
        }
    }
}

pub type Result<T> = std::result::Result<T, AuditError>;
