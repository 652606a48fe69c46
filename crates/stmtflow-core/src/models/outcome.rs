//! Ledger record and outcome vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal state recorded for one processed file or archive.
///
/// The serialized names are persisted in the ledger and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Outcome {
    /// Uploaded; remote parsing not requested.
    Success,
    /// Content hash already present in the ledger.
    Duplicate,
    /// Uploaded as a supporting document.
    NotBankStatement,
    /// Upload retries exhausted.
    UploadFailed,
    /// No owner could be resolved for a statement.
    CompanyExtractionFailed,
    /// The parsing service rejected or failed the document.
    #[serde(rename = "HeronError")]
    ParseServiceError,
    /// Polling ended while the parse was still pending.
    ParseTimeout,
    /// Parsing finished but no results could be fetched.
    ParseRetrievalFailed,
    /// Parsing finished with a well-shaped result set.
    Parsed,
    #[serde(rename = "ZIPProcessed")]
    ArchiveProcessed,
    #[serde(rename = "ZIPError")]
    ArchiveError,
    #[serde(rename = "EmptyZIP")]
    EmptyArchive,
    /// Archive held files, none of a supported type.
    NoSupportedFiles,
    /// Unanticipated failure in the per-file handler.
    Error,
}

impl Outcome {
    /// The persisted name of this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "Success",
            Outcome::Duplicate => "Duplicate",
            Outcome::NotBankStatement => "NotBankStatement",
            Outcome::UploadFailed => "UploadFailed",
            Outcome::CompanyExtractionFailed => "CompanyExtractionFailed",
            Outcome::ParseServiceError => "HeronError",
            Outcome::ParseTimeout => "ParseTimeout",
            Outcome::ParseRetrievalFailed => "ParseRetrievalFailed",
            Outcome::Parsed => "Parsed",
            Outcome::ArchiveProcessed => "ZIPProcessed",
            Outcome::ArchiveError => "ZIPError",
            Outcome::EmptyArchive => "EmptyZIP",
            Outcome::NoSupportedFiles => "NoSupportedFiles",
            Outcome::Error => "Error",
        }
    }

    /// Whether this outcome belongs to the remote-parse failure family.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Outcome::ParseServiceError | Outcome::ParseTimeout | Outcome::ParseRetrievalFailed
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,

    /// Source message id, `"unknown"` when the mail source had none.
    pub message_id: String,

    /// Name the file was stored under.
    pub file_name: String,

    /// Hex SHA-256 of the content; absent only when hashing failed.
    pub hash: Option<String>,

    pub outcome: Outcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LedgerEntry {
    /// Create an entry stamped with the current time.
    pub fn new(
        message_id: impl Into<String>,
        file_name: impl Into<String>,
        hash: Option<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            message_id: message_id.into(),
            file_name: file_name.into(),
            hash,
            outcome,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
