//! Email records handed over by a mail source.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An attachment already written to local scratch storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub local_temp_path: PathBuf,
    pub original_filename: String,
}

impl Attachment {
    pub fn new(local_temp_path: impl Into<PathBuf>, original_filename: impl Into<String>) -> Self {
        Self {
            local_temp_path: local_temp_path.into(),
            original_filename: original_filename.into(),
        }
    }

    /// Build an attachment whose original name is the file name of `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let original_filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Self {
            local_temp_path: path,
            original_filename,
        }
    }
}

/// One retrieved email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub subject: String,
    /// Date header as received.
    pub date: String,
    /// Plain text or HTML body.
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl EmailRecord {
    /// The id used in ledger rows.
    pub fn ledger_id(&self) -> &str {
        if self.id.trim().is_empty() {
            "unknown"
        } else {
            &self.id
        }
    }
}
