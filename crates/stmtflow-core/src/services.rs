//! Collaborator contracts: mail source, document store, parsing service and
//! text-to-fields extractor. Implementations live outside the core.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ServiceError;
use crate::models::{CompanyFields, EmailRecord, ParseResults, UploadReceipt};

/// Source of new emails with attachments already written to scratch storage.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Unseen messages only; returned messages are marked consumed.
    async fn fetch_new(&self) -> Result<Vec<EmailRecord>, ServiceError>;
}

/// Remote folder-based document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn folder_exists(&self, folder_path: &str) -> Result<bool, ServiceError>;

    /// Upload a local file into `folder_path`, creating folders as needed.
    async fn upload(&self, local_path: &Path, folder_path: &str) -> Result<UploadReceipt, ServiceError>;

    /// Attach metadata columns to an uploaded item.
    async fn update_metadata(
        &self,
        item_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<bool, ServiceError>;
}

/// Third-party statement parsing service.
#[async_trait]
pub trait ParsingService: Send + Sync {
    /// Return the id of the remote user keyed by `user_key`, creating it if absent.
    async fn ensure_user(&self, user_key: &str, display_name: &str) -> Result<String, ServiceError>;

    /// Upload a statement for a user; returns the remote file id.
    async fn upload_document(&self, user_id: &str, path: &Path) -> Result<String, ServiceError>;

    /// Start parsing every uploaded document of a user.
    async fn trigger_parse(&self, user_id: &str) -> Result<(), ServiceError>;

    /// Raw processing status of each of the user's files.
    async fn file_statuses(&self, user_id: &str) -> Result<Vec<String>, ServiceError>;

    /// Enriched results, `None` when the service returned nothing usable.
    async fn get_results(&self, user_id: &str) -> Result<Option<ParseResults>, ServiceError>;
}

/// Structured field extraction from free document text (an LLM in production).
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, document_text: &str) -> Result<Option<CompanyFields>, ServiceError>;
}

/// Source of the current time, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
