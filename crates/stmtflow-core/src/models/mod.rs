//! Data models for emails, ledger rows, remote payloads and configuration.

pub mod config;
pub mod email;
pub mod outcome;
pub mod remote;

pub use config::StmtflowConfig;
pub use email::{Attachment, EmailRecord};
pub use outcome::{LedgerEntry, Outcome};
pub use remote::{CompanyFields, ParseResults, Transaction, UploadReceipt};
