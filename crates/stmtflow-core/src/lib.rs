//! Core library for routing emailed bank statements.
//!
//! This crate provides:
//! - Attachment ledger with duplicate detection and collision-free naming
//! - Zip archive expansion with OS metadata filtering
//! - Bank statement classification (PDF text layer, OCR fallback, Word, CSV)
//! - Company resolution through a pluggable field extractor
//! - The per-email processing pipeline and remote parse polling

pub mod archive;
pub mod detect;
pub mod error;
pub mod ledger;
pub mod models;
pub mod ocr;
pub mod parsing;
pub mod pdf;
pub mod processor;
pub mod resolver;
pub mod services;
pub mod summary;
pub mod text;

pub use archive::ArchiveExpander;
pub use detect::{ClassificationResult, MatchedBy, StatementClassifier};
pub use error::{Result, ServiceError, StmtflowError};
pub use ledger::Ledger;
pub use models::{EmailRecord, LedgerEntry, Outcome, StmtflowConfig};
pub use ocr::{backend_from_config, OcrBackend};
pub use parsing::{ParseDriver, PollOutcome, PollPolicy};
pub use processor::{EmailProcessor, EmailReport, ProcessingContext};
pub use resolver::CompanyResolver;
pub use services::{Clock, DocumentStore, FieldExtractor, MailSource, ParsingService, SystemClock};
pub use text::TextExtractor;
