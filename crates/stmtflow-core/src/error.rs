//! Error types for the stmtflow-core library.

use thiserror::Error;

/// Main error type for the stmtflow library.
#[derive(Error, Debug)]
pub enum StmtflowError {
    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Archive handling error.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Ledger persistence error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Error reported by an external collaborator.
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// Failed to extract images from PDF.
    #[error("failed to extract images: {0}")]
    ImageExtraction(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Invalid page number requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),

    /// Failed to write a generated PDF.
    #[error("failed to write PDF: {0}")]
    Write(String),
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// Failed to load OCR models.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Errors related to archive expansion.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The archive could not be opened or its directory is corrupt.
    #[error("malformed archive: {0}")]
    Malformed(String),

    /// A member could not be extracted.
    #[error("failed to extract {name}: {reason}")]
    Extract { name: String, reason: String },

    /// I/O error while reading or writing members.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(e: zip::result::ZipError) -> Self {
        ArchiveError::Malformed(e.to_string())
    }
}

/// Errors reading text out of a `.docx` container.
#[derive(Error, Debug)]
pub enum DocxError {
    /// The bytes are not a readable zip container.
    #[error("not a docx container: {0}")]
    Container(#[from] zip::result::ZipError),

    /// The document part could not be read.
    #[error("failed to read {part}: {source}")]
    Part {
        part: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The document XML is malformed.
    #[error("XML error at {position}: {reason}")]
    Xml { position: u64, reason: String },
}

/// Errors related to the outcome ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The ledger file could not be read or written.
    #[error("ledger I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The ledger could not be serialized.
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors reported by external collaborators (mail, store, parser, extractor).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request never completed (connection, DNS, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The service answered with a body we could not interpret.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Local I/O failed while preparing or storing a payload.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the stmtflow library.
pub type Result<T> = std::result::Result<T, StmtflowError>;
