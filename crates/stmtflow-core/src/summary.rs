//! PDF summary of an email, filed next to its attachments.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::{PdfError, StmtflowError};
use crate::models::EmailRecord;
use crate::pdf::TextPdfWriter;
use crate::Result;

const MAX_SUBJECT_CHARS: usize = 50;

lazy_static! {
    static ref HTML_BREAK: Regex = Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</tr>").unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref BLANK_RUN: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Render `email` as a text PDF and write it into `dir`.
///
/// Returns the path of the written file, named after the subject and `now`.
pub fn write_email_summary(email: &EmailRecord, dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let bytes = render_email_summary(email)?;
    let path = dir.join(summary_file_name(&email.subject, now));
    std::fs::write(&path, bytes).map_err(StmtflowError::Io)?;
    debug!("Wrote email summary {}", path.display());
    Ok(path)
}

pub fn render_email_summary(email: &EmailRecord) -> std::result::Result<Vec<u8>, PdfError> {
    let mut writer = TextPdfWriter::new();
    writer.push_line("Email Summary");
    writer.push_line("");
    writer.push_line(format!("From: {}", email.sender));
    writer.push_line(format!("To: {}", email.recipients.join(", ")));
    writer.push_line(format!("Subject: {}", email.subject));
    writer.push_line(format!("Date: {}", email.date));
    writer.push_line("");
    writer.push_line("Body:");
    writer.push_text(&plain_body(&email.body));
    writer.push_line("");
    writer.push_line("Attachments:");
    if email.attachments.is_empty() {
        writer.push_line("  (none)");
    }
    for attachment in &email.attachments {
        writer.push_line(format!("  - {}", attachment.original_filename));
    }
    writer.finish()
}

/// `{subject}_{YYYYmmdd_HHMMSS}.pdf` with the subject made filesystem-safe.
pub fn summary_file_name(subject: &str, now: DateTime<Utc>) -> String {
    let mut safe: String = subject
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(MAX_SUBJECT_CHARS)
        .collect();
    safe = safe.trim().replace(' ', "_");
    if safe.is_empty() {
        safe = "email".to_string();
    }
    format!("{}_{}.pdf", safe, now.format("%Y%m%d_%H%M%S"))
}

/// Strip HTML markup, keeping line structure.
fn plain_body(body: &str) -> String {
    if !body.contains('<') {
        return body.to_string();
    }
    let with_breaks = HTML_BREAK.replace_all(body, "\n");
    let text = HTML_TAG.replace_all(&with_breaks, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    BLANK_RUN.replace_all(text.trim(), "\n\n").into_owned()
}
