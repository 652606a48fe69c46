//! Company name resolution for detected statements.
//!
//! A text sample of the statement is handed to a [`FieldExtractor`]; only a
//! real owner name is accepted. Exhausted attempts yield `None` and the caller
//! must stop processing the document rather than guess.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::detect::UNKNOWN_COMPANY;
use crate::models::config::ResolverConfig;
use crate::models::CompanyFields;
use crate::services::FieldExtractor;
use crate::text::{DocumentFormat, TextExtractor};

/// Owner values that mean "no answer".
const OWNER_SENTINELS: &[&str] = &[UNKNOWN_COMPANY, "UNKNOWN", ""];

/// Words of statement column headers and boilerplate.
const HEADER_WORDS: &[&str] = &[
    "account statement",
    "issue date",
    "period",
    "account activity",
    "payment type",
    "paid in",
    "paid out",
    "balance",
    "date",
    "detail",
];

const HEADER_ONLY_RATIO: f64 = 0.7;
const MIN_SAMPLE_CHARS: usize = 30;
const MIN_SAMPLE_LETTERS: usize = 10;

/// Longest sample sent for non-PDF documents.
const MAX_SAMPLE_CHARS: usize = 4000;

lazy_static! {
    static ref JSON_FENCE: Regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap();
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

pub struct CompanyResolver {
    extractor: Arc<dyn FieldExtractor>,
    text: TextExtractor,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CompanyResolver {
    pub fn new(extractor: Arc<dyn FieldExtractor>, text: TextExtractor) -> Self {
        let defaults = ResolverConfig::default();
        Self {
            extractor,
            text,
            max_attempts: defaults.max_attempts,
            retry_delay: Duration::from_secs(defaults.retry_delay_secs),
        }
    }

    pub fn with_config(mut self, config: &ResolverConfig) -> Self {
        self.max_attempts = config.max_attempts.max(1);
        self.retry_delay = Duration::from_secs(config.retry_delay_secs);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Resolve the owner of the statement at `path`.
    ///
    /// `display_name` decides the format, since scratch copies may be renamed.
    pub async fn resolve(&self, path: &Path, display_name: &str) -> Option<String> {
        for attempt in 1..=self.max_attempts {
            info!("Resolving company for {} (attempt {}/{})", display_name, attempt, self.max_attempts);

            match self.sample(path, display_name) {
                Some(sample) => match self.extractor.extract(&sample).await {
                    Ok(Some(fields)) => {
                        if let Some(owner) = accepted_owner(&fields) {
                            info!("Resolved company '{}' for {}", owner, display_name);
                            return Some(owner);
                        }
                        warn!("Extractor returned no usable owner: {:?}", fields.owner);
                    }
                    Ok(None) => warn!("Extractor returned nothing for {}", display_name),
                    Err(e) => warn!("Field extraction failed for {}: {}", display_name, e),
                },
                None => warn!("No text sample available from {}", display_name),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        warn!("Company resolution exhausted for {}", display_name);
        None
    }

    /// Text sent to the extractor: page one of a PDF, OCR when that page is
    /// unusable, otherwise the leading text of the document.
    fn sample(&self, path: &Path, display_name: &str) -> Option<String> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                return None;
            }
        };

        if DocumentFormat::from_filename(display_name) == DocumentFormat::Pdf {
            let layer = self.text.first_page_text(&bytes).unwrap_or_default();
            if is_usable_sample(&layer) {
                return Some(layer);
            }
            debug!("First page text unusable ({} chars), trying OCR", layer.trim().len());
            if let Some(ocr) = self.text.first_page_ocr(&bytes) {
                return Some(ocr);
            }
            return if layer.trim().is_empty() { None } else { Some(layer) };
        }

        self.text
            .extract(&bytes, display_name)
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.chars().take(MAX_SAMPLE_CHARS).collect())
    }
}

fn accepted_owner(fields: &CompanyFields) -> Option<String> {
    let owner = fields.owner.as_deref()?.trim();
    if OWNER_SENTINELS.iter().any(|s| s.eq_ignore_ascii_case(owner)) {
        None
    } else {
        Some(owner.to_string())
    }
}

/// True when a page sample carries real content rather than a bare template.
pub fn is_usable_sample(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_SAMPLE_CHARS {
        return false;
    }
    if trimmed.chars().filter(|c| c.is_alphabetic()).count() < MIN_SAMPLE_LETTERS {
        return false;
    }
    !looks_like_header_only(trimmed)
}

/// More than 70% of non-blank lines contain a header word.
pub fn looks_like_header_only(text: &str) -> bool {
    let lines: Vec<String> = text
        .lines()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return true;
    }
    let header_lines = lines
        .iter()
        .filter(|l| HEADER_WORDS.iter().any(|w| l.contains(w)))
        .count();
    header_lines as f64 / lines.len() as f64 > HEADER_ONLY_RATIO
}

/// Parse a free-form model reply into fields.
///
/// Accepts plain JSON, a fenced code block, or the first `{...}` object in
/// surrounding prose. An array reply yields its first element.
pub fn parse_fields_reply(raw: &str) -> Option<CompanyFields> {
    let body = JSON_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw)
        .trim();

    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            let object = JSON_OBJECT.find(body)?;
            serde_json::from_str(object.as_str()).ok()?
        }
    };

    let value = match value {
        serde_json::Value::Array(items) => items.into_iter().next()?,
        other => other,
    };
    serde_json::from_value(value).ok()
}
