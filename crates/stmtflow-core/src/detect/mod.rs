//! Bank statement classification.
//!
//! A file is a statement when its text contains enough statement vocabulary,
//! or, failing that, when its name looks like one. Whenever text is available
//! a submitter name is extracted as well, for logging and folder naming.

mod names;
pub mod patterns;

pub use names::{extract_submitter_name, UNKNOWN_BANK_DEFAULT};

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::text::TextExtractor;
use patterns::{FILENAME_EXTENSIONS, FILENAME_TOKENS, STATEMENT_KEYWORDS, STRONG_FILENAME_KEYWORDS};

/// Name reported when no text could be extracted at all.
pub const UNKNOWN_COMPANY: &str = "UNKNOWN_COMPANY";

/// What decided a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchedBy {
    /// Enough vocabulary entries occurred in the text.
    Content { hits: usize },
    /// The file name carried statement tokens.
    Filename,
    /// Neither rule fired.
    Nothing,
}

/// Outcome of classifying one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub is_bank_statement: bool,
    pub extracted_name: String,
    pub matched_by: MatchedBy,
}

/// Keyword scoring classifier with a filename fallback.
#[derive(Clone)]
pub struct StatementClassifier {
    extractor: TextExtractor,
    keywords: Vec<String>,
    threshold: usize,
    name_search_chars: usize,
}

impl StatementClassifier {
    pub fn new(extractor: TextExtractor) -> Self {
        let threshold = extractor.config().keyword_threshold;
        let name_search_chars = extractor.config().name_search_chars;
        Self {
            extractor,
            keywords: STATEMENT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            threshold,
            name_search_chars,
        }
    }

    /// Replace the vocabulary. Entries are lower-cased and de-duplicated.
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary: Vec<String> = Vec::new();
        for kw in keywords {
            let kw = kw.as_ref().trim().to_lowercase();
            if !kw.is_empty() && !vocabulary.contains(&kw) {
                vocabulary.push(kw);
            }
        }
        self.keywords = vocabulary;
        self
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Classify raw bytes named `filename`.
    pub fn detect(&self, bytes: &[u8], filename: &str) -> ClassificationResult {
        info!("Starting detection for file: {}", filename);

        let text = self.extractor.extract(bytes, filename);
        let hits = text
            .as_deref()
            .map(|t| self.keyword_hits(&t.to_lowercase()))
            .unwrap_or(0);

        let extracted_name = match text.as_deref() {
            Some(t) if !t.trim().is_empty() => extract_submitter_name(t, self.name_search_chars),
            _ => UNKNOWN_COMPANY.to_string(),
        };

        let matched_by = if hits >= self.threshold {
            info!("{}: matched {} keywords (threshold {})", filename, hits, self.threshold);
            MatchedBy::Content { hits }
        } else if filename_looks_like_statement(filename) {
            warn!("{}: accepted by filename despite {} keyword hits", filename, hits);
            MatchedBy::Filename
        } else {
            info!("{}: not a bank statement ({} keyword hits)", filename, hits);
            MatchedBy::Nothing
        };

        ClassificationResult {
            is_bank_statement: matched_by != MatchedBy::Nothing,
            extracted_name,
            matched_by,
        }
    }

    /// Classify a file on disk, using `display_name` for format and filename rules.
    pub fn detect_file(&self, path: &Path, display_name: &str) -> std::io::Result<ClassificationResult> {
        let bytes = std::fs::read(path)?;
        Ok(self.detect(&bytes, display_name))
    }

    /// Number of vocabulary entries occurring in already lower-cased text.
    pub fn keyword_hits(&self, lower_text: &str) -> usize {
        self.keywords
            .iter()
            .filter(|kw| lower_text.contains(kw.as_str()))
            .count()
    }
}

/// Filename fallback: a supported extension plus a statement token.
pub fn filename_looks_like_statement(filename: &str) -> bool {
    let lower = filename.to_lowercase();
    if !FILENAME_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }
    STRONG_FILENAME_KEYWORDS.iter().any(|k| lower.contains(k)) || FILENAME_TOKENS.is_match(&lower)
}
