//! Configuration structures for the statement pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the stmtflow pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StmtflowConfig {
    /// Local scratch and ledger locations.
    pub storage: StorageConfig,

    /// Inbox location and relevance filters.
    pub mail: MailConfig,

    /// Statement classification tuning.
    pub detection: DetectionConfig,

    /// OCR fallback configuration.
    pub ocr: OcrConfig,

    /// Company resolution retry policy.
    pub resolver: ResolverConfig,

    /// Document store upload retry policy.
    pub upload: UploadConfig,

    /// Remote parsing and polling policy.
    pub parsing: ParsingConfig,

    /// Destination folder naming.
    pub folders: FolderConfig,

    /// Remote service endpoints and credentials.
    pub services: ServicesConfig,

    /// Scheduler cadence.
    pub schedule: ScheduleConfig,
}

/// Local storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Scratch directory for downloaded attachments.
    pub download_dir: PathBuf,

    /// JSON ledger of per-file outcomes.
    pub ledger_path: PathBuf,

    /// Root directory of the filesystem document store.
    pub store_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            ledger_path: PathBuf::from("attachment_log.json"),
            store_root: PathBuf::from("store"),
        }
    }
}

/// Mail source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Directory polled for `.eml` messages.
    pub inbox_dir: PathBuf,

    /// Accept messages whose subject contains one of these (case-insensitive).
    pub subject_keywords: Vec<String>,

    /// Accept messages whose sender ends with one of these domains.
    pub sender_domains: Vec<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from("inbox"),
            subject_keywords: Vec::new(),
            sender_domains: Vec::new(),
        }
    }
}

/// Statement classifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum number of distinct vocabulary hits for a content match.
    pub keyword_threshold: usize,

    /// Pages of the text layer read from a PDF.
    pub max_pdf_pages: u32,

    /// Text layers at or below this many characters fall back to OCR.
    pub min_text_length: usize,

    /// Pages rendered for OCR.
    pub ocr_pages: u32,

    /// Leading characters searched for a submitter name.
    pub name_search_chars: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            keyword_threshold: 3,
            max_pdf_pages: 5,
            min_text_length: 100,
            ocr_pages: 3,
            name_search_chars: 1000,
        }
    }
}

/// OCR engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Use OCR when a PDF has no usable text layer.
    pub enabled: bool,

    /// Directory containing `det.onnx`, `latin_rec.onnx` and `latin_dict.txt`.
    pub model_dir: PathBuf,

    /// Keep `[UNK]` markers in recognized text.
    pub keep_unk: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_dir: PathBuf::from("models"),
            keep_unk: false,
        }
    }
}

/// Company resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay_secs: 2,
        }
    }
}

/// Upload retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_attempts: u32,

    /// First backoff; doubles after every failed attempt.
    pub initial_backoff_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 2,
        }
    }
}

/// Remote parsing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    /// Forward detected statements to the parsing service.
    pub enabled: bool,

    /// Delay between status polls.
    pub poll_interval_secs: u64,

    /// Maximum number of status polls per parse.
    pub max_polls: u32,

    /// Hard deadline for one poll cycle, regardless of attempts left.
    pub overall_timeout_secs: u64,

    /// Re-upload once when every file is still at intake after polling.
    pub reupload_when_stuck: bool,

    /// Prefix of remote user keys.
    pub user_prefix: String,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 10,
            max_polls: 30,
            overall_timeout_secs: 600,
            reupload_when_stuck: true,
            user_prefix: "ene_".to_string(),
        }
    }
}

/// Destination folder naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    /// chrono format of the folder date prefix.
    pub date_format: String,

    /// Subfolder receiving uploaded attachments.
    pub dataroom: String,

    /// Subfolder receiving the email summary.
    pub summary: String,

    /// Suffix of the dated fallback folder for non-statements.
    pub non_bank_suffix: String,

    /// Numbered collision suffixes tried before the timestamp fallback.
    pub max_collision_attempts: u32,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            date_format: "%Y.%m.%d".to_string(),
            dataroom: "Dataroom".to_string(),
            summary: "summary_mail".to_string(),
            non_bank_suffix: "non_bank".to_string(),
            max_collision_attempts: 100,
        }
    }
}

/// Remote endpoints. Keys may be given as `${ENV_VAR}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub parse_api_url: String,
    pub parse_api_key: String,
    pub extractor_api_url: String,
    pub extractor_api_key: String,
    pub extractor_model: String,

    /// Per-request timeout for all HTTP collaborators.
    pub request_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            parse_api_url: "https://app.herondata.io/api".to_string(),
            parse_api_key: "${HERON_API_KEY}".to_string(),
            extractor_api_url: "https://api.openai.com/v1".to_string(),
            extractor_api_key: "${OPENAI_API_KEY}".to_string(),
            extractor_model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl StmtflowConfig {
    /// Load configuration from a JSON file.
    ///
    /// String values of the form `${NAME}` are replaced with the value of the
    /// environment variable `NAME` when it is set.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let mut value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        resolve_env_placeholders(&mut value, &|name| std::env::var(name).ok());
        serde_json::from_value(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }

    /// Resolve `${NAME}` placeholders that survived loading (e.g. defaults).
    pub fn resolved_secret(value: &str) -> Option<String> {
        match placeholder_name(value) {
            Some(name) => std::env::var(name).ok().filter(|v| !v.is_empty()),
            None if value.is_empty() => None,
            None => Some(value.to_string()),
        }
    }

    pub fn upload_backoff(&self) -> Duration {
        Duration::from_secs(self.upload.initial_backoff_secs)
    }
}

fn placeholder_name(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
}

/// Replace every `${NAME}` string in a JSON tree for which `lookup` yields a value.
pub(crate) fn resolve_env_placeholders(
    value: &mut serde_json::Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) {
    match value {
        serde_json::Value::String(s) => {
            if let Some(resolved) = placeholder_name(s).and_then(lookup) {
                *s = resolved;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                resolve_env_placeholders(item, lookup);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                resolve_env_placeholders(item, lookup);
            }
        }
        _ => {}
    }
}
