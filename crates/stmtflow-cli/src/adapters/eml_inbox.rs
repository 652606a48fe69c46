//! Mail source reading `.eml` files dropped into an inbox directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mailparse::{MailAddr, MailHeaderMap, ParsedMail};
use thiserror::Error;
use tracing::{debug, info, warn};

use stmtflow_core::models::config::MailConfig;
use stmtflow_core::models::{Attachment, EmailRecord};
use stmtflow_core::processor::safe_file_name;
use stmtflow_core::{MailSource, ServiceError};

const PROCESSED_DIR: &str = "processed";
const FAILED_DIR: &str = "failed";

/// Why a message file could not be turned into an [`EmailRecord`].
#[derive(Error, Debug)]
pub enum InboxError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed message: {0}")]
    Parse(#[from] mailparse::MailParseError),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Accepts a message when its subject carries a keyword or its sender a
/// listed domain. Empty lists accept everything.
#[derive(Debug, Clone, Default)]
pub struct RelevanceFilter {
    subject_keywords: Vec<String>,
    sender_domains: Vec<String>,
}

impl RelevanceFilter {
    pub fn new(subject_keywords: &[String], sender_domains: &[String]) -> Self {
        Self {
            subject_keywords: subject_keywords.iter().map(|k| k.to_lowercase()).collect(),
            sender_domains: sender_domains.iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    pub fn is_relevant(&self, sender: &str, subject: &str) -> bool {
        if self.subject_keywords.is_empty() && self.sender_domains.is_empty() {
            return true;
        }
        let subject = subject.to_lowercase();
        let sender = sender.to_lowercase();
        self.subject_keywords.iter().any(|k| subject.contains(k))
            || self.sender_domains.iter().any(|d| sender.ends_with(d))
    }
}

/// Each `fetch_new` drains the inbox: consumed files move to `processed/`,
/// unparseable ones to `failed/`. Attachments land in one directory per
/// message below the download dir; the next fetch removes those the
/// processor has emptied.
pub struct EmlInbox {
    inbox_dir: PathBuf,
    download_dir: PathBuf,
    filter: RelevanceFilter,
}

impl EmlInbox {
    pub fn new(config: &MailConfig, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            inbox_dir: config.inbox_dir.clone(),
            download_dir: download_dir.into(),
            filter: RelevanceFilter::new(&config.subject_keywords, &config.sender_domains),
        }
    }

    fn pending_messages(&self) -> std::io::Result<Vec<PathBuf>> {
        if !self.inbox_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.inbox_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("eml"))
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Parse one message, writing its attachments below the download dir.
    fn read_message(&self, path: &Path) -> Result<Option<EmailRecord>, InboxError> {
        let raw = std::fs::read(path).map_err(|source| InboxError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = mailparse::parse_mail(&raw)?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "message".to_string());
        let id = parsed
            .headers
            .get_first_value("Message-ID")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| stem.clone());
        let sender = parsed
            .headers
            .get_first_header("From")
            .and_then(|h| header_addresses(&[h]).into_iter().next())
            .or_else(|| parsed.headers.get_first_value("From"))
            .unwrap_or_default();
        let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();

        if !self.filter.is_relevant(&sender, &subject) {
            info!("Skipping irrelevant message from {}: {}", sender, subject);
            return Ok(None);
        }

        let recipients = header_addresses(&parsed.headers.get_all_headers("To"));
        let date = parsed.headers.get_first_value("Date").unwrap_or_default();

        let mut body = MailBody::default();
        let mut parts = Vec::new();
        collect_parts(&parsed, &mut body, &mut parts);

        let dest = self.download_dir.join(safe_file_name(&stem));
        let mut attachments = Vec::with_capacity(parts.len());
        if !parts.is_empty() {
            std::fs::create_dir_all(&dest).map_err(|source| InboxError::Write {
                path: dest.clone(),
                source,
            })?;
        }
        for (index, (name, bytes)) in parts.into_iter().enumerate() {
            let file_name = safe_file_name(&name);
            let mut target = dest.join(&file_name);
            if target.exists() {
                target = dest.join(format!("{index}_{file_name}"));
            }
            std::fs::write(&target, bytes).map_err(|source| InboxError::Write {
                path: target.clone(),
                source,
            })?;
            attachments.push(Attachment::new(target, name));
        }

        Ok(Some(EmailRecord {
            id,
            sender,
            recipients,
            subject,
            date,
            body: body.best(),
            attachments,
        }))
    }

    /// Remove message directories left empty by earlier cycles.
    fn sweep_downloads(&self) {
        let Ok(entries) = std::fs::read_dir(&self.download_dir) else {
            return;
        };
        for dir in entries.filter_map(|e| e.ok().map(|e| e.path())).filter(|p| p.is_dir()) {
            // Only succeeds when empty; directories still holding files stay.
            if std::fs::remove_dir(&dir).is_ok() {
                debug!("Removed download dir {}", dir.display());
            }
        }
    }

    fn archive(&self, path: &Path, subdir: &str) {
        let dir = self.inbox_dir.join(subdir);
        let moved = std::fs::create_dir_all(&dir).and_then(|_| match path.file_name() {
            Some(name) => std::fs::rename(path, dir.join(name)),
            None => Ok(()),
        });
        if let Err(e) = moved {
            warn!("Could not move {} to {}: {}", path.display(), dir.display(), e);
        }
    }
}

#[async_trait]
impl MailSource for EmlInbox {
    async fn fetch_new(&self) -> Result<Vec<EmailRecord>, ServiceError> {
        self.sweep_downloads();
        let mut emails = Vec::new();
        for path in self.pending_messages()? {
            match self.read_message(&path) {
                Ok(Some(email)) => {
                    debug!("Read {} with {} attachment(s)", email.id, email.attachments.len());
                    emails.push(email);
                    self.archive(&path, PROCESSED_DIR);
                }
                Ok(None) => self.archive(&path, PROCESSED_DIR),
                Err(e) => {
                    warn!("Unreadable message {}: {}", path.display(), e);
                    self.archive(&path, FAILED_DIR);
                }
            }
        }
        Ok(emails)
    }
}

#[derive(Default)]
struct MailBody {
    plain: Vec<String>,
    html: Vec<String>,
}

impl MailBody {
    fn best(self) -> String {
        if !self.plain.is_empty() {
            self.plain.join("\n\n")
        } else {
            self.html.join("\n\n")
        }
    }
}

fn collect_parts(part: &ParsedMail<'_>, body: &mut MailBody, attachments: &mut Vec<(String, Vec<u8>)>) {
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());
    let is_attachment =
        matches!(disposition.disposition, mailparse::DispositionType::Attachment) || filename.is_some();

    if !part.subparts.is_empty() {
        for child in &part.subparts {
            collect_parts(child, body, attachments);
        }
        return;
    }

    if is_attachment {
        match part.get_body_raw() {
            Ok(bytes) if !bytes.is_empty() => {
                let name = filename.unwrap_or_else(|| format!("attachment-{}.bin", attachments.len() + 1));
                attachments.push((name, bytes));
            }
            Ok(_) => {}
            Err(e) => warn!("Undecodable attachment part: {}", e),
        }
        return;
    }

    let mime = part.ctype.mimetype.to_ascii_lowercase();
    if let Ok(text) = part.get_body() {
        if mime == "text/plain" {
            body.plain.push(text);
        } else if mime == "text/html" {
            body.html.push(text);
        }
    }
}

fn header_addresses(headers: &[&mailparse::MailHeader<'_>]) -> Vec<String> {
    headers
        .iter()
        .filter_map(|h| mailparse::addrparse_header(h).ok())
        .flat_map(|list| list.iter().flat_map(addresses).collect::<Vec<_>>())
        .collect()
}

fn addresses(addr: &MailAddr) -> Vec<String> {
    match addr {
        MailAddr::Single(info) => vec![info.addr.clone()],
        MailAddr::Group(group) => group.addrs.iter().map(|i| i.addr.clone()).collect(),
    }
}
