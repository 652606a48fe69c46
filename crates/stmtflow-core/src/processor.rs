//! Per-email orchestration.
//!
//! Every attachment of an email is hashed, expanded when it is an archive and
//! classified before anything is uploaded. Statements are filed first so the
//! company folder they establish can receive the supporting documents that
//! follow. Each file ends with exactly one ledger entry, and every local copy
//! is removed when its handler returns.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveExpander;
use crate::detect::StatementClassifier;
use crate::error::{ServiceError, StmtflowError};
use crate::ledger::{file_sha256, Ledger};
use crate::models::{EmailRecord, LedgerEntry, Outcome, StmtflowConfig, UploadReceipt};
use crate::parsing::{remote_user_key, ParseDriver, PollOutcome, PollPolicy};
use crate::resolver::CompanyResolver;
use crate::services::{Clock, DocumentStore, FieldExtractor, MailSource, ParsingService, SystemClock};
use crate::summary::write_email_summary;
use crate::text::TextExtractor;

const FALLBACK_DATE_FORMAT: &str = "%Y.%m.%d";

/// State shared by the attachments of one email, discarded afterwards.
#[derive(Debug, Default)]
pub struct ProcessingContext {
    /// Owner resolved from the first statement of the email.
    pub resolved_company_name: Option<String>,
    /// Company folder, created or verified once.
    pub destination_folder: Option<String>,
    pub summary_uploaded: bool,
    /// Files uploaded so far.
    pub uploads: usize,
}

/// Outcome of one file or archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file_name: String,
    pub outcome: Outcome,
}

/// Everything recorded while processing one email, in ledger order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailReport {
    pub files: Vec<FileReport>,
}

impl EmailReport {
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.files.iter().map(|f| f.outcome).collect()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.files.iter().filter(|f| f.outcome == outcome).count()
    }
}

/// Removes a scratch file when dropped.
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.0.exists() {
            return;
        }
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed scratch file {}", self.0.display()),
            Err(e) => warn!("Failed to remove {}: {}", self.0.display(), e),
        }
    }
}

/// A classified file waiting to be filed.
struct Candidate {
    path: PathBuf,
    display_name: String,
    hash: String,
    is_statement: bool,
    _scratch: ScratchFile,
}

#[derive(Default)]
struct PreScan {
    statements: Vec<Candidate>,
    others: Vec<Candidate>,
    /// Expansion trees, removed when the scan is dropped.
    expansions: Vec<TempDir>,
}

struct Disposition {
    stored_name: String,
    outcome: Outcome,
    error: Option<String>,
}

impl Disposition {
    fn new(stored_name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            stored_name: stored_name.into(),
            outcome,
            error: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// What the remote side knows about a filed statement.
#[derive(Default)]
struct RemoteTrace {
    company: Option<String>,
    user_id: Option<String>,
    parse_id: Option<String>,
    parsed_at: Option<String>,
    error: Option<String>,
}

/// Drives emails through classification, filing and remote parsing.
pub struct EmailProcessor {
    config: StmtflowConfig,
    ledger: Ledger,
    store: Arc<dyn DocumentStore>,
    parser: ParseDriver,
    extractor: Arc<dyn FieldExtractor>,
    classifier: StatementClassifier,
    resolver: CompanyResolver,
    archives: ArchiveExpander,
    clock: Arc<dyn Clock>,
}

impl EmailProcessor {
    pub fn new(
        config: StmtflowConfig,
        ledger: Ledger,
        store: Arc<dyn DocumentStore>,
        parsing: Arc<dyn ParsingService>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        let text = TextExtractor::new(config.detection.clone());
        let classifier = StatementClassifier::new(text.clone());
        let resolver = CompanyResolver::new(extractor.clone(), text).with_config(&config.resolver);
        let parser = ParseDriver::new(parsing, PollPolicy::from_config(&config.parsing));

        Self {
            config,
            ledger,
            store,
            parser,
            extractor,
            classifier,
            resolver,
            archives: ArchiveExpander::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `text` (typically carrying an OCR backend) for classification and
    /// company resolution.
    pub fn with_text_extractor(mut self, text: TextExtractor) -> Self {
        self.classifier = StatementClassifier::new(text.clone());
        self.resolver =
            CompanyResolver::new(self.extractor.clone(), text).with_config(&self.config.resolver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Fetch new mail and process every message in arrival order.
    pub async fn run_cycle(&self, source: &dyn MailSource) -> Result<Vec<EmailReport>, ServiceError> {
        let emails = source.fetch_new().await?;
        info!("Fetched {} new email(s)", emails.len());

        let mut reports = Vec::with_capacity(emails.len());
        for email in &emails {
            reports.push(self.process_email(email).await);
        }
        Ok(reports)
    }

    /// Process one email. Per-file failures are recorded, never returned.
    pub async fn process_email(&self, email: &EmailRecord) -> EmailReport {
        let mut report = EmailReport::default();
        if email.attachments.is_empty() {
            debug!("Email {} has no attachments", email.ledger_id());
            return report;
        }

        info!(
            "Processing email {} from {} ({} attachment(s))",
            email.ledger_id(),
            email.sender,
            email.attachments.len()
        );

        let mut ctx = ProcessingContext::default();
        let scan = self.pre_scan(email, &mut report);
        info!(
            "Pre-scan: {} statement(s), {} other file(s)",
            scan.statements.len(),
            scan.others.len()
        );

        for candidate in scan.statements {
            self.handle_candidate(&mut ctx, email, candidate, &mut report).await;
        }
        for candidate in scan.others {
            self.handle_candidate(&mut ctx, email, candidate, &mut report).await;
        }

        self.upload_summary(&mut ctx, email).await;
        report
    }

    /// Hash, de-duplicate, expand and classify every attachment.
    fn pre_scan(&self, email: &EmailRecord, report: &mut EmailReport) -> PreScan {
        let mut scan = PreScan::default();
        let mut seen = HashSet::new();

        for attachment in &email.attachments {
            let path = &attachment.local_temp_path;
            let name = &safe_file_name(&attachment.original_filename);
            let scratch = ScratchFile(path.clone());

            let Some(hash) = self.unseen_hash(email, path, name, &mut seen, report) else {
                continue;
            };

            if self.archives.is_archive(path) {
                self.expand_archive(email, path, name, &hash, &mut scan, &mut seen, report);
            } else {
                self.classify_into(email, path.clone(), name.clone(), hash, scratch, &mut scan, report);
            }
        }
        scan
    }

    /// Content hash of a file not seen before, in the ledger or this email.
    fn unseen_hash(
        &self,
        email: &EmailRecord,
        path: &Path,
        name: &str,
        seen: &mut HashSet<String>,
        report: &mut EmailReport,
    ) -> Option<String> {
        match file_sha256(path) {
            Err(e) => {
                error!("Cannot hash {}: {}", name, e);
                self.record(email, name, None, Outcome::Error, Some(e.to_string()), report);
                None
            }
            Ok(hash) if seen.contains(&hash) || self.ledger.contains_hash(&hash) => {
                info!("Skipping duplicate {} ({})", name, &hash[..12.min(hash.len())]);
                self.record(email, name, Some(hash), Outcome::Duplicate, None, report);
                None
            }
            Ok(hash) => {
                seen.insert(hash.clone());
                Some(hash)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_archive(
        &self,
        email: &EmailRecord,
        path: &Path,
        name: &str,
        hash: &str,
        scan: &mut PreScan,
        seen: &mut HashSet<String>,
        report: &mut EmailReport,
    ) {
        let dir = match self.scratch_dir("expand_") {
            Ok(dir) => dir,
            Err(e) => {
                error!("Cannot create expansion directory for {}: {}", name, e);
                self.record(email, name, Some(hash.to_string()), Outcome::Error, Some(e.to_string()), report);
                return;
            }
        };

        let members = match self.archives.try_expand(path, dir.path()) {
            Ok(members) => members,
            Err(e) => {
                warn!("Archive {} is corrupt: {}", name, e);
                self.record(
                    email,
                    name,
                    Some(hash.to_string()),
                    Outcome::ArchiveError,
                    Some(e.to_string()),
                    report,
                );
                return;
            }
        };

        if members.is_empty() {
            info!("Archive {} is empty", name);
            self.record(email, name, Some(hash.to_string()), Outcome::EmptyArchive, None, report);
            return;
        }

        let supported = self.archives.filter_supported(members);
        if supported.is_empty() {
            info!("Archive {} holds no supported files", name);
            self.record(email, name, Some(hash.to_string()), Outcome::NoSupportedFiles, None, report);
            return;
        }

        let catalog: Vec<String> = supported
            .iter()
            .filter_map(|p| p.strip_prefix(dir.path()).ok())
            .map(|p| p.display().to_string())
            .collect();
        info!("Archive {} contents: {}", name, catalog.join(", "));
        self.record(email, name, Some(hash.to_string()), Outcome::ArchiveProcessed, None, report);

        for member in supported {
            let member_name = member
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.to_string());
            let scratch = ScratchFile(member.clone());
            if let Some(member_hash) = self.unseen_hash(email, &member, &member_name, seen, report) {
                self.classify_into(email, member, member_name, member_hash, scratch, scan, report);
            }
        }
        scan.expansions.push(dir);
    }

    #[allow(clippy::too_many_arguments)]
    fn classify_into(
        &self,
        email: &EmailRecord,
        path: PathBuf,
        display_name: String,
        hash: String,
        scratch: ScratchFile,
        scan: &mut PreScan,
        report: &mut EmailReport,
    ) {
        let result = match self.classifier.detect_file(&path, &display_name) {
            Ok(result) => result,
            Err(e) => {
                error!("Cannot read {} for classification: {}", display_name, e);
                self.record(email, &display_name, Some(hash), Outcome::Error, Some(e.to_string()), report);
                return;
            }
        };

        info!(
            "{}: bank statement = {}, name guess = {}",
            display_name, result.is_bank_statement, result.extracted_name
        );
        let candidate = Candidate {
            path,
            display_name,
            hash,
            is_statement: result.is_bank_statement,
            _scratch: scratch,
        };
        if candidate.is_statement {
            scan.statements.push(candidate);
        } else {
            scan.others.push(candidate);
        }
    }

    async fn handle_candidate(
        &self,
        ctx: &mut ProcessingContext,
        email: &EmailRecord,
        candidate: Candidate,
        report: &mut EmailReport,
    ) {
        let disposition = match self.file_candidate(ctx, email, &candidate).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!("Unexpected error while processing {}: {:?}", candidate.display_name, e);
                Disposition::new(candidate.display_name.clone(), Outcome::Error).with_error(e.to_string())
            }
        };

        self.record(
            email,
            &disposition.stored_name,
            Some(candidate.hash.clone()),
            disposition.outcome,
            disposition.error,
            report,
        );
    }

    /// Resolve the destination, upload, parse and annotate one file.
    async fn file_candidate(
        &self,
        ctx: &mut ProcessingContext,
        email: &EmailRecord,
        candidate: &Candidate,
    ) -> Result<Disposition, StmtflowError> {
        let mut remote = RemoteTrace::default();

        let folder = if candidate.is_statement {
            let company = match ctx.resolved_company_name.clone() {
                Some(company) => company,
                None => match self.resolver.resolve(&candidate.path, &candidate.display_name).await {
                    Some(company) => {
                        ctx.resolved_company_name = Some(company.clone());
                        company
                    }
                    None => {
                        error!("No company resolved for {}, not filing it", candidate.display_name);
                        return Ok(Disposition::new(
                            candidate.display_name.clone(),
                            Outcome::CompanyExtractionFailed,
                        )
                        .with_error("company name could not be resolved"));
                    }
                },
            };
            let folder = self.company_folder(ctx, &company).await?;
            remote.company = Some(company);
            folder
        } else {
            match &ctx.destination_folder {
                Some(folder) => folder.clone(),
                None => self.non_bank_folder(),
            }
        };

        let stored_name = self.ledger.next_unique_name(&candidate.display_name);
        let work = self.scratch_dir("work_")?;
        let working_path = work.path().join(&stored_name);
        std::fs::copy(&candidate.path, &working_path)?;

        let target = format!("{}/{}", folder, self.config.folders.dataroom);
        let receipt = match self.upload_with_retry(&working_path, &target).await {
            Ok(receipt) => receipt,
            Err(e) => {
                error!("Upload of {} to {} failed: {}", stored_name, target, e);
                return Ok(Disposition::new(stored_name, Outcome::UploadFailed).with_error(e.to_string()));
            }
        };
        ctx.uploads += 1;
        info!("Uploaded {} to {}", stored_name, target);

        let outcome = if !candidate.is_statement {
            Outcome::NotBankStatement
        } else if !self.config.parsing.enabled {
            Outcome::Success
        } else {
            self.parse_remote(&working_path, &mut remote).await
        };

        self.update_metadata(email, candidate, &receipt, outcome, &remote).await;

        let mut disposition = Disposition::new(stored_name, outcome);
        disposition.error = remote.error;
        Ok(disposition)
    }

    async fn parse_remote(&self, path: &Path, remote: &mut RemoteTrace) -> Outcome {
        let company = remote.company.clone().unwrap_or_default();
        let user_key = remote_user_key(&self.config.parsing.user_prefix, &company);

        let user_id = match self.parser.service().ensure_user(&user_key, &company).await {
            Ok(user_id) => user_id,
            Err(e) => {
                error!("Cannot provision parsing user {}: {}", user_key, e);
                remote.error = Some(e.to_string());
                return Outcome::ParseServiceError;
            }
        };
        remote.user_id = Some(user_id.clone());

        let run = match self.parser.upload_and_parse(&user_id, path).await {
            Ok(run) => run,
            Err(e) => {
                error!("Parsing service upload failed for {}: {}", user_id, e);
                remote.error = Some(e.to_string());
                return Outcome::ParseServiceError;
            }
        };
        remote.parse_id = run.remote_file_id.clone();

        match run.outcome {
            PollOutcome::Completed => match self.parser.service().get_results(&user_id).await {
                Ok(Some(results)) => {
                    info!("Parsed {} transaction(s) for {}", results.transaction_count(), company);
                    remote.parsed_at = Some(self.clock.now().to_rfc3339());
                    Outcome::Parsed
                }
                Ok(None) => {
                    warn!("Parsing completed but no results for {}", user_id);
                    remote.error = Some("parsing service returned no results".to_string());
                    Outcome::ParseRetrievalFailed
                }
                Err(e) => {
                    warn!("Fetching results for {} failed: {}", user_id, e);
                    remote.error = Some(e.to_string());
                    Outcome::ParseRetrievalFailed
                }
            },
            PollOutcome::Failed(status) => {
                remote.error = Some(format!("remote parse ended with status '{status}'"));
                Outcome::ParseServiceError
            }
            PollOutcome::TimedOut => {
                remote.error = Some("remote parse did not complete in time".to_string());
                Outcome::ParseTimeout
            }
        }
    }

    /// Annotate an uploaded item. Failures are logged only.
    async fn update_metadata(
        &self,
        email: &EmailRecord,
        candidate: &Candidate,
        receipt: &UploadReceipt,
        outcome: Outcome,
        remote: &RemoteTrace,
    ) {
        let mut fields = BTreeMap::new();
        fields.insert("AttachmentHash".to_string(), candidate.hash.clone());
        fields.insert("SourceEmailId".to_string(), email.ledger_id().to_string());
        fields.insert("SourceSender".to_string(), email.sender.clone());
        fields.insert("ProcessingStatus".to_string(), outcome.as_str().to_string());
        fields.insert("StoreUrl".to_string(), receipt.url.clone());
        let optional = [
            ("CompanyName", &remote.company),
            ("EndUserId", &remote.user_id),
            ("RemoteParseId", &remote.parse_id),
            ("ParsedAt", &remote.parsed_at),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                fields.insert(key.to_string(), value.clone());
            }
        }

        match self.store.update_metadata(&receipt.item_id, &fields).await {
            Ok(true) => debug!("Metadata updated for {}", receipt.item_id),
            Ok(false) => warn!("Store declined metadata for {}", receipt.item_id),
            Err(e) => warn!("Metadata update for {} failed: {}", receipt.item_id, e),
        }
    }

    /// Upload with exponential backoff between attempts.
    async fn upload_with_retry(&self, path: &Path, folder: &str) -> Result<UploadReceipt, ServiceError> {
        let attempts = self.config.upload.max_attempts.max(1);
        let mut backoff = self.config.upload_backoff();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.store.upload(path, folder).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!("Upload attempt {}/{} to {} failed: {}", attempt, attempts, folder, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        Err(last_error.unwrap_or_else(|| ServiceError::Network("upload was not attempted".to_string())))
    }

    /// `{date}_{company}`, cached for the rest of the email.
    async fn company_folder(&self, ctx: &mut ProcessingContext, company: &str) -> Result<String, ServiceError> {
        if let Some(folder) = &ctx.destination_folder {
            return Ok(folder.clone());
        }
        let base = format!("{}_{}", self.today(), sanitize_folder(company));
        let folder = self.unique_folder(&base).await?;
        info!("Destination folder for {}: {}", company, folder);
        ctx.destination_folder = Some(folder.clone());
        Ok(folder)
    }

    /// First free of `base`, `base(1)` ... `base(max)`, then a time-suffixed name.
    async fn unique_folder(&self, base: &str) -> Result<String, ServiceError> {
        if !self.store.folder_exists(base).await? {
            return Ok(base.to_string());
        }
        for n in 1..=self.config.folders.max_collision_attempts {
            let candidate = format!("{base}({n})");
            if !self.store.folder_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        let fallback = format!("{}_{}", base, self.clock.now().format("%H%M%S"));
        warn!("Folder {} exhausted its collision suffixes, using {}", base, fallback);
        Ok(fallback)
    }

    fn non_bank_folder(&self) -> String {
        format!("{}_{}", self.today(), self.config.folders.non_bank_suffix)
    }

    fn today(&self) -> String {
        let now = self.clock.now();
        let mut date = String::new();
        if write!(date, "{}", now.format(&self.config.folders.date_format)).is_err() {
            warn!(
                "Invalid folder date format '{}', using {}",
                self.config.folders.date_format, FALLBACK_DATE_FORMAT
            );
            date = now.format(FALLBACK_DATE_FORMAT).to_string();
        }
        date
    }

    /// Upload the email summary once, if anything of the email was filed.
    async fn upload_summary(&self, ctx: &mut ProcessingContext, email: &EmailRecord) {
        if ctx.summary_uploaded || ctx.uploads == 0 {
            return;
        }

        let folder = ctx
            .destination_folder
            .clone()
            .unwrap_or_else(|| self.non_bank_folder());
        let target = format!("{}/{}", folder, self.config.folders.summary);

        let dir = match self.scratch_dir("summary_") {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Cannot create summary directory: {}", e);
                return;
            }
        };
        let path = match write_email_summary(email, dir.path(), self.clock.now()) {
            Ok(path) => path,
            Err(e) => {
                warn!("Could not render summary for {}: {}", email.ledger_id(), e);
                return;
            }
        };

        match self.upload_with_retry(&path, &target).await {
            Ok(_) => {
                ctx.summary_uploaded = true;
                info!("Uploaded email summary to {}", target);
            }
            Err(e) => warn!("Summary upload to {} failed: {}", target, e),
        }
    }

    fn scratch_dir(&self, prefix: &str) -> std::io::Result<TempDir> {
        let root = &self.config.storage.download_dir;
        std::fs::create_dir_all(root)?;
        tempfile::Builder::new().prefix(prefix).tempdir_in(root)
    }

    fn record(
        &self,
        email: &EmailRecord,
        file_name: &str,
        hash: Option<String>,
        outcome: Outcome,
        error: Option<String>,
        report: &mut EmailReport,
    ) {
        let mut entry = LedgerEntry::new(email.ledger_id(), file_name, hash, outcome);
        entry.timestamp = self.clock.now();
        if let Some(error) = error {
            entry = entry.with_error(error);
        }
        if let Err(e) = self.ledger.record(entry) {
            error!("Failed to record {} for {}: {}", outcome, file_name, e);
        }
        report.files.push(FileReport {
            file_name: file_name.to_string(),
            outcome,
        });
    }
}

/// Replace characters document stores reject in folder names.
pub fn sanitize_folder(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Reduce a sender-supplied attachment name to one plain path component.
pub fn safe_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let clean: String = base
        .chars()
        .map(|c| if c.is_control() || c == ':' { '_' } else { c })
        .collect();
    let clean = clean.trim();
    if clean.is_empty() || clean == "." || clean == ".." {
        "attachment".to_string()
    } else {
        clean.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attachment, CompanyFields, ParseResults};
    use crate::pdf::TextPdfWriter;
    use crate::services::FixedClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        existing: Mutex<HashSet<String>>,
        uploads: Mutex<Vec<(String, String)>>,
        metadata: Mutex<Vec<BTreeMap<String, String>>>,
        offline: bool,
    }

    impl MemoryStore {
        fn with_existing(folders: &[&str]) -> Self {
            Self {
                existing: Mutex::new(folders.iter().map(|f| f.to_string()).collect()),
                ..Default::default()
            }
        }

        fn uploads(&self) -> Vec<(String, String)> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn folder_exists(&self, folder_path: &str) -> Result<bool, ServiceError> {
            Ok(self.existing.lock().unwrap().contains(folder_path))
        }

        async fn upload(&self, local_path: &Path, folder_path: &str) -> Result<UploadReceipt, ServiceError> {
            if self.offline {
                return Err(ServiceError::Network("store offline".to_string()));
            }
            assert!(local_path.exists(), "uploaded file must exist locally");
            let name = local_path.file_name().unwrap().to_string_lossy().into_owned();
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push((folder_path.to_string(), name.clone()));
            Ok(UploadReceipt {
                store_id: "store".to_string(),
                drive_id: "drive".to_string(),
                item_id: format!("item-{}", uploads.len()),
                url: format!("mem://{folder_path}/{name}"),
            })
        }

        async fn update_metadata(
            &self,
            _item_id: &str,
            fields: &BTreeMap<String, String>,
        ) -> Result<bool, ServiceError> {
            self.metadata.lock().unwrap().push(fields.clone());
            Ok(true)
        }
    }

    struct MockParser {
        status: &'static str,
        results: Option<ParseResults>,
        users: Mutex<Vec<String>>,
        uploads: Mutex<u32>,
    }

    impl MockParser {
        fn new(status: &'static str, results: Option<ParseResults>) -> Self {
            Self {
                status,
                results,
                users: Mutex::new(Vec::new()),
                uploads: Mutex::new(0),
            }
        }

        fn completing() -> Self {
            Self::new("completed", Some(ParseResults::default()))
        }

        fn upload_count(&self) -> u32 {
            *self.uploads.lock().unwrap()
        }
    }

    #[async_trait]
    impl ParsingService for MockParser {
        async fn ensure_user(&self, user_key: &str, _display_name: &str) -> Result<String, ServiceError> {
            self.users.lock().unwrap().push(user_key.to_string());
            Ok(user_key.to_string())
        }

        async fn upload_document(&self, _user_id: &str, _path: &Path) -> Result<String, ServiceError> {
            let mut uploads = self.uploads.lock().unwrap();
            *uploads += 1;
            Ok(format!("remote-{}", uploads))
        }

        async fn trigger_parse(&self, _user_id: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn file_statuses(&self, _user_id: &str) -> Result<Vec<String>, ServiceError> {
            Ok(vec![self.status.to_string()])
        }

        async fn get_results(&self, _user_id: &str) -> Result<Option<ParseResults>, ServiceError> {
            Ok(self.results.clone())
        }
    }

    struct FixedOwner(Option<&'static str>);

    #[async_trait]
    impl FieldExtractor for FixedOwner {
        async fn extract(&self, _text: &str) -> Result<Option<CompanyFields>, ServiceError> {
            Ok(Some(CompanyFields {
                owner: self.0.map(str::to_string),
                bank_name: Some("KeyBank".to_string()),
                address: None,
            }))
        }
    }

    struct Harness {
        dir: TempDir,
        store: Arc<MemoryStore>,
        parser: Arc<MockParser>,
        processor: EmailProcessor,
    }

    impl Harness {
        fn new(store: MemoryStore, parser: MockParser, owner: Option<&'static str>) -> Self {
            Self::with_config(store, parser, owner, |_| {})
        }

        fn with_config(
            store: MemoryStore,
            parser: MockParser,
            owner: Option<&'static str>,
            adjust: impl FnOnce(&mut StmtflowConfig),
        ) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = StmtflowConfig::default();
            config.storage.download_dir = dir.path().join("downloads");
            config.storage.ledger_path = dir.path().join("ledger.json");
            config.upload.initial_backoff_secs = 0;
            config.resolver.retry_delay_secs = 0;
            config.parsing.poll_interval_secs = 0;
            config.parsing.max_polls = 3;
            adjust(&mut config);

            let store = Arc::new(store);
            let parser = Arc::new(parser);
            let ledger = Ledger::open(&config.storage.ledger_path).unwrap();
            let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
            let processor = EmailProcessor::new(
                config,
                ledger,
                store.clone(),
                parser.clone(),
                Arc::new(FixedOwner(owner)),
            )
            .with_clock(Arc::new(clock));

            Self {
                dir,
                store,
                parser,
                processor,
            }
        }

        fn attach(&self, name: &str, bytes: &[u8]) -> Attachment {
            let incoming = self.dir.path().join("incoming");
            std::fs::create_dir_all(&incoming).unwrap();
            let path = incoming.join(name);
            std::fs::write(&path, bytes).unwrap();
            Attachment::new(path, name)
        }

        fn leftovers(&self) -> usize {
            ["incoming", "downloads"]
                .iter()
                .map(|d| self.dir.path().join(d))
                .filter(|d| d.exists())
                .map(|d| std::fs::read_dir(d).unwrap().count())
                .sum()
        }
    }

    fn email(attachments: Vec<Attachment>) -> EmailRecord {
        EmailRecord {
            id: "<m1@example.com>".to_string(),
            sender: "cfo@acme.example".to_string(),
            recipients: vec!["docs@example.com".to_string()],
            subject: "January statements".to_string(),
            date: "Mon, 15 Jan 2024 10:00:00 +0000".to_string(),
            body: "Statements attached.".to_string(),
            attachments,
        }
    }

    fn statement_pdf() -> Vec<u8> {
        let mut writer = TextPdfWriter::new();
        for line in [
            "ACME CORP",
            "1 Harbour Road, Springfield",
            "Monthly Statement",
            "Checking Account 000123",
            "Beginning Balance 1,000.00",
            "Ending Balance 1,250.00",
        ] {
            writer.push_line(line);
        }
        writer.finish().unwrap()
    }

    fn zip_of(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in members {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    const NOTES_CSV: &[u8] = b"item,qty\nwidgets,4\n";

    #[tokio::test]
    async fn test_statement_is_filed_and_parsed() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
        let attachment = h.attach("doc1.pdf", &statement_pdf());
        let temp_path = attachment.local_temp_path.clone();

        let report = h.processor.process_email(&email(vec![attachment])).await;

        assert_eq!(report.outcomes(), vec![Outcome::Parsed]);
        let uploads = h.store.uploads();
        assert_eq!(
            uploads[0],
            ("2024.01.15_Acme Corp/Dataroom".to_string(), "doc1.pdf".to_string())
        );
        assert_eq!(uploads[1].0, "2024.01.15_Acme Corp/summary_mail");
        assert_eq!(uploads.len(), 2);
        assert_eq!(h.parser.users.lock().unwrap().clone(), vec!["ene_ACMECORP".to_string()]);

        let entries = h.processor.ledger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, Outcome::Parsed);
        assert_eq!(entries[0].file_name, "doc1.pdf");
        assert_eq!(entries[0].message_id, "<m1@example.com>");

        let metadata = h.store.metadata.lock().unwrap().clone();
        assert_eq!(metadata[0]["ProcessingStatus"], "Parsed");
        assert_eq!(metadata[0]["CompanyName"], "Acme Corp");
        assert_eq!(metadata[0]["RemoteParseId"], "remote-1");

        assert!(!temp_path.exists());
        assert_eq!(h.leftovers(), 0);
    }

    #[tokio::test]
    async fn test_known_hash_is_not_reprocessed() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
        let first = h.attach("doc1.pdf", &statement_pdf());
        h.processor.process_email(&email(vec![first])).await;
        let uploads_before = h.store.uploads().len();

        let again = h.attach("copy of doc1.pdf", &statement_pdf());
        let report = h.processor.process_email(&email(vec![again])).await;

        assert_eq!(report.outcomes(), vec![Outcome::Duplicate]);
        assert_eq!(h.store.uploads().len(), uploads_before);
        assert_eq!(h.parser.upload_count(), 1);
        assert_eq!(h.leftovers(), 0);
    }

    #[tokio::test]
    async fn test_same_file_twice_in_one_email() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
        let a = h.attach("notes.csv", NOTES_CSV);
        let b = h.attach("notes-copy.csv", NOTES_CSV);

        let report = h.processor.process_email(&email(vec![a, b])).await;
        assert_eq!(report.outcomes(), vec![Outcome::Duplicate, Outcome::NotBankStatement]);
    }

    #[tokio::test]
    async fn test_folder_collision_appends_counter() {
        let store = MemoryStore::with_existing(&["2024.01.15_Acme Corp"]);
        let h = Harness::new(store, MockParser::completing(), Some("Acme Corp"));
        let attachment = h.attach("doc1.pdf", &statement_pdf());

        h.processor.process_email(&email(vec![attachment])).await;
        assert_eq!(h.store.uploads()[0].0, "2024.01.15_Acme Corp(1)/Dataroom");
    }

    #[tokio::test]
    async fn test_folder_collision_fallback_is_timestamped() {
        let store = MemoryStore::with_existing(&["2024.01.15_Acme", "2024.01.15_Acme(1)", "2024.01.15_Acme(2)"]);
        let h = Harness::with_config(store, MockParser::completing(), Some("Acme"), |c| {
            c.folders.max_collision_attempts = 2;
        });
        let folder = h.processor.unique_folder("2024.01.15_Acme").await.unwrap();
        assert_eq!(folder, "2024.01.15_Acme_120000");
    }

    #[tokio::test]
    async fn test_statements_first_and_supporting_files_colocated() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
        let notes = h.attach("notes.csv", NOTES_CSV);
        let statement = h.attach("doc1.pdf", &statement_pdf());

        let report = h.processor.process_email(&email(vec![notes, statement])).await;

        assert_eq!(report.outcomes(), vec![Outcome::Parsed, Outcome::NotBankStatement]);
        let folders: Vec<String> = h.store.uploads().into_iter().map(|(f, _)| f).collect();
        assert_eq!(
            folders,
            vec![
                "2024.01.15_Acme Corp/Dataroom".to_string(),
                "2024.01.15_Acme Corp/Dataroom".to_string(),
                "2024.01.15_Acme Corp/summary_mail".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unresolved_company_stops_only_that_file() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), None);
        let statement = h.attach("doc1.pdf", &statement_pdf());
        let notes = h.attach("notes.csv", NOTES_CSV);

        let report = h.processor.process_email(&email(vec![statement, notes])).await;

        assert_eq!(
            report.outcomes(),
            vec![Outcome::CompanyExtractionFailed, Outcome::NotBankStatement]
        );
        let uploads = h.store.uploads();
        assert_eq!(uploads[0], ("2024.01.15_non_bank/Dataroom".to_string(), "notes.csv".to_string()));
        assert_eq!(uploads[1].0, "2024.01.15_non_bank/summary_mail");
        assert_eq!(h.parser.upload_count(), 0);
        assert_eq!(h.leftovers(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_is_recorded() {
        let store = MemoryStore {
            offline: true,
            ..Default::default()
        };
        let h = Harness::new(store, MockParser::completing(), Some("Acme Corp"));
        let attachment = h.attach("doc1.pdf", &statement_pdf());

        let report = h.processor.process_email(&email(vec![attachment])).await;

        assert_eq!(report.outcomes(), vec![Outcome::UploadFailed]);
        let entries = h.processor.ledger().entries();
        assert_eq!(entries[0].error.as_deref(), Some("network error: store offline"));
        assert_eq!(h.parser.upload_count(), 0);
        assert_eq!(h.leftovers(), 0);
    }

    #[tokio::test]
    async fn test_remote_parse_failures_map_to_outcomes() {
        let cases = [
            (MockParser::new("rejected", None), Outcome::ParseServiceError),
            (MockParser::new("processing", None), Outcome::ParseTimeout),
            (MockParser::new("completed", None), Outcome::ParseRetrievalFailed),
        ];
        for (parser, expected) in cases {
            let h = Harness::new(MemoryStore::default(), parser, Some("Acme Corp"));
            let attachment = h.attach("doc1.pdf", &statement_pdf());
            let report = h.processor.process_email(&email(vec![attachment])).await;
            assert_eq!(report.outcomes(), vec![expected]);
            assert!(h.processor.ledger().entries()[0].error.is_some());
        }
    }

    #[tokio::test]
    async fn test_parsing_disabled_finishes_as_success() {
        let h = Harness::with_config(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"), |c| {
            c.parsing.enabled = false;
        });
        let attachment = h.attach("doc1.pdf", &statement_pdf());

        let report = h.processor.process_email(&email(vec![attachment])).await;
        assert_eq!(report.outcomes(), vec![Outcome::Success]);
        assert_eq!(h.parser.upload_count(), 0);
    }

    #[tokio::test]
    async fn test_archive_members_are_filed() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
        let archive = zip_of(&[
            ("notes.csv", NOTES_CSV),
            ("__MACOSX/._notes.csv", b"fork"),
            (".DS_Store", b"index"),
            ("readme.txt", b"hello"),
        ]);
        let attachment = h.attach("bundle.zip", &archive);

        let report = h.processor.process_email(&email(vec![attachment])).await;

        assert_eq!(
            report.outcomes(),
            vec![Outcome::ArchiveProcessed, Outcome::NotBankStatement]
        );
        assert_eq!(
            h.store.uploads()[0],
            ("2024.01.15_non_bank/Dataroom".to_string(), "notes.csv".to_string())
        );
        assert_eq!(h.leftovers(), 0);
    }

    #[tokio::test]
    async fn test_archive_failure_outcomes() {
        let empty = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()))
            .finish()
            .unwrap()
            .into_inner();
        let cases: [(&str, Vec<u8>, Outcome); 3] = [
            ("empty.zip", empty, Outcome::EmptyArchive),
            ("text.zip", zip_of(&[("readme.txt", b"hello")]), Outcome::NoSupportedFiles),
            ("broken.zip", b"PK\x03\x04 definitely not a zip".to_vec(), Outcome::ArchiveError),
        ];

        for (name, bytes, expected) in cases {
            let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
            let attachment = h.attach(name, &bytes);
            let report = h.processor.process_email(&email(vec![attachment])).await;
            assert_eq!(report.outcomes(), vec![expected], "{name}");
            assert!(h.store.uploads().is_empty());
            assert_eq!(h.leftovers(), 0);
        }
    }

    #[tokio::test]
    async fn test_email_without_attachments_is_noop() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
        let report = h.processor.process_email(&email(Vec::new())).await;
        assert!(report.files.is_empty());
        assert!(h.processor.ledger().entries().is_empty());
    }

    #[tokio::test]
    async fn test_attachment_names_cannot_leave_scratch_dir() {
        let h = Harness::new(MemoryStore::default(), MockParser::completing(), Some("Acme Corp"));
        let mut relative = h.attach("one.csv", NOTES_CSV);
        relative.original_filename = "../escaped.csv".to_string();
        let mut absolute = h.attach("two.csv", b"item,qty\nbolts,9\n");
        let outside = h.dir.path().join("outside").join("abs.csv");
        absolute.original_filename = outside.display().to_string();

        let report = h.processor.process_email(&email(vec![relative, absolute])).await;

        assert_eq!(report.outcomes(), vec![Outcome::NotBankStatement, Outcome::NotBankStatement]);
        let names: Vec<String> = h.store.uploads().into_iter().take(2).map(|(_, n)| n).collect();
        assert_eq!(names, vec!["escaped.csv".to_string(), "abs.csv".to_string()]);
        assert!(!h.dir.path().join("downloads").join("escaped.csv").exists());
        assert!(!outside.exists());
        assert_eq!(h.leftovers(), 0);
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("C:\\scans\\jan.pdf"), "jan.pdf");
        assert_eq!(safe_file_name("a:b.pdf"), "a_b.pdf");
        assert_eq!(safe_file_name(".."), "attachment");
        assert_eq!(safe_file_name("dir/"), "attachment");
        assert_eq!(safe_file_name("Statement Jan.pdf"), "Statement Jan.pdf");
    }

    #[test]
    fn test_sanitize_folder() {
        assert_eq!(sanitize_folder(" Acme/Beta: \"Holdings\" "), "Acme_Beta_ _Holdings_");
        assert_eq!(sanitize_folder("Acme Corp"), "Acme Corp");
    }
}
