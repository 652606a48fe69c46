//! Upload, trigger and poll a remote statement parse to completion.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::models::config::ParsingConfig;
use crate::services::ParsingService;

const SUCCESS_STATES: &[&str] = &["transactions_loaded", "parsed", "completed"];
const PENDING_STATES: &[&str] = &["new", "processing", "parsing", "human_reviewing"];
const FAILURE_STATES: &[&str] = &["failed", "error", "rejected"];

/// Earliest pending state; files that never leave it are stuck at intake.
const INTAKE_STATE: &str = "new";

/// Coarse meaning of a raw remote status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    Success,
    Pending,
    Failure,
    Unknown,
}

impl StatusBucket {
    /// Bucket a raw status string (case-insensitive).
    pub fn classify(status: &str) -> Self {
        let status = status.trim().to_lowercase();
        if SUCCESS_STATES.contains(&status.as_str()) {
            StatusBucket::Success
        } else if PENDING_STATES.contains(&status.as_str()) {
            StatusBucket::Pending
        } else if FAILURE_STATES.contains(&status.as_str()) {
            StatusBucket::Failure
        } else {
            StatusBucket::Unknown
        }
    }
}

/// How a poll cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    /// The service reported a failure status.
    Failed(String),
    /// Attempts or the overall deadline ran out while still pending.
    TimedOut,
}

/// Polling cadence and limits.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub overall_timeout: Duration,
    pub reupload_when_stuck: bool,
}

impl PollPolicy {
    pub fn from_config(config: &ParsingConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            max_attempts: config.max_polls.max(1),
            overall_timeout: Duration::from_secs(config.overall_timeout_secs),
            reupload_when_stuck: config.reupload_when_stuck,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&ParsingConfig::default())
    }
}

/// Result of [`ParseDriver::upload_and_parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRun {
    pub outcome: PollOutcome,
    pub remote_file_id: Option<String>,
}

impl ParseRun {
    pub fn succeeded(&self) -> bool {
        self.outcome == PollOutcome::Completed
    }
}

/// Drives one document through the parsing service.
#[derive(Clone)]
pub struct ParseDriver {
    service: Arc<dyn ParsingService>,
    policy: PollPolicy,
}

impl ParseDriver {
    pub fn new(service: Arc<dyn ParsingService>, policy: PollPolicy) -> Self {
        Self { service, policy }
    }

    pub fn service(&self) -> &Arc<dyn ParsingService> {
        &self.service
    }

    /// Upload `path`, trigger parsing and wait for a terminal status.
    ///
    /// When polling times out with every file still at intake, the document is
    /// uploaded and parsed once more before giving up.
    pub async fn upload_and_parse(&self, user_id: &str, path: &Path) -> Result<ParseRun, ServiceError> {
        let mut remote_file_id = self.service.upload_document(user_id, path).await?;
        info!("Uploaded {} for parsing as {}", path.display(), remote_file_id);

        self.trigger(user_id).await;
        let mut outcome = self.poll(user_id).await;

        if outcome == PollOutcome::TimedOut
            && self.policy.reupload_when_stuck
            && self.stuck_at_intake(user_id).await
        {
            warn!("All files for {} stuck at '{}', re-uploading", user_id, INTAKE_STATE);
            remote_file_id = self.service.upload_document(user_id, path).await?;
            self.trigger(user_id).await;
            outcome = self.poll(user_id).await;
        }

        Ok(ParseRun {
            outcome,
            remote_file_id: Some(remote_file_id),
        })
    }

    async fn trigger(&self, user_id: &str) {
        // A rejected trigger still leaves the upload queued; polling decides.
        if let Err(e) = self.service.trigger_parse(user_id).await {
            warn!("Parse trigger failed for {}: {}", user_id, e);
        }
    }

    /// Poll until a terminal status, the attempt budget or the deadline.
    pub async fn poll(&self, user_id: &str) -> PollOutcome {
        match tokio::time::timeout(self.policy.overall_timeout, self.poll_attempts(user_id)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    "Parsing for {} exceeded the {:?} deadline",
                    user_id, self.policy.overall_timeout
                );
                PollOutcome::TimedOut
            }
        }
    }

    async fn poll_attempts(&self, user_id: &str) -> PollOutcome {
        let max = self.policy.max_attempts;
        for attempt in 1..=max {
            match self.service.file_statuses(user_id).await {
                Ok(statuses) if statuses.is_empty() => {
                    warn!("Attempt {}/{}: no file statuses yet", attempt, max);
                }
                Ok(statuses) => {
                    for status in statuses {
                        debug!("Attempt {}/{}: file status = {}", attempt, max, status);
                        match StatusBucket::classify(&status) {
                            StatusBucket::Success => {
                                info!("Parsing completed ({}) for {}", status, user_id);
                                return PollOutcome::Completed;
                            }
                            StatusBucket::Failure => {
                                error!("Parsing failed ({}) for {}", status, user_id);
                                return PollOutcome::Failed(status);
                            }
                            StatusBucket::Pending | StatusBucket::Unknown => {}
                        }
                    }
                    info!("Attempt {}/{}: parsing still in progress", attempt, max);
                }
                Err(e) => warn!("Attempt {}/{}: status check failed: {}", attempt, max, e),
            }

            if attempt < max {
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        error!("Parsing for {} timed out after {} attempts", user_id, max);
        PollOutcome::TimedOut
    }

    async fn stuck_at_intake(&self, user_id: &str) -> bool {
        match self.service.file_statuses(user_id).await {
            Ok(statuses) => {
                !statuses.is_empty()
                    && statuses
                        .iter()
                        .all(|s| s.trim().eq_ignore_ascii_case(INTAKE_STATE))
            }
            Err(_) => false,
        }
    }
}

/// Remote user key: `prefix` followed by the upper-cased alphanumerics of `company`.
pub fn remote_user_key(prefix: &str, company: &str) -> String {
    let clean: String = company
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    format!("{prefix}{clean}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParseResults;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted status lists; the last one repeats forever.
    #[derive(Default)]
    struct ScriptedService {
        script: Mutex<VecDeque<Vec<String>>>,
        uploads: Mutex<u32>,
        polls: Mutex<u32>,
    }

    impl ScriptedService {
        fn new(script: &[&[&str]]) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .iter()
                        .map(|step| step.iter().map(|s| s.to_string()).collect())
                        .collect(),
                ),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ParsingService for ScriptedService {
        async fn ensure_user(&self, key: &str, _name: &str) -> Result<String, ServiceError> {
            Ok(key.to_string())
        }

        async fn upload_document(&self, _user: &str, _path: &Path) -> Result<String, ServiceError> {
            let mut uploads = self.uploads.lock().unwrap();
            *uploads += 1;
            Ok(format!("file-{}", uploads))
        }

        async fn trigger_parse(&self, _user: &str) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn file_statuses(&self, _user: &str) -> Result<Vec<String>, ServiceError> {
            *self.polls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                Ok(script.pop_front().unwrap())
            } else {
                Ok(script.front().cloned().unwrap_or_default())
            }
        }

        async fn get_results(&self, _user: &str) -> Result<Option<ParseResults>, ServiceError> {
            Ok(None)
        }
    }

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(10),
            max_attempts,
            overall_timeout: Duration::from_secs(3600),
            reupload_when_stuck: true,
        }
    }

    #[test]
    fn test_status_buckets() {
        assert_eq!(StatusBucket::classify("Transactions_Loaded"), StatusBucket::Success);
        assert_eq!(StatusBucket::classify("human_reviewing"), StatusBucket::Pending);
        assert_eq!(StatusBucket::classify("rejected"), StatusBucket::Failure);
        assert_eq!(StatusBucket::classify("archived"), StatusBucket::Unknown);
    }

    #[test]
    fn test_remote_user_key() {
        assert_eq!(remote_user_key("ene_", "Acme Corp, Ltd."), "ene_ACMECORPLTD");
        assert_eq!(remote_user_key("ene_", "Zażółć 1"), "ene_Z1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_completed() {
        let service = Arc::new(ScriptedService::new(&[&["new"], &["processing"], &["completed"]]));
        let driver = ParseDriver::new(service.clone(), policy(30));

        assert_eq!(driver.poll("u").await, PollOutcome::Completed);
        assert_eq!(*service.polls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_status_ends_polling() {
        let service = Arc::new(ScriptedService::new(&[&["parsing"], &["rejected"]]));
        let driver = ParseDriver::new(service, policy(30));
        assert_eq!(driver.poll("u").await, PollOutcome::Failed("rejected".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_time_out() {
        let service = Arc::new(ScriptedService::new(&[&["processing"]]));
        let driver = ParseDriver::new(service.clone(), policy(4));
        assert_eq!(driver.poll("u").await, PollOutcome::TimedOut);
        assert_eq!(*service.polls.lock().unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline() {
        let service = Arc::new(ScriptedService::new(&[&["processing"]]));
        let mut policy = policy(1000);
        policy.overall_timeout = Duration::from_secs(35);
        let driver = ParseDriver::new(service.clone(), policy);

        assert_eq!(driver.poll("u").await, PollOutcome::TimedOut);
        assert!(*service.polls.lock().unwrap() <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reupload_once_when_stuck_at_intake() {
        // Two polls stuck at "new", one stuck check, then the retry succeeds.
        let service = Arc::new(ScriptedService::new(&[&["new"], &["new"], &["new"], &["completed"]]));
        let driver = ParseDriver::new(service.clone(), policy(2));

        let run = driver.upload_and_parse("u", Path::new("a.pdf")).await.unwrap();
        assert!(run.succeeded());
        assert_eq!(run.remote_file_id.as_deref(), Some("file-2"));
        assert_eq!(*service.uploads.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reupload_when_processing() {
        let service = Arc::new(ScriptedService::new(&[&["processing"]]));
        let driver = ParseDriver::new(service.clone(), policy(2));

        let run = driver.upload_and_parse("u", Path::new("a.pdf")).await.unwrap();
        assert_eq!(run.outcome, PollOutcome::TimedOut);
        assert_eq!(*service.uploads.lock().unwrap(), 1);
    }
}
