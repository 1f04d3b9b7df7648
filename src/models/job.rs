use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::QueueError;
use crate::progress::extract_progress;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    #[default]
    Copy,
    Symlink,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Copy => write!(f, "copy"),
            InstallMode::Symlink => write!(f, "symlink"),
        }
    }
}

impl std::str::FromStr for InstallMode {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "copy" => Ok(InstallMode::Copy),
            "symlink" | "link" => Ok(InstallMode::Symlink),
            other => Err(QueueError::Validation(format!(
                "Unknown install mode '{}' (expected copy or symlink)",
                other
            ))),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both parts must be present for an authenticated login.
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Catalog details supplied at submission, used only to enrich the persisted record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Remote last-update time (unix seconds) as known when the job was submitted.
    #[serde(default)]
    pub time_updated: Option<i64>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub app_id: String,
    pub content_item_id: String,
    pub profile_id: String,
    /// Empty means "use the daemon's configured tool".
    #[serde(default)]
    pub tool_path: String,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub install_mode: InstallMode,
    pub install_destination: String,
    #[serde(default)]
    pub metadata: JobMetadata,
}

/// Reject requests with missing required fields. Nothing is defaulted here.
pub fn validate_request(request: &JobRequest) -> Result<(), QueueError> {
    let required = [
        ("app_id", &request.app_id),
        ("content_item_id", &request.content_item_id),
        ("profile_id", &request.profile_id),
        ("tool_path", &request.tool_path),
        ("install_destination", &request.install_destination),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(QueueError::Validation(format!("{} is required", field)));
        }
    }

    Ok(())
}

/// Working directory for the tool: the explicit one, else the directory holding the binary.
pub fn resolve_working_dir(tool_path: &str, working_dir: Option<&str>) -> PathBuf {
    if let Some(dir) = working_dir.map(str::trim).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    match Path::new(tool_path.trim()).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// One download+install attempt. Owned and mutated only by the scheduler task.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub app_id: String,
    pub content_item_id: String,
    pub profile_id: String,
    pub tool_path: PathBuf,
    pub working_dir: PathBuf,
    pub credentials: Option<Credentials>,
    pub install_mode: InstallMode,
    pub install_destination: PathBuf,
    pub metadata: JobMetadata,
    pub status: JobStatus,
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub installed_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a queued job from a request. The request must already be validated.
    pub fn from_request(request: JobRequest, now: DateTime<Utc>) -> Self {
        let working_dir = resolve_working_dir(&request.tool_path, request.working_dir.as_deref());
        Self {
            id: Uuid::now_v7(),
            app_id: request.app_id.trim().to_string(),
            content_item_id: request.content_item_id.trim().to_string(),
            profile_id: request.profile_id.trim().to_string(),
            tool_path: PathBuf::from(request.tool_path.trim()),
            working_dir,
            credentials: request.credentials.filter(Credentials::is_complete),
            install_mode: request.install_mode,
            install_destination: PathBuf::from(request.install_destination.trim()),
            metadata: request.metadata,
            status: JobStatus::Queued,
            progress: 0.0,
            logs: Vec::new(),
            error: None,
            exit_code: None,
            installed_path: None,
            created_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition(format!(
                "job {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Append a tool output line while running. Progress only moves forward and
    /// lines without a percentage leave it untouched. Returns false when ignored.
    pub fn append_log(&mut self, entry: LogEntry) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        if let Some(pct) = extract_progress(&entry.message) {
            if pct > self.progress {
                self.progress = pct;
            }
        }
        self.logs.push(entry);
        true
    }

    /// Record the exit code and any runner-side entries this job never received.
    pub fn record_exit(&mut self, code: i32, runner_logs: &[LogEntry]) {
        if self.status != JobStatus::Running {
            return;
        }
        self.exit_code = Some(code);
        if runner_logs.len() > self.logs.len() {
            let missing = runner_logs[self.logs.len()..].to_vec();
            self.logs.extend(missing);
        }
    }

    /// Error text for a non-zero exit: the last non-empty log line, else a generic message.
    pub fn exit_failure_message(&self, code: i32) -> String {
        self.logs
            .iter()
            .rev()
            .map(|entry| entry.message.trim())
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("tool exited with code {}", code))
    }

    pub fn complete(
        &mut self,
        installed_path: String,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100.0;
        self.installed_path = Some(installed_path);
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: String, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(message);
        self.finished_at = Some(now);
        Ok(())
    }

    /// Cancel a queued or running job. Returns Ok(false) for a job that is already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<bool, QueueError> {
        if self.is_terminal() {
            return Ok(false);
        }
        self.transition(JobStatus::Cancelled)?;
        self.finished_at = Some(now);
        Ok(true)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            app_id: self.app_id.clone(),
            content_item_id: self.content_item_id.clone(),
            profile_id: self.profile_id.clone(),
            status: self.status,
            progress: self.progress,
            logs: self.logs.clone(),
            error: self.error.clone(),
            exit_code: self.exit_code,
            installed_path: self.installed_path.clone(),
            install_mode: self.install_mode,
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only copy of a job, safe to hand to observers. Carries no process handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub app_id: String,
    pub content_item_id: String,
    pub profile_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub installed_path: Option<String>,
    pub install_mode: InstallMode,
    #[serde(default)]
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
