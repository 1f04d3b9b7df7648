use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{InstallMode, JobMetadata};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Queued,
    Downloading,
    Installed,
    Failed,
    Cancelled,
    Uninstalled,
    Disabled,
    UpdateAvailable,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordStatus::Queued => "queued",
            RecordStatus::Downloading => "downloading",
            RecordStatus::Installed => "installed",
            RecordStatus::Failed => "failed",
            RecordStatus::Cancelled => "cancelled",
            RecordStatus::Uninstalled => "uninstalled",
            RecordStatus::Disabled => "disabled",
            RecordStatus::UpdateAvailable => "update_available",
        };
        f.write_str(label)
    }
}

/// Durable entry for one (content item, profile) pair.
///
/// Keys unknown to this crate are kept in `extra` and written back untouched,
/// since other tools share the same file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub content_item_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub workshop_url: Option<String>,
    #[serde(default)]
    pub install_mode: Option<InstallMode>,
    #[serde(default)]
    pub last_known_update_at: Option<i64>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    pub status: RecordStatus,
    #[serde(default)]
    pub download_job_id: Option<Uuid>,
    #[serde(default)]
    pub installed_path: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub last_downloaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_uninstalled_at: Option<DateTime<Utc>>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "chrono::Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Partial update for a Record.
///
/// `None` leaves a field untouched. For nullable fields `Some(None)` clears the
/// value and `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub install_mode: Option<InstallMode>,
    pub download_job_id: Option<Option<Uuid>>,
    pub installed_path: Option<Option<String>>,
    pub source_path: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub last_known_update_at: Option<Option<i64>>,
    pub file_size_bytes: Option<Option<u64>>,
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub last_uninstalled_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    pub fn queued(job_id: Uuid) -> Self {
        Self {
            status: Some(RecordStatus::Queued),
            download_job_id: Some(Some(job_id)),
            error: Some(None),
            ..Default::default()
        }
    }

    pub fn downloading(job_id: Uuid) -> Self {
        Self {
            status: Some(RecordStatus::Downloading),
            download_job_id: Some(Some(job_id)),
            ..Default::default()
        }
    }

    /// Failure keeps whatever install is already on disk.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::Failed),
            error: Some(Some(message.into())),
            download_job_id: Some(None),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: Some(RecordStatus::Cancelled),
            download_job_id: Some(None),
            ..Default::default()
        }
    }

    pub fn uninstalled(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(RecordStatus::Uninstalled),
            installed_path: Some(None),
            source_path: Some(None),
            download_job_id: Some(None),
            last_uninstalled_at: Some(now),
            ..Default::default()
        }
    }
}

impl Record {
    pub fn new(
        content_item_id: impl Into<String>,
        profile_id: impl Into<String>,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            content_item_id: content_item_id.into(),
            profile_id: profile_id.into(),
            app_id: None,
            title: None,
            author: None,
            preview_url: None,
            workshop_url: None,
            install_mode: None,
            last_known_update_at: None,
            file_size_bytes: None,
            status,
            download_job_id: None,
            installed_path: None,
            source_path: None,
            error: None,
            last_downloaded_at: None,
            last_uninstalled_at: None,
            created_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }

    pub fn matches(&self, content_item_id: &str, profile_id: &str) -> bool {
        self.content_item_id == content_item_id && self.profile_id == profile_id
    }

    /// Catalog metadata only ever refreshes; missing values never erase known ones.
    pub fn apply_metadata(&mut self, metadata: &JobMetadata) {
        if let Some(ref title) = metadata.title {
            self.title = Some(title.clone());
        }
        if let Some(ref author) = metadata.author {
            self.author = Some(author.clone());
        }
        if let Some(ref preview_url) = metadata.preview_url {
            self.preview_url = Some(preview_url.clone());
        }
        if let Some(ref url) = metadata.url {
            self.workshop_url = Some(url.clone());
        }
    }

    pub fn apply(&mut self, update: RecordUpdate, now: DateTime<Utc>) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(install_mode) = update.install_mode {
            self.install_mode = Some(install_mode);
        }
        if let Some(download_job_id) = update.download_job_id {
            self.download_job_id = download_job_id;
        }
        if let Some(installed_path) = update.installed_path {
            self.installed_path = installed_path;
        }
        if let Some(source_path) = update.source_path {
            self.source_path = source_path;
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        if let Some(last_known_update_at) = update.last_known_update_at {
            self.last_known_update_at = last_known_update_at;
        }
        if let Some(file_size_bytes) = update.file_size_bytes {
            self.file_size_bytes = file_size_bytes;
        }
        if let Some(at) = update.last_downloaded_at {
            self.last_downloaded_at = Some(at);
        }
        if let Some(at) = update.last_uninstalled_at {
            self.last_uninstalled_at = Some(at);
        }
        self.updated_at = now;
    }
}
