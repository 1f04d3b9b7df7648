use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::errors::QueueError;
use crate::installer::ContentInstaller;
use crate::models::{Job, JobMetadata, Record, RecordStatus, RecordUpdate};
use crate::storage::RecordStore;

/// Identity and enrichment data needed to locate or create a record.
pub struct RecordKey<'a> {
    pub content_item_id: &'a str,
    pub profile_id: &'a str,
    pub app_id: Option<&'a str>,
    pub metadata: Option<&'a JobMetadata>,
}

impl<'a> RecordKey<'a> {
    pub fn for_job(job: &'a Job) -> Self {
        Self {
            content_item_id: &job.content_item_id,
            profile_id: &job.profile_id,
            app_id: Some(&job.app_id),
            metadata: Some(&job.metadata),
        }
    }

    pub fn item(content_item_id: &'a str, profile_id: &'a str) -> Self {
        Self {
            content_item_id,
            profile_id,
            app_id: None,
            metadata: None,
        }
    }
}

/// Merges status changes into the record store.
///
/// Every read-modify-write cycle runs under one store-wide lock, so two jobs
/// finishing together cannot lose each other's update.
pub struct RecordSync {
    store: Arc<dyn RecordStore>,
    installer: Arc<dyn ContentInstaller>,
    lock: Mutex<()>,
}

impl RecordSync {
    pub fn new(store: Arc<dyn RecordStore>, installer: Arc<dyn ContentInstaller>) -> Self {
        Self {
            store,
            installer,
            lock: Mutex::new(()),
        }
    }

    pub fn installer(&self) -> Arc<dyn ContentInstaller> {
        Arc::clone(&self.installer)
    }

    /// Merge `update` into the record for `key`, creating it if absent.
    pub async fn apply(&self, key: RecordKey<'_>, update: RecordUpdate) -> Result<Record> {
        let _guard = self.lock.lock().await;
        let mut records = self.store.read_all().await?;
        let now = Utc::now();

        let idx = match records
            .iter()
            .position(|r| r.matches(key.content_item_id, key.profile_id))
        {
            Some(idx) => idx,
            None => {
                let status = update.status.unwrap_or(RecordStatus::Queued);
                records.push(Record::new(
                    key.content_item_id,
                    key.profile_id,
                    status,
                    now,
                ));
                records.len() - 1
            }
        };

        let record = &mut records[idx];
        if let Some(app_id) = key.app_id {
            record.app_id = Some(app_id.to_string());
        }
        if let Some(metadata) = key.metadata {
            record.apply_metadata(metadata);
        }
        record.apply(update, now);
        let updated = record.clone();

        self.store.write_all(&records).await?;
        Ok(updated)
    }

    pub async fn list(&self, profile_id: Option<&str>) -> Result<Vec<Record>> {
        let records = self.store.read_all().await?;
        Ok(match profile_id {
            Some(profile) => records
                .into_iter()
                .filter(|r| r.profile_id == profile)
                .collect(),
            None => records,
        })
    }

    pub async fn get(&self, content_item_id: &str, profile_id: &str) -> Result<Option<Record>> {
        let records = self.store.read_all().await?;
        Ok(records
            .into_iter()
            .find(|r| r.matches(content_item_id, profile_id)))
    }

    /// Remove the installed files and mark the record uninstalled.
    pub async fn uninstall(&self, content_item_id: &str, profile_id: &str) -> Result<Record> {
        let _guard = self.lock.lock().await;
        let mut records = self.store.read_all().await?;
        let record = find_mut(&mut records, content_item_id, profile_id)?;

        if let Some(ref path) = record.installed_path {
            self.installer.remove(Path::new(path)).await?;
        }

        let now = Utc::now();
        record.apply(RecordUpdate::uninstalled(now), now);
        let updated = record.clone();
        self.store.write_all(&records).await?;

        tracing::info!("Uninstalled item {} for profile {}", content_item_id, profile_id);
        Ok(updated)
    }

    pub async fn set_enabled(
        &self,
        content_item_id: &str,
        profile_id: &str,
        enabled: bool,
    ) -> Result<Record> {
        let _guard = self.lock.lock().await;
        let mut records = self.store.read_all().await?;
        let record = find_mut(&mut records, content_item_id, profile_id)?;

        let Some(current) = record.installed_path.clone() else {
            return Err(QueueError::Validation(format!(
                "item {} is not installed for profile {}",
                content_item_id, profile_id
            ))
            .into());
        };

        let (new_path, status) = if enabled {
            (
                self.installer.enable(Path::new(&current)).await?,
                RecordStatus::Installed,
            )
        } else {
            (
                self.installer.disable(Path::new(&current)).await?,
                RecordStatus::Disabled,
            )
        };

        let now = Utc::now();
        record.apply(
            RecordUpdate {
                status: Some(status),
                installed_path: Some(Some(new_path.to_string_lossy().into_owned())),
                ..Default::default()
            },
            now,
        );
        let updated = record.clone();
        self.store.write_all(&records).await?;
        Ok(updated)
    }
}

fn find_mut<'a>(
    records: &'a mut [Record],
    content_item_id: &str,
    profile_id: &str,
) -> Result<&'a mut Record> {
    records
        .iter_mut()
        .find(|r| r.matches(content_item_id, profile_id))
        .ok_or_else(|| {
            QueueError::NotFound(format!(
                "record for item {} in profile {}",
                content_item_id, profile_id
            ))
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::FsInstaller;
    use crate::storage::JsonRecordStore;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn setup() -> (RecordSync, TempDir) {
        let tmp = TempDir::new().expect("tmp");
        let store = JsonRecordStore::new(tmp.path().join("data"))
            .await
            .expect("store");
        let sync = RecordSync::new(Arc::new(store), Arc::new(FsInstaller));
        (sync, tmp)
    }

    #[tokio::test]
    async fn test_apply_creates_record_with_metadata() {
        let (sync, _tmp) = setup().await;
        let metadata = JobMetadata {
            title: Some("Arena".to_string()),
            url: Some("https://example.invalid/item/100".to_string()),
            ..Default::default()
        };
        let key = RecordKey {
            content_item_id: "100",
            profile_id: "p1",
            app_id: Some("294100"),
            metadata: Some(&metadata),
        };
        let job_id = Uuid::now_v7();
        let record = sync
            .apply(key, RecordUpdate::queued(job_id))
            .await
            .expect("apply");

        assert_eq!(record.status, RecordStatus::Queued);
        assert_eq!(record.app_id.as_deref(), Some("294100"));
        assert_eq!(record.title.as_deref(), Some("Arena"));
        assert_eq!(record.download_job_id, Some(job_id));
        assert_eq!(sync.list(None).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_apply_merges_into_existing_record() {
        let (sync, _tmp) = setup().await;
        sync.apply(
            RecordKey::item("100", "p1"),
            RecordUpdate {
                status: Some(RecordStatus::Installed),
                installed_path: Some(Some("/dest/100".to_string())),
                ..Default::default()
            },
        )
        .await
        .expect("installed");

        let record = sync
            .apply(RecordKey::item("100", "p1"), RecordUpdate::failed("x"))
            .await
            .expect("failed");
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.installed_path.as_deref(), Some("/dest/100"));
        assert_eq!(sync.list(None).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_profile() {
        let (sync, _tmp) = setup().await;
        for (item, profile) in [("100", "p1"), ("200", "p1"), ("100", "p2")] {
            sync.apply(RecordKey::item(item, profile), RecordUpdate::cancelled())
                .await
                .expect("apply");
        }
        assert_eq!(sync.list(Some("p1")).await.expect("list").len(), 2);
        assert_eq!(sync.list(Some("p2")).await.expect("list").len(), 1);
        assert_eq!(sync.list(None).await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_applies_do_not_lose_updates() {
        let (sync, _tmp) = setup().await;
        let sync = Arc::new(sync);
        let mut handles = Vec::new();
        for i in 0..10 {
            let sync = Arc::clone(&sync);
            handles.push(tokio::spawn(async move {
                let item = format!("{}", 100 + i);
                sync.apply(RecordKey::item(&item, "p1"), RecordUpdate::cancelled())
                    .await
                    .expect("apply");
            }));
        }
        for handle in handles {
            handle.await.expect("join");
        }
        assert_eq!(sync.list(Some("p1")).await.expect("list").len(), 10);
    }

    #[tokio::test]
    async fn test_uninstall_unknown_record_is_not_found() {
        let (sync, _tmp) = setup().await;
        let err = sync.uninstall("100", "p1").await.expect_err("should fail");
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_uninstall_removes_files_and_clears_paths() {
        let (sync, tmp) = setup().await;
        let installed = tmp.path().join("mods").join("100");
        std::fs::create_dir_all(&installed).expect("mkdir");
        std::fs::write(installed.join("mod.info"), "x").expect("write");

        sync.apply(
            RecordKey::item("100", "p1"),
            RecordUpdate {
                status: Some(RecordStatus::Installed),
                installed_path: Some(Some(installed.to_string_lossy().into_owned())),
                source_path: Some(Some("/steam/100".to_string())),
                ..Default::default()
            },
        )
        .await
        .expect("seed");

        let record = sync.uninstall("100", "p1").await.expect("uninstall");
        assert_eq!(record.status, RecordStatus::Uninstalled);
        assert!(record.installed_path.is_none());
        assert!(record.source_path.is_none());
        assert!(record.last_uninstalled_at.is_some());
        assert!(!installed.exists());
    }

    #[tokio::test]
    async fn test_set_enabled_round_trip() {
        let (sync, tmp) = setup().await;
        let installed = tmp.path().join("mods").join("100");
        std::fs::create_dir_all(&installed).expect("mkdir");
        sync.apply(
            RecordKey::item("100", "p1"),
            RecordUpdate {
                status: Some(RecordStatus::Installed),
                installed_path: Some(Some(installed.to_string_lossy().into_owned())),
                ..Default::default()
            },
        )
        .await
        .expect("seed");

        let disabled = sync.set_enabled("100", "p1", false).await.expect("disable");
        assert_eq!(disabled.status, RecordStatus::Disabled);
        assert!(disabled
            .installed_path
            .as_deref()
            .is_some_and(|p| p.ends_with("100.disabled")));

        let enabled = sync.set_enabled("100", "p1", true).await.expect("enable");
        assert_eq!(enabled.status, RecordStatus::Installed);
        assert_eq!(
            enabled.installed_path.as_deref(),
            Some(installed.to_string_lossy().as_ref())
        );
        assert!(installed.exists());
    }

    #[tokio::test]
    async fn test_set_enabled_requires_installed_path() {
        let (sync, _tmp) = setup().await;
        sync.apply(RecordKey::item("100", "p1"), RecordUpdate::cancelled())
            .await
            .expect("seed");
        let err = sync
            .set_enabled("100", "p1", false)
            .await
            .expect_err("should fail");
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::Validation(_))
        ));
    }
}
