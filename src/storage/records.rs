use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::Record;
use crate::storage::RecordStore;

pub struct JsonRecordStore {
    file_path: PathBuf,
    // Serializes our own temp-file writes; other processes may still write the file.
    write_lock: Mutex<()>,
}

impl JsonRecordStore {
    /// Create a store backed by `records.json` in `data_dir`.
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            file_path: data_dir.join("records.json"),
            write_lock: Mutex::new(()),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Read the file as it is on disk right now.
    ///
    /// If `records.json` is corrupted, a backup is written to
    /// `records.json.bak` and the collection is treated as empty.
    async fn load(&self) -> Result<Vec<Record>> {
        if !self.file_path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.file_path)
            .await
            .context("Failed to read records.json")?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Vec<Record>>(&content) {
            Ok(records) => Ok(records),
            Err(e) => {
                tracing::warn!(
                    "records.json is corrupted ({}), creating backup and starting empty",
                    e
                );
                let backup_path = self.file_path.with_extension("json.bak");
                if let Err(backup_err) = tokio::fs::copy(&self.file_path, &backup_path).await {
                    tracing::error!(
                        "Failed to create backup of corrupted records.json: {}",
                        backup_err
                    );
                }
                Ok(Vec::new())
            }
        }
    }

    /// Writes to a .tmp file first, then renames over the real file.
    async fn persist(&self, records: &[Record]) -> Result<()> {
        let tmp_path = self.file_path.with_extension("json.tmp");

        let json =
            serde_json::to_string_pretty(records).context("Failed to serialize records")?;

        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .context("Failed to write temporary records file")?;

        tokio::fs::rename(&tmp_path, &self.file_path)
            .await
            .context("Failed to rename temporary records file")?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn read_all(&self) -> Result<Vec<Record>> {
        self.load().await
    }

    async fn write_all(&self, records: &[Record]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(records).await
    }
}
