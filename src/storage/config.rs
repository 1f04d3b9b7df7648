use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::models::AppConfig;
use crate::storage::ConfigSource;

/// Reads the concurrency limit from the config file on every query, so an
/// operator can retune throttling without restarting the daemon.
///
/// The file is looked up on each query too: the first candidate that exists
/// wins, so a config file created after startup is picked up.
pub struct FileConfigSource {
    candidates: Vec<PathBuf>,
}

impl FileConfigSource {
    /// `candidates` in lookup order. With none present, defaults apply.
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn concurrency_limit(&self) -> Result<usize> {
        let Some(path) = self.candidates.iter().find(|p| p.exists()) else {
            return Ok(AppConfig::default().effective_concurrency());
        };

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config.effective_concurrency())
    }
}

/// A limit held in memory. Used for `--concurrency` overrides and in tests.
pub struct FixedConfigSource {
    limit: AtomicUsize,
}

impl FixedConfigSource {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
        }
    }

    pub fn set(&self, limit: usize) {
        self.limit.store(limit, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigSource for FixedConfigSource {
    async fn concurrency_limit(&self) -> Result<usize> {
        Ok(self.limit.load(Ordering::SeqCst))
    }
}
