use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::InstallMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Maximum number of downloads running at once. Re-read on every admission pass.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub tool_path: Option<PathBuf>,
    #[serde(default)]
    pub default_install_mode: InstallMode,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_concurrency() -> usize {
    1
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8477
}

fn default_broadcast_capacity() -> usize {
    1024
}

impl AppConfig {
    /// Concurrency limit with the floor of one slot applied.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            host: default_host(),
            port: default_port(),
            data_dir: None,
            tool_path: None,
            default_install_mode: InstallMode::default(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}
