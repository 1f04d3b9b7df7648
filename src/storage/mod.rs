pub mod config;
pub mod records;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Record;

pub use config::{FileConfigSource, FixedConfigSource};
pub use records::JsonRecordStore;

/// Whole-collection record persistence. There is no partial-update API;
/// callers read everything, modify, and write everything back.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn read_all(&self) -> Result<Vec<Record>>;
    async fn write_all(&self, records: &[Record]) -> Result<()>;
}

#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Current concurrency limit. Queried on every admission pass.
    async fn concurrency_limit(&self) -> Result<usize>;
}
