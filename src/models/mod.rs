pub mod config;
pub mod job;
pub mod record;

pub use config::AppConfig;
pub use job::{
    Credentials, InstallMode, Job, JobMetadata, JobRequest, JobSnapshot, JobStatus, LogEntry,
};
pub use record::{Record, RecordStatus, RecordUpdate};
