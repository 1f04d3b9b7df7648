use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::daemon::events::{Broadcaster, Subscription};
use crate::daemon::executor::{self, RunnerEvent, RunnerHandle, RunnerMessage};
use crate::daemon::sync::{RecordKey, RecordSync};
use crate::errors::QueueError;
use crate::installer::{InstallOutcome, InstallRequest};
use crate::models::job::validate_request;
use crate::models::{Job, JobRequest, JobSnapshot, JobStatus, RecordStatus, RecordUpdate};
use crate::spawner::{steam, ToolSpawner};
use crate::storage::ConfigSource;

/// How long shutdown waits for interrupted tools to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

enum Command {
    Submit {
        request: JobRequest,
        reply: oneshot::Sender<Result<JobSnapshot, QueueError>>,
    },
    List {
        reply: oneshot::Sender<Vec<JobSnapshot>>,
    },
    Get {
        id: Uuid,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
    Cancel {
        id: Uuid,
        reply: oneshot::Sender<Result<JobSnapshot, QueueError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct InstallResult {
    job_id: Uuid,
    result: Result<InstallOutcome, String>,
}

/// Handle to the download queue. Cheap to clone; all clones talk to one actor
/// task that owns every job.
#[derive(Clone)]
pub struct Scheduler {
    cmd_tx: mpsc::Sender<Command>,
    broadcaster: Broadcaster,
}

impl Scheduler {
    /// Spawn the scheduler task. Must be called inside a tokio runtime.
    pub fn start(
        spawner: Arc<dyn ToolSpawner>,
        sync: Arc<RecordSync>,
        config: Arc<dyn ConfigSource>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (runner_tx, runner_rx) = mpsc::unbounded_channel();
        let (install_tx, install_rx) = mpsc::unbounded_channel();
        let broadcaster = Broadcaster::new();

        let actor = Actor {
            jobs: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
            runners: HashMap::new(),
            spawner,
            sync,
            config,
            broadcaster: broadcaster.clone(),
            runner_tx,
            install_tx,
            shutting_down: false,
        };
        tokio::spawn(actor.run(cmd_rx, runner_rx, install_rx));

        Self {
            cmd_tx,
            broadcaster,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| QueueError::Internal("scheduler is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| QueueError::Internal("scheduler dropped the request".to_string()))
    }

    /// Queue a download. Returns the queued snapshot without waiting for it to run.
    pub async fn submit(&self, request: JobRequest) -> Result<JobSnapshot, QueueError> {
        self.request(|reply| Command::Submit { request, reply })
            .await?
    }

    /// Every known job in submission order.
    pub async fn list_jobs(&self) -> Result<Vec<JobSnapshot>, QueueError> {
        self.request(|reply| Command::List { reply }).await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<JobSnapshot>, QueueError> {
        self.request(|reply| Command::Get { id, reply }).await
    }

    /// Cancel a queued or running job. Cancelling a finished job is a no-op.
    pub async fn cancel(&self, id: Uuid) -> Result<JobSnapshot, QueueError> {
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    /// Observe every job change. Callbacks run on the scheduler task and must not block.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&JobSnapshot) + Send + Sync + 'static,
    {
        self.broadcaster.subscribe(callback)
    }

    /// Cancel running jobs, wait briefly for their tools to exit, and stop the task.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

struct Actor {
    jobs: HashMap<Uuid, Job>,
    order: Vec<Uuid>,
    pending: VecDeque<Uuid>,
    runners: HashMap<Uuid, RunnerHandle>,
    spawner: Arc<dyn ToolSpawner>,
    sync: Arc<RecordSync>,
    config: Arc<dyn ConfigSource>,
    broadcaster: Broadcaster,
    runner_tx: mpsc::UnboundedSender<RunnerMessage>,
    install_tx: mpsc::UnboundedSender<InstallResult>,
    shutting_down: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut runner_rx: mpsc::UnboundedReceiver<RunnerMessage>,
        mut install_rx: mpsc::UnboundedReceiver<InstallResult>,
    ) {
        tracing::debug!("Scheduler task started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => break,
                },
                Some(msg) = runner_rx.recv() => self.handle_runner(msg).await,
                Some(done) = install_rx.recv() => self.handle_install(done).await,
            }
        }
        tracing::debug!("Scheduler task stopped");
    }

    /// Returns `false` once the actor should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit { request, reply } => {
                match self.submit(request).await {
                    Ok(snapshot) => {
                        let _ = reply.send(Ok(snapshot));
                        self.admission_pass().await;
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::List { reply } => {
                let snapshots = self
                    .order
                    .iter()
                    .filter_map(|id| self.jobs.get(id))
                    .map(Job::snapshot)
                    .collect();
                let _ = reply.send(snapshots);
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.jobs.get(&id).map(Job::snapshot));
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id).await);
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn submit(&mut self, request: JobRequest) -> Result<JobSnapshot, QueueError> {
        validate_request(&request)?;

        let job = Job::from_request(request, Utc::now());
        let id = job.id;
        tracing::info!(
            "Job {} queued: item {} for profile {}",
            id,
            job.content_item_id,
            job.profile_id
        );

        self.persist(&job, RecordUpdate::queued(id)).await;
        let snapshot = job.snapshot();
        self.broadcaster.publish(&snapshot);

        self.jobs.insert(id, job);
        self.order.push(id);
        self.pending.push_back(id);
        Ok(snapshot)
    }

    fn running_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    async fn concurrency_limit(&self) -> usize {
        match self.config.concurrency_limit().await {
            Ok(limit) => limit.max(1),
            Err(e) => {
                tracing::warn!("Could not read concurrency limit, using 1: {:#}", e);
                1
            }
        }
    }

    /// Admit at most one pending job if a slot is free.
    async fn admission_pass(&mut self) {
        if self.shutting_down || self.pending.is_empty() {
            return;
        }

        let limit = self.concurrency_limit().await;
        let running = self.running_count();
        if running >= limit {
            tracing::debug!(
                "Admission deferred: {} running, limit {}, {} pending",
                running,
                limit,
                self.pending.len()
            );
            return;
        }

        let Some(id) = self.pending.pop_front() else {
            return;
        };
        self.admit(id).await;
    }

    async fn admit(&mut self, id: Uuid) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        if let Err(e) = job.start(Utc::now()) {
            tracing::warn!("Skipping admission of job {}: {}", id, e);
            return;
        }
        tracing::info!("Job {} running: item {}", id, job.content_item_id);

        let cmd = steam::command_for_job(job);
        let job = job.clone();
        self.persist(&job, RecordUpdate::downloading(id)).await;
        self.broadcaster.publish(&job.snapshot());

        let handle = executor::start(
            Arc::clone(&self.spawner),
            id,
            cmd,
            self.runner_tx.clone(),
        );
        self.runners.insert(id, handle);
    }

    async fn handle_runner(&mut self, msg: RunnerMessage) {
        let id = msg.job_id;
        match msg.event {
            RunnerEvent::Log(entry) => {
                let Some(job) = self.jobs.get_mut(&id) else {
                    return;
                };
                tracing::debug!("Job {}: {}", id, entry.message);
                if job.append_log(entry) {
                    self.broadcaster.publish(&job.snapshot());
                }
            }
            RunnerEvent::Exit { code, logs } => {
                self.runners.remove(&id);
                let Some(job) = self.jobs.get_mut(&id) else {
                    return;
                };
                if job.is_terminal() {
                    tracing::debug!("Job {}: ignoring exit {} after {}", id, code, job.status);
                    return;
                }
                job.record_exit(code, &logs);

                if code != 0 {
                    let message = job.exit_failure_message(code);
                    self.finish_failed(id, message).await;
                    return;
                }

                self.broadcaster.publish(&job.snapshot());
                let request = InstallRequest {
                    content_root: job.working_dir.clone(),
                    app_id: job.app_id.clone(),
                    content_item_id: job.content_item_id.clone(),
                    destination: job.install_destination.clone(),
                    mode: job.install_mode,
                };
                let installer = self.sync.installer();
                let install_tx = self.install_tx.clone();
                tokio::spawn(async move {
                    let result = installer
                        .install(&request)
                        .await
                        .map_err(|e| format!("{:#}", e));
                    let _ = install_tx.send(InstallResult { job_id: id, result });
                });
            }
            RunnerEvent::Error(message) => {
                self.runners.remove(&id);
                let terminal = self.jobs.get(&id).map_or(true, Job::is_terminal);
                if terminal {
                    return;
                }
                self.finish_failed(id, message).await;
            }
        }
    }

    async fn handle_install(&mut self, done: InstallResult) {
        let id = done.job_id;
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        if job.is_terminal() {
            tracing::debug!("Job {}: ignoring install result after {}", id, job.status);
            return;
        }

        match done.result {
            Ok(outcome) => {
                let installed = outcome.installed_path.to_string_lossy().into_owned();
                if let Err(e) = job.complete(installed.clone(), Utc::now()) {
                    tracing::warn!("Job {}: {}", id, e);
                    return;
                }
                tracing::info!("Job {} completed: installed at {}", id, installed);

                let update = installed_update(job, &outcome);
                let job = job.clone();
                self.persist(&job, update).await;
                self.broadcaster.publish(&job.snapshot());
                self.admission_pass().await;
            }
            Err(message) => {
                tracing::warn!(
                    "Job {}: download of item {} succeeded but install failed: {}",
                    id,
                    job.content_item_id,
                    message
                );
                self.finish_failed(id, message).await;
            }
        }
    }

    async fn finish_failed(&mut self, id: Uuid, message: String) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        if let Err(e) = job.fail(message.clone(), Utc::now()) {
            tracing::warn!("Job {}: {}", id, e);
            return;
        }
        tracing::warn!("Job {} failed: {}", id, message);

        let job = job.clone();
        self.persist(&job, RecordUpdate::failed(message)).await;
        self.broadcaster.publish(&job.snapshot());
        self.admission_pass().await;
    }

    async fn cancel(&mut self, id: Uuid) -> Result<JobSnapshot, QueueError> {
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::NotFound(format!("job {}", id)))?;

        let was = job.status;
        if !job.cancel(Utc::now())? {
            return Ok(job.snapshot());
        }

        match was {
            JobStatus::Queued => self.pending.retain(|p| *p != id),
            _ => {
                if let Some(mut handle) = self.runners.remove(&id) {
                    handle.cancel();
                }
            }
        }
        tracing::info!("Job {} cancelled (was {})", id, was);

        let job = job.clone();
        self.persist(&job, RecordUpdate::cancelled()).await;
        let snapshot = job.snapshot();
        self.broadcaster.publish(&snapshot);
        self.admission_pass().await;
        Ok(snapshot)
    }

    async fn shutdown(&mut self) {
        self.shutting_down = true;
        let running: Vec<Uuid> = self
            .order
            .iter()
            .copied()
            .filter(|id| {
                self.jobs
                    .get(id)
                    .is_some_and(|j| j.status == JobStatus::Running)
            })
            .collect();
        if !running.is_empty() {
            tracing::info!("Shutting down: cancelling {} running job(s)", running.len());
        }

        let mut join_handles = Vec::new();
        for id in running {
            if let Some(mut handle) = self.runners.remove(&id) {
                handle.cancel();
                join_handles.push(handle.join_handle);
            }
            if let Err(e) = self.cancel(id).await {
                tracing::warn!("Failed to cancel job {} during shutdown: {}", id, e);
            }
        }

        // One grace period for all tools together.
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for handle in join_handles {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                tracing::warn!("A tool did not exit within {:?}", SHUTDOWN_GRACE);
            }
        }
    }

    /// Record store failures are logged and never undo the job transition.
    async fn persist(&self, job: &Job, update: RecordUpdate) {
        if let Err(e) = self.sync.apply(RecordKey::for_job(job), update).await {
            tracing::warn!(
                "Failed to persist record for item {} (job {}): {:#}",
                job.content_item_id,
                job.id,
                e
            );
        }
    }
}

fn installed_update(job: &Job, outcome: &InstallOutcome) -> RecordUpdate {
    RecordUpdate {
        status: Some(RecordStatus::Installed),
        install_mode: Some(job.install_mode),
        installed_path: Some(Some(outcome.installed_path.to_string_lossy().into_owned())),
        source_path: Some(Some(outcome.source_path.to_string_lossy().into_owned())),
        error: Some(None),
        download_job_id: Some(None),
        last_downloaded_at: job.finished_at,
        last_known_update_at: job.metadata.time_updated.map(Some),
        file_size_bytes: job.metadata.file_size_bytes.map(Some),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::FsInstaller;
    use crate::models::{InstallMode, JobMetadata};
    use crate::spawner::MockSpawner;
    use crate::storage::{FixedConfigSource, JsonRecordStore};
    use tempfile::TempDir;

    fn make_request(item: &str) -> JobRequest {
        JobRequest {
            app_id: "294100".to_string(),
            content_item_id: item.to_string(),
            profile_id: "p1".to_string(),
            tool_path: "/opt/steamcmd/steamcmd.sh".to_string(),
            working_dir: None,
            credentials: None,
            install_mode: InstallMode::Copy,
            install_destination: "/dest".to_string(),
            metadata: JobMetadata::default(),
        }
    }

    async fn start_scheduler(spawner: MockSpawner) -> (Scheduler, TempDir) {
        let tmp = TempDir::new().expect("tmp");
        let store = JsonRecordStore::new(tmp.path().to_path_buf())
            .await
            .expect("store");
        let sync = Arc::new(RecordSync::new(Arc::new(store), Arc::new(FsInstaller)));
        let scheduler = Scheduler::start(
            Arc::new(spawner),
            sync,
            Arc::new(FixedConfigSource::new(1)),
        );
        (scheduler, tmp)
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request() {
        let (scheduler, _tmp) = start_scheduler(MockSpawner::with_output_and_exit(&[], 0)).await;
        let mut request = make_request("100");
        request.profile_id = String::new();

        let err = scheduler.submit(request).await.expect_err("should fail");
        assert!(matches!(err, QueueError::Validation(_)));
        assert!(scheduler.list_jobs().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn test_submit_returns_queued_snapshot() {
        let (scheduler, _tmp) = start_scheduler(MockSpawner::with_output_and_exit(&[], 0)).await;
        let snapshot = scheduler.submit(make_request("100")).await.expect("submit");
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert_eq!(snapshot.content_item_id, "100");

        let fetched = scheduler.get_job(snapshot.id).await.expect("get");
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_not_found() {
        let (scheduler, _tmp) = start_scheduler(MockSpawner::with_output_and_exit(&[], 0)).await;
        let err = scheduler
            .cancel(Uuid::now_v7())
            .await
            .expect_err("should fail");
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_none() {
        let (scheduler, _tmp) = start_scheduler(MockSpawner::with_output_and_exit(&[], 0)).await;
        assert!(scheduler
            .get_job(Uuid::now_v7())
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn test_spawn_error_fails_job() {
        let (scheduler, _tmp) =
            start_scheduler(MockSpawner::with_spawn_error("No such file or directory")).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = scheduler.subscribe(move |snap| {
            if snap.status.is_terminal() {
                let _ = tx.send(snap.clone());
            }
        });

        scheduler.submit(make_request("100")).await.expect("submit");
        let done = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("terminal in time")
            .expect("snapshot");
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done
            .error
            .as_deref()
            .is_some_and(|e| e.contains("No such file")));
        assert!(done.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_fail() {
        let (scheduler, _tmp) = start_scheduler(MockSpawner::with_output_and_exit(&[], 0)).await;
        scheduler.shutdown().await.expect("shutdown");
        let err = scheduler.list_jobs().await.expect_err("should fail");
        assert!(matches!(err, QueueError::Internal(_)));
    }
}
