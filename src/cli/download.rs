// CLI download command: runs a scheduler in this process, no daemon needed

use std::collections::HashMap;
use std::future::Future;

use anyhow::Context;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::daemon::init_tracing;
use super::{DownloadArgs, StoreArgs};
use crate::daemon::scheduler::Scheduler;
use crate::daemon::{effective_data_dir, load_config, start_queue};
use crate::models::{JobRequest, JobSnapshot, JobStatus};

/// How a batch of downloads ended.
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub jobs: Vec<JobSnapshot>,
}

impl DownloadSummary {
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn all_completed(&self) -> bool {
        self.jobs.iter().all(|j| j.status == JobStatus::Completed)
    }
}

/// Prints one line per status change and per whole-percent progress step.
#[derive(Default)]
struct ProgressPrinter {
    seen: HashMap<Uuid, (JobStatus, u32)>,
}

impl ProgressPrinter {
    fn line_for(&mut self, snapshot: &JobSnapshot) -> Option<String> {
        let percent = snapshot.progress.floor() as u32;
        let previous = self.seen.insert(snapshot.id, (snapshot.status, percent));
        let item = &snapshot.content_item_id;

        match previous {
            Some((status, _)) if status != snapshot.status => {}
            Some((_, last)) if snapshot.status == JobStatus::Running && percent != last => {
                return Some(format!("[{}] {}%", item, percent));
            }
            Some(_) => return None,
            None => {}
        }

        let line = match snapshot.status {
            JobStatus::Completed => format!(
                "[{}] completed -> {}",
                item,
                snapshot.installed_path.as_deref().unwrap_or("?")
            ),
            JobStatus::Failed => format!(
                "[{}] failed: {}",
                item,
                snapshot.error.as_deref().unwrap_or("unknown error")
            ),
            status => format!("[{}] {}", item, status),
        };
        Some(line)
    }
}

/// Submit `requests` in order and wait until every job reaches a terminal
/// state. When `interrupt` resolves, all of them are cancelled and the wait
/// continues until the cancellations land.
pub async fn run_downloads<F>(
    scheduler: &Scheduler,
    requests: Vec<JobRequest>,
    interrupt: F,
) -> anyhow::Result<DownloadSummary>
where
    F: Future<Output = ()>,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JobSnapshot>();
    let subscription = scheduler.subscribe(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });

    let result = wait_for_jobs(scheduler, requests, interrupt, &mut rx).await;
    subscription.unsubscribe();
    result
}

async fn wait_for_jobs<F>(
    scheduler: &Scheduler,
    requests: Vec<JobRequest>,
    interrupt: F,
    rx: &mut mpsc::UnboundedReceiver<JobSnapshot>,
) -> anyhow::Result<DownloadSummary>
where
    F: Future<Output = ()>,
{
    let mut ids = Vec::with_capacity(requests.len());
    for request in requests {
        let item = request.content_item_id.clone();
        let snapshot = scheduler
            .submit(request)
            .await
            .with_context(|| format!("Failed to queue item {}", item))?;
        ids.push(snapshot.id);
    }

    let mut latest: HashMap<Uuid, JobSnapshot> = HashMap::new();
    let mut printer = ProgressPrinter::default();
    let mut interrupted = false;
    tokio::pin!(interrupt);

    loop {
        let done = ids
            .iter()
            .all(|id| latest.get(id).is_some_and(|s| s.status.is_terminal()));
        if done {
            break;
        }

        tokio::select! {
            received = rx.recv() => {
                let Some(snapshot) = received else {
                    anyhow::bail!("Scheduler stopped before all downloads finished");
                };
                if let Some(line) = printer.line_for(&snapshot) {
                    println!("{}", line);
                }
                latest.insert(snapshot.id, snapshot);
            }
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                println!("Interrupted, cancelling downloads...");
                for id in &ids {
                    if let Err(e) = scheduler.cancel(*id).await {
                        tracing::warn!("Failed to cancel job {}: {}", id, e);
                    }
                }
            }
        }
    }

    let jobs = ids.iter().filter_map(|id| latest.remove(id)).collect();
    Ok(DownloadSummary { jobs })
}

/// wsq download
pub async fn cmd_download(
    target: &DownloadArgs,
    store: &StoreArgs,
    concurrency: Option<usize>,
) -> anyhow::Result<()> {
    init_tracing("warn");

    let loaded = load_config(store.config.as_deref())?;
    let data_dir = effective_data_dir(&loaded.config, store.data_dir.as_deref());
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let tool = target
        .tool
        .clone()
        .or_else(|| loaded.config.tool_path.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("No tool configured: pass --tool or set tool_path in the config file")
        })?;
    let mode = target
        .mode
        .unwrap_or(loaded.config.default_install_mode);
    let requests = target.requests(&tool.display().to_string(), mode);

    let runtime = start_queue(&loaded, &data_dir, concurrency).await?;
    let interrupt = ctrl_c_or_never();
    let result = run_downloads(&runtime.scheduler, requests, interrupt).await;

    if let Err(e) = runtime.scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown: {}", e);
    }

    let summary = result?;
    println!(
        "Done: {} completed, {} failed, {} cancelled.",
        summary.count(JobStatus::Completed),
        summary.count(JobStatus::Failed),
        summary.count(JobStatus::Cancelled)
    );

    if !summary.all_completed() {
        let missed = summary.jobs.len() - summary.count(JobStatus::Completed);
        anyhow::bail!("{} of {} downloads did not complete", missed, summary.jobs.len());
    }
    Ok(())
}

/// Resolves on Ctrl+C. If the handler cannot be installed the downloads just
/// run to completion.
async fn ctrl_c_or_never() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}
