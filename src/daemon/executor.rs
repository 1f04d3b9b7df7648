use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::models::LogEntry;
use crate::spawner::{steam, ToolCommand, ToolSpawner};

/// Events a runner reports back to its owner.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Log(LogEntry),
    /// Process finished. `logs` is everything the runner itself saw.
    Exit { code: i32, logs: Vec<LogEntry> },
    /// The tool could not be started or waited on. Not an exit code.
    Error(String),
}

#[derive(Debug, Clone)]
pub struct RunnerMessage {
    pub job_id: Uuid,
    pub event: RunnerEvent,
}

/// Handle to a running tool process, allowing cancellation.
pub struct RunnerHandle {
    pub job_id: Uuid,
    pub join_handle: tokio::task::JoinHandle<()>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl RunnerHandle {
    /// Request termination. Repeated calls and calls after exit do nothing.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

enum Step {
    Line(Option<String>),
    Cancel,
    Detached,
}

/// Start one tool process for `job_id`, reporting to `events_tx`.
pub fn start(
    spawner: Arc<dyn ToolSpawner>,
    job_id: Uuid,
    cmd: ToolCommand,
    events_tx: mpsc::UnboundedSender<RunnerMessage>,
) -> RunnerHandle {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        let send = |event: RunnerEvent| {
            let _ = events_tx.send(RunnerMessage { job_id, event });
        };

        tracing::debug!(
            "Job {}: spawning {} {}",
            job_id,
            cmd.program.display(),
            steam::redact_args(&cmd.args).join(" ")
        );

        let mut process = match spawner.spawn(&cmd) {
            Ok(process) => process,
            Err(e) => {
                let error_msg = format!("Failed to start {}: {}", cmd.program.display(), e);
                tracing::error!("Job {}: {}", job_id, error_msg);
                send(RunnerEvent::Error(error_msg));
                return;
            }
        };

        let mut cancel_rx = cancel_rx;
        let mut cancel_closed = false;
        let mut logs: Vec<LogEntry> = Vec::new();

        loop {
            let step = tokio::select! {
                line = process.next_line() => Step::Line(line),
                res = &mut cancel_rx, if !cancel_closed => match res {
                    Ok(()) => Step::Cancel,
                    Err(_) => Step::Detached,
                },
            };

            match step {
                Step::Line(Some(line)) => {
                    let entry = LogEntry::new(line);
                    logs.push(entry.clone());
                    send(RunnerEvent::Log(entry));
                }
                Step::Line(None) => break,
                Step::Cancel => {
                    cancel_closed = true;
                    if let Err(e) = process.interrupt() {
                        tracing::warn!("Job {}: failed to interrupt tool: {}", job_id, e);
                    }
                }
                Step::Detached => cancel_closed = true,
            }
        }

        let exit = if cancel_closed {
            process.wait().await
        } else {
            let waited = tokio::select! {
                code = process.wait() => Some(code),
                res = &mut cancel_rx => {
                    if res.is_ok() {
                        if let Err(e) = process.interrupt() {
                            tracing::warn!("Job {}: failed to interrupt tool: {}", job_id, e);
                        }
                    }
                    None
                }
            };
            match waited {
                Some(code) => code,
                None => process.wait().await,
            }
        };

        match exit {
            Ok(code) => {
                tracing::debug!("Job {}: tool exited with code {}", job_id, code);
                send(RunnerEvent::Exit { code, logs });
            }
            Err(e) => send(RunnerEvent::Error(format!("Process wait failed: {}", e))),
        }
    });

    RunnerHandle {
        job_id,
        join_handle,
        cancel_tx: Some(cancel_tx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawner::{MockGate, MockScript, MockSpawner, MOCK_INTERRUPTED_EXIT};
    use std::path::PathBuf;
    use std::time::Duration;

    fn make_command() -> ToolCommand {
        ToolCommand {
            program: PathBuf::from("steamcmd"),
            args: steam::build_args("294100", "100", None),
            working_dir: PathBuf::from("."),
            env: vec![],
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<RunnerMessage>) -> Vec<RunnerEvent> {
        let mut events = Vec::new();
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            let terminal = matches!(msg.event, RunnerEvent::Exit { .. } | RunnerEvent::Error(_));
            events.push(msg.event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_runner_streams_lines_then_exit() {
        let spawner = Arc::new(MockSpawner::with_output_and_exit(&["a", "b 50%"], 0));
        let (tx, rx) = mpsc::unbounded_channel();
        let job_id = Uuid::now_v7();
        let handle = start(spawner, job_id, make_command(), tx);

        let events = collect(rx).await;
        assert_eq!(events.len(), 3);
        match &events[0] {
            RunnerEvent::Log(entry) => assert_eq!(entry.message, "a"),
            other => panic!("Expected Log, got: {:?}", other),
        }
        match &events[2] {
            RunnerEvent::Exit { code, logs } => {
                assert_eq!(*code, 0);
                assert_eq!(logs.len(), 2);
                assert_eq!(logs[1].message, "b 50%");
            }
            other => panic!("Expected Exit, got: {:?}", other),
        }
        handle.join_handle.await.expect("join");
    }

    #[tokio::test]
    async fn test_runner_reports_nonzero_exit_as_exit() {
        let spawner = Arc::new(MockSpawner::with_output_and_exit(&["ERROR: disk full"], 7));
        let (tx, rx) = mpsc::unbounded_channel();
        let _handle = start(spawner, Uuid::now_v7(), make_command(), tx);

        let events = collect(rx).await;
        assert!(matches!(
            events.last(),
            Some(RunnerEvent::Exit { code: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_runner_spawn_failure_is_error_event() {
        let spawner = Arc::new(MockSpawner::with_spawn_error("No such file or directory"));
        let (tx, rx) = mpsc::unbounded_channel();
        let _handle = start(spawner, Uuid::now_v7(), make_command(), tx);

        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            RunnerEvent::Error(msg) => assert!(msg.contains("No such file")),
            other => panic!("Expected Error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runner_cancel_interrupts_and_is_idempotent() {
        let gate = MockGate::new();
        let spawner = Arc::new(MockSpawner::new(MockScript::gated(&["working"], 0, &gate)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = start(spawner, Uuid::now_v7(), make_command(), tx);

        let first = rx.recv().await.expect("first event");
        assert!(matches!(first.event, RunnerEvent::Log(_)));

        handle.cancel();
        handle.cancel();

        let events = collect(rx).await;
        assert!(matches!(
            events.last(),
            Some(RunnerEvent::Exit { code, .. }) if *code == MOCK_INTERRUPTED_EXIT
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_exit_is_noop() {
        let spawner = Arc::new(MockSpawner::with_output_and_exit(&[], 0));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = start(spawner, Uuid::now_v7(), make_command(), tx);

        let events = collect(rx).await;
        assert!(matches!(events.last(), Some(RunnerEvent::Exit { code: 0, .. })));
        handle.cancel();
        handle.cancel();
    }
}
