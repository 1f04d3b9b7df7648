// Subprocess abstraction with a tokio::process implementation and a scripted mock.

pub mod steam;

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Notify};

/// Everything needed to start one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Trait for starting tool processes.
pub trait ToolSpawner: Send + Sync {
    fn spawn(&self, cmd: &ToolCommand) -> anyhow::Result<Box<dyn ToolProcess>>;
}

/// Trait for interacting with a started tool process.
#[async_trait]
pub trait ToolProcess: Send {
    /// Next line of combined stdout/stderr, or `None` once both streams are closed.
    async fn next_line(&mut self) -> Option<String>;
    /// Ask the process to stop. Safe to call repeatedly or after exit.
    fn interrupt(&mut self) -> io::Result<()>;
    async fn wait(&mut self) -> io::Result<i32>;
}

// --- Real implementation using tokio::process ---

pub struct SystemSpawner;

impl ToolSpawner for SystemSpawner {
    fn spawn(&self, cmd: &ToolCommand) -> anyhow::Result<Box<dyn ToolProcess>> {
        let mut command = tokio::process::Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .current_dir(&cmd.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        // Own process group so an interrupt reaches wrapper scripts and their children.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx.clone());
        }
        drop(line_tx);

        Ok(Box::new(SystemProcess {
            child,
            lines: line_rx,
        }))
    }
}

fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf);
                    let line = text.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("tool output read error: {}", e);
                    break;
                }
            }
        }
    });
}

struct SystemProcess {
    child: tokio::process::Child,
    lines: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl ToolProcess for SystemProcess {
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    fn interrupt(&mut self) -> io::Result<()> {
        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };

        #[cfg(unix)]
        {
            // SAFETY: plain kill(2) on the process group created at spawn.
            let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGINT) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            Err(err)
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            self.child.start_kill()
        }
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

// --- Mock implementation for testing ---

/// Exit code reported by a mock process that was interrupted.
pub const MOCK_INTERRUPTED_EXIT: i32 = 130;

/// Holds a mock process's exit until released.
#[derive(Clone, Default)]
pub struct MockGate {
    released: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl MockGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.released.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// What one mock process will do.
#[derive(Clone, Default)]
pub struct MockScript {
    pub lines: Vec<String>,
    pub exit_code: i32,
    pub spawn_error: Option<String>,
    pub gate: Option<MockGate>,
    /// Keep running after an interrupt until the gate opens.
    pub ignores_interrupt: bool,
}

impl MockScript {
    pub fn exits(lines: &[&str], exit_code: i32) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn gated(lines: &[&str], exit_code: i32, gate: &MockGate) -> Self {
        Self {
            gate: Some(gate.clone()),
            ..Self::exits(lines, exit_code)
        }
    }

    /// A tool that shrugs off interrupts and only exits when `gate` opens.
    pub fn stubborn(gate: &MockGate) -> Self {
        Self {
            ignores_interrupt: true,
            ..Self::gated(&[], 0, gate)
        }
    }

    pub fn spawn_error(message: &str) -> Self {
        Self {
            spawn_error: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// Mock spawner for testing. Queued scripts are used in spawn order; once they
/// run out every spawn uses the fallback script.
pub struct MockSpawner {
    scripts: Mutex<VecDeque<MockScript>>,
    fallback: MockScript,
    spawned: Mutex<Vec<ToolCommand>>,
}

impl MockSpawner {
    pub fn new(fallback: MockScript) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            spawned: Mutex::new(Vec::new()),
        }
    }

    pub fn with_output_and_exit(lines: &[&str], exit_code: i32) -> Self {
        Self::new(MockScript::exits(lines, exit_code))
    }

    pub fn with_spawn_error(error: &str) -> Self {
        Self::new(MockScript::spawn_error(error))
    }

    pub fn push_script(&self, script: MockScript) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(script);
    }

    /// Commands seen so far, in spawn order.
    pub fn spawned(&self) -> Vec<ToolCommand> {
        self.spawned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ToolSpawner for MockSpawner {
    fn spawn(&self, cmd: &ToolCommand) -> anyhow::Result<Box<dyn ToolProcess>> {
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if let Some(error) = script.spawn_error {
            return Err(anyhow::anyhow!(error));
        }

        self.spawned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.clone());

        Ok(Box::new(MockProcess {
            lines: script.lines.into(),
            exit_code: script.exit_code,
            gate: script.gate,
            ignores_interrupt: script.ignores_interrupt,
            interrupted: false,
        }))
    }
}

pub struct MockProcess {
    lines: VecDeque<String>,
    exit_code: i32,
    gate: Option<MockGate>,
    ignores_interrupt: bool,
    interrupted: bool,
}

#[async_trait]
impl ToolProcess for MockProcess {
    async fn next_line(&mut self) -> Option<String> {
        if self.interrupted {
            return None;
        }
        tokio::task::yield_now().await;
        self.lines.pop_front()
    }

    fn interrupt(&mut self) -> io::Result<()> {
        if !self.ignores_interrupt {
            self.interrupted = true;
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<i32> {
        if self.interrupted {
            return Ok(MOCK_INTERRUPTED_EXIT);
        }
        if let Some(ref gate) = self.gate {
            gate.wait().await;
        }
        Ok(self.exit_code)
    }
}
