//! Subprocess management for approved shell commands.
//!
//! Commands run detached from the caller: `spawn` returns immediately and the
//! output is collected in the background until someone `poll`s for it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How long `poll` waits for the output readers to drain once the child exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
/// Bytes of combined output kept per process; later output is discarded.
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

pub type ProcFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProcessError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    /// For [`CommandExecutor`] implementations that number their own processes.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Combined stdout and stderr captured so far.
    pub output: String,
    pub is_running: bool,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown process: {0}")]
    UnknownProcess(ProcessId),
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs shell commands on behalf of the approval gate.
pub trait CommandExecutor: Send + Sync {
    fn spawn<'a>(&'a self, command: &'a str, cwd: &'a Path) -> ProcFut<'a, ProcessId>;
    fn poll(&self, id: ProcessId) -> ProcFut<'_, ProcessOutput>;
    fn kill(&self, id: ProcessId) -> ProcFut<'_, KillOutcome>;
    /// Forget `id` once its output has been read. A process still running is
    /// left to finish on its own. Returns `false` for unknown ids.
    fn release(&self, id: ProcessId) -> ProcFut<'_, bool>;
}

/// RAII guard that kills a child process (and its process group on Unix) on drop.
///
/// Call `disarm()` after the process exits normally to prevent the kill.
pub struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    pub fn disarm(&mut self) {
        self.child = None;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        let _ = kill_tree(child);
        let _ = child.try_wait();
    }
}

/// SIGKILL the child's process group, falling back to the child alone.
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: killpg only sends a signal; the group id is our own child's.
        if unsafe { libc::killpg(pid as i32, libc::SIGKILL) } == 0 {
            return Ok(());
        }
    }
    child.start_kill()
}

/// Put the child process in its own session (Unix only) so the entire process
/// group can be killed via `killpg`.
#[cfg(unix)]
fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the command dies with us instead of lingering as an orphan.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

type OutputBuffer = Arc<StdMutex<Vec<u8>>>;

fn snapshot(buffer: &OutputBuffer) -> String {
    let bytes = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Copy `stream` into `sink` until EOF. Past `limit` bytes the stream is
/// still drained so the child never blocks on a full pipe.
fn spawn_reader<R>(mut stream: R, sink: OutputBuffer, limit: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut bytes = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    let room = limit.saturating_sub(bytes.len());
                    bytes.extend_from_slice(&buf[..n.min(room)]);
                }
            }
        }
    })
}

struct ManagedProcess {
    guard: ChildGuard,
    output: OutputBuffer,
    readers: Vec<JoinHandle<()>>,
    exit_code: Option<i32>,
    finished: bool,
}

impl ManagedProcess {
    async fn finish(&mut self, exit_code: Option<i32>) {
        self.exit_code = exit_code;
        self.finished = true;
        self.guard.disarm();
        for reader in self.readers.drain(..) {
            let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
        }
    }

    fn to_output(&self) -> ProcessOutput {
        ProcessOutput {
            output: snapshot(&self.output),
            is_running: !self.finished,
            exit_code: self.exit_code,
        }
    }
}

/// Default [`CommandExecutor`]: `sh -c` on Unix, `cmd /C` on Windows.
///
/// Processes still tracked when the manager is dropped are killed.
pub struct ProcessManager {
    processes: Mutex<HashMap<ProcessId, ManagedProcess>>,
    next_id: AtomicU64,
    output_limit: usize,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl ProcessManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the captured output of each process at `bytes`.
    #[must_use]
    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit = bytes;
        self
    }

    /// Number of processes not yet released.
    pub async fn tracked(&self) -> usize {
        self.processes.lock().await.len()
    }
}

impl CommandExecutor for ProcessManager {
    fn spawn<'a>(&'a self, command: &'a str, cwd: &'a Path) -> ProcFut<'a, ProcessId> {
        Box::pin(async move {
            let mut cmd = shell_command(command);
            cmd.current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            #[cfg(unix)]
            set_new_session(&mut cmd);

            let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;

            let output: OutputBuffer = Arc::new(StdMutex::new(Vec::new()));
            let mut readers = Vec::with_capacity(2);
            if let Some(stdout) = child.stdout.take() {
                readers.push(spawn_reader(stdout, Arc::clone(&output), self.output_limit));
            }
            if let Some(stderr) = child.stderr.take() {
                readers.push(spawn_reader(stderr, Arc::clone(&output), self.output_limit));
            }

            let id = ProcessId(self.next_id.fetch_add(1, Ordering::Relaxed));
            tracing::debug!(%id, pid = ?child.id(), command, cwd = %cwd.display(), "Spawned process");
            self.processes.lock().await.insert(
                id,
                ManagedProcess {
                    guard: ChildGuard::new(child),
                    output,
                    readers,
                    exit_code: None,
                    finished: false,
                },
            );
            Ok(id)
        })
    }

    fn poll(&self, id: ProcessId) -> ProcFut<'_, ProcessOutput> {
        Box::pin(async move {
            let mut processes = self.processes.lock().await;
            let process = processes
                .get_mut(&id)
                .ok_or(ProcessError::UnknownProcess(id))?;
            if !process.finished {
                let status = match process.guard.child_mut() {
                    Some(child) => child.try_wait()?,
                    None => None,
                };
                if let Some(status) = status {
                    process.finish(status.code()).await;
                }
            }
            Ok(process.to_output())
        })
    }

    fn kill(&self, id: ProcessId) -> ProcFut<'_, KillOutcome> {
        Box::pin(async move {
            let mut processes = self.processes.lock().await;
            let process = processes
                .get_mut(&id)
                .ok_or(ProcessError::UnknownProcess(id))?;
            if process.finished {
                return Ok(KillOutcome::NotRunning);
            }
            let mut exit_code = None;
            if let Some(child) = process.guard.child_mut() {
                kill_tree(child)?;
                if let Ok(Ok(status)) = tokio::time::timeout(KILL_WAIT_TIMEOUT, child.wait()).await {
                    exit_code = status.code();
                }
            }
            process.finish(exit_code).await;
            tracing::debug!(%id, "Killed process");
            Ok(KillOutcome::Killed)
        })
    }

    fn release(&self, id: ProcessId) -> ProcFut<'_, bool> {
        Box::pin(async move {
            let Some(mut process) = self.processes.lock().await.remove(&id) else {
                return Ok(false);
            };
            if !process.finished {
                // Detach: the readers keep draining into the capped buffer
                // until the child closes its pipes.
                process.guard.disarm();
                tracing::debug!(%id, "Released running process");
            }
            Ok(true)
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::{CommandExecutor, KillOutcome, ProcessError, ProcessId, ProcessManager, ProcessOutput};

    async fn wait_for_exit(manager: &ProcessManager, id: ProcessId) -> ProcessOutput {
        for _ in 0..200 {
            let out = manager.poll(id).await.unwrap();
            if !out.is_running {
                return out;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("process did not exit");
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProcessManager::new();
        let id = manager
            .spawn("echo out; echo err 1>&2", dir.path())
            .await
            .unwrap();
        let out = wait_for_exit(&manager, id).await;
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let manager = ProcessManager::new();
        let id = manager.spawn("ls", dir.path()).await.unwrap();
        let out = wait_for_exit(&manager, id).await;
        assert!(out.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn kill_stops_long_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProcessManager::new();
        let id = manager.spawn("sleep 30", dir.path()).await.unwrap();
        assert!(manager.poll(id).await.unwrap().is_running);

        assert_eq!(manager.kill(id).await.unwrap(), KillOutcome::Killed);
        assert!(!manager.poll(id).await.unwrap().is_running);
        assert_eq!(manager.kill(id).await.unwrap(), KillOutcome::NotRunning);
    }

    #[tokio::test]
    async fn release_forgets_finished_processes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProcessManager::new();
        let id = manager.spawn("echo bye", dir.path()).await.unwrap();
        wait_for_exit(&manager, id).await;
        assert_eq!(manager.tracked().await, 1);

        assert!(manager.release(id).await.unwrap());
        assert_eq!(manager.tracked().await, 0);
        assert!(!manager.release(id).await.unwrap());
        assert!(matches!(
            manager.poll(id).await,
            Err(ProcessError::UnknownProcess(_))
        ));
    }

    #[tokio::test]
    async fn released_running_process_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProcessManager::new();
        let id = manager
            .spawn("sleep 0.3; touch late.txt", dir.path())
            .await
            .unwrap();
        assert!(manager.release(id).await.unwrap());
        assert_eq!(manager.tracked().await, 0);

        for _ in 0..200 {
            if dir.path().join("late.txt").exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("released command was killed");
    }

    #[tokio::test]
    async fn output_is_capped_at_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ProcessManager::new().with_output_limit(100);
        let id = manager
            .spawn("head -c 20000 /dev/zero | tr '\\0' x", dir.path())
            .await
            .unwrap();
        let out = wait_for_exit(&manager, id).await;
        assert_eq!(out.output.len(), 100);
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn unknown_process_is_an_error() {
        let manager = ProcessManager::new();
        let err = manager.poll(ProcessId(99)).await.unwrap_err();
        assert!(matches!(err, ProcessError::UnknownProcess(_)));
    }
}
