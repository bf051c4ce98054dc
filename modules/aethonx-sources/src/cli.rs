//! CLI-subprocess engine.
//!
//! The shared substrate under every CLI-backed source: spawns the external
//! tool, streams its stdout through a pluggable line handler, drains stderr
//! concurrently, enforces the per-source timeout, and guarantees the child
//! is reaped on every exit path.
//!
//! The stderr drainer is always joined before `execute` returns. If stdout
//! reaches EOF while stderr is still blocked on a full kernel buffer,
//! waiting on the child deadlocks; the drain task therefore runs for the
//! whole subprocess lifetime and the reap sequence is wait-child then
//! join-drain.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aethonx_common::{AethonxError, CancelToken};

use crate::source::ProgressUpdate;

/// Token ceiling for one stdout line. Historical-URL and JSONL tools emit
/// very long lines; anything beyond this is skipped, not truncated.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Bounded progress channel; emits drop when it is full.
const PROGRESS_BUFFER: usize = 64;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// Flow control returned by a line handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFlow {
    Continue,
    /// Stop dispatching: remaining stdout is drained without being handed
    /// to the handler. Used by volume caps.
    Stop,
}

/// Per-line callback. The engine owns the line buffer; implementations must
/// copy anything they keep beyond the call. Handler errors are non-fatal:
/// the engine logs and keeps dispatching.
pub trait LineHandler: Send {
    fn process_line(&mut self, line: &str) -> Result<LineFlow, AethonxError>;

    /// Invoked once after stdout EOF. Errors are warned and ignored.
    fn finalize(&mut self) -> Result<(), AethonxError> {
        Ok(())
    }
}

/// Optional stdin feed: lines are written one per line, then stdin closes.
#[derive(Debug, Clone)]
pub enum ExecInput {
    None,
    Lines(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ExecOutcome {
    /// Exit code; None when the child was killed by a signal or torn down
    /// through `close()`.
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub lines: u64,
    pub stopped_early: bool,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct CliEngine {
    tool: String,
    exec_path: PathBuf,
    timeout: Duration,
    child: Mutex<Option<Child>>,
    progress_tx: Mutex<Option<mpsc::Sender<ProgressUpdate>>>,
    progress_rx: Mutex<Option<mpsc::Receiver<ProgressUpdate>>>,
    closed: AtomicBool,
}

impl CliEngine {
    pub fn new(tool: &str, exec_path: PathBuf, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        Self {
            tool: tool.to_string(),
            exec_path,
            timeout,
            child: Mutex::new(None),
            progress_tx: Mutex::new(Some(tx)),
            progress_rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn exec_path(&self) -> &Path {
        &self.exec_path
    }

    /// Non-empty executable path and a positive timeout.
    pub fn validate(&self) -> Result<(), AethonxError> {
        if self.exec_path.as_os_str().is_empty() {
            return Err(AethonxError::Validation(format!(
                "{}: executable path must not be empty",
                self.tool
            )));
        }
        if self.timeout.is_zero() {
            return Err(AethonxError::Validation(format!(
                "{}: timeout must be positive",
                self.tool
            )));
        }
        Ok(())
    }

    /// Spawn the tool and stream its stdout through `handler`.
    ///
    /// Returns the outcome and the full stderr text. Spawn failures and
    /// cancellation/timeout are `Err`; a non-zero exit is Ok, and callers
    /// check `ExecOutcome::success` and decide whether produced artifacts
    /// demote the failure to a warning.
    pub async fn execute(
        &self,
        cancel: &CancelToken,
        args: &[String],
        input: ExecInput,
        handler: &mut dyn LineHandler,
    ) -> Result<(ExecOutcome, String), AethonxError> {
        let started = Instant::now();
        let deadline = cancel.child_with_timeout(self.timeout);

        debug!(tool = self.tool.as_str(), ?args, "spawning subprocess");
        let mut command = Command::new(&self.exec_path);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command.stdin(match &input {
            ExecInput::None => Stdio::null(),
            ExecInput::Lines(_) => Stdio::piped(),
        });

        let mut child = command.spawn().map_err(|e| {
            AethonxError::Subprocess(format!("failed to spawn {}: {e}", self.tool))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            AethonxError::Subprocess(format!("{}: stdout pipe missing", self.tool))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            AethonxError::Subprocess(format!("{}: stderr pipe missing", self.tool))
        })?;

        if let ExecInput::Lines(lines) = input {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                AethonxError::Subprocess(format!("{}: stdin pipe missing", self.tool))
            })?;
            tokio::spawn(async move {
                for line in lines {
                    if stdin.write_all(line.as_bytes()).await.is_err()
                        || stdin.write_all(b"\n").await.is_err()
                    {
                        break;
                    }
                }
                let _ = stdin.shutdown().await;
            });
        }

        // Record the handle so close() can reach it.
        {
            let mut guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(child);
        }

        // Stderr drain runs for the whole subprocess lifetime.
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let mut reader = BufReader::with_capacity(64 * 1024, stdout);
        let mut buf: Vec<u8> = Vec::with_capacity(4096);
        let mut lines = 0u64;
        let mut stopped_early = false;
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = deadline.cancelled() => {
                    cancelled = true;
                    break;
                }
                read = read_line_bounded(&mut reader, &mut buf, MAX_LINE_BYTES) => match read {
                    Ok(BoundedRead::Eof) => break,
                    Ok(BoundedRead::Oversized) => {
                        warn!(tool = self.tool.as_str(), "stdout line over size ceiling, skipped");
                    }
                    Ok(BoundedRead::Line) => {
                        if stopped_early {
                            // Stop signal received: drain without dispatch so
                            // the child never blocks on a full pipe.
                            continue;
                        }
                        lines += 1;
                        let text = String::from_utf8_lossy(&buf);
                        let text = text.trim_end_matches('\r');
                        match handler.process_line(text) {
                            Ok(LineFlow::Continue) => {}
                            Ok(LineFlow::Stop) => {
                                debug!(tool = self.tool.as_str(), lines, "handler stop signal");
                                stopped_early = true;
                            }
                            Err(e) => {
                                warn!(tool = self.tool.as_str(), error = %e, "line handler error, continuing");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(tool = self.tool.as_str(), error = %e, "stdout read error");
                        break;
                    }
                },
            }
        }

        if !cancelled {
            if let Err(e) = handler.finalize() {
                warn!(tool = self.tool.as_str(), error = %e, "handler finalize failed");
            }
        }

        // Reap: wait for the subprocess, then join the stderr drainer. Both
        // happen on every exit path. A cancelled child gets the graceful
        // interrupt first and is forced only after the grace window.
        let child = {
            let mut guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let exit_code = match child {
            Some(mut child) => {
                if cancelled {
                    terminate_then_kill(&self.tool, &mut child).await;
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!(tool = self.tool.as_str(), error = %e, "wait failed");
                        None
                    }
                }
            }
            // close() already tore the handle down.
            None => None,
        };
        let stderr_text = match stderr_task.await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        };

        let outcome = ExecOutcome {
            exit_code,
            duration: started.elapsed(),
            lines,
            stopped_early,
        };

        if cancelled {
            debug!(
                tool = self.tool.as_str(),
                duration = ?outcome.duration,
                "subprocess cancelled and reaped"
            );
            return Err(AethonxError::Cancelled);
        }

        debug!(
            tool = self.tool.as_str(),
            exit_code = ?outcome.exit_code,
            lines = outcome.lines,
            duration = ?outcome.duration,
            "subprocess complete"
        );
        Ok((outcome, stderr_text))
    }

    /// Idempotent teardown: closes the progress channel exactly once and
    /// runs the terminate sequence on a still-running child exactly once
    /// (graceful interrupt, force-kill after the grace window), then clears
    /// the handle. Safe to call from any task, concurrently.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut guard = self.progress_tx.lock().unwrap_or_else(|e| e.into_inner());
            guard.take(); // dropping the sender closes the channel
        }
        // Take the handle out of the lock before awaiting the grace window;
        // a concurrent execute() sees the cleared handle and skips its reap.
        let child = {
            let mut guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(mut child) = child {
            if child.try_wait().ok().flatten().is_none() {
                terminate_then_kill(&self.tool, &mut child).await;
            }
        }
    }

    /// Non-blocking progress emit; dropped when the channel is full or the
    /// engine is closed.
    pub fn emit_progress(&self, count: u64, message: &str) {
        let guard = self.progress_tx.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.try_send(ProgressUpdate {
                source: self.tool.clone(),
                count,
                message: message.to_string(),
            });
        }
    }

    /// Take the progress receiver. Yields once.
    pub fn take_progress(&self) -> Option<mpsc::Receiver<ProgressUpdate>> {
        let mut guard = self.progress_rx.lock().unwrap_or_else(|e| e.into_inner());
        guard.take()
    }

    /// `-version` under a short deadline, falling back to `-h`. Succeeds
    /// when the tool runs at all, whatever it exits with.
    pub async fn health_check(&self, cancel: &CancelToken) -> Result<(), AethonxError> {
        for flag in ["-version", "-h"] {
            let probe = tokio::time::timeout(
                HEALTH_CHECK_TIMEOUT,
                Command::new(&self.exec_path)
                    .arg(flag)
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .stdin(Stdio::null())
                    .status(),
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(AethonxError::Cancelled),
                result = probe => {
                    if matches!(result, Ok(Ok(_))) {
                        return Ok(());
                    }
                }
            }
        }
        Err(AethonxError::Subprocess(format!(
            "{}: health check failed for {}",
            self.tool,
            self.exec_path.display()
        )))
    }
}

// ---------------------------------------------------------------------------
// Subprocess teardown
// ---------------------------------------------------------------------------

/// Grace window between the graceful interrupt and the forced kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Graceful interrupt: SIGTERM on Unix, so the tool can flush output and
/// release locks before dying. Returns false when no signal was delivered.
fn send_terminate(child: &Child) -> bool {
    #[cfg(unix)]
    {
        match child.id() {
            // SAFETY: kill(2) with a live pid and a valid signal number.
            Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
            None => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child;
        false
    }
}

/// Graceful terminate, then force-kill if the child outlives the grace
/// window. Tools that trap the interrupt still die on the second step.
async fn terminate_then_kill(tool: &str, child: &mut Child) {
    if send_terminate(child) {
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
            return; // exited within the grace window
        }
        debug!(tool, "grace window expired, forcing kill");
    }
    let _ = child.kill().await;
}

// ---------------------------------------------------------------------------
// Executable resolution
// ---------------------------------------------------------------------------

/// Resolve a tool to an executable path: an explicit override wins, else the
/// first PATH hit. A missing tool is a config error carrying the install
/// hint. A `-version` probe runs best-effort for the log.
pub async fn resolve_executable(
    tool: &str,
    override_path: Option<&str>,
    install_hint: &str,
) -> Result<PathBuf, AethonxError> {
    let path = match override_path.filter(|p| !p.trim().is_empty()) {
        Some(p) => {
            let path = PathBuf::from(p);
            if !path.is_file() {
                return Err(AethonxError::Config(format!(
                    "{tool}: configured exec_path {p} does not exist"
                )));
            }
            path
        }
        None => search_path(tool).ok_or_else(|| {
            AethonxError::Config(format!("{tool} not found in PATH; {install_hint}"))
        })?,
    };

    // Best-effort version probe; failures only lose a log line.
    let probe = tokio::time::timeout(
        VERSION_PROBE_TIMEOUT,
        Command::new(&path)
            .arg("-version")
            .stdin(Stdio::null())
            .output(),
    )
    .await;
    if let Ok(Ok(output)) = probe {
        let text = String::from_utf8_lossy(&output.stdout);
        if let Some(first) = text.lines().next() {
            debug!(tool, version = first, "tool version probe");
        }
    }

    Ok(path)
}

fn search_path(tool: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(tool);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Bounded line reads
// ---------------------------------------------------------------------------

enum BoundedRead {
    Line,
    /// The line exceeded the ceiling; its bytes were consumed and discarded.
    Oversized,
    Eof,
}

async fn read_line_bounded<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<BoundedRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut oversized = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            // EOF: a trailing unterminated line still counts.
            return Ok(if oversized {
                BoundedRead::Oversized
            } else if buf.is_empty() {
                BoundedRead::Eof
            } else {
                BoundedRead::Line
            });
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if !oversized {
                    buf.extend_from_slice(&available[..pos]);
                }
                reader.consume(pos + 1);
                return Ok(if oversized {
                    BoundedRead::Oversized
                } else {
                    BoundedRead::Line
                });
            }
            None => {
                let len = available.len();
                if !oversized {
                    buf.extend_from_slice(available);
                    if buf.len() > max {
                        oversized = true;
                        buf.clear();
                    }
                }
                reader.consume(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_reader_splits_lines() {
        let data: &[u8] = b"one\ntwo\r\nthree";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();

        assert!(matches!(
            read_line_bounded(&mut reader, &mut buf, 1024).await.unwrap(),
            BoundedRead::Line
        ));
        assert_eq!(buf, b"one");
        read_line_bounded(&mut reader, &mut buf, 1024).await.unwrap();
        assert_eq!(buf, b"two\r");
        assert!(matches!(
            read_line_bounded(&mut reader, &mut buf, 1024).await.unwrap(),
            BoundedRead::Line
        ));
        assert_eq!(buf, b"three");
        assert!(matches!(
            read_line_bounded(&mut reader, &mut buf, 1024).await.unwrap(),
            BoundedRead::Eof
        ));
    }

    #[tokio::test]
    async fn bounded_reader_skips_oversized() {
        let mut data = vec![b'x'; 100];
        data.push(b'\n');
        data.extend_from_slice(b"ok\n");
        let mut reader = BufReader::new(&data[..]);
        let mut buf = Vec::new();

        assert!(matches!(
            read_line_bounded(&mut reader, &mut buf, 10).await.unwrap(),
            BoundedRead::Oversized
        ));
        assert!(matches!(
            read_line_bounded(&mut reader, &mut buf, 10).await.unwrap(),
            BoundedRead::Line
        ));
        assert_eq!(buf, b"ok");
    }

    #[test]
    fn validate_rejects_empty_path_and_zero_timeout() {
        let engine = CliEngine::new("tool", PathBuf::new(), Duration::from_secs(1));
        assert!(engine.validate().is_err());
        let engine = CliEngine::new("tool", PathBuf::from("/bin/true"), Duration::ZERO);
        assert!(engine.validate().is_err());
        let engine = CliEngine::new("tool", PathBuf::from("/bin/true"), Duration::from_secs(1));
        assert!(engine.validate().is_ok());
    }
}
