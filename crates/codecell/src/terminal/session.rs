//! A single pseudo-terminal session
//!
//! Each session owns a real shell behind a PTY. Command lines are checked
//! by the [`CommandGuard`] before being forwarded; blocked commands are
//! recorded as suspicious activity and never reach the shell. Output is
//! drained by a reader thread into a bounded buffer.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::terminal::{CommandGuard, CommandVerdict, TerminalError, TerminalPolicy};

/// Command history retained per session
const HISTORY_CAP: usize = 100;

/// Suspicious-activity entries retained per session
const SUSPICIOUS_CAP: usize = 50;

/// Poll interval while waiting for command output
const OUTPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output of one synchronous command execution
#[derive(Debug, Clone, Serialize)]
pub struct TerminalOutput {
    /// Shell output produced by the command
    pub output: String,

    /// Exit code of the command; `None` if the wait timed out
    pub exit_code: Option<i32>,
}

/// A blocked command, recorded for the surrounding platform to inspect
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousEntry {
    pub command: String,
    pub reason: String,
}

/// Metadata snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct TerminalSessionInfo {
    pub user_id: String,
    pub active: bool,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub cwd: String,
    pub history: Vec<String>,
    pub blocked_commands: u64,
    pub suspicious_entries: usize,
}

/// Output state shared with the reader thread
struct SharedOutput {
    pending: Mutex<VecDeque<u8>>,
    exited: AtomicBool,
}

/// A live terminal session
pub struct TerminalSession {
    user_id: String,
    guard: Arc<CommandGuard>,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    output: Arc<SharedOutput>,
    output_cap: usize,

    created_at: Instant,
    last_activity: Instant,
    active: bool,

    history: VecDeque<String>,
    suspicious: VecDeque<SuspiciousEntry>,
    blocked_count: u64,
    /// Best-effort working directory, tracked from accepted `cd` commands.
    /// Display-only; the shell is authoritative.
    cwd: String,
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("user_id", &self.user_id)
            .field("active", &self.active)
            .field("cwd", &self.cwd)
            .field("blocked_count", &self.blocked_count)
            .finish_non_exhaustive()
    }
}

impl TerminalSession {
    /// Open a new session: allocate a PTY, spawn the shell, and start the
    /// reader thread.
    #[instrument(skip_all)]
    pub fn open(
        policy: &TerminalPolicy,
        guard: Arc<CommandGuard>,
        user_id: impl Into<String>,
    ) -> Result<Self, TerminalError> {
        let user_id = user_id.into();
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::OpenFailed(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&policy.shell);
        cmd.env("TERM", "xterm-256color");
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::SpawnFailed(e.to_string()))?;
        // The slave end lives on in the child; dropping ours avoids keeping
        // the PTY open after the shell exits.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::OpenFailed(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::OpenFailed(e.to_string()))?;

        let output = Arc::new(SharedOutput {
            pending: Mutex::new(VecDeque::new()),
            exited: AtomicBool::new(false),
        });

        // PTY reads are blocking; a dedicated thread drains them into the
        // shared buffer and evicts the oldest bytes past the cap.
        let shared = Arc::clone(&output);
        let cap = policy.output_cap_bytes;
        std::thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut pending = shared.pending.lock().unwrap_or_else(|e| e.into_inner());
                        pending.extend(&chunk[..n]);
                        while pending.len() > cap {
                            pending.pop_front();
                        }
                    }
                }
            }
            shared.exited.store(true, Ordering::SeqCst);
        });

        debug!(user_id, shell = policy.shell, "terminal session opened");

        let now = Instant::now();
        Ok(Self {
            user_id,
            guard,
            master: pair.master,
            writer,
            child,
            output,
            output_cap: policy.output_cap_bytes,
            created_at: now,
            last_activity: now,
            active: true,
            history: VecDeque::new(),
            suspicious: VecDeque::new(),
            blocked_count: 0,
            cwd: "~".to_string(),
        })
    }

    /// Send one command line to the shell.
    ///
    /// The line is validated first; a blocked command is recorded, counted,
    /// and returned as an error without touching the shell.
    pub fn send_command(&mut self, line: &str) -> Result<(), TerminalError> {
        self.ensure_active()?;

        match self.guard.check(line) {
            CommandVerdict::Allowed => {}
            CommandVerdict::Blocked { reason } => {
                self.record_blocked(line, &reason);
                return Err(TerminalError::CommandBlocked(reason));
            }
        }

        self.push_history(line);
        self.track_cwd(line);
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Send raw bytes to the shell without validation.
    ///
    /// Interactive programs (editors, REPL prompts) need arbitrary input;
    /// this still resets the idle clock.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<(), TerminalError> {
        self.ensure_active()?;
        self.writer.write_all(data)?;
        self.writer.flush()?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Take whatever output has accumulated since the last call
    pub fn take_output(&mut self) -> Vec<u8> {
        let mut pending = self
            .output
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        pending.drain(..).collect()
    }

    /// Run one command and wait for its output and exit code.
    ///
    /// Appends an echo of a unique marker with `$?` after the command; the
    /// shell expands it once the command finishes, which is how both
    /// completion and the exit code are detected. Times out with whatever
    /// output accumulated and no exit code.
    pub async fn execute_command(
        &mut self,
        line: &str,
        timeout: Duration,
    ) -> Result<TerminalOutput, TerminalError> {
        self.ensure_active()?;

        match self.guard.check(line) {
            CommandVerdict::Allowed => {}
            CommandVerdict::Blocked { reason } => {
                self.record_blocked(line, &reason);
                return Err(TerminalError::CommandBlocked(reason));
            }
        }

        // Drop stale output so the result only contains this command's
        let _ = self.take_output();

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let marker = format!("__done_{nonce}");
        // Matches only the expanded marker; the echoed-back input still
        // contains the literal `$?`.
        let marker_re = Regex::new(&format!("{marker}:(-?\\d+)")).expect("marker regex is static");

        self.push_history(line);
        self.track_cwd(line);
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer
            .write_all(format!("echo {marker}:$?\n").as_bytes())?;
        self.writer.flush()?;
        self.last_activity = Instant::now();

        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        let exit_code = loop {
            collected.extend(self.take_output());
            let text = String::from_utf8_lossy(&collected);
            if let Some(caps) = marker_re.captures(&text) {
                break caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok());
            }
            if Instant::now() >= deadline || self.shell_exited() {
                warn!(user_id = self.user_id, "command output wait timed out");
                break None;
            }
            tokio::time::sleep(OUTPUT_POLL_INTERVAL).await;
        };

        let text = String::from_utf8_lossy(&collected).into_owned();
        let output = text
            .lines()
            .filter(|l| !l.contains(&marker))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(TerminalOutput { output, exit_code })
    }

    /// Resize the PTY
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.ensure_active()?;
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| TerminalError::Io(std::io::Error::other(e.to_string())))?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Whether the shell process has exited on its own
    pub fn shell_exited(&self) -> bool {
        self.output.exited.load(Ordering::SeqCst)
    }

    /// Whether the session has been idle longer than the given timeout
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() >= timeout
    }

    /// Whether the session has outlived its absolute lifetime.
    /// Activity never extends this.
    pub fn is_expired(&self, lifetime: Duration) -> bool {
        self.created_at.elapsed() >= lifetime
    }

    pub fn is_active(&self) -> bool {
        self.active && !self.shell_exited()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn blocked_count(&self) -> u64 {
        self.blocked_count
    }

    pub fn suspicious(&self) -> impl Iterator<Item = &SuspiciousEntry> {
        self.suspicious.iter()
    }

    /// Snapshot of session metadata
    pub fn info(&self) -> TerminalSessionInfo {
        TerminalSessionInfo {
            user_id: self.user_id.clone(),
            active: self.is_active(),
            age_secs: self.created_at.elapsed().as_secs(),
            idle_secs: self.last_activity.elapsed().as_secs(),
            cwd: self.cwd.clone(),
            history: self.history.iter().cloned().collect(),
            blocked_commands: self.blocked_count,
            suspicious_entries: self.suspicious.len(),
        }
    }

    /// Kill the shell and mark the session closed. Idempotent.
    pub fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.child.kill() {
            warn!(user_id = self.user_id, error = %e, "failed to kill shell");
        }
        let _ = self.child.wait();
        debug!(user_id = self.user_id, "terminal session closed");
    }

    fn ensure_active(&self) -> Result<(), TerminalError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TerminalError::Closed)
        }
    }

    fn record_blocked(&mut self, command: &str, reason: &str) {
        warn!(
            user_id = self.user_id,
            command, reason, "blocked terminal command"
        );
        self.blocked_count += 1;
        if self.suspicious.len() == SUSPICIOUS_CAP {
            self.suspicious.pop_front();
        }
        self.suspicious.push_back(SuspiciousEntry {
            command: command.to_string(),
            reason: reason.to_string(),
        });
    }

    fn push_history(&mut self, line: &str) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());
    }

    /// Track `cd` for display purposes. Naive on purpose: relative paths
    /// are joined textually and `..` pops one component.
    fn track_cwd(&mut self, line: &str) {
        let mut parts = line.trim().split_whitespace();
        if parts.next() != Some("cd") {
            return;
        }
        match parts.next() {
            None | Some("~") => self.cwd = "~".to_string(),
            Some("..") => {
                if let Some(pos) = self.cwd.rfind('/') {
                    self.cwd.truncate(pos.max(1));
                }
            }
            Some(path) if path.starts_with('/') => self.cwd = path.to_string(),
            Some(path) => {
                if self.cwd.ends_with('/') {
                    self.cwd.push_str(path);
                } else {
                    self.cwd = format!("{}/{}", self.cwd, path);
                }
            }
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.close();
    }
}
