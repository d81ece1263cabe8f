//! Top-level execution service
//!
//! The facade the surrounding platform talks to: one-shot executions,
//! file-carrying executions with downloadable outputs, interactive program
//! sessions, and shell terminals, all keyed by opaque session ids.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, instrument};

use crate::config::Config;
use crate::runner::{
    ExecuteError, InteractiveError, InteractiveEventStream, Runner,
};
use crate::sandbox::Sandbox;
use crate::security::SecurityError;
use crate::session::{
    ExecutionContext, InteractiveContext, SessionEntry, SessionError, SessionId, SessionRegistry,
};
use crate::terminal::{CommandGuard, TerminalError, TerminalOutput, TerminalSession, TerminalSessionInfo};
use crate::types::{ExecutionResult, GeneratedFile, ResourceLimits, SecurityViolation, UploadedFile};

/// How long `execute_command` waits for a terminal command to finish
const COMMAND_WAIT: Duration = Duration::from_secs(30);

/// Errors surfaced by the execution service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Source was rejected before any process spawned
    #[error("validation failed with {} violation(s)", .0.len())]
    Validation(Vec<SecurityViolation>),

    /// Compiler front-end failed; diagnostics are raw compiler output
    #[error("compilation failed: {diagnostics}")]
    Compilation { exit_code: i32, diagnostics: String },

    #[error("a user id is required for terminal sessions")]
    AuthenticationRequired,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Failure in the execution machinery itself
    #[error("execution failed: {0}")]
    Internal(String),
}

impl From<ExecuteError> for ServiceError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Validation(violations) => ServiceError::Validation(violations),
            ExecuteError::Compile(crate::runner::CompileError::Failed { exit_code, output }) => {
                ServiceError::Compilation {
                    exit_code,
                    diagnostics: output,
                }
            }
            ExecuteError::Security(e) => ServiceError::Security(e),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<InteractiveError> for ServiceError {
    fn from(err: InteractiveError) -> Self {
        match err {
            InteractiveError::Validation(violations) => ServiceError::Validation(violations),
            InteractiveError::Compile(crate::runner::CompileError::Failed { exit_code, output }) => {
                ServiceError::Compilation {
                    exit_code,
                    diagnostics: output,
                }
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// The execution service
///
/// Cheap to clone; all clones share the same runner, registry, and guard.
#[derive(Debug, Clone)]
pub struct ExecutionService {
    runner: Arc<Runner>,
    registry: Arc<SessionRegistry>,
    guard: Arc<CommandGuard>,
}

impl ExecutionService {
    /// Build a service from a configuration
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let guard = Arc::new(CommandGuard::new(&config.terminal)?);
        let runner = Arc::new(Runner::new(config).map_err(ServiceError::Security)?);
        Ok(Self {
            runner,
            registry: Arc::new(SessionRegistry::new()),
            guard,
        })
    }

    pub fn config(&self) -> &Config {
        self.runner.config()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Spawn the periodic cleanup sweeper.
    ///
    /// The returned task runs until [`shutdown`](Self::shutdown) and then
    /// tears down every remaining session.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let config = self.config();
        let interval = Duration::from_secs(config.sweep_interval_secs);
        let idle = Duration::from_secs(config.terminal.idle_timeout_secs);
        let lifetime = Duration::from_secs(config.terminal.session_timeout_secs);
        tokio::spawn(Arc::clone(&self.registry).run_sweeper(interval, idle, lifetime))
    }

    /// Stop the sweeper; remaining sessions are torn down by its task
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    // ------------------------------------------------------------------
    // Batch execution

    /// Run source to completion and return the result.
    ///
    /// The environment is created and destroyed within this call; nothing
    /// outlives it.
    #[instrument(skip(self, source, stdin, limits))]
    pub async fn execute(
        &self,
        language_id: &str,
        source: &str,
        stdin: Option<&[u8]>,
        limits: Option<&ResourceLimits>,
    ) -> Result<ExecutionResult, ServiceError> {
        Ok(self.runner.execute(language_id, source, stdin, limits).await?)
    }

    /// Run source with uploaded files; the environment is kept as a session
    /// so generated files remain downloadable until the session is closed
    /// or swept.
    #[instrument(skip(self, source, stdin, files, limits))]
    pub async fn execute_with_files(
        &self,
        language_id: &str,
        source: &str,
        stdin: Option<&[u8]>,
        files: &[UploadedFile],
        limits: Option<&ResourceLimits>,
    ) -> Result<(SessionId, ExecutionResult), ServiceError> {
        let mut sandbox = Sandbox::create(self.config().docker_binary())
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        let outcome = match self
            .runner
            .execute_in_sandbox(&sandbox, language_id, source, stdin, files, limits)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                sandbox.cleanup().await;
                return Err(e.into());
            }
        };

        let now = Instant::now();
        let id = self.registry.insert(SessionEntry::Execution(ExecutionContext {
            sandbox,
            generated: outcome.result.generated_files.clone(),
            created_at: now,
            last_activity: now,
        }));
        info!(%id, files = outcome.result.generated_files.len(), "execution session created");
        Ok((id, outcome.result))
    }

    /// List files generated by a session's execution
    pub async fn list_session_files(
        &self,
        id: SessionId,
    ) -> Result<Vec<GeneratedFile>, ServiceError> {
        let entry = self.registry.get(id)?;
        let mut entry = entry.lock().await;
        match &mut *entry {
            SessionEntry::Execution(ctx) => {
                ctx.last_activity = Instant::now();
                Ok(ctx.generated.clone())
            }
            _ => Err(SessionError::WrongKind(id, "execution").into()),
        }
    }

    /// Download one generated file; returns the bytes and whether they were
    /// truncated to the size cap
    pub async fn download_session_file(
        &self,
        id: SessionId,
        relative_path: &str,
    ) -> Result<(Vec<u8>, bool), ServiceError> {
        let entry = self.registry.get(id)?;
        let mut entry = entry.lock().await;
        match &mut *entry {
            SessionEntry::Execution(ctx) => {
                ctx.last_activity = Instant::now();
                crate::workspace::read_generated(&ctx.sandbox, &self.config().upload, relative_path)
                    .await
                    .map_err(|e| ServiceError::Internal(e.to_string()))
            }
            _ => Err(SessionError::WrongKind(id, "execution").into()),
        }
    }

    // ------------------------------------------------------------------
    // Interactive program sessions

    /// Start an interactive program session.
    ///
    /// Returns the session id and the event stream; input goes through
    /// [`send_interactive_input`](Self::send_interactive_input).
    #[instrument(skip(self, source, limits))]
    pub async fn create_interactive_session(
        &self,
        language_id: &str,
        source: &str,
        limits: Option<&ResourceLimits>,
    ) -> Result<(SessionId, InteractiveEventStream), ServiceError> {
        let mut sandbox = Sandbox::create(self.config().docker_binary())
            .map_err(|e| ServiceError::Internal(e.to_string()))?;

        let session = match self
            .runner
            .run_interactive(&sandbox, language_id, source, limits)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                sandbox.cleanup().await;
                return Err(e.into());
            }
        };

        let (handle, stream) = session.into_stream();
        let now = Instant::now();
        let id = self
            .registry
            .insert(SessionEntry::Interactive(InteractiveContext {
                sandbox,
                handle,
                created_at: now,
                last_activity: now,
            }));
        info!(%id, language_id, "interactive session created");
        Ok((id, stream))
    }

    /// Forward input to an interactive program's stdin
    pub async fn send_interactive_input(
        &self,
        id: SessionId,
        data: &[u8],
    ) -> Result<(), ServiceError> {
        let entry = self.registry.get(id)?;
        let mut entry = entry.lock().await;
        match &mut *entry {
            SessionEntry::Interactive(ctx) => {
                ctx.last_activity = Instant::now();
                ctx.handle
                    .send(data.to_vec())
                    .await
                    .map_err(ServiceError::from)
            }
            _ => Err(SessionError::WrongKind(id, "interactive").into()),
        }
    }

    /// Kill an interactive program and free its session
    pub async fn terminate_interactive_session(&self, id: SessionId) -> Result<(), ServiceError> {
        // remove() tears down the entry, which terminates the program
        self.registry.remove(id).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Terminal sessions

    /// Create a shell terminal session for a user
    #[instrument(skip(self))]
    pub fn create_terminal(&self, user_id: &str) -> Result<SessionId, ServiceError> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::AuthenticationRequired);
        }
        let session = TerminalSession::open(
            &self.config().terminal,
            Arc::clone(&self.guard),
            user_id,
        )?;
        let id = self.registry.insert(SessionEntry::Terminal(session));
        info!(%id, user_id, "terminal session created");
        Ok(id)
    }

    /// Send a command line to a terminal.
    ///
    /// The line is validated; blocked commands surface as
    /// [`TerminalError::CommandBlocked`] and never reach the shell.
    pub async fn terminal_command(&self, id: SessionId, line: &str) -> Result<(), ServiceError> {
        self.with_terminal(id, |session| session.send_command(line))
            .await
    }

    /// Send raw bytes to a terminal, bypassing command validation.
    ///
    /// Interactive programs inside the terminal need arbitrary keystrokes.
    pub async fn terminal_input(&self, id: SessionId, data: &[u8]) -> Result<(), ServiceError> {
        self.with_terminal(id, |session| session.send_raw(data)).await
    }

    /// Drain pending terminal output
    pub async fn terminal_output(&self, id: SessionId) -> Result<Vec<u8>, ServiceError> {
        self.with_terminal(id, |session| Ok(session.take_output()))
            .await
    }

    /// Resize a terminal's PTY
    pub async fn terminal_resize(
        &self,
        id: SessionId,
        cols: u16,
        rows: u16,
    ) -> Result<(), ServiceError> {
        self.with_terminal(id, |session| session.resize(cols, rows))
            .await
    }

    /// Run one command in a terminal and wait for its output and exit code
    pub async fn execute_command(
        &self,
        id: SessionId,
        command: &str,
    ) -> Result<TerminalOutput, ServiceError> {
        let entry = self.registry.get(id)?;
        let mut entry = entry.lock().await;
        match &mut *entry {
            SessionEntry::Terminal(session) => {
                Ok(session.execute_command(command, COMMAND_WAIT).await?)
            }
            _ => Err(SessionError::WrongKind(id, "terminal").into()),
        }
    }

    /// Get a metadata snapshot of a terminal session
    pub async fn get_terminal_info(&self, id: SessionId) -> Result<TerminalSessionInfo, ServiceError> {
        self.with_terminal(id, |session| Ok(session.info())).await
    }

    /// Close any session explicitly
    pub async fn close_session(&self, id: SessionId) -> Result<(), ServiceError> {
        self.registry.remove(id).await?;
        Ok(())
    }

    async fn with_terminal<T>(
        &self,
        id: SessionId,
        op: impl FnOnce(&mut TerminalSession) -> Result<T, TerminalError>,
    ) -> Result<T, ServiceError> {
        let entry = self.registry.get(id)?;
        let mut entry = entry.lock().await;
        match &mut *entry {
            SessionEntry::Terminal(session) => Ok(op(session)?),
            _ => Err(SessionError::WrongKind(id, "terminal").into()),
        }
    }
}
