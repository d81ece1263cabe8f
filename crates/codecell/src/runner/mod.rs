//! Execution orchestrator
//!
//! High-level pipeline for running untrusted code: validate, stage, compile,
//! run under resource ceilings, collect outputs, and tear the environment
//! down unconditionally.

use thiserror::Error;

pub use crate::runner::compile::{CompileResult, compile};
pub use crate::runner::execute::{ExecutionOutcome, execute_in};
pub use crate::runner::interactive::{
    InteractiveEvent, InteractiveEventStream, InteractiveSession, InteractiveSessionHandle,
};

mod compile;
mod execute;
mod interactive;

use crate::config::{Config, ConfigError};
use crate::sandbox::{Sandbox, SandboxError};
use crate::security::{SecurityError, Validator};
use crate::types::{ExecutionResult, ResourceLimits, SecurityViolation, UploadedFile};
use crate::workspace::WorkspaceError;

/// Errors that occur during compilation
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation failed with exit code {exit_code}: {output}")]
    Failed { exit_code: i32, output: String },

    #[error("compilation timed out")]
    TimedOut,

    #[error("language '{0}' does not support compilation")]
    NotCompiled(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Errors that occur during execution
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The source failed security validation; no process was spawned
    #[error("validation failed with {} violation(s)", .0.len())]
    Validation(Vec<SecurityViolation>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("compilation error: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Errors that occur during interactive sessions
#[derive(Debug, Error)]
pub enum InteractiveError {
    /// The source failed security validation; no process was spawned
    #[error("validation failed with {} violation(s)", .0.len())]
    Validation(Vec<SecurityViolation>),

    #[error("session already terminated")]
    Terminated,

    #[error("compilation error: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// High-level runner for code execution
///
/// Holds the immutable language registry and the compiled validator; cheap
/// to share behind an `Arc` across concurrent sessions.
#[derive(Debug)]
pub struct Runner {
    config: Config,
    validator: Validator,
}

impl Runner {
    /// Create a new runner with the given configuration
    pub fn new(config: Config) -> Result<Self, SecurityError> {
        let validator = Validator::new(&config)?;
        Ok(Self { config, validator })
    }

    /// Create a new runner with the embedded default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default()).expect("embedded default config should be valid")
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the validator
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validate source without executing it
    pub fn validate(
        &self,
        language_id: &str,
        source: &str,
    ) -> Result<Vec<SecurityViolation>, SecurityError> {
        Ok(self
            .validator
            .validate(language_id, source, None)?
            .into_violations())
    }

    /// Run source code to completion in a fresh sandbox.
    ///
    /// The sandbox is created here and torn down on every exit path,
    /// including validation rejection (where it is never created at all)
    /// and orchestrator errors.
    pub async fn execute(
        &self,
        language_id: &str,
        source: &str,
        stdin: Option<&[u8]>,
        limits: Option<&ResourceLimits>,
    ) -> Result<ExecutionResult, ExecuteError> {
        let outcome = self
            .execute_with_files(language_id, source, stdin, &[], limits)
            .await?;
        Ok(outcome.result)
    }

    /// Run source code with uploaded input files in a fresh sandbox.
    ///
    /// Like [`execute`](Self::execute) but stages the upload set first and
    /// collects generated files into the result.
    pub async fn execute_with_files(
        &self,
        language_id: &str,
        source: &str,
        stdin: Option<&[u8]>,
        files: &[UploadedFile],
        limits: Option<&ResourceLimits>,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        // Hard precondition: validation rejects before any sandbox exists.
        let report = self.validator.validate(language_id, source, None)?;
        if !report.is_valid() {
            return Err(ExecuteError::Validation(report.into_violations()));
        }
        let language = self.config.get_language(language_id)?;

        let mut sandbox = Sandbox::create(self.config.docker_binary())?;
        let result = execute_in(
            &sandbox,
            &self.config,
            language,
            source.as_bytes(),
            stdin,
            files,
            limits,
        )
        .await;
        sandbox.cleanup().await;
        result
    }

    /// Run in a caller-owned sandbox without tearing it down.
    ///
    /// Used for session-backed executions where generated files must stay
    /// downloadable after the run; the session registry owns teardown.
    pub async fn execute_in_sandbox(
        &self,
        sandbox: &Sandbox,
        language_id: &str,
        source: &str,
        stdin: Option<&[u8]>,
        files: &[UploadedFile],
        limits: Option<&ResourceLimits>,
    ) -> Result<ExecutionOutcome, ExecuteError> {
        let report = self.validator.validate(language_id, source, None)?;
        if !report.is_valid() {
            return Err(ExecuteError::Validation(report.into_violations()));
        }
        let language = self.config.get_language(language_id)?;

        execute_in(
            sandbox,
            &self.config,
            language,
            source.as_bytes(),
            stdin,
            files,
            limits,
        )
        .await
    }

    /// Start an interactive program session in a caller-owned sandbox
    pub async fn run_interactive(
        &self,
        sandbox: &Sandbox,
        language_id: &str,
        source: &str,
        limits: Option<&ResourceLimits>,
    ) -> Result<InteractiveSession, InteractiveError> {
        let report = self.validator.validate(language_id, source, None)?;
        if !report.is_valid() {
            return Err(InteractiveError::Validation(report.into_violations()));
        }
        let language = self.config.get_language(language_id)?;

        InteractiveSession::start(sandbox, &self.config, language, source.as_bytes(), limits).await
    }
}
