//! Codecell — sandboxed multi-language code execution and terminals
//!
//! Runs untrusted source code and shell commands inside per-request docker
//! containers with no network access and hard resource ceilings. The main
//! entry point is [`ExecutionService`], which exposes:
//!
//! - one-shot executions ([`ExecutionService::execute`])
//! - file-carrying executions with downloadable outputs
//!   ([`ExecutionService::execute_with_files`])
//! - interactive program sessions with streamed output
//! - shell terminal sessions with per-command validation
//!
//! Languages are entirely configuration-driven: each entry in the config
//! names an image, a run (and optionally compile) command, and the
//! forbidden source patterns the validator enforces before anything runs.
//!
//! ```no_run
//! use codecell::{Config, ExecutionService};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ExecutionService::new(Config::default())?;
//! let result = service.execute("python3", "print(2 + 2)", None, None).await?;
//! assert_eq!(result.stdout, "4\n");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod runner;
pub mod sandbox;
pub mod security;
pub mod session;
pub mod service;
pub mod terminal;
pub mod types;
pub mod workspace;

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use runner::{CompileError, ExecuteError, InteractiveError, Runner};
pub use security::{SecurityError, ValidationReport, Validator};
pub use service::{ExecutionService, ServiceError};
pub use session::{SessionError, SessionId, SessionRegistry};
pub use terminal::{CommandGuard, TerminalError, TerminalPolicy, TerminalSession};
pub use types::{
    ExecutionResult, ExecutionStatus, GeneratedFile, ResourceLimits, SecurityViolation,
    UploadedFile, ViolationKind,
};
