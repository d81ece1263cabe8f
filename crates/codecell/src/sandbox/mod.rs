//! Docker-backed sandbox layer
//!
//! Each execution gets its own named container pinned to the language's
//! image, with network disabled and memory/CPU/pid ceilings applied by the
//! container runtime. The container runtime boundary is the actual security
//! backstop; static validation in front of it is only a usability filter.

use thiserror::Error;

pub use crate::sandbox::command::{
    ContainerCommand, SANDBOX_WORKDIR, inspect_oom_args, remove_args,
};
pub use crate::sandbox::container::{BatchOutput, Sandbox};
pub use crate::sandbox::process::SandboxProcess;

mod command;
mod container;
mod process;

/// Errors that occur during sandbox operations
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox workspace: {0}")]
    CreateFailed(String),

    #[error("failed to spawn docker process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("docker command failed: {0}")]
    CommandFailed(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stdin is closed")]
    StdinClosed,
}
