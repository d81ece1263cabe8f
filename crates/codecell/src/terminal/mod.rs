//! Interactive terminal sessions
//!
//! Long-lived shell sessions over a pseudo-terminal. Every command line is
//! checked against an allow-list and a blocked-command set before it ever
//! reaches the shell; raw keystrokes (interactive editors need arbitrary
//! bytes) bypass validation but still count as activity.

use serde::Deserialize;
use thiserror::Error;

pub use crate::terminal::guard::{CommandGuard, CommandVerdict};
pub use crate::terminal::session::{
    SuspiciousEntry, TerminalOutput, TerminalSession, TerminalSessionInfo,
};

mod guard;
mod session;

/// Errors that occur during terminal operations
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("failed to open pseudo-terminal: {0}")]
    OpenFailed(String),

    #[error("failed to spawn shell: {0}")]
    SpawnFailed(String),

    #[error("command blocked: {0}")]
    CommandBlocked(String),

    #[error("terminal session already closed")]
    Closed,

    #[error("bad dangerous-command pattern: {0}")]
    BadPattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Policy for terminal sessions
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalPolicy {
    /// Shell to spawn for each session
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Seconds of inactivity before a session is swept
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Absolute session lifetime in seconds, measured from creation.
    /// Activity does not extend it.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Maximum bytes of shell output retained per session; new output
    /// evicts the oldest bytes once over the cap
    #[serde(default = "default_output_cap_bytes")]
    pub output_cap_bytes: usize,

    /// Base commands permitted in command lines
    #[serde(default)]
    pub allowed_commands: Vec<String>,

    /// Base commands rejected outright
    #[serde(default)]
    pub blocked_commands: Vec<String>,
}

impl Default for TerminalPolicy {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            idle_timeout_secs: default_idle_timeout_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            output_cap_bytes: default_output_cap_bytes(),
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
        }
    }
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_session_timeout_secs() -> u64 {
    1800
}

fn default_output_cap_bytes() -> usize {
    256 * 1024
}
