use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock time limit in milliseconds
    #[serde(default)]
    pub wall_time_ms: Option<u64>,

    /// Memory limit in bytes
    #[serde(default)]
    pub memory_bytes: Option<u64>,

    /// CPU share (fraction of one core, e.g. 0.5)
    #[serde(default)]
    pub cpu_shares: Option<f64>,

    /// Maximum number of processes/threads
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum captured output size in bytes (per stream)
    #[serde(default)]
    pub max_output_bytes: Option<u64>,

    /// Extra time before force-killing (grace period) in milliseconds
    #[serde(default)]
    pub grace_ms: Option<u64>,
}

impl ResourceLimits {
    /// 1 kilobyte in bytes
    pub const KB: u64 = 1024;
    /// 1 megabyte in bytes
    pub const MB: u64 = 1024 * 1024;
    /// 1 gigabyte in bytes
    pub const GB: u64 = 1024 * 1024 * 1024;

    /// Create new resource limits with all fields set to None
    pub fn none() -> Self {
        Self {
            wall_time_ms: None,
            memory_bytes: None,
            cpu_shares: None,
            max_processes: None,
            max_output_bytes: None,
            grace_ms: None,
        }
    }

    /// Set the wall clock time limit in milliseconds
    pub fn with_wall_time_ms(mut self, ms: u64) -> Self {
        self.wall_time_ms = Some(ms);
        self
    }

    /// Set the memory limit in bytes
    pub fn with_memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Set the CPU share
    pub fn with_cpu_shares(mut self, shares: f64) -> Self {
        self.cpu_shares = Some(shares);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum captured output size in bytes
    pub fn with_max_output_bytes(mut self, bytes: u64) -> Self {
        self.max_output_bytes = Some(bytes);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            wall_time_ms: overrides.wall_time_ms.or(self.wall_time_ms),
            memory_bytes: overrides.memory_bytes.or(self.memory_bytes),
            cpu_shares: overrides.cpu_shares.or(self.cpu_shares),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output_bytes: overrides.max_output_bytes.or(self.max_output_bytes),
            grace_ms: overrides.grace_ms.or(self.grace_ms),
        }
    }

    /// Total time budget before the environment is force-killed.
    ///
    /// Saturates rather than overflowing on absurd caller-supplied limits.
    pub fn deadline_ms(&self) -> u64 {
        self.wall_time_ms
            .unwrap_or(5_000)
            .saturating_add(self.grace_ms.unwrap_or(500))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            wall_time_ms: Some(5_000),
            memory_bytes: Some(256 * Self::MB),
            cpu_shares: Some(0.5),
            max_processes: Some(64),
            max_output_bytes: Some(Self::MB),
            grace_ms: Some(500),
        }
    }
}

/// Result of an execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Execution status
    pub status: ExecutionStatus,

    /// Captured standard output (possibly partial on timeout)
    pub stdout: String,

    /// Captured standard error (possibly partial on timeout)
    pub stderr: String,

    /// Exit code if the program exited normally
    pub exit_code: Option<i32>,

    /// Wall clock time used in milliseconds
    pub elapsed_ms: u64,

    /// Files created by the program inside its workspace
    pub generated_files: Vec<GeneratedFile>,
}

impl ExecutionResult {
    /// Check if the execution was successful (ran to completion with exit code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Ok) && self.exit_code == Some(0)
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Ok,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            elapsed_ms: 0,
            generated_files: Vec::new(),
        }
    }
}

/// Status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Program exited normally
    #[serde(rename = "ok")]
    Ok,

    /// Program ran and exited with a non-zero code
    #[serde(rename = "runtime_error")]
    RuntimeError,

    /// Wall clock limit exceeded; the environment was force-killed
    #[serde(rename = "timed_out")]
    TimedOut,

    /// A resource ceiling (memory, process count) was tripped
    #[serde(rename = "resource_exceeded")]
    ResourceExceeded,

    /// Failure in the execution machinery itself
    #[serde(rename = "internal_error")]
    InternalError,
}

impl ExecutionStatus {
    /// Classify a finished run from its exit code and OOM flag.
    ///
    /// Docker reports 137 (128+SIGKILL) when the kernel kills a process; with
    /// the OOM flag set that is a memory ceiling trip rather than a plain crash.
    pub fn from_exit(exit_code: Option<i32>, oom_killed: bool) -> Self {
        if oom_killed {
            return ExecutionStatus::ResourceExceeded;
        }
        match exit_code {
            Some(0) => ExecutionStatus::Ok,
            Some(_) => ExecutionStatus::RuntimeError,
            None => ExecutionStatus::InternalError,
        }
    }
}

/// A file created by an execution, collected from its workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// File name (no directory components)
    pub name: String,

    /// Path relative to the workspace root
    pub relative_path: String,

    /// Size in bytes (original size, even if content was truncated)
    pub size: u64,

    /// Whether the content was truncated to the output size cap
    pub truncated: bool,
}

/// A file uploaded alongside an execution request
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Target file name inside the workspace
    pub name: String,

    /// Raw content
    pub content: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Kind of a security violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Source matched a forbidden pattern for its language
    #[serde(rename = "forbidden_pattern")]
    ForbiddenPattern,

    /// Source exceeded the maximum length
    #[serde(rename = "length")]
    Length,

    /// Unbalanced brackets or similar structural issue
    #[serde(rename = "structural")]
    Structural,
}

/// A single violation reported by the security validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    /// What class of rule was violated
    pub kind: ViolationKind,

    /// The offending pattern, if the violation came from a pattern rule
    pub pattern: Option<String>,

    /// Human-readable description
    pub message: String,
}

impl SecurityViolation {
    pub fn pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::ForbiddenPattern,
            pattern: Some(pattern.into()),
            message: message.into(),
        }
    }

    pub fn length(message: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Length,
            pattern: None,
            message: message.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Structural,
            pattern: None,
            message: message.into(),
        }
    }
}
