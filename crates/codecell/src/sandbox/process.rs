//! Long-lived contained processes for interactive execution
//!
//! Wraps a spawned `docker run` client with handles for streaming stdin and
//! taking ownership of the output pipes.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::sandbox::SandboxError;
use crate::sandbox::command::ContainerCommand;
use crate::sandbox::container::Sandbox;

/// Process handle for interactive execution
#[derive(Debug)]
pub struct SandboxProcess {
    child: tokio::process::Child,
    stdin: Option<tokio::process::ChildStdin>,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
}

impl SandboxProcess {
    /// Spawn a new contained process
    #[instrument(skip_all, fields(sandbox = %sandbox.name()))]
    pub fn spawn(sandbox: &Sandbox, command: ContainerCommand) -> Result<Self, SandboxError> {
        let args = command.build();
        debug!(?args, "spawning interactive container");

        let mut child = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::SpawnFailed)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Write to the process stdin
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SandboxError> {
        let stdin = self.stdin.as_mut().ok_or(SandboxError::StdinClosed)?;
        stdin.write_all(data).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close stdin to signal EOF
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Take ownership of stdout
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.stdout.take()
    }

    /// Take ownership of stderr
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.stderr.take()
    }

    /// Wait for the process to exit and return its exit code
    pub async fn wait(&mut self) -> Result<Option<i32>, SandboxError> {
        self.stdin = None;
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    /// Check for exit without blocking
    ///
    /// Returns `Some(exit_code)` once the process has exited; a process
    /// killed by a signal reports exit code `None` inside the `Some`.
    pub fn try_wait(&mut self) -> Result<Option<Option<i32>>, SandboxError> {
        Ok(self.child.try_wait()?.map(|s| s.code()))
    }

    /// Kill the docker client process
    ///
    /// Callers must also force-remove the container via the owning sandbox;
    /// killing the client alone does not stop the contained program.
    pub async fn kill(&mut self) -> Result<(), SandboxError> {
        self.child.kill().await?;
        Ok(())
    }
}
