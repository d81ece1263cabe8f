//! Sandbox lifecycle management
//!
//! Manages the staging directory and container for one execution: creation,
//! file I/O, batch runs with a wall-clock deadline, and teardown.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::sandbox::SandboxError;
use crate::sandbox::command::{ContainerCommand, inspect_oom_args, remove_args};

/// Output of one batch run inside a sandbox
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub oom_killed: bool,
    pub elapsed: Duration,
}

/// A sandboxed execution environment
///
/// Owns a host staging directory (bind-mounted at /box inside containers)
/// and the name under which containers for this sandbox run.
///
/// # Cleanup
///
/// Always call [`cleanup()`](Self::cleanup) before dropping. The `Drop`
/// implementation attempts best-effort container removal via a spawned
/// thread, but that may not complete before process exit; a leaked
/// container is a correctness bug, not a performance nit.
#[derive(Debug)]
pub struct Sandbox {
    /// Container name for this sandbox
    name: String,

    /// Host staging directory, deleted on drop
    workdir: TempDir,

    /// Path to the docker binary
    docker_path: PathBuf,

    /// Whether teardown has run
    torn_down: bool,
}

impl Sandbox {
    /// Create a new sandbox with a fresh staging directory
    #[instrument(skip(docker_path))]
    pub fn create(docker_path: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let workdir = tempfile::Builder::new()
            .prefix("codecell-")
            .tempdir()
            .map_err(|e| SandboxError::CreateFailed(e.to_string()))?;

        let name = format!("cell-{}", uuid::Uuid::new_v4().simple());
        debug!(name, workdir = %workdir.path().display(), "sandbox created");

        Ok(Self {
            name,
            workdir,
            docker_path: docker_path.into(),
            torn_down: false,
        })
    }

    /// Get the container name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the host path of the staging directory
    pub fn path(&self) -> &Path {
        self.workdir.path()
    }

    /// Get the path to the docker binary
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }

    /// Get the host path to a file inside the staging directory
    ///
    /// Returns an error if the path contains path traversal attempts.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        if name.contains("..") || name.starts_with('/') {
            return Err(SandboxError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.workdir.path().join(name))
    }

    /// Write a file into the staging directory
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SandboxError> {
        let path = self.file_path(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to sandbox");
        Ok(())
    }

    /// Read a file from the staging directory
    #[instrument(skip(self))]
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, SandboxError> {
        let path = self.file_path(name)?;
        let content = tokio::fs::read(&path).await?;
        Ok(content)
    }

    /// Check if a file exists in the staging directory
    pub async fn file_exists(&self, name: &str) -> Result<bool, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::metadata(&path).await.is_ok())
    }

    /// Run a command in this sandbox with batch I/O and a hard deadline.
    ///
    /// The stdin data (if any) is written to the contained process and the
    /// pipe closed; stdout/stderr are captured up to `output_cap` bytes per
    /// stream. If the deadline elapses, the container is force-removed and
    /// whatever output was buffered is returned with `timed_out` set.
    #[instrument(skip(self, command, stdin_data))]
    pub async fn run_batch(
        &self,
        command: ContainerCommand,
        stdin_data: Option<&[u8]>,
        deadline: Duration,
        output_cap: usize,
    ) -> Result<BatchOutput, SandboxError> {
        let args = command.build();
        debug!(?args, "running container command");

        let mut child = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxError::SpawnFailed)?;

        let started = Instant::now();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_capped(stdout, output_cap));
        let stderr_task = tokio::spawn(read_capped(stderr, output_cap));

        // Feed stdin from its own task so a program that never reads it
        // cannot stall us past the deadline; the drop closes the pipe so
        // the program sees EOF. Write errors (the program exited or never
        // read) are not failures of the run.
        let stdin_task = child.stdin.take().map(|mut stdin| {
            let data = stdin_data.map(<[u8]>::to_vec);
            tokio::spawn(async move {
                if let Some(data) = data
                    && let Err(e) = stdin.write_all(&data).await
                {
                    debug!(error = %e, "stdin feed ended early");
                }
            })
        });

        let mut timed_out = false;
        let exit_code = tokio::select! {
            status = child.wait() => status?.code(),
            _ = tokio::time::sleep(deadline) => {
                timed_out = true;
                warn!(name = self.name, ?deadline, "deadline exceeded, killing container");
                // Removing the container kills the contained process; the
                // docker client then exits and the readers see EOF.
                self.force_remove().await;
                let _ = child.kill().await;
                let _ = child.wait().await;
                None
            }
        };

        if let Some(task) = stdin_task {
            // On timeout the writer may still be blocked on a dead pipe
            task.abort();
            let _ = task.await;
        }
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let elapsed = started.elapsed();

        // Docker returns 125-127 for client/daemon failures before the
        // program ever ran; surface those as sandbox errors, not results.
        if !timed_out
            && let Some(code) = exit_code
            && (125..=127).contains(&code)
        {
            let message = String::from_utf8_lossy(&stderr).into_owned();
            return Err(SandboxError::CommandFailed(message));
        }

        let oom_killed = if timed_out {
            false
        } else {
            self.was_oom_killed().await
        };

        debug!(
            exit_code,
            timed_out,
            oom_killed,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch run complete"
        );

        Ok(BatchOutput {
            stdout,
            stderr,
            exit_code,
            timed_out,
            oom_killed,
            elapsed,
        })
    }

    /// Query docker for whether the last container run was OOM-killed.
    ///
    /// Best-effort: any inspection failure is treated as "no".
    async fn was_oom_killed(&self) -> bool {
        let args = inspect_oom_args(&self.docker_path, &self.name);
        let output = Command::new(&args[0]).args(&args[1..]).output().await;
        match output {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim() == "true"
            }
            _ => false,
        }
    }

    /// Force-remove this sandbox's container, ignoring failures.
    ///
    /// Safe to call when no container exists (e.g. before the first run).
    pub async fn force_remove(&self) {
        let args = remove_args(&self.docker_path, &self.name);
        let result = Command::new(&args[0]).args(&args[1..]).output().await;
        if let Err(e) = result {
            warn!(name = self.name, error = %e, "container removal spawn failed");
        }
    }

    /// Tear down the sandbox: remove the container and mark it finished.
    ///
    /// Must run on every exit path; the staging directory itself is removed
    /// when the sandbox is dropped.
    #[instrument(skip(self))]
    pub async fn cleanup(&mut self) {
        if self.torn_down {
            return;
        }
        self.force_remove().await;
        self.torn_down = true;
        debug!(name = self.name, "sandbox torn down");
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!(
                name = self.name,
                "Sandbox dropped without explicit cleanup! \
                 Call cleanup() before dropping to guarantee container removal. \
                 Attempting best-effort removal via spawned thread."
            );

            let args = remove_args(&self.docker_path, &self.name);
            std::thread::spawn(move || {
                match std::process::Command::new(&args[0]).args(&args[1..]).output() {
                    Ok(_) => debug!("best-effort container removal finished"),
                    Err(e) => warn!(error = %e, "best-effort container removal failed"),
                }
            });
        }
    }
}

/// Read a stream to completion, retaining at most `cap` bytes.
///
/// Bytes past the cap are drained and discarded so the writer never blocks
/// on a full pipe.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Vec::new();
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buf.len() < cap {
                    let take = n.min(cap - buf.len());
                    buf.extend_from_slice(&chunk[..take]);
                }
            }
            Err(_) => break,
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_path_validation() {
        let sandbox = Sandbox::create("docker").unwrap();

        // Valid paths should work
        assert!(sandbox.file_path("main.py").is_ok());
        assert!(sandbox.file_path("subdir/file.txt").is_ok());

        // Path traversal should be rejected
        assert!(sandbox.file_path("../escape").is_err());
        assert!(sandbox.file_path("foo/../bar").is_err());
        assert!(sandbox.file_path("/absolute/path").is_err());
    }

    #[test]
    fn test_names_are_unique() {
        let a = Sandbox::create("docker").unwrap();
        let b = Sandbox::create("docker").unwrap();
        assert_ne!(a.name(), b.name());
        assert!(a.name().starts_with("cell-"));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let sandbox = Sandbox::create("docker").unwrap();
        sandbox.write_file("test.txt", b"hello world").await.unwrap();
        assert!(sandbox.file_exists("test.txt").await.unwrap());
        let content = sandbox.read_file("test.txt").await.unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn test_nested_file_write() {
        let sandbox = Sandbox::create("docker").unwrap();
        sandbox.write_file("data/input.txt", b"x").await.unwrap();
        assert!(sandbox.file_exists("data/input.txt").await.unwrap());
    }

    /// Write a shell script that stands in for the docker client.
    #[cfg(unix)]
    fn stub_client(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker-stub");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_holds_when_stdin_is_never_read() {
        let dir = tempfile::tempdir().unwrap();
        // Client that never reads stdin and outlives the deadline; the
        // `rm` invocation from the timeout kill path exits immediately.
        // `exec` so the kill reaches the process holding the output pipes
        let stub = stub_client(dir.path(), "[ \"$1\" = rm ] && exit 0\nexec sleep 5");
        let mut sandbox = Sandbox::create(&stub).unwrap();

        let command = ContainerCommand::new(sandbox.docker_path(), sandbox.name(), "img")
            .workdir(sandbox.path())
            .command(["true"]);
        // Well past the 64 KiB pipe buffer
        let stdin = vec![b'x'; 1024 * 1024];
        let started = Instant::now();
        let output = sandbox
            .run_batch(command, Some(&stdin), Duration::from_millis(300), 4096)
            .await
            .unwrap();

        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
        sandbox.cleanup().await;
    }

    #[tokio::test]
    async fn test_read_capped_truncates() {
        let data = vec![b'a'; 100];
        let result = read_capped(Some(&data[..]), 10).await;
        assert_eq!(result.len(), 10);
    }

    #[tokio::test]
    async fn test_read_capped_under_cap() {
        let data = b"short".to_vec();
        let result = read_capped(Some(&data[..]), 1000).await;
        assert_eq!(result, b"short");
    }

    #[tokio::test]
    async fn test_read_capped_none() {
        let result = read_capped(None::<&[u8]>, 10).await;
        assert!(result.is_empty());
    }
}
