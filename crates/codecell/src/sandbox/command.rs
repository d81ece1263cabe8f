//! Command builder for the docker CLI
//!
//! Builds `docker run` argument vectors for sandboxed executions. Every run
//! gets a named container with no network access and explicit resource
//! ceilings; the workspace directory is bind-mounted at /box.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::ResourceLimits;

/// Mount point of the workspace inside the container
pub const SANDBOX_WORKDIR: &str = "/box";

/// Builder for `docker run` command-line arguments
#[derive(Debug)]
pub struct ContainerCommand {
    /// Path to the docker binary
    docker_path: PathBuf,
    /// Container name, used for teardown and inspection
    name: String,
    /// Image to run
    image: String,
    /// Resource ceilings
    limits: ResourceLimits,
    /// Host directory bind-mounted at /box (read-write)
    workdir: Option<PathBuf>,
    /// --env
    env: HashMap<String, String>,
    /// Keep stdin open (-i)
    interactive: bool,
    command: Vec<String>,
}

impl ContainerCommand {
    /// Create a new container command builder
    pub fn new(
        docker_path: impl Into<PathBuf>,
        name: impl Into<String>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            docker_path: docker_path.into(),
            name: name.into(),
            image: image.into(),
            limits: ResourceLimits::default(),
            workdir: None,
            env: HashMap::new(),
            interactive: true,
            command: Vec::new(),
        }
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bind-mount the given host directory at /box
    pub fn workdir(mut self, host_dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(host_dir.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Keep stdin open for the contained process (default: true)
    pub fn interactive(mut self, enable: bool) -> Self {
        self.interactive = enable;
        self
    }

    /// Set the command to run inside the container
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Get the container name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the docker binary path
    pub fn docker_path(&self) -> &Path {
        &self.docker_path
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![
            self.docker_path.to_string_lossy().into_owned(),
            "run".to_string(),
            format!("--name={}", self.name),
            // The container boundary is the actual sandbox: no network,
            // and an init process so nothing inside can escape reaping.
            "--network=none".to_string(),
            "--init".to_string(),
        ];

        if self.interactive {
            args.push("--interactive".to_string());
        }

        if let Some(memory) = self.limits.memory_bytes {
            args.push(format!("--memory={memory}"));
            // Same value for swap so the ceiling is memory, not memory+swap
            args.push(format!("--memory-swap={memory}"));
        }
        if let Some(cpus) = self.limits.cpu_shares {
            args.push(format!("--cpus={cpus}"));
        }
        if let Some(procs) = self.limits.max_processes {
            args.push(format!("--pids-limit={procs}"));
        }

        if let Some(ref dir) = self.workdir {
            args.push(format!("--volume={}:{SANDBOX_WORKDIR}", dir.display()));
            args.push(format!("--workdir={SANDBOX_WORKDIR}"));
        }

        for (key, value) in &self.env {
            args.push(format!("--env={key}={value}"));
        }

        args.push(self.image);
        args.extend(self.command);

        args
    }
}

/// Build the arguments for force-removing a container
pub fn remove_args(docker_path: &Path, name: &str) -> Vec<String> {
    vec![
        docker_path.to_string_lossy().into_owned(),
        "rm".to_string(),
        "--force".to_string(),
        name.to_string(),
    ]
}

/// Build the arguments for querying whether a container was OOM-killed
pub fn inspect_oom_args(docker_path: &Path, name: &str) -> Vec<String> {
    vec![
        docker_path.to_string_lossy().into_owned(),
        "inspect".to_string(),
        "--format={{.State.OOMKilled}}".to_string(),
        name.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_run_command() {
        let cmd = ContainerCommand::new("docker", "cell-1", "python:3.12-alpine")
            .command(vec!["python3", "main.py"]);
        let args = cmd.build();

        assert_eq!(args[0], "docker");
        assert_eq!(args[1], "run");
        assert!(args.contains(&"--name=cell-1".to_string()));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--init".to_string()));
        // Image comes before the program argv
        let image_pos = args.iter().position(|a| a == "python:3.12-alpine").unwrap();
        assert_eq!(args[image_pos + 1], "python3");
        assert_eq!(args[image_pos + 2], "main.py");
    }

    #[test]
    fn test_network_always_disabled() {
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .command(vec!["true"])
            .build();
        assert!(args.contains(&"--network=none".to_string()));
    }

    #[test]
    fn test_memory_limit_sets_swap() {
        let limits = ResourceLimits::none().with_memory_bytes(268_435_456);
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .limits(limits)
            .command(vec!["true"])
            .build();

        assert!(args.contains(&"--memory=268435456".to_string()));
        assert!(args.contains(&"--memory-swap=268435456".to_string()));
    }

    #[test]
    fn test_cpu_and_pids_limits() {
        let limits = ResourceLimits::none()
            .with_cpu_shares(0.5)
            .with_max_processes(64);
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .limits(limits)
            .command(vec!["true"])
            .build();

        assert!(args.contains(&"--cpus=0.5".to_string()));
        assert!(args.contains(&"--pids-limit=64".to_string()));
    }

    #[test]
    fn test_no_limits_set() {
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .limits(ResourceLimits::none())
            .command(vec!["true"])
            .build();

        assert!(!args.iter().any(|a| a.starts_with("--memory")));
        assert!(!args.iter().any(|a| a.starts_with("--cpus")));
        assert!(!args.iter().any(|a| a.starts_with("--pids-limit")));
    }

    #[test]
    fn test_workdir_mount() {
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .workdir("/tmp/cell-work")
            .command(vec!["true"])
            .build();

        assert!(args.contains(&"--volume=/tmp/cell-work:/box".to_string()));
        assert!(args.contains(&"--workdir=/box".to_string()));
    }

    #[test]
    fn test_env_multiple() {
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .env("PYTHONUNBUFFERED", "1")
            .env("LANG", "C.UTF-8")
            .command(vec!["true"])
            .build();

        assert!(args.iter().any(|a| a == "--env=PYTHONUNBUFFERED=1"));
        assert!(args.iter().any(|a| a == "--env=LANG=C.UTF-8"));
    }

    #[test]
    fn test_interactive_default_on() {
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .command(vec!["true"])
            .build();
        assert!(args.contains(&"--interactive".to_string()));
    }

    #[test]
    fn test_interactive_disabled() {
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .interactive(false)
            .command(vec!["true"])
            .build();
        assert!(!args.contains(&"--interactive".to_string()));
    }

    #[test]
    fn test_env_before_image() {
        let args = ContainerCommand::new("docker", "c", "alpine:3")
            .env("K", "V")
            .command(vec!["true"])
            .build();
        let env_pos = args.iter().position(|a| a == "--env=K=V").unwrap();
        let image_pos = args.iter().position(|a| a == "alpine:3").unwrap();
        assert!(env_pos < image_pos);
    }

    #[test]
    fn test_remove_args() {
        let args = remove_args(Path::new("docker"), "cell-9");
        assert_eq!(args, vec!["docker", "rm", "--force", "cell-9"]);
    }

    #[test]
    fn test_inspect_oom_args() {
        let args = inspect_oom_args(Path::new("/usr/bin/docker"), "cell-9");
        assert_eq!(args[0], "/usr/bin/docker");
        assert_eq!(args[1], "inspect");
        assert!(args[2].contains("OOMKilled"));
        assert_eq!(args[3], "cell-9");
    }

    #[test]
    fn test_name_accessor() {
        let cmd = ContainerCommand::new("docker", "cell-42", "alpine:3");
        assert_eq!(cmd.name(), "cell-42");
    }
}
