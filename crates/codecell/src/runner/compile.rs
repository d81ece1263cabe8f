//! Compilation step for compiled languages

use tracing::{debug, instrument};

use crate::config::{Config, Language};
use crate::runner::CompileError;
use crate::sandbox::{ContainerCommand, Sandbox};

/// Result of a compilation step
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Whether compilation succeeded (exit code 0)
    pub success: bool,

    /// Compiler exit code, if it exited normally
    pub exit_code: Option<i32>,

    /// Combined compiler diagnostics (stderr, falling back to stdout)
    pub output: String,

    /// Wall clock time used in milliseconds
    pub elapsed_ms: u64,

    /// Name of the produced binary inside the workspace
    pub binary: String,
}

/// Compile source code in the given sandbox.
///
/// Writes the source file into the workspace and runs the language's
/// compile command in a container. Compiler diagnostics are captured and
/// returned whether or not compilation succeeds; the caller decides what
/// a failed compile means.
#[instrument(skip_all, fields(language = %language.name))]
pub async fn compile(
    sandbox: &Sandbox,
    config: &Config,
    language: &Language,
    source: &[u8],
) -> Result<CompileResult, CompileError> {
    let Some(ref compile_config) = language.compile else {
        return Err(CompileError::NotCompiled(language.name.clone()));
    };

    sandbox.write_file(&compile_config.source_name, source).await?;

    // Compile limits chain separately from run limits; compilers routinely
    // need more memory and time than the programs they produce.
    let limits = match compile_config.limits {
        Some(ref overrides) => config.default_limits.with_overrides(overrides),
        None => config.default_limits.clone(),
    };
    let deadline = std::time::Duration::from_millis(limits.deadline_ms());
    let output_cap = limits
        .max_output_bytes
        .unwrap_or(crate::types::ResourceLimits::MB) as usize;

    let argv = Language::expand_command(
        &compile_config.command,
        &compile_config.source_name,
        &compile_config.output_name,
    );

    let mut command = ContainerCommand::new(sandbox.docker_path(), sandbox.name(), &language.image)
        .limits(limits)
        .workdir(sandbox.path())
        .interactive(false)
        .command(argv);
    for (key, value) in &compile_config.env {
        command = command.env(key, value);
    }

    let output = sandbox.run_batch(command, None, deadline, output_cap).await?;
    if output.timed_out {
        return Err(CompileError::TimedOut);
    }

    // Leave the container name free for the run step
    sandbox.force_remove().await;

    let diagnostics = if output.stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        String::from_utf8_lossy(&output.stderr).into_owned()
    };

    let success = output.exit_code == Some(0);
    debug!(
        success,
        exit_code = output.exit_code,
        elapsed_ms = output.elapsed.as_millis() as u64,
        "compilation finished"
    );

    Ok(CompileResult {
        success,
        exit_code: output.exit_code,
        output: diagnostics,
        elapsed_ms: output.elapsed.as_millis() as u64,
        binary: compile_config.output_name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_compile_interpreted_language_fails() {
        let config = Config::default();
        let language = config.get_language("python3").unwrap();
        let sandbox = Sandbox::create("docker").unwrap();

        let result = compile(&sandbox, &config, language, b"print(1)").await;
        assert!(matches!(result, Err(CompileError::NotCompiled(_))));
    }
}
