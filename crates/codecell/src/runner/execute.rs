//! Batch execution pipeline
//!
//! Runs already-validated source in a prepared sandbox: stage uploads,
//! compile if the language needs it, run under the effective limits, then
//! collect whatever files the program left behind.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::{Config, Language};
use crate::runner::{CompileError, CompileResult, ExecuteError, compile};
use crate::sandbox::{ContainerCommand, Sandbox};
use crate::types::{ExecutionResult, ExecutionStatus, ResourceLimits, UploadedFile};
use crate::workspace;

/// Everything a finished pipeline run produced
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The execution result reported to the caller
    pub result: ExecutionResult,

    /// Compilation details, for compiled languages
    pub compile: Option<CompileResult>,
}

/// Resolve the limits for the run step: defaults, then per-language
/// overrides, then per-request overrides.
fn run_limits(
    config: &Config,
    language: &Language,
    request: Option<&ResourceLimits>,
) -> ResourceLimits {
    let mut limits = config.default_limits.clone();
    if let Some(ref lang_limits) = language.run.limits {
        limits = limits.with_overrides(lang_limits);
    }
    if let Some(request_limits) = request {
        limits = limits.with_overrides(request_limits);
    }
    limits
}

/// Run the batch pipeline in a caller-owned sandbox.
///
/// The source must already have passed validation. The sandbox is left
/// intact for the caller: session-backed runs keep it alive so generated
/// files stay downloadable.
#[instrument(skip_all, fields(language = %language.name, sandbox = %sandbox.name()))]
pub async fn execute_in(
    sandbox: &Sandbox,
    config: &Config,
    language: &Language,
    source: &[u8],
    stdin: Option<&[u8]>,
    files: &[UploadedFile],
    limits: Option<&ResourceLimits>,
) -> Result<ExecutionOutcome, ExecuteError> {
    // Uploads are validated and staged as a unit before anything runs
    let staged = workspace::stage(sandbox, &config.upload, files).await?;

    let source_name = language.source_name();
    let mut known_inputs: HashSet<String> = staged.into_iter().collect();
    known_inputs.insert(source_name.clone());

    let (compile_result, binary) = if language.is_compiled() {
        let compiled = compile(sandbox, config, language, source).await?;
        if !compiled.success {
            return Err(ExecuteError::Compile(CompileError::Failed {
                exit_code: compiled.exit_code.unwrap_or(-1),
                output: compiled.output,
            }));
        }
        known_inputs.insert(compiled.binary.clone());
        let binary = compiled.binary.clone();
        (Some(compiled), binary)
    } else {
        sandbox.write_file(&source_name, source).await?;
        (None, source_name.clone())
    };

    let limits = run_limits(config, language, limits);
    let deadline = Duration::from_millis(limits.deadline_ms());
    let output_cap = limits.max_output_bytes.unwrap_or(ResourceLimits::MB) as usize;

    let argv = Language::expand_command(&language.run.command, &source_name, &binary);
    let mut command = ContainerCommand::new(sandbox.docker_path(), sandbox.name(), &language.image)
        .limits(limits)
        .workdir(sandbox.path())
        .command(argv);
    for (key, value) in &language.run.env {
        command = command.env(key, value);
    }

    let output = sandbox.run_batch(command, stdin, deadline, output_cap).await?;

    let status = if output.timed_out {
        ExecutionStatus::TimedOut
    } else {
        ExecutionStatus::from_exit(output.exit_code, output.oom_killed)
    };

    // Collect even after a timeout: partial output files are still useful
    let generated = workspace::collect(sandbox, &config.upload, &known_inputs).await?;

    debug!(
        ?status,
        exit_code = output.exit_code,
        generated = generated.len(),
        elapsed_ms = output.elapsed.as_millis() as u64,
        "execution finished"
    );

    Ok(ExecutionOutcome {
        result: ExecutionResult {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.exit_code,
            elapsed_ms: output.elapsed.as_millis() as u64,
            generated_files: generated,
        },
        compile: compile_result,
    })
}
