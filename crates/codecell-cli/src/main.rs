//! Codecell CLI
//!
//! A command-line tool for running code in sandboxed docker containers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use codecell::{
    Config, EXAMPLE_CONFIG, ExecuteError, ResourceLimits, Runner, UploadedFile,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codecell")]
#[command(about = "A tool for running untrusted code in docker sandboxes")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: codecell.toml)
        #[arg(short, long, default_value = "codecell.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate source code without running it
    Check {
        /// Source file to check
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., python3, cpp17)
        #[arg(short, long)]
        language: String,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., python3, cpp17)
        #[arg(short, long)]
        language: String,

        /// Input file fed to stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Extra files staged into the workspace
        #[arg(short = 'f', long = "file")]
        files: Vec<PathBuf>,

        /// Wall clock limit in milliseconds
        #[arg(short, long)]
        time_limit_ms: Option<u64>,

        /// Memory limit in megabytes
        #[arg(short, long)]
        memory_limit_mb: Option<u64>,
    },

    /// List available languages
    Languages,

    /// Show default configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Check { source, language } => run_check(&config, &source, &language).await,
        Commands::Run {
            source,
            language,
            input,
            files,
            time_limit_ms,
            memory_limit_mb,
        } => {
            run_execute(
                &config,
                &source,
                &language,
                input.as_deref(),
                &files,
                time_limit_ms,
                memory_limit_mb,
            )
            .await
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_check(config: &Config, source: &PathBuf, language_id: &str) -> Result<()> {
    let source_content = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let runner = Runner::new(config.clone()).context("bad security configuration")?;
    let violations = runner
        .validate(language_id, &source_content)
        .context("validation failed to run")?;

    if violations.is_empty() {
        println!("OK: no violations found");
        Ok(())
    } else {
        println!("Rejected with {} violation(s):", violations.len());
        for violation in &violations {
            match &violation.pattern {
                Some(pattern) => println!("  [{:?}] {} (pattern: {})", violation.kind, violation.message, pattern),
                None => println!("  [{:?}] {}", violation.kind, violation.message),
            }
        }
        std::process::exit(1);
    }
}

async fn run_execute(
    config: &Config,
    source: &PathBuf,
    language_id: &str,
    input: Option<&std::path::Path>,
    files: &[PathBuf],
    time_limit_ms: Option<u64>,
    memory_limit_mb: Option<u64>,
) -> Result<()> {
    let source_content = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    let input_data = if let Some(input_path) = input {
        Some(
            tokio::fs::read(input_path)
                .await
                .context("failed to read input file")?,
        )
    } else {
        None
    };

    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("upload file has no usable name")?
            .to_string();
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read upload '{}'", path.display()))?;
        uploads.push(UploadedFile::new(name, content));
    }

    // Only explicitly-specified limits, so per-language defaults still apply
    let mut user_limits = ResourceLimits::none();
    if let Some(ms) = time_limit_ms {
        user_limits = user_limits.with_wall_time_ms(ms);
    }
    if let Some(mb) = memory_limit_mb {
        user_limits = user_limits.with_memory_bytes(mb * ResourceLimits::MB);
    }
    let has_user_limits = time_limit_ms.is_some() || memory_limit_mb.is_some();
    let limits_ref = if has_user_limits {
        Some(&user_limits)
    } else {
        None
    };

    info!(language_id, "running program");
    let runner = Runner::new(config.clone()).context("bad security configuration")?;
    let outcome = match runner
        .execute_with_files(
            language_id,
            &source_content,
            input_data.as_deref(),
            &uploads,
            limits_ref,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(ExecuteError::Validation(violations)) => {
            eprintln!("Rejected with {} violation(s):", violations.len());
            for violation in &violations {
                eprintln!("  {}", violation.message);
            }
            std::process::exit(1);
        }
        Err(ExecuteError::Compile(e)) => {
            eprintln!("Compilation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("execution failed"),
    };

    let result = outcome.result;
    if !result.stdout.is_empty() {
        print!("{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }

    if !result.generated_files.is_empty() {
        info!(count = result.generated_files.len(), "generated files");
        for file in &result.generated_files {
            info!(
                path = file.relative_path,
                size = file.size,
                truncated = file.truncated,
                "generated"
            );
        }
    }

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(
        status = ?result.status,
        elapsed_ms = result.elapsed_ms,
        exit_code = result.exit_code,
        "execution result"
    );

    if result.is_success() {
        Ok(())
    } else {
        std::process::exit(result.exit_code.unwrap_or(1));
    }
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let mut languages: Vec<_> = config.languages.iter().collect();
    languages.sort_by_key(|(id, _)| *id);

    for (id, lang) in languages {
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        println!("  {:<15} {} [{}] ({})", id, lang.name, lang.image, lang_type);
    }
}

fn show_config(config: &Config) {
    println!("Default resource limits:");
    println!("  Wall time: {:?} ms", config.default_limits.wall_time_ms);
    println!("  Memory: {:?} bytes", config.default_limits.memory_bytes);
    println!("  CPU share: {:?}", config.default_limits.cpu_shares);
    println!("  Max processes: {:?}", config.default_limits.max_processes);
    println!(
        "  Output cap: {:?} bytes per stream",
        config.default_limits.max_output_bytes
    );
    println!();
    println!("Docker binary: {}", config.docker_binary().display());
    println!("Terminal shell: {}", config.terminal.shell);
    println!();
    println!("Languages configured: {}", config.languages.len());
}

async fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
