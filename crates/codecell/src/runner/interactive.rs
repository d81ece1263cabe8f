//! Interactive program sessions
//!
//! Runs a program with its stdin held open so callers can feed input
//! incrementally (stdin-driven programs, REPL-style exercises). Output is
//! surfaced as an event stream; input goes through a cloneable handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, instrument, warn};

use crate::config::{Config, Language};
use crate::runner::{CompileError, InteractiveError, compile};
use crate::sandbox::{ContainerCommand, Sandbox, SandboxProcess};
use crate::types::ResourceLimits;

/// How often the driver checks whether the program has exited.
///
/// `Child::wait` closes stdin, which would end the session, so the driver
/// polls `try_wait` instead.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Event emitted by an interactive session
#[derive(Debug, Clone)]
pub enum InteractiveEvent {
    /// Program wrote to stdout
    Stdout(Vec<u8>),

    /// Program wrote to stderr
    Stderr(Vec<u8>),

    /// Program exited; `None` means it was killed by a signal
    Exited(Option<i32>),
}

/// A running interactive program, not yet consumed into a stream
#[derive(Debug)]
pub struct InteractiveSession {
    process: SandboxProcess,
    output_cap: usize,
}

/// Input side of a running session.
///
/// Cloneable; dropping all clones closes the program's stdin.
#[derive(Debug, Clone)]
pub struct InteractiveSessionHandle {
    input_tx: mpsc::Sender<Vec<u8>>,
    shutdown: Arc<Notify>,
}

/// Output side of a running session
#[derive(Debug)]
pub struct InteractiveEventStream {
    event_rx: mpsc::Receiver<InteractiveEvent>,
}

impl InteractiveSession {
    /// Start a program in the given sandbox with stdin held open.
    ///
    /// Compiled languages go through their compile step first; a failed
    /// compile aborts the session before anything runs.
    #[instrument(skip_all, fields(language = %language.name, sandbox = %sandbox.name()))]
    pub async fn start(
        sandbox: &Sandbox,
        config: &Config,
        language: &Language,
        source: &[u8],
        limits: Option<&ResourceLimits>,
    ) -> Result<Self, InteractiveError> {
        let source_name = language.source_name();

        let binary = if language.is_compiled() {
            let compiled = compile(sandbox, config, language, source).await?;
            if !compiled.success {
                return Err(InteractiveError::Compile(CompileError::Failed {
                    exit_code: compiled.exit_code.unwrap_or(-1),
                    output: compiled.output,
                }));
            }
            compiled.binary
        } else {
            sandbox.write_file(&source_name, source).await?;
            source_name.clone()
        };

        let mut effective = config.default_limits.clone();
        if let Some(ref lang_limits) = language.run.limits {
            effective = effective.with_overrides(lang_limits);
        }
        if let Some(request_limits) = limits {
            effective = effective.with_overrides(request_limits);
        }
        let output_cap = effective.max_output_bytes.unwrap_or(ResourceLimits::MB) as usize;

        let argv = Language::expand_command(&language.run.command, &source_name, &binary);
        let mut command =
            ContainerCommand::new(sandbox.docker_path(), sandbox.name(), &language.image)
                .limits(effective)
                .workdir(sandbox.path())
                .command(argv);
        for (key, value) in &language.run.env {
            command = command.env(key, value);
        }

        let process = SandboxProcess::spawn(sandbox, command)?;
        debug!("interactive session started");

        Ok(Self {
            process,
            output_cap,
        })
    }

    /// Convert the session into an event stream and an input handle.
    ///
    /// Spawns the reader and driver tasks; the returned stream yields output
    /// events and exactly one final [`InteractiveEvent::Exited`].
    pub fn into_stream(mut self) -> (InteractiveSessionHandle, InteractiveEventStream) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(16);
        let shutdown = Arc::new(Notify::new());

        let stdout = self.process.take_stdout();
        let stderr = self.process.take_stderr();
        let cap = self.output_cap;

        let stdout_task = tokio::spawn(pump(stdout, event_tx.clone(), cap, InteractiveEvent::Stdout));
        let stderr_task = tokio::spawn(pump(stderr, event_tx.clone(), cap, InteractiveEvent::Stderr));

        let driver_shutdown = Arc::clone(&shutdown);
        let mut process = self.process;
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
            let mut stdin_open = true;
            let exit_code = loop {
                tokio::select! {
                    data = input_rx.recv(), if stdin_open => match data {
                        Some(data) => {
                            if let Err(e) = process.write(&data).await {
                                warn!(error = %e, "interactive stdin write failed");
                            }
                        }
                        // All input handles dropped: signal EOF to the program
                        None => {
                            stdin_open = false;
                            process.close_stdin();
                        }
                    },
                    _ = driver_shutdown.notified() => {
                        let _ = process.kill().await;
                        break None;
                    }
                    _ = poll.tick() => match process.try_wait() {
                        Ok(Some(code)) => break code,
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "interactive exit poll failed");
                            break None;
                        }
                    },
                }
            };

            // Let the readers drain remaining output before announcing exit
            let _ = stdout_task.await;
            let _ = stderr_task.await;
            let _ = event_tx.send(InteractiveEvent::Exited(exit_code)).await;
            debug!(?exit_code, "interactive session ended");
        });

        (
            InteractiveSessionHandle { input_tx, shutdown },
            InteractiveEventStream { event_rx },
        )
    }
}

impl InteractiveSessionHandle {
    /// Send input to the program's stdin
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), InteractiveError> {
        self.input_tx
            .send(data.into())
            .await
            .map_err(|_| InteractiveError::Terminated)
    }

    /// Kill the program and end the session
    pub fn terminate(&self) {
        self.shutdown.notify_one();
    }
}

impl InteractiveEventStream {
    /// Receive the next event; `None` after the final `Exited` event
    pub async fn recv(&mut self) -> Option<InteractiveEvent> {
        self.event_rx.recv().await
    }
}

/// Forward a stream as events, retaining at most `cap` bytes.
///
/// Past the cap the stream keeps draining so the program never blocks on a
/// full pipe, but nothing more is forwarded.
async fn pump<R>(
    reader: Option<R>,
    event_tx: mpsc::Sender<InteractiveEvent>,
    cap: usize,
    make_event: fn(Vec<u8>) -> InteractiveEvent,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut forwarded = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if forwarded < cap {
                    let take = n.min(cap - forwarded);
                    forwarded += take;
                    if event_tx.send(make_event(chunk[..take].to_vec())).await.is_err() {
                        break;
                    }
                }
            }
            Err(_) => break,
        }
    }
}
