//! Child process execution with a combined, line-oriented output stream.
//!
//! Completion is decided by the output stream closing, not by the exit code.
//! The exit status is only logged. Every run is bounded by a timeout.

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::output::{is_recoverable_init_error, trim_line_end};
use crate::core::types::CommandResult;

/// Description of one child process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Added on top of the inherited process environment.
    pub env: Vec<(String, String)>,
    /// Scan output for the recoverable-init markers.
    pub watched: bool,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I, workdir: impl Into<PathBuf>, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            workdir: workdir.into(),
            env: Vec::new(),
            watched: false,
            timeout,
        }
    }

    pub fn watched(mut self) -> Self {
        self.watched = true;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// `program arg1 arg2 ...`, for logs and error messages.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` timed out after {timeout_secs}s")]
    TimedOut { command: String, timeout_secs: u64 },
    #[error("i/o error while running `{command}`")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Abstraction over process execution so stages can be driven by scripted runners in tests.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ProcessError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ProcessError> {
        (**self).run(spec)
    }
}

/// Runner that spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(command = %spec.display(), timeout_secs = spec.timeout.as_secs(), watched = spec.watched))]
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ProcessError> {
        let command = spec.display();
        let io_err = |source: std::io::Error| ProcessError::Io {
            command: command.clone(),
            source,
        };

        // One pipe for both streams, so lines arrive in the order the child wrote them.
        let (reader, writer) = io::pipe().map_err(&io_err)?;
        let stderr_writer = writer.try_clone().map_err(&io_err)?;
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.workdir)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer);

        debug!("spawning child process");
        let spawned = cmd.spawn();
        // The parent's copies of the write end must close for the reader to see EOF.
        drop(cmd);
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(ProcessError::Spawn {
                    command: command.clone(),
                    source: e,
                });
            }
        };

        let (tx, rx) = mpsc::channel();
        let reader_handle = spawn_line_reader(reader, tx);

        let deadline = Instant::now() + spec.timeout;
        let mut result = CommandResult::default();
        loop {
            match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(Ok(line)) => {
                    let line = trim_line_end(line);
                    if spec.watched && is_recoverable_init_error(&line) {
                        debug!("recoverable init marker detected");
                        result.recoverable_init_error_detected = true;
                    }
                    result.output_lines.push(line);
                }
                Ok(Err(e)) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(io_err(e));
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(kill_on_timeout(&mut child, command.clone(), spec.timeout));
                }
            }
        }

        let _ = reader_handle.join();

        let remaining = deadline.saturating_duration_since(Instant::now());
        let status = match child.wait_timeout(remaining).map_err(&io_err)? {
            Some(status) => status,
            None => return Err(kill_on_timeout(&mut child, command.clone(), spec.timeout)),
        };
        result.exit_observed = true;

        debug!(
            exit_code = ?status.code(),
            lines = result.output_lines.len(),
            recoverable = result.recoverable_init_error_detected,
            "command finished"
        );
        Ok(result)
    }
}

fn kill_on_timeout(
    child: &mut std::process::Child,
    command: String,
    timeout: Duration,
) -> ProcessError {
    warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
    if let Err(e) = child.kill() {
        warn!(err = %e, "failed to kill timed out command");
    }
    let _ = child.wait();
    ProcessError::TimedOut {
        command,
        timeout_secs: timeout.as_secs(),
    }
}

fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    tx: Sender<std::io::Result<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut buf_reader = BufReader::new(reader);
        loop {
            let mut line = Vec::new();
            match buf_reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    })
}
