//! Scripted fakes for driving the pipeline without real processes or HTTP.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::output::is_recoverable_init_error;
use crate::core::types::{CommandResult, Provider};
use crate::io::chat::{ChatMessage, ChatSink};
use crate::io::config::WorkerConfig;
use crate::io::github::{CommitState, RepoApi};
use crate::io::process::{CommandRunner, CommandSpec, ProcessError};

/// One scripted response to a matching command.
#[derive(Debug, Clone)]
pub enum Scripted {
    Lines(Vec<Vec<u8>>),
    SpawnFailure,
    TimedOut,
}

impl Scripted {
    pub fn lines(lines: &[&str]) -> Self {
        Scripted::Lines(lines.iter().map(|l| l.as_bytes().to_vec()).collect())
    }
}

struct Rule {
    prefix: Vec<String>,
    responses: VecDeque<Scripted>,
}

#[derive(Default)]
struct Flight {
    current: usize,
    max: usize,
}

/// Runner answering commands from prefix rules.
///
/// The first rule whose prefix matches `program args..` answers. Its responses
/// are consumed in order and the last one repeats. Unmatched commands produce
/// no output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    delay: Option<Duration>,
    flight: Mutex<Flight>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, prefix: &[&str], responses: Vec<Scripted>) -> Self {
        self.rules
            .lock()
            .expect("rules lock")
            .push(Rule {
                prefix: prefix.iter().map(|p| p.to_string()).collect(),
                responses: responses.into(),
            });
        self
    }

    /// Sleep inside every command so overlapping runs become observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn count(&self, prefix: &[&str]) -> usize {
        self.calls().iter().filter(|c| matches(c, prefix)).count()
    }

    /// Calls rendered as `program arg..`.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::display).collect()
    }

    /// Highest number of commands that were running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.flight.lock().expect("flight lock").max
    }

    fn respond(&self, spec: &CommandSpec) -> Option<Scripted> {
        let mut rules = self.rules.lock().expect("rules lock");
        let rule = rules.iter_mut().find(|r| {
            let prefix: Vec<&str> = r.prefix.iter().map(String::as_str).collect();
            matches(spec, &prefix)
        })?;
        if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        }
    }
}

fn matches(spec: &CommandSpec, prefix: &[&str]) -> bool {
    let Some((program, args)) = prefix.split_first() else {
        return true;
    };
    spec.program == *program
        && args.len() <= spec.args.len()
        && args.iter().zip(&spec.args).all(|(want, got)| *want == got.as_str())
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ProcessError> {
        self.calls.lock().expect("calls lock").push(spec.clone());
        {
            let mut flight = self.flight.lock().expect("flight lock");
            flight.current += 1;
            flight.max = flight.max.max(flight.current);
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.flight.lock().expect("flight lock").current -= 1;

        match self.respond(spec) {
            Some(Scripted::SpawnFailure) => Err(ProcessError::Spawn {
                command: spec.display(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted spawn failure"),
            }),
            Some(Scripted::TimedOut) => Err(ProcessError::TimedOut {
                command: spec.display(),
                timeout_secs: spec.timeout.as_secs(),
            }),
            Some(Scripted::Lines(lines)) => Ok(CommandResult {
                exit_observed: true,
                recoverable_init_error_detected: spec.watched
                    && lines.iter().any(|l| is_recoverable_init_error(l)),
                output_lines: lines,
            }),
            None => Ok(CommandResult {
                exit_observed: true,
                ..CommandResult::default()
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatus {
    pub sha: String,
    pub state: CommitState,
    pub description: String,
    pub context: String,
}

/// Repository host fake that records what it was asked to publish.
#[derive(Default)]
pub struct RecordingRepo {
    comments: Mutex<Vec<(u64, String)>>,
    statuses: Mutex<Vec<RecordedStatus>>,
    fail_comments: bool,
}

impl RecordingRepo {
    pub fn failing_comments() -> Self {
        Self {
            fail_comments: true,
            ..Self::default()
        }
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().expect("comments lock").clone()
    }

    pub fn statuses(&self) -> Vec<RecordedStatus> {
        self.statuses.lock().expect("statuses lock").clone()
    }
}

impl RepoApi for RecordingRepo {
    fn create_commit_status(
        &self,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
    ) -> Result<()> {
        self.statuses
            .lock()
            .expect("statuses lock")
            .push(RecordedStatus {
                sha: sha.to_string(),
                state,
                description: description.to_string(),
                context: context.to_string(),
            });
        Ok(())
    }

    fn create_pull_request_comment(&self, pull_request_id: u64, body: &str) -> Result<()> {
        if self.fail_comments {
            return Err(anyhow!("comment rejected: 502 Bad Gateway"));
        }
        self.comments
            .lock()
            .expect("comments lock")
            .push((pull_request_id, body.to_string()));
        Ok(())
    }
}

/// Chat fake that records posted messages.
#[derive(Default)]
pub struct RecordingChat {
    messages: Mutex<Vec<ChatMessage>>,
    fail: bool,
}

impl RecordingChat {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().expect("messages lock").clone()
    }
}

impl ChatSink for RecordingChat {
    fn post(&self, message: &ChatMessage) -> Result<()> {
        if self.fail {
            return Err(anyhow!("webhook returned 500"));
        }
        self.messages
            .lock()
            .expect("messages lock")
            .push(message.clone());
        Ok(())
    }
}

/// Temporary checkout with one directory per provider, each holding a state cache.
pub struct TestCheckout {
    pub dir: TempDir,
    pub config: WorkerConfig,
}

impl TestCheckout {
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let config = WorkerConfig {
            checkout_dir: dir.path().to_path_buf(),
            ..WorkerConfig::default()
        };
        for provider in Provider::ALL {
            fs::create_dir_all(
                dir.path()
                    .join(provider.as_str())
                    .join(&config.state_dir_name),
            )?;
        }
        Ok(Self { dir, config })
    }

    pub fn provider_dir(&self, provider: Provider) -> PathBuf {
        self.config.checkout_dir.join(provider.as_str())
    }

    pub fn state_cache(&self, provider: Provider) -> PathBuf {
        self.provider_dir(provider).join(&self.config.state_dir_name)
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("log buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a plain-text tracing subscriber and return what it logged.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock().expect("log buffer lock")).into_owned();
    (value, logs)
}
