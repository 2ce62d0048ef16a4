//! Job intake: one pipeline run per trigger, executed on a pool of worker threads.
//!
//! Jobs may run concurrently but serialize on the orchestrator's checkout
//! lock, so notification of one job can overlap the tool run of the next.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::types::{InvocationOutcome, InvocationRequest, Trigger};
use crate::io::process::CommandRunner;
use crate::notify::Notifier;
use crate::orchestrator::Orchestrator;

/// Orchestrator plus notifier: the full lifecycle of one trigger.
pub struct Pipeline<R> {
    orchestrator: Orchestrator<R>,
    notifier: Notifier,
}

impl<R: CommandRunner> Pipeline<R> {
    pub fn new(orchestrator: Orchestrator<R>, notifier: Notifier) -> Self {
        Self {
            orchestrator,
            notifier,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator<R> {
        &self.orchestrator
    }

    /// Normalize a trigger using the configured default provider.
    pub fn request_from(&self, trigger: Trigger) -> InvocationRequest {
        InvocationRequest::from_trigger(trigger, self.orchestrator.config().default_provider)
    }

    /// Mark pending, invoke, then publish the outcome.
    ///
    /// Never fails: an orchestration error becomes a `Failure` outcome whose
    /// single line is the error chain.
    #[instrument(skip_all, fields(action = %request.action, branch = %request.branch))]
    pub fn run(&self, request: InvocationRequest) -> InvocationOutcome {
        self.notifier.mark_pending(&request);
        let outcome = match self.orchestrator.invoke(request.clone()) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(err = %format!("{err:#}"), "invocation aborted");
                InvocationOutcome::failure(vec![format!("{err:#}").into_bytes()], request)
            }
        };
        let report = self.notifier.notify(&outcome);
        debug!(?report, "notifications delivered");
        outcome
    }
}

struct Job {
    request: InvocationRequest,
    reply: Sender<InvocationOutcome>,
}

/// Handle to a submitted job.
pub struct Ticket {
    reply: Receiver<InvocationOutcome>,
}

impl Ticket {
    /// Block until the job's outcome is available.
    pub fn wait(self) -> Result<InvocationOutcome> {
        self.reply
            .recv()
            .map_err(|_| anyhow!("worker exited before finishing the job"))
    }
}

/// Fixed-size pool of worker threads sharing one job queue.
pub struct Dispatcher {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start<R>(pipeline: Arc<Pipeline<R>>, workers: usize) -> Result<Self>
    where
        R: CommandRunner + 'static,
    {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..workers.max(1))
            .map(|id| {
                let pipeline = Arc::clone(&pipeline);
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("tfci-worker-{id}"))
                    .spawn(move || work(id, &pipeline, &receiver))
                    .with_context(|| format!("spawn worker thread {id}"))
            })
            .collect::<Result<Vec<_>>>()?;
        info!(workers = handles.len(), "dispatcher started");
        Ok(Self {
            sender: Some(sender),
            workers: handles,
        })
    }

    pub fn submit(&self, request: InvocationRequest) -> Result<Ticket> {
        let sender = self
            .sender
            .as_ref()
            .context("dispatcher is shut down")?;
        let (reply, ticket) = mpsc::channel();
        sender
            .send(Job { request, reply })
            .map_err(|_| anyhow!("all workers have exited"))?;
        Ok(Ticket { reply: ticket })
    }

    /// Stop accepting jobs, drain the queue, and join the workers.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn work<R: CommandRunner>(
    id: usize,
    pipeline: &Pipeline<R>,
    receiver: &Mutex<Receiver<Job>>,
) {
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(job) = next else {
            debug!(worker = id, "job queue closed");
            return;
        };
        let outcome = pipeline.run(job.request);
        if job.reply.send(outcome).is_err() {
            debug!(worker = id, "submitter dropped its ticket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Action, InvocationStatus, Provider};
    use crate::io::github::{CommitState, RepoApi};
    use crate::test_support::{RecordingRepo, Scripted, ScriptedRunner, TestCheckout};

    fn trigger(branch: &str) -> Trigger {
        Trigger {
            action: Action::Plan,
            branch: branch.to_string(),
            provider: None,
            pull_request_id: Some(12),
            commit_sha: Some("0123456789".to_string()),
            upstream_url: None,
        }
    }

    fn pipeline(
        checkout: &TestCheckout,
        runner: ScriptedRunner,
        repo: &Arc<RecordingRepo>,
    ) -> Pipeline<ScriptedRunner> {
        let config = checkout.config.clone();
        let notifier = Notifier::new(
            Some(Box::new(Arc::clone(repo)) as Box<dyn RepoApi>),
            None,
            &config,
        );
        Pipeline::new(Orchestrator::new(runner, config), notifier)
    }

    #[test]
    fn run_marks_pending_then_final_status() {
        let checkout = TestCheckout::new().expect("checkout");
        let repo = Arc::new(RecordingRepo::default());
        let runner =
            ScriptedRunner::new().on(&["git", "diff"], vec![Scripted::lines(&["docs/x.md"])]);
        let pipeline = pipeline(&checkout, runner, &repo);
        let outcome = pipeline.run(pipeline.request_from(trigger("feature-x")));
        assert_eq!(outcome.status, InvocationStatus::Success);
        let states: Vec<_> = repo.statuses().into_iter().map(|s| s.state).collect();
        assert_eq!(states, vec![CommitState::Pending, CommitState::Success]);
    }

    #[test]
    fn orchestration_error_becomes_failure_outcome() {
        let checkout = TestCheckout::new().expect("checkout");
        let repo = Arc::new(RecordingRepo::default());
        let runner = ScriptedRunner::new().on(&["git", "pull"], vec![Scripted::SpawnFailure]);
        let pipeline = pipeline(&checkout, runner, &repo);
        let outcome = pipeline.run(pipeline.request_from(trigger("feature-x")));
        assert_eq!(outcome.status, InvocationStatus::Failure);
        assert_eq!(outcome.output_lines.len(), 1);
        let line = String::from_utf8_lossy(&outcome.output_lines[0]).into_owned();
        assert!(line.contains("failed to start"), "{line}");
        let last = repo.statuses().pop().expect("final status");
        assert_eq!(last.state, CommitState::Failure);
    }

    #[test]
    fn dispatcher_runs_jobs_and_serializes_checkout() {
        let checkout = TestCheckout::new().expect("checkout");
        let repo = Arc::new(RecordingRepo::default());
        let runner = ScriptedRunner::new()
            .with_delay(std::time::Duration::from_millis(5))
            .on(&["git", "diff"], vec![Scripted::lines(&["terraform/aws/main.tf"])])
            .on(&["terraform", "plan"], vec![Scripted::lines(&["No changes."])]);
        let pipeline = Arc::new(pipeline(&checkout, runner, &repo));
        let dispatcher = Dispatcher::start(Arc::clone(&pipeline), 3).expect("start");

        let tickets: Vec<_> = (0..4)
            .map(|i| {
                dispatcher
                    .submit(pipeline.request_from(trigger(&format!("feature-{i}"))))
                    .expect("submit")
            })
            .collect();
        for ticket in tickets {
            let outcome = ticket.wait().expect("outcome");
            assert_eq!(outcome.status, InvocationStatus::Success);
            assert_eq!(outcome.request.provider, Provider::Aws);
        }
        dispatcher.shutdown();

        let runner = pipeline.orchestrator().runner();
        assert_eq!(runner.max_concurrency(), 1);
        assert_eq!(runner.count(&["terraform", "plan"]), 4);
    }

    #[test]
    fn submit_after_drop_of_workers_fails() {
        let checkout = TestCheckout::new().expect("checkout");
        let repo = Arc::new(RecordingRepo::default());
        let pipeline = Arc::new(pipeline(&checkout, ScriptedRunner::new(), &repo));
        let mut dispatcher = Dispatcher::start(pipeline, 1).expect("start");
        dispatcher.close();
        assert!(dispatcher.submit(trigger_request()).is_err());
    }

    fn trigger_request() -> InvocationRequest {
        InvocationRequest::from_trigger(trigger("feature-x"), Provider::Aws)
    }
}
