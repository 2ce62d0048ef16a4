//! Orchestration for one invocation: synchronize, classify, run the tool.
//!
//! [`Orchestrator`] is the per-process context. It owns the process runner,
//! the configuration and the checkout lock; every stage receives what it needs
//! from here instead of reaching for globals.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::classify::classify;
use crate::core::types::{InvocationOutcome, InvocationRequest};
use crate::io::config::WorkerConfig;
use crate::io::git::Git;
use crate::io::lock::CheckoutLock;
use crate::io::process::CommandRunner;
use crate::sync::synchronize;
use crate::tool::invoke_tool;

pub struct Orchestrator<R> {
    runner: R,
    config: WorkerConfig,
    // Held from synchronization until the tool result is packaged: the
    // checkout and the per-provider state caches are shared by every job.
    // Other processes are kept out by the file lock taken under it.
    checkout_lock: Mutex<()>,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(runner: R, config: WorkerConfig) -> Self {
        Self {
            runner,
            config,
            checkout_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run one invocation to its outcome.
    ///
    /// `Ok` carries `Success`, or `Failure` when a recoverable tool error
    /// recurred after reinitialization. `Err` means a process could not be
    /// started or timed out; nothing is retried in that case.
    ///
    /// The output is every command's output in execution order: the
    /// synchronization log, the diff listing, any classifier notes, then the
    /// tool output. When the change needs no tool run the outcome stops after
    /// the notes and is `Success`.
    #[instrument(skip_all, fields(action = %request.action, branch = %request.branch, pr = ?request.pull_request_id))]
    pub fn invoke(&self, mut request: InvocationRequest) -> Result<InvocationOutcome> {
        let _checkout = self.checkout_lock.lock().unwrap_or_else(|poisoned| {
            warn!("checkout lock poisoned by an earlier job, continuing");
            PoisonError::into_inner(poisoned)
        });
        let cfg = &self.config;
        let _checkout_file = CheckoutLock::acquire(&cfg.checkout_dir)?;
        let git = Git::new(
            &self.runner,
            &cfg.checkout_dir,
            &cfg.remote,
            cfg.step_timeout(),
        );

        let sync_log = synchronize(
            &git,
            &cfg.default_branch,
            &request.branch,
            request.upstream_url.as_deref(),
        )?;
        let classification = classify(&git, &cfg.default_branch, &request)?;

        let mut lines = sync_log;
        lines.extend(classification.diff_log);
        lines.extend(classification.notes);
        if !classification.proceed {
            info!("nothing to run");
            return Ok(InvocationOutcome::success(lines, request));
        }
        if let Some(provider) = classification.provider {
            request.provider = provider;
        }

        let report = invoke_tool(&self.runner, cfg, &mut request)?;
        lines.extend(report.output_lines);
        info!(status = report.status.label(), reinits = report.reinitializations, "invocation finished");
        Ok(InvocationOutcome::new(report.status, lines, request))
    }
}
