//! Shared types for the invocation pipeline.
//!
//! These types define the contract between stages. They are created fresh for
//! every triggered invocation and discarded once the outcome is delivered.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::core::output::filter_blank_lines;

/// Infrastructure tool verb requested by the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Plan,
    Apply,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Plan => "plan",
            Action::Apply => "apply",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plan" => Ok(Action::Plan),
            "apply" => Ok(Action::Apply),
            other => Err(anyhow!("unknown action '{other}' (expected plan or apply)")),
        }
    }
}

/// Supported provider subtrees of the checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
}

impl Provider {
    /// Providers in the order the classifier checks them.
    pub const ALL: [Provider; 2] = [Provider::Aws, Provider::Gcp];

    /// Directory name of the provider subtree (also its CLI spelling).
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "gcp" => Ok(Provider::Gcp),
            other => Err(anyhow!("unsupported provider '{other}' (expected aws or gcp)")),
        }
    }
}

/// Trigger input handed over by the webhook/task-dispatch layer.
///
/// `plan` triggers carry pull request, commit and upstream identifiers; `apply`
/// triggers (pushes to the default branch) carry the commit only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub action: Action,
    pub branch: String,
    pub provider: Option<Provider>,
    pub pull_request_id: Option<u64>,
    pub commit_sha: Option<String>,
    pub upstream_url: Option<String>,
}

/// One invocation of the pipeline.
///
/// Immutable except `provider` (re-derived by the classifier) and `skip_init`
/// (set once by the tool invoker when it retries after reinitialization).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub action: Action,
    pub branch: String,
    pub provider: Provider,
    pub pull_request_id: Option<u64>,
    pub commit_sha: Option<String>,
    pub upstream_url: Option<String>,
    pub skip_init: bool,
}

impl InvocationRequest {
    pub fn from_trigger(trigger: Trigger, default_provider: Provider) -> Self {
        Self {
            action: trigger.action,
            branch: trigger.branch,
            provider: trigger.provider.unwrap_or(default_provider),
            pull_request_id: trigger.pull_request_id,
            commit_sha: trigger.commit_sha,
            upstream_url: trigger.upstream_url,
            skip_init: false,
        }
    }
}

/// Captured result of one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// True once the child was reaped after its output stream closed.
    pub exit_observed: bool,
    /// Combined stdout/stderr lines in arrival order, line terminators removed.
    pub output_lines: Vec<Vec<u8>>,
    /// Set when a watched invocation printed a reinitialization marker.
    pub recoverable_init_error_detected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvocationStatus {
    Success,
    Failure,
}

impl InvocationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            InvocationStatus::Success => "SUCCESS",
            InvocationStatus::Failure => "FAILURE",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InvocationStatus::Success)
    }
}

/// Terminal value handed to the result notifier.
///
/// `output_lines` never contains blank entries and keeps the emission order of
/// the underlying commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    pub status: InvocationStatus,
    pub output_lines: Vec<Vec<u8>>,
    pub request: InvocationRequest,
}

impl InvocationOutcome {
    pub fn new(
        status: InvocationStatus,
        output_lines: Vec<Vec<u8>>,
        request: InvocationRequest,
    ) -> Self {
        Self {
            status,
            output_lines: filter_blank_lines(output_lines),
            request,
        }
    }

    pub fn success(output_lines: Vec<Vec<u8>>, request: InvocationRequest) -> Self {
        Self::new(InvocationStatus::Success, output_lines, request)
    }

    pub fn failure(output_lines: Vec<Vec<u8>>, request: InvocationRequest) -> Self {
        Self::new(InvocationStatus::Failure, output_lines, request)
    }
}
