//! Result notifier: fan the final outcome out to the pull request, the commit
//! status and the chat channel.
//!
//! Each destination is delivered on its own scoped thread and reports its own
//! [`Delivery`]; a failing destination is logged and never blocks the others.

use std::thread;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::output::{chat_text, decode_lines};
use crate::core::types::{Action, InvocationOutcome, InvocationRequest, InvocationStatus};
use crate::io::chat::{ChatAttachment, ChatMessage, ChatSink, WebhookChat};
use crate::io::config::WorkerConfig;
use crate::io::github::{CommitState, GithubClient, RepoApi};

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub comment: Delivery,
    pub status: Delivery,
    pub chat: Delivery,
}

pub struct Notifier {
    repo: Option<Box<dyn RepoApi>>,
    chat: Option<Box<dyn ChatSink>>,
    tool: String,
    default_branch: String,
    status_context: String,
    repository: Option<String>,
}

impl Notifier {
    pub fn new(
        repo: Option<Box<dyn RepoApi>>,
        chat: Option<Box<dyn ChatSink>>,
        cfg: &WorkerConfig,
    ) -> Self {
        Self {
            repo,
            chat,
            tool: cfg.tool.clone(),
            default_branch: cfg.default_branch.clone(),
            status_context: cfg.github.status_context.clone(),
            repository: cfg.repository_slug(),
        }
    }

    /// Build the GitHub and chat clients the config enables.
    pub fn from_config(cfg: &WorkerConfig) -> Result<Self> {
        let repo = GithubClient::from_config(&cfg.github)?;
        if repo.is_none() {
            warn!("github token/org/repo not configured, statuses and comments disabled");
        }
        let chat = match &cfg.chat.webhook_url {
            Some(url) => Some(Box::new(WebhookChat::new(url)?) as Box<dyn ChatSink>),
            None => None,
        };
        Ok(Self::new(
            repo.map(|client| Box::new(client) as Box<dyn RepoApi>),
            chat,
            cfg,
        ))
    }

    /// Mark the commit `pending` before the pipeline starts.
    #[instrument(skip_all, fields(action = %request.action))]
    pub fn mark_pending(&self, request: &InvocationRequest) -> Delivery {
        let (Some(repo), Some(sha)) = (&self.repo, &request.commit_sha) else {
            return Delivery::Skipped;
        };
        let description = format!("{} {} running", self.tool, request.action);
        settle(
            "pending status",
            repo.create_commit_status(sha, CommitState::Pending, &description, &self.status_context),
        )
    }

    /// Deliver `outcome` to every applicable destination.
    #[instrument(skip_all, fields(action = %outcome.request.action, status = outcome.status.label()))]
    pub fn notify(&self, outcome: &InvocationOutcome) -> DeliveryReport {
        let report = thread::scope(|scope| {
            let comment = scope.spawn(|| self.post_comment(outcome));
            let status = scope.spawn(|| self.set_status(outcome));
            let chat = scope.spawn(|| self.post_chat(outcome));
            DeliveryReport {
                comment: joined("comment", comment.join()),
                status: joined("commit status", status.join()),
                chat: joined("chat", chat.join()),
            }
        });
        info!(?report, "notification finished");
        report
    }

    fn post_comment(&self, outcome: &InvocationOutcome) -> Delivery {
        let (Some(repo), Some(pr)) = (&self.repo, outcome.request.pull_request_id) else {
            return Delivery::Skipped;
        };
        if outcome.output_lines.is_empty() {
            return Delivery::Skipped;
        }
        let body = comment_body(&self.tool, outcome);
        settle("comment", repo.create_pull_request_comment(pr, &body))
    }

    fn set_status(&self, outcome: &InvocationOutcome) -> Delivery {
        let (Some(repo), Some(sha)) = (&self.repo, &outcome.request.commit_sha) else {
            return Delivery::Skipped;
        };
        let state = match outcome.status {
            InvocationStatus::Success => CommitState::Success,
            InvocationStatus::Failure => CommitState::Failure,
        };
        let description = status_description(&self.tool, outcome.request.action, outcome.status);
        settle(
            "commit status",
            repo.create_commit_status(sha, state, &description, &self.status_context),
        )
    }

    fn post_chat(&self, outcome: &InvocationOutcome) -> Delivery {
        let Some(chat) = &self.chat else {
            return Delivery::Skipped;
        };
        if outcome.request.branch != self.default_branch {
            return Delivery::Skipped;
        }
        let Some(message) = chat_message(&self.tool, self.repository.as_deref(), outcome) else {
            return Delivery::Skipped;
        };
        settle("chat", chat.post(&message))
    }
}

fn settle(destination: &str, result: Result<()>) -> Delivery {
    match result {
        Ok(()) => Delivery::Sent,
        Err(err) => {
            warn!(destination, err = %format!("{err:#}"), "delivery failed");
            Delivery::Failed(format!("{err:#}"))
        }
    }
}

fn joined(destination: &str, result: thread::Result<Delivery>) -> Delivery {
    result.unwrap_or_else(|_| {
        warn!(destination, "delivery thread panicked");
        Delivery::Failed(format!("{destination} delivery panicked"))
    })
}

/// GitHub rejects comment bodies longer than this many characters.
pub const COMMENT_MAX_CHARS: usize = 65_536;
/// Output characters kept in a comment; the rest of the limit is header, fence and notice.
const COMMENT_OUTPUT_BUDGET: usize = 60_000;

/// Pull request comment: status label plus the output in a fenced block.
///
/// Output over the budget keeps its tail (where plan summaries and errors are)
/// and gains a truncation notice. The fence is longer than any backtick run
/// in the output.
pub fn comment_body(tool: &str, outcome: &InvocationOutcome) -> String {
    let output = decode_lines(&outcome.output_lines);
    let (shown, omitted) = keep_tail(&output, COMMENT_OUTPUT_BUDGET);
    let fence = "`".repeat(longest_backtick_run(shown).max(2) + 1);
    let mut body = format!(
        "**{}** `{tool} {}` on `{}`\n\n",
        outcome.status.label(),
        outcome.request.action,
        outcome.request.branch,
    );
    if omitted > 0 {
        body.push_str(&format!("[output truncated: first {omitted} characters omitted]\n\n"));
    }
    body.push_str(&format!("{fence}\n{shown}\n{fence}\n"));
    body
}

/// Last `budget` characters of `text`, starting on a line boundary when cut.
/// Returns the kept slice and the number of characters dropped.
fn keep_tail(text: &str, budget: usize) -> (&str, usize) {
    let total = text.chars().count();
    if total <= budget {
        return (text, 0);
    }
    let cut = text
        .char_indices()
        .nth(total - budget)
        .map_or(text.len(), |(idx, _)| idx);
    let start = match text[cut..].find('\n') {
        Some(newline) => cut + newline + 1,
        None => cut,
    };
    let kept = &text[start..];
    (kept, total - kept.chars().count())
}

fn longest_backtick_run(text: &str) -> usize {
    text.split(|c| c != '`').map(str::len).max().unwrap_or(0)
}

pub fn status_description(tool: &str, action: Action, status: InvocationStatus) -> String {
    let verb = match status {
        InvocationStatus::Success => "succeeded",
        InvocationStatus::Failure => "failed",
    };
    format!("{tool} {action} {verb}")
}

/// Chat message for `outcome`, or `None` when nothing but noise remains.
pub fn chat_message(
    tool: &str,
    repository: Option<&str>,
    outcome: &InvocationOutcome,
) -> Option<ChatMessage> {
    let text = chat_text(&outcome.output_lines);
    if text.is_empty() {
        return None;
    }
    let request = &outcome.request;
    let label = outcome.status.label();
    let title = format!("{tool} {} {label}", request.action);
    let pretext = match (&request.commit_sha, repository) {
        (Some(sha), Some(repo)) => format!("{repo}@{} ({})", short_sha(sha), request.branch),
        (Some(sha), None) => format!("{} @ {}", request.branch, short_sha(sha)),
        (None, Some(repo)) => format!("{repo} ({})", request.branch),
        (None, None) => request.branch.clone(),
    };
    let color = match outcome.status {
        InvocationStatus::Success => "good",
        InvocationStatus::Failure => "danger",
    };
    Some(ChatMessage {
        attachments: vec![ChatAttachment {
            fallback: format!("{title}: {pretext}"),
            pretext,
            title,
            text,
            color: color.to_string(),
        }],
    })
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
