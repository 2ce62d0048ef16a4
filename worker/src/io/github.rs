//! Repository hosting API adapter (commit statuses and pull request comments).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::io::config::GithubConfig;

const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
        }
    }
}

/// Operations consumed from the repository host.
pub trait RepoApi: Send + Sync {
    fn create_commit_status(
        &self,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
    ) -> Result<()>;

    fn create_pull_request_comment(&self, pull_request_id: u64, body: &str) -> Result<()>;
}

impl<T: RepoApi + ?Sized> RepoApi for Arc<T> {
    fn create_commit_status(
        &self,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
    ) -> Result<()> {
        (**self).create_commit_status(sha, state, description, context)
    }

    fn create_pull_request_comment(&self, pull_request_id: u64, body: &str) -> Result<()> {
        (**self).create_pull_request_comment(pull_request_id, body)
    }
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    state: CommitState,
    description: &'a str,
    context: &'a str,
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    body: &'a str,
}

/// GitHub REST client scoped to one repository.
pub struct GithubClient {
    http: Client,
    api_url: String,
    org: String,
    repo: String,
}

impl GithubClient {
    pub fn new(api_url: &str, token: &str, org: &str, repo: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("tfci-worker"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        let auth = format!("Bearer {}", token.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid github authorization header")?,
        );
        let http = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build github http client")?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            org: org.to_string(),
            repo: repo.to_string(),
        })
    }

    /// Build a client from config; `None` if token, org or repo is missing.
    pub fn from_config(cfg: &GithubConfig) -> Result<Option<Self>> {
        match (&cfg.token, &cfg.org, &cfg.repo) {
            (Some(token), Some(org), Some(repo)) => {
                Self::new(&cfg.api_url, token, org, repo).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{tail}", self.api_url, self.org, self.repo)
    }

    fn post_json<T: Serialize>(&self, operation: &str, url: &str, body: &T) -> Result<()> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .with_context(|| format!("{operation}: send request"))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("{operation}: github responded {status}: {}", text.trim()));
        }
        debug!(%status, "{operation} ok");
        Ok(())
    }
}

impl RepoApi for GithubClient {
    #[instrument(skip_all, fields(sha = %sha, state = state.as_str()))]
    fn create_commit_status(
        &self,
        sha: &str,
        state: CommitState,
        description: &str,
        context: &str,
    ) -> Result<()> {
        let url = self.repo_url(&format!("statuses/{sha}"));
        self.post_json(
            "create commit status",
            &url,
            &StatusBody {
                state,
                description,
                context,
            },
        )
    }

    #[instrument(skip_all, fields(pull_request_id = pull_request_id))]
    fn create_pull_request_comment(&self, pull_request_id: u64, body: &str) -> Result<()> {
        let url = self.repo_url(&format!("issues/{pull_request_id}/comments"));
        self.post_json("create pull request comment", &url, &CommentBody { body })
    }
}
