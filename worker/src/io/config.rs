//! Worker configuration: TOML file plus environment overrides.
//!
//! Resolution order is defaults, then the optional TOML file, then the
//! process environment. Credentials only ever come from these two sources.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Provider;

pub const ENV_GH_ACCESS_TOKEN: &str = "GH_ACCESS_TOKEN";
pub const ENV_GH_ORG: &str = "GH_ORG";
pub const ENV_GH_REPO: &str = "GH_REPO";
pub const ENV_GH_API_URL: &str = "GH_API_URL";
pub const ENV_TF_ARGS: &str = "TF_ARGS";
pub const ENV_TF_CHECKOUT_DIR: &str = "TF_CHECKOUT_DIR";
pub const ENV_TF_STEP_TIMEOUT_SECS: &str = "TF_STEP_TIMEOUT_SECS";
pub const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Worker configuration (TOML).
///
/// Missing fields default to the values the deployment image expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Shared working checkout; holds one subdirectory per provider.
    pub checkout_dir: PathBuf,
    /// Canonical default branch (deployment source of truth).
    pub default_branch: String,
    /// Remote the default branch is pulled from.
    pub remote: String,
    /// Infrastructure tool executable.
    pub tool: String,
    /// Tool workspace selected before every run.
    pub workspace: String,
    /// Extra arguments appended to every plan/apply run.
    pub tool_args: Vec<String>,
    /// Per-provider tool state cache, removed on reinitialization.
    pub state_dir_name: String,
    /// Upper bound for every child process.
    pub step_timeout_secs: u64,
    /// Worker threads in the dispatcher pool.
    pub workers: usize,
    /// Provider used for default-branch triggers that do not name one.
    pub default_provider: Provider,
    pub github: GithubConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub org: Option<String>,
    pub repo: Option<String>,
    /// Commit status context identifier.
    pub status_context: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    pub webhook_url: Option<String>,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
            org: None,
            repo: None,
            status_context: "continuous/terraform-ci".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            checkout_dir: PathBuf::from("/terraform"),
            default_branch: "master".to_string(),
            remote: "origin".to_string(),
            tool: "terraform".to_string(),
            workspace: "production".to_string(),
            tool_args: Vec::new(),
            state_dir_name: ".terraform".to_string(),
            step_timeout_secs: 30 * 60,
            workers: 1,
            default_provider: Provider::Aws,
            github: GithubConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.checkout_dir.as_os_str().is_empty() {
            return Err(anyhow!("checkout_dir must not be empty"));
        }
        if self.default_branch.trim().is_empty() {
            return Err(anyhow!("default_branch must not be empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must not be empty"));
        }
        if self.tool.trim().is_empty() {
            return Err(anyhow!("tool must not be empty"));
        }
        if self.workspace.trim().is_empty() {
            return Err(anyhow!("workspace must not be empty"));
        }
        let state_dir = Path::new(&self.state_dir_name);
        if self.state_dir_name.trim().is_empty() || state_dir.components().count() != 1 {
            return Err(anyhow!("state_dir_name must be a single directory name"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be > 0"));
        }
        if self.github.status_context.trim().is_empty() {
            return Err(anyhow!("github.status_context must not be empty"));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// `org/repo` when both are configured.
    pub fn repository_slug(&self) -> Option<String> {
        match (&self.github.org, &self.github.repo) {
            (Some(org), Some(repo)) => Some(format!("{org}/{repo}")),
            _ => None,
        }
    }

    /// Apply environment overrides from `env`.
    pub fn apply_env(&mut self, env: &HashMap<String, String>) -> Result<()> {
        let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        if let Some(token) = get(ENV_GH_ACCESS_TOKEN) {
            self.github.token = Some(token.to_string());
        }
        if let Some(org) = get(ENV_GH_ORG) {
            self.github.org = Some(org.to_string());
        }
        if let Some(repo) = get(ENV_GH_REPO) {
            self.github.repo = Some(repo.to_string());
        }
        if let Some(url) = get(ENV_GH_API_URL) {
            self.github.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = get(ENV_TF_CHECKOUT_DIR) {
            self.checkout_dir = PathBuf::from(dir);
        }
        if let Some(url) = get(ENV_SLACK_WEBHOOK_URL) {
            self.chat.webhook_url = Some(url.to_string());
        }
        if let Some(raw) = get(ENV_TF_STEP_TIMEOUT_SECS) {
            self.step_timeout_secs = raw
                .parse()
                .with_context(|| format!("parse {ENV_TF_STEP_TIMEOUT_SECS}='{raw}'"))?;
        }
        if let Some(raw) = get(ENV_TF_ARGS) {
            let args =
                shlex::split(raw).ok_or_else(|| anyhow!("{ENV_TF_ARGS} has unbalanced quotes"))?;
            self.tool_args.extend(args);
        }
        Ok(())
    }

    /// Copy with the access token masked, for display.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.github.token.is_some() {
            cfg.github.token = Some("***".to_string());
        }
        cfg
    }
}

/// Load config from an optional TOML file, then apply the process environment.
pub fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    let env: HashMap<String, String> = std::env::vars().collect();
    load_config_with_env(path, &env)
}

/// Load config from an optional TOML file, then apply `env`.
///
/// A path that does not exist yields the defaults.
pub fn load_config_with_env(
    path: Option<&Path>,
    env: &HashMap<String, String>,
) -> Result<WorkerConfig> {
    let mut cfg = match path {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "loading config file");
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
        }
        _ => WorkerConfig::default(),
    };
    cfg.apply_env(env)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Render config as TOML.
pub fn render_config(cfg: &WorkerConfig) -> Result<String> {
    toml::to_string_pretty(cfg).context("serialize config toml")
}
