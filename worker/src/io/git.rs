//! Git adapter for the shared working checkout.
//!
//! Every call goes through a [`CommandRunner`] so the synchronizer and
//! classifier can be driven by scripted runners in tests. Exit codes are not
//! inspected; callers read the captured output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::core::types::CommandResult;
use crate::io::process::{CommandRunner, CommandSpec, ProcessError};

/// Wrapper for executing git commands in the checkout directory.
pub struct Git<'a, R: ?Sized> {
    runner: &'a R,
    workdir: PathBuf,
    remote: String,
    timeout: Duration,
}

impl<'a, R: CommandRunner + ?Sized> Git<'a, R> {
    pub fn new(
        runner: &'a R,
        workdir: impl Into<PathBuf>,
        remote: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            remote: remote.to_string(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// `git pull <remote> <branch>`
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn pull(&self, branch: &str) -> Result<CommandResult, ProcessError> {
        self.run(pull_args(&self.remote, branch))
    }

    /// `git reset --hard <remote>/<branch>`
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn reset_hard(&self, branch: &str) -> Result<CommandResult, ProcessError> {
        self.run(reset_hard_args(&self.remote, branch))
    }

    /// `git pull --rebase <upstream_url> <branch>`
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn pull_rebase(
        &self,
        upstream_url: &str,
        branch: &str,
    ) -> Result<CommandResult, ProcessError> {
        self.run(pull_rebase_args(upstream_url, branch))
    }

    /// `git submodule update --init --recursive`
    #[instrument(skip_all)]
    pub fn update_submodules(&self) -> Result<CommandResult, ProcessError> {
        self.run(submodule_update_args())
    }

    /// Paths changed between `<remote>/<base>` and `HEAD`, plus the raw result.
    #[instrument(skip_all, fields(base = %base))]
    pub fn changed_paths(&self, base: &str) -> Result<(Vec<String>, CommandResult), ProcessError> {
        let result = self.run(diff_names_args(&self.remote, base))?;
        let paths = parse_name_only(&result.output_lines);
        debug!(changed = paths.len(), "diff computed");
        Ok((paths, result))
    }

    fn run(&self, args: Vec<String>) -> Result<CommandResult, ProcessError> {
        let spec = CommandSpec::new("git", args, &self.workdir, self.timeout);
        self.runner.run(&spec)
    }
}

pub fn pull_args(remote: &str, branch: &str) -> Vec<String> {
    vec!["pull".to_string(), remote.to_string(), branch.to_string()]
}

pub fn reset_hard_args(remote: &str, branch: &str) -> Vec<String> {
    vec![
        "reset".to_string(),
        "--hard".to_string(),
        format!("{remote}/{branch}"),
    ]
}

pub fn pull_rebase_args(upstream_url: &str, branch: &str) -> Vec<String> {
    vec![
        "pull".to_string(),
        "--rebase".to_string(),
        upstream_url.to_string(),
        branch.to_string(),
    ]
}

pub fn submodule_update_args() -> Vec<String> {
    vec![
        "submodule".to_string(),
        "update".to_string(),
        "--init".to_string(),
        "--recursive".to_string(),
    ]
}

pub fn diff_names_args(remote: &str, base: &str) -> Vec<String> {
    vec![
        "diff".to_string(),
        "--name-only".to_string(),
        format!("{remote}/{base}"),
        "HEAD".to_string(),
    ]
}

/// Parse `git diff --name-only` output into paths, skipping blank lines.
pub fn parse_name_only(lines: &[Vec<u8>]) -> Vec<String> {
    lines
        .iter()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .filter(|path| !path.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_targets_remote_tracking_branch() {
        assert_eq!(
            reset_hard_args("origin", "master"),
            vec!["reset", "--hard", "origin/master"]
        );
    }

    #[test]
    fn rebase_pulls_contributor_branch() {
        assert_eq!(
            pull_rebase_args("https://github.com/fork/infra.git", "feature-x"),
            vec![
                "pull",
                "--rebase",
                "https://github.com/fork/infra.git",
                "feature-x"
            ]
        );
    }

    #[test]
    fn diff_compares_head_against_default_tip() {
        assert_eq!(
            diff_names_args("origin", "master"),
            vec!["diff", "--name-only", "origin/master", "HEAD"]
        );
    }

    #[test]
    fn parses_name_only_output() {
        let lines = vec![
            b"terraform/aws/vpc.tf".to_vec(),
            Vec::new(),
            b"  README.md ".to_vec(),
        ];
        assert_eq!(
            parse_name_only(&lines),
            vec!["terraform/aws/vpc.tf".to_string(), "README.md".to_string()]
        );
    }
}
