//! Tool invoker: run plan/apply against a provider subtree with one bounded
//! reinitialization retry.
//!
//! Each attempt selects the workspace and, unless that already reported a
//! recoverable-init marker, runs the tool verb. A marker from either step
//! clears the provider's state cache, runs `init`, and repeats the attempt
//! with the argument list built for the first one. See [`crate::core::retry`]
//! for the bound.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::retry::{AttemptVerdict, judge_attempt};
use crate::core::types::{Action, InvocationRequest, InvocationStatus};
use crate::io::config::WorkerConfig;
use crate::io::process::{CommandRunner, CommandSpec};

/// Output of a tool invocation, before it is folded into an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReport {
    pub status: InvocationStatus,
    /// Output of every command in execution order (select, run, init, ...).
    pub output_lines: Vec<Vec<u8>>,
    pub reinitializations: u32,
}

pub fn workspace_select_args(workspace: &str) -> Vec<String> {
    vec![
        "workspace".to_string(),
        "select".to_string(),
        workspace.to_string(),
    ]
}

/// `<action> [extra...]`, with `-auto-approve` forced for apply.
pub fn tool_run_args(action: Action, extra: &[String]) -> Vec<String> {
    let mut args = vec![action.as_str().to_string()];
    args.extend(extra.iter().cloned());
    if action == Action::Apply && !args.iter().any(|arg| arg == "-auto-approve") {
        args.push("-auto-approve".to_string());
    }
    args
}

pub fn init_args() -> Vec<String> {
    vec!["init".to_string(), "-input=false".to_string()]
}

/// Directory the tool runs in for `request.provider`.
pub fn provider_dir(cfg: &WorkerConfig, request: &InvocationRequest) -> PathBuf {
    cfg.checkout_dir.join(request.provider.as_str())
}

/// Run the tool for `request`, reinitializing at most once.
///
/// Sets `request.skip_init` when the retry happens. A recoverable marker seen
/// again after reinitialization yields a `Failure` report, not an error. Start
/// failures and timeouts are errors and are never retried.
#[instrument(skip_all, fields(action = %request.action, provider = %request.provider))]
pub fn invoke_tool<R: CommandRunner + ?Sized>(
    runner: &R,
    cfg: &WorkerConfig,
    request: &mut InvocationRequest,
) -> Result<ToolReport> {
    let workdir = provider_dir(cfg, request);
    let timeout = cfg.step_timeout();
    let tool_spec = |args: Vec<String>| {
        CommandSpec::new(&cfg.tool, args, &workdir, timeout).env("TF_IN_AUTOMATION", "true")
    };

    // Built once; the retry reuses it verbatim.
    let run_args = tool_run_args(request.action, &cfg.tool_args);
    let mut output_lines = Vec::new();
    let mut reinits = 0;

    loop {
        let selected = runner
            .run(&tool_spec(workspace_select_args(&cfg.workspace)).watched())
            .context("select tool workspace")?;
        let mut recoverable = selected.recoverable_init_error_detected;
        output_lines.extend(selected.output_lines);

        if !recoverable {
            let ran = runner
                .run(&tool_spec(run_args.clone()).watched())
                .with_context(|| format!("run {} {}", cfg.tool, request.action))?;
            recoverable = ran.recoverable_init_error_detected;
            output_lines.extend(ran.output_lines);
        }

        match judge_attempt(recoverable, reinits) {
            AttemptVerdict::Complete => {
                info!(reinits, "tool run complete");
                return Ok(ToolReport {
                    status: InvocationStatus::Success,
                    output_lines,
                    reinitializations: reinits,
                });
            }
            AttemptVerdict::Exhausted => {
                warn!(reinits, "recoverable init error persisted after reinitialization");
                return Ok(ToolReport {
                    status: InvocationStatus::Failure,
                    output_lines,
                    reinitializations: reinits,
                });
            }
            AttemptVerdict::Reinitialize => {
                warn!("recoverable init error, reinitializing");
                clear_state_cache(&workdir.join(&cfg.state_dir_name))?;
                let init = runner
                    .run(&tool_spec(init_args()))
                    .with_context(|| format!("run {} init", cfg.tool))?;
                output_lines.extend(init.output_lines);
                reinits += 1;
                request.skip_init = true;
            }
        }
    }
}

/// Remove the tool state cache directory if present.
pub fn clear_state_cache(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    fs::remove_dir_all(path).with_context(|| format!("remove state cache {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Provider, Trigger};
    use crate::test_support::{Scripted, ScriptedRunner, TestCheckout};

    fn request(action: Action) -> InvocationRequest {
        InvocationRequest::from_trigger(
            Trigger {
                action,
                branch: "master".to_string(),
                provider: Some(Provider::Aws),
                pull_request_id: None,
                commit_sha: Some("abc".to_string()),
                upstream_url: None,
            },
            Provider::Aws,
        )
    }

    #[test]
    fn apply_is_forced_non_interactive() {
        assert_eq!(
            tool_run_args(Action::Apply, &["-lock=true".to_string()]),
            vec!["apply", "-lock=true", "-auto-approve"]
        );
        assert_eq!(tool_run_args(Action::Plan, &[]), vec!["plan"]);
    }

    #[test]
    fn auto_approve_is_not_duplicated() {
        let args = tool_run_args(Action::Apply, &["-auto-approve".to_string()]);
        assert_eq!(args.iter().filter(|a| *a == "-auto-approve").count(), 1);
    }

    #[test]
    fn clean_run_concatenates_select_and_run_output() {
        let checkout = TestCheckout::new().expect("checkout");
        let runner = ScriptedRunner::new()
            .on(
                &["terraform", "workspace"],
                vec![Scripted::lines(&["Switched to workspace \"production\"."])],
            )
            .on(
                &["terraform", "plan"],
                vec![Scripted::lines(&["No changes.", ""])],
            );
        let mut req = request(Action::Plan);
        let report = invoke_tool(&runner, &checkout.config, &mut req).expect("invoke");
        assert_eq!(report.status, InvocationStatus::Success);
        assert_eq!(report.reinitializations, 0);
        assert_eq!(
            report.output_lines,
            vec![
                b"Switched to workspace \"production\".".to_vec(),
                b"No changes.".to_vec(),
                Vec::new(),
            ]
        );
        assert!(!req.skip_init);
        let calls = runner.calls();
        assert!(calls.iter().all(|c| c.workdir == checkout.provider_dir(Provider::Aws)));
        assert!(calls.iter().all(|c| c.watched));
    }

    #[test]
    fn workspace_marker_skips_run_and_reinitializes() {
        let checkout = TestCheckout::new().expect("checkout");
        let runner = ScriptedRunner::new().on(
            &["terraform", "workspace"],
            vec![
                Scripted::lines(&["Backend reinitialization required."]),
                Scripted::lines(&["ok"]),
            ],
        );
        let mut req = request(Action::Plan);
        let report = invoke_tool(&runner, &checkout.config, &mut req).expect("invoke");
        assert_eq!(report.status, InvocationStatus::Success);
        assert_eq!(
            runner.command_lines(),
            vec![
                "terraform workspace select production",
                "terraform init -input=false",
                "terraform workspace select production",
                "terraform plan",
            ]
        );
        assert!(req.skip_init);
    }

    #[test]
    fn persistent_marker_fails_after_one_reinit() {
        let checkout = TestCheckout::new().expect("checkout");
        let runner = ScriptedRunner::new().on(
            &["terraform", "apply"],
            vec![Scripted::lines(&["Error loading modules: vpc"])],
        );
        let mut req = request(Action::Apply);
        let report = invoke_tool(&runner, &checkout.config, &mut req).expect("invoke");
        assert_eq!(report.status, InvocationStatus::Failure);
        assert_eq!(report.reinitializations, 1);
        assert_eq!(runner.count(&["terraform", "apply"]), 2);
        assert_eq!(runner.count(&["terraform", "init"]), 1);
    }

    #[test]
    fn reinit_removes_state_cache() {
        let checkout = TestCheckout::new().expect("checkout");
        let cache = checkout.state_cache(Provider::Aws);
        assert!(cache.exists());
        let runner = ScriptedRunner::new().on(
            &["terraform", "plan"],
            vec![
                Scripted::lines(&["Backend reinitialization required."]),
                Scripted::lines(&["No changes."]),
            ],
        );
        let mut req = request(Action::Plan);
        invoke_tool(&runner, &checkout.config, &mut req).expect("invoke");
        assert!(!cache.exists());
    }

    #[test]
    fn retry_reuses_argument_list() {
        let checkout = TestCheckout::new().expect("checkout");
        let mut config = checkout.config.clone();
        config.tool_args = vec!["-var".to_string(), "env=prod".to_string()];
        let runner = ScriptedRunner::new().on(
            &["terraform", "apply"],
            vec![
                Scripted::lines(&["Error loading modules:"]),
                Scripted::lines(&["Apply complete!"]),
            ],
        );
        let mut req = request(Action::Apply);
        invoke_tool(&runner, &config, &mut req).expect("invoke");
        let runs: Vec<_> = runner
            .calls()
            .into_iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("apply"))
            .map(|c| c.args)
            .collect();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], runs[1]);
        assert_eq!(runs[0], vec!["apply", "-var", "env=prod", "-auto-approve"]);
    }

    #[test]
    fn spawn_failure_is_not_retried() {
        let checkout = TestCheckout::new().expect("checkout");
        let runner =
            ScriptedRunner::new().on(&["terraform", "workspace"], vec![Scripted::SpawnFailure]);
        let mut req = request(Action::Plan);
        assert!(invoke_tool(&runner, &checkout.config, &mut req).is_err());
        assert_eq!(runner.calls().len(), 1);
    }
}
