//! Change classifier stage: decide whether and where the tool should run.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::classifier::{ProviderRoute, route_changed_paths};
use crate::core::types::{InvocationRequest, Provider};
use crate::io::git::Git;
use crate::io::process::CommandRunner;

/// Result of classifying the synchronized checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Run the tool at all.
    pub proceed: bool,
    /// Provider subtree to run against when proceeding.
    pub provider: Option<Provider>,
    /// Raw diff output (empty on the default branch).
    pub diff_log: Vec<Vec<u8>>,
    /// Diagnostic lines meant for the final report.
    pub notes: Vec<Vec<u8>>,
}

/// Classify the change for `request`.
///
/// The default branch is never diffed: the caller's provider is authoritative
/// there. Other branches are diffed against the default branch tip and routed
/// with [`route_changed_paths`]. Neither "no infrastructure change" nor an
/// unsupported provider is an error; both stop the pipeline with `proceed = false`.
/// The diff listing and a one-line note explaining the stop are still
/// returned, so the published report says why nothing ran.
#[instrument(skip_all, fields(branch = %request.branch))]
pub fn classify<R: CommandRunner + ?Sized>(
    git: &Git<'_, R>,
    default_branch: &str,
    request: &InvocationRequest,
) -> Result<Classification> {
    if request.branch == default_branch {
        info!(provider = %request.provider, "default branch, using supplied provider");
        return Ok(Classification {
            proceed: true,
            provider: Some(request.provider),
            diff_log: Vec::new(),
            notes: Vec::new(),
        });
    }

    let (paths, diff) = git
        .changed_paths(default_branch)
        .context("diff against default branch")?;

    let mut notes = Vec::new();
    let (proceed, provider) = match route_changed_paths(&paths) {
        ProviderRoute::NoInfrastructure => {
            info!(changed = paths.len(), "no infrastructure changes");
            notes.push(
                format!(
                    "No terraform changes detected, nothing to {}.",
                    request.action
                )
                .into_bytes(),
            );
            (false, None)
        }
        ProviderRoute::Unsupported => {
            info!("infrastructure changed outside supported providers");
            notes.push(
                b"Terraform changes are outside the supported provider subtrees (aws, gcp)."
                    .to_vec(),
            );
            (false, None)
        }
        ProviderRoute::Provider {
            provider,
            ambiguous,
        } => {
            if ambiguous {
                warn!(%provider, "change touches several provider subtrees");
                notes.push(
                    format!(
                        "Warning: change touches several provider subtrees, running against {provider} only."
                    )
                    .into_bytes(),
                );
            }
            info!(%provider, "provider selected");
            (true, Some(provider))
        }
    };

    Ok(Classification {
        proceed,
        provider,
        diff_log: diff.output_lines,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::types::{Action, Trigger};
    use crate::test_support::{Scripted, ScriptedRunner};

    fn request(branch: &str, provider: Option<Provider>) -> InvocationRequest {
        InvocationRequest::from_trigger(
            Trigger {
                action: Action::Plan,
                branch: branch.to_string(),
                provider,
                pull_request_id: Some(7),
                commit_sha: Some("abc".to_string()),
                upstream_url: Some("u".to_string()),
            },
            Provider::Aws,
        )
    }

    fn classify_with(runner: &ScriptedRunner, req: &InvocationRequest) -> Classification {
        let git = Git::new(runner, "/checkout", "origin", Duration::from_secs(5));
        classify(&git, "master", req).expect("classify")
    }

    #[test]
    fn default_branch_skips_diff() {
        let runner = ScriptedRunner::new();
        let result = classify_with(&runner, &request("master", Some(Provider::Gcp)));
        assert!(result.proceed);
        assert_eq!(result.provider, Some(Provider::Gcp));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn docs_change_stops_with_diff_listing_and_note() {
        let runner =
            ScriptedRunner::new().on(&["git", "diff"], vec![Scripted::lines(&["README.md"])]);
        let result = classify_with(&runner, &request("feature-x", None));
        assert!(!result.proceed);
        assert_eq!(result.diff_log, vec![b"README.md".to_vec()]);
        assert_eq!(result.notes.len(), 1);
    }

    #[test]
    fn gcp_change_selects_gcp() {
        let runner = ScriptedRunner::new().on(
            &["git", "diff"],
            vec![Scripted::lines(&["terraform/gcp/main.tf"])],
        );
        let result = classify_with(&runner, &request("feature-x", None));
        assert!(result.proceed);
        assert_eq!(result.provider, Some(Provider::Gcp));
        assert!(result.notes.is_empty());
    }

    #[test]
    fn unsupported_provider_does_not_proceed() {
        let runner = ScriptedRunner::new().on(
            &["git", "diff"],
            vec![Scripted::lines(&["terraform/azure/main.tf"])],
        );
        let result = classify_with(&runner, &request("feature-x", None));
        assert!(!result.proceed);
        assert!(result.provider.is_none());
    }

    #[test]
    fn ambiguous_change_is_flagged() {
        let runner = ScriptedRunner::new().on(
            &["git", "diff"],
            vec![Scripted::lines(&[
                "terraform/aws/main.tf",
                "terraform/gcp/main.tf",
            ])],
        );
        let result = classify_with(&runner, &request("feature-x", None));
        assert!(result.proceed);
        assert_eq!(result.provider, Some(Provider::Gcp));
        assert_eq!(result.notes.len(), 1);
    }
}
