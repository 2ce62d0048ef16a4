//! Repository synchronizer: bring the shared checkout to the requested change.
//!
//! Steps run in a fixed order and are best-effort: a rebase conflict or a
//! network hiccup shows up as lines in the returned log instead of aborting.
//! Only a process that cannot be started (or times out) stops the sequence.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::io::git::Git;
use crate::io::process::CommandRunner;

/// Synchronize the checkout and return the combined log of every step.
///
/// 1. pull the default branch
/// 2. hard-reset to the default branch tip
/// 3. pull `branch` from `upstream_url` with rebase (skipped without an upstream)
/// 4. initialize and update submodules recursively
#[instrument(skip_all, fields(branch = %branch, has_upstream = upstream_url.is_some()))]
pub fn synchronize<R: CommandRunner + ?Sized>(
    git: &Git<'_, R>,
    default_branch: &str,
    branch: &str,
    upstream_url: Option<&str>,
) -> Result<Vec<Vec<u8>>> {
    let mut log = Vec::new();

    let pulled = git.pull(default_branch).context("pull default branch")?;
    log.extend(pulled.output_lines);

    let reset = git
        .reset_hard(default_branch)
        .context("reset checkout to default branch")?;
    log.extend(reset.output_lines);

    match upstream_url {
        Some(url) => {
            let rebased = git
                .pull_rebase(url, branch)
                .context("rebase contributor branch")?;
            log.extend(rebased.output_lines);
        }
        None => debug!("no upstream url, skipping contributor rebase"),
    }

    let submodules = git.update_submodules().context("update submodules")?;
    log.extend(submodules.output_lines);

    info!(lines = log.len(), checkout = %git.workdir().display(), "checkout synchronized");
    Ok(log)
}
