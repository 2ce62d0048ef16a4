//! CI worker that runs Terraform for pushes and pull requests.
//!
//! A trigger names an action (`plan` or `apply`), a branch and optionally a
//! pull request, commit and fork URL. The worker synchronizes a shared checkout,
//! decides from the diff whether and where the tool must run, runs it with a
//! single bounded reinitialization retry, and publishes the result as a pull
//! request comment, a commit status and a chat message.
//!
//! - **[`core`]**: Pure logic (types, output markers, path routing, retry policy).
//! - **[`io`]**: Side effects (processes, git, config, GitHub, chat webhook).
//!
//! Orchestration modules ([`sync`], [`classify`], [`tool`], [`notify`],
//! [`orchestrator`], [`dispatch`]) combine the two to serve the CLI.

pub mod classify;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tool;
