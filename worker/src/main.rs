//! `tfci`: run Terraform for CI triggers and publish the results.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use worker::core::output::decode_lines;
use worker::core::types::{Action, InvocationOutcome, Provider, Trigger};
use worker::dispatch::{Dispatcher, Pipeline};
use worker::exit_codes;
use worker::io::config::{WorkerConfig, load_config, render_config};
use worker::io::process::SystemRunner;
use worker::logging;
use worker::notify::Notifier;
use worker::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(
    name = "tfci",
    version,
    about = "Run terraform plan/apply for CI triggers"
)]
struct Cli {
    /// Worker config file (TOML). Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one invocation and print its output.
    Invoke {
        #[arg(long)]
        action: Action,
        #[arg(long)]
        branch: String,
        /// Provider for default-branch runs; other branches derive it from the diff.
        #[arg(long)]
        provider: Option<Provider>,
        #[arg(long = "pr")]
        pull_request_id: Option<u64>,
        #[arg(long = "sha")]
        commit_sha: Option<String>,
        /// Fork URL rebased onto the branch before running.
        #[arg(long = "upstream")]
        upstream_url: Option<String>,
    },
    /// Run JSON-lines triggers from a file (or stdin) on the worker pool.
    Batch {
        /// Trigger file; `-` or absent reads stdin.
        input: Option<PathBuf>,
    },
    /// Print the effective configuration with secrets redacted.
    Config,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Invoke {
            action,
            branch,
            provider,
            pull_request_id,
            commit_sha,
            upstream_url,
        } => cmd_invoke(
            cfg,
            Trigger {
                action,
                branch,
                provider,
                pull_request_id,
                commit_sha,
                upstream_url,
            },
        ),
        Command::Batch { input } => cmd_batch(cfg, input.as_deref()),
        Command::Config => {
            print!("{}", render_config(&cfg.redacted())?);
            Ok(exit_codes::OK)
        }
    }
}

fn pipeline(cfg: WorkerConfig) -> Result<Pipeline<SystemRunner>> {
    let notifier = Notifier::from_config(&cfg)?;
    Ok(Pipeline::new(Orchestrator::new(SystemRunner, cfg), notifier))
}

fn cmd_invoke(cfg: WorkerConfig, trigger: Trigger) -> Result<i32> {
    let pipeline = Arc::new(pipeline(cfg)?);
    let dispatcher = Dispatcher::start(Arc::clone(&pipeline), 1)?;
    let outcome = dispatcher.submit(pipeline.request_from(trigger))?.wait()?;
    dispatcher.shutdown();
    print_outcome(&outcome);
    Ok(exit_code(std::iter::once(&outcome)))
}

fn cmd_batch(cfg: WorkerConfig, input: Option<&Path>) -> Result<i32> {
    let triggers = read_triggers(input)?;
    let workers = cfg.workers;
    let pipeline = Arc::new(pipeline(cfg)?);
    let dispatcher = Dispatcher::start(Arc::clone(&pipeline), workers)?;

    let tickets = triggers
        .into_iter()
        .map(|trigger| dispatcher.submit(pipeline.request_from(trigger)))
        .collect::<Result<Vec<_>>>()?;
    let mut outcomes = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        let outcome = ticket.wait()?;
        print_outcome(&outcome);
        outcomes.push(outcome);
    }
    dispatcher.shutdown();
    info!(jobs = outcomes.len(), "batch finished");
    Ok(exit_code(&outcomes))
}

fn read_triggers(input: Option<&Path>) -> Result<Vec<Trigger>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) if path != Path::new("-") => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        _ => Box::new(BufReader::new(io::stdin())),
    };
    parse_triggers(reader)
}

fn parse_triggers(reader: impl BufRead) -> Result<Vec<Trigger>> {
    let mut triggers = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("read trigger input")?;
        if line.trim().is_empty() {
            continue;
        }
        let trigger = serde_json::from_str(&line)
            .with_context(|| format!("parse trigger on line {}", idx + 1))?;
        triggers.push(trigger);
    }
    Ok(triggers)
}

fn print_outcome(outcome: &InvocationOutcome) {
    println!(
        "== {} {} on {}: {}",
        outcome.request.action,
        outcome.request.provider,
        outcome.request.branch,
        outcome.status.label()
    );
    let text = decode_lines(&outcome.output_lines);
    if !text.is_empty() {
        println!("{text}");
    }
}

fn exit_code<'a>(outcomes: impl IntoIterator<Item = &'a InvocationOutcome>) -> i32 {
    if outcomes.into_iter().all(|o| o.status.is_success()) {
        exit_codes::OK
    } else {
        exit_codes::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_invoke() {
        let cli = Cli::parse_from([
            "tfci", "invoke", "--action", "apply", "--branch", "master", "--pr", "9",
        ]);
        let Command::Invoke {
            action,
            branch,
            pull_request_id,
            provider,
            ..
        } = cli.command
        else {
            panic!("expected invoke");
        };
        assert_eq!(action, Action::Apply);
        assert_eq!(branch, "master");
        assert_eq!(pull_request_id, Some(9));
        assert_eq!(provider, None);
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["tfci", "config", "--config", "/etc/tfci.toml"]);
        assert!(matches!(cli.command, Command::Config));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tfci.toml")));
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(
            Cli::try_parse_from([
                "tfci", "invoke", "--action", "plan", "--branch", "x", "--provider", "azure",
            ])
            .is_err()
        );
    }

    #[test]
    fn parse_triggers_skips_blank_lines() {
        let input = concat!(
            r#"{"action":"plan","branch":"feature-x","pull_request_id":3}"#,
            "\n\n",
            r#"{"action":"apply","branch":"master","provider":"gcp","commit_sha":"abc"}"#,
            "\n"
        );
        let triggers = parse_triggers(input.as_bytes()).expect("parse");
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].pull_request_id, Some(3));
        assert_eq!(triggers[1].provider, Some(Provider::Gcp));
    }

    #[test]
    fn parse_triggers_reports_line_number() {
        let err = parse_triggers("{}\n".as_bytes()).expect_err("invalid");
        assert!(format!("{err:#}").contains("line 1"));
    }
}
