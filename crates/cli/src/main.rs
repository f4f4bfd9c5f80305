// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tw - Tickwork CLI

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod commands;
mod completions;
mod error;
mod output;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{control, daemon, invocations, jobs, push};

use crate::client::{ClientError, DaemonClient};
use crate::error::TwError;
use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "tw", version, about = "Tickwork - job scheduler client")]
struct Cli {
    /// Output format
    #[arg(long, short = 'o', value_enum, global = true, default_value = "text")]
    output: OutputFormat,

    /// Shorthand for `--output json`
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List jobs
    Jobs(jobs::JobsArgs),
    /// Show one job
    Job(jobs::JobArgs),
    /// List invocations of a job, newest first
    Invocations(invocations::InvocationsArgs),
    /// Show one invocation with its debug log
    Invocation(invocations::InvocationArgs),
    /// Pause a job's schedule
    Pause(jobs::JobArgs),
    /// Resume a paused job
    Resume(jobs::JobArgs),
    /// Abort every active invocation of a job
    Abort(jobs::JobArgs),
    /// Abort one invocation
    AbortInvocation(control::AbortInvocationArgs),
    /// Start an invocation now
    Trigger(control::TriggerArgs),
    /// Deliver a Pub/Sub push body
    Push(push::PushArgs),
    /// Re-read the job catalog
    Refresh,
    /// Show daemon status
    Status,
    /// Stop the daemon
    Shutdown,
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", report(e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let format = if cli.json {
        OutputFormat::Json
    } else {
        cli.output
    };

    // Completions don't need a daemon
    if let Commands::Completions(args) = &cli.command {
        completions::generate_completions::<Cli>(args.shell);
        return Ok(());
    }

    let client = DaemonClient::connect()?;

    match cli.command {
        Commands::Jobs(args) => jobs::list(&client, args, format).await,
        Commands::Job(args) => jobs::show(&client, args, format).await,
        Commands::Invocations(args) => invocations::list(&client, args, format).await,
        Commands::Invocation(args) => invocations::show(&client, args, format).await,
        Commands::Pause(args) => control::pause(&client, args, format).await,
        Commands::Resume(args) => control::resume(&client, args, format).await,
        Commands::Abort(args) => control::abort(&client, args, format).await,
        Commands::AbortInvocation(args) => control::abort_invocation(&client, args, format).await,
        Commands::Trigger(args) => control::trigger(&client, args, format).await,
        Commands::Push(args) => push::push(&client, args).await,
        Commands::Refresh => daemon::refresh(&client).await,
        Commands::Status => daemon::status(&client, format).await,
        Commands::Shutdown => daemon::shutdown(&client).await,
        Commands::Completions(_) => Ok(()),
    }
}

/// Turn daemon client failures into guidance; everything else prints its chain
fn report(err: anyhow::Error) -> TwError {
    match err.downcast::<ClientError>() {
        Ok(client_err) => TwError::from(client_err),
        Err(other) => TwError::new(format!("{:#}", other)),
    }
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_job_ids_and_flags() {
        let cli = Cli::try_parse_from(["tw", "trigger", "web/deploy", "--wait", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Trigger(args) => {
                assert_eq!(args.job_id.to_string(), "web/deploy");
                assert!(args.wait);
            }
            _ => panic!("expected trigger"),
        }
    }

    #[test]
    fn rejects_malformed_job_id() {
        assert!(Cli::try_parse_from(["tw", "job", "no-slash"]).is_err());
    }

    #[test]
    fn invocations_paging_flags() {
        let cli = Cli::try_parse_from([
            "tw",
            "invocations",
            "web/deploy",
            "--limit",
            "5",
            "--cursor",
            "c2a",
        ])
        .unwrap();
        match cli.command {
            Commands::Invocations(args) => {
                assert_eq!(args.limit, 5);
                assert_eq!(args.cursor.as_deref(), Some("c2a"));
            }
            _ => panic!("expected invocations"),
        }
    }

    #[test]
    fn other_errors_keep_their_message() {
        let err = report(anyhow::anyhow!("reading push.json"));
        assert_eq!(err.to_string(), "error: reading push.json\n");
    }
}
