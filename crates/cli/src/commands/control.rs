// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job control: pause, resume, abort and manual triggers

use anyhow::Result;
use serde::Serialize;
use tw_core::{Invocation, JobId};

use crate::client::{timeout_wait, DaemonClient, WaitOutcome};
use crate::commands::invocations::InvocationRow;
use crate::commands::jobs::{JobArgs, JobDetail};
use crate::output::{self, OutputFormat};

#[derive(clap::Args)]
pub struct AbortInvocationArgs {
    /// Job id, `<project>/<job>`
    pub job_id: JobId,
    /// Invocation id
    pub invocation_id: i64,
}

#[derive(clap::Args)]
pub struct TriggerArgs {
    /// Job id, `<project>/<job>`
    pub job_id: JobId,

    /// Block until the invocation finishes (see TW_TIMEOUT_WAIT_MS)
    #[arg(long)]
    pub wait: bool,
}

/// Name recorded as the actor of control operations
pub fn who() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "tw".to_string())
}

pub async fn pause(client: &DaemonClient, args: JobArgs, format: OutputFormat) -> Result<()> {
    let view = client.pause_job(&args.job_id, &who()).await?;
    output::print(&JobDetail(&view), format);
    Ok(())
}

pub async fn resume(client: &DaemonClient, args: JobArgs, format: OutputFormat) -> Result<()> {
    let view = client.resume_job(&args.job_id, &who()).await?;
    output::print(&JobDetail(&view), format);
    Ok(())
}

pub async fn abort(client: &DaemonClient, args: JobArgs, format: OutputFormat) -> Result<()> {
    let aborted = client.abort_job(&args.job_id, &who()).await?;
    print_aborted(&args.job_id, &aborted, format);
    Ok(())
}

pub async fn abort_invocation(
    client: &DaemonClient,
    args: AbortInvocationArgs,
    format: OutputFormat,
) -> Result<()> {
    let aborted = client
        .abort_invocation(&args.job_id, args.invocation_id, &who())
        .await?;
    print_aborted(&args.job_id, &aborted, format);
    Ok(())
}

fn print_aborted(job_id: &JobId, aborted: &[Invocation], format: OutputFormat) {
    let rows: Vec<InvocationRow<'_>> = aborted.iter().map(InvocationRow).collect();
    match format {
        OutputFormat::Text if rows.is_empty() => {
            println!("Nothing to abort for {}", job_id);
        }
        OutputFormat::Text => {
            println!("Aborted {} invocation(s) of {}", rows.len(), job_id);
            for row in &rows {
                println!("  {}", row);
            }
        }
        OutputFormat::Json => output::print_list(&rows, "", "", format),
    }
}

#[derive(Serialize)]
struct Triggered<'a> {
    job_id: &'a JobId,
    nonce: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    invocation: Option<&'a Invocation>,
    finished: bool,
}

pub async fn trigger(client: &DaemonClient, args: TriggerArgs, format: OutputFormat) -> Result<()> {
    let nonce = client.trigger(&args.job_id, &who()).await?;

    let outcome = if args.wait {
        Some(client.wait(nonce, timeout_wait()).await?)
    } else {
        None
    };
    let invocation = match &outcome {
        Some(WaitOutcome::Finished(inv)) => Some(inv),
        _ => None,
    };

    if format == OutputFormat::Json {
        let out = Triggered {
            job_id: &args.job_id,
            nonce,
            invocation,
            finished: invocation.is_some(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Triggered {} (nonce {})", args.job_id, nonce);
    match outcome {
        Some(WaitOutcome::Finished(inv)) => {
            println!("Finished: invocation {} {}", inv.id, inv.status);
        }
        Some(WaitOutcome::StillRunning) => {
            println!("Still running after {:?}", timeout_wait());
        }
        None => {}
    }
    Ok(())
}
