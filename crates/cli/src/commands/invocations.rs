// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Invocation history

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tw_core::{Invocation, JobId};

use crate::client::DaemonClient;
use crate::output::{self, format_time, OutputFormat};

#[derive(clap::Args)]
pub struct InvocationsArgs {
    /// Job id, `<project>/<job>`
    pub job_id: JobId,

    /// Page size (0 for the daemon's maximum)
    #[arg(long, default_value = "0")]
    pub limit: usize,

    /// Continue from the cursor printed by a previous page
    #[arg(long)]
    pub cursor: Option<String>,
}

#[derive(clap::Args)]
pub struct InvocationArgs {
    /// Job id, `<project>/<job>`
    pub job_id: JobId,
    /// Invocation id
    pub invocation_id: i64,
}

const HEADER: &str = "ID                   STATUS     STARTED              FINISHED             BY";

#[derive(Serialize)]
#[serde(transparent)]
pub(crate) struct InvocationRow<'a>(pub &'a Invocation);

impl fmt::Display for InvocationRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inv = self.0;
        let by = if inv.triggered_by.is_empty() {
            "-"
        } else {
            inv.triggered_by.as_str()
        };
        write!(
            f,
            "{:<20} {:<10} {:<20} {:<20} {}",
            inv.id,
            inv.status,
            format_time(Some(inv.started)),
            format_time(inv.finished),
            by
        )
    }
}

#[derive(Serialize)]
#[serde(transparent)]
struct InvocationDetail<'a>(&'a Invocation);

impl fmt::Display for InvocationDetail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inv = self.0;
        writeln!(f, "Invocation: {} ({})", inv.id, inv.job_id)?;
        writeln!(f, "  Status: {}", inv.status)?;
        writeln!(f, "  Nonce: {}", inv.nonce)?;
        if inv.retry_count > 0 {
            writeln!(f, "  Retry: {}", inv.retry_count)?;
        }
        writeln!(f, "  Task: {}", inv.task.kind)?;
        writeln!(f, "  Started: {}", format_time(Some(inv.started)))?;
        writeln!(f, "  Finished: {}", format_time(inv.finished))?;
        if !inv.triggered_by.is_empty() {
            writeln!(f, "  Triggered by: {}", inv.triggered_by)?;
        }
        if !inv.view_url.is_empty() {
            writeln!(f, "  View: {}", inv.view_url)?;
        }
        if inv.debug_log.is_empty() {
            return Ok(());
        }
        writeln!(f)?;
        writeln!(f, "Debug log:")?;
        for line in inv.debug_log.lines() {
            writeln!(f, "  {}", line)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PageOutput<'a> {
    invocations: Vec<InvocationRow<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_cursor: Option<&'a str>,
}

pub async fn list(
    client: &DaemonClient,
    args: InvocationsArgs,
    format: OutputFormat,
) -> Result<()> {
    let page = client
        .list_invocations(&args.job_id, args.limit, args.cursor)
        .await?;

    match format {
        OutputFormat::Json => {
            let out = PageOutput {
                invocations: page.invocations.iter().map(InvocationRow).collect(),
                next_cursor: page.next_cursor.as_deref(),
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            let rows: Vec<InvocationRow<'_>> =
                page.invocations.iter().map(InvocationRow).collect();
            output::print_list(&rows, HEADER, "No invocations", format);
            if let Some(cursor) = page.next_cursor {
                println!();
                println!("More: tw invocations {} --cursor {}", args.job_id, cursor);
            }
        }
    }
    Ok(())
}

pub async fn show(client: &DaemonClient, args: InvocationArgs, format: OutputFormat) -> Result<()> {
    let invocation = client
        .get_invocation(&args.job_id, args.invocation_id)
        .await?;
    output::print(&InvocationDetail(&invocation), format);
    Ok(())
}
