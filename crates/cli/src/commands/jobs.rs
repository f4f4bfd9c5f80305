// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job listing and inspection

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tw_core::{JobId, PublicState};
use tw_daemon::JobView;

use crate::client::DaemonClient;
use crate::output::{self, format_time, truncate, OutputFormat};

#[derive(clap::Args)]
pub struct JobsArgs {
    /// Only list jobs of this project
    pub project: Option<String>,
}

#[derive(clap::Args)]
pub struct JobArgs {
    /// Job id, `<project>/<job>`
    pub job_id: JobId,
}

const HEADER: &str = "JOB                            STATE      KIND        NEXT TICK";

#[derive(Serialize)]
struct JobRow<'a> {
    job_id: &'a JobId,
    state: PublicState,
    kind: &'a str,
    schedule: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_tick: Option<chrono::DateTime<chrono::Utc>>,
}

impl<'a> From<&'a JobView> for JobRow<'a> {
    fn from(view: &'a JobView) -> Self {
        Self {
            job_id: &view.job.job_id,
            state: view.state,
            kind: &view.job.task.kind,
            schedule: &view.job.schedule,
            next_tick: view.job.state.tick_time,
        }
    }
}

impl fmt::Display for JobRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<30} {:<10} {:<11} {}",
            truncate(&self.job_id.to_string(), 30),
            self.state,
            truncate(self.kind, 11),
            format_time(self.next_tick)
        )
    }
}

/// Full job record; JSON output carries every stored field
#[derive(Serialize)]
#[serde(transparent)]
pub(crate) struct JobDetail<'a>(pub &'a JobView);

impl fmt::Display for JobDetail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let job = &self.0.job;
        writeln!(f, "Job: {}", job.job_id)?;
        writeln!(f, "  State: {} ({})", self.0.state, job.state.kind)?;
        writeln!(f, "  Schedule: {}", job.schedule)?;
        writeln!(f, "  Task: {}", job.task.kind)?;
        writeln!(f, "  Enabled: {}", job.enabled)?;
        writeln!(f, "  Paused: {}", job.paused)?;
        writeln!(f, "  Next tick: {}", format_time(job.state.tick_time))?;
        writeln!(f, "  Previous tick: {}", format_time(job.state.prev_tick_time))?;
        if job.state.invocation_nonce != 0 {
            writeln!(f, "  Launch nonce: {}", job.state.invocation_nonce)?;
        }
        if job.state.invocation_id != 0 {
            writeln!(f, "  Current invocation: {}", job.state.invocation_id)?;
        }
        if job.state.overruns > 0 {
            writeln!(f, "  Overruns: {}", job.state.overruns)?;
        }
        write!(f, "  Last invocation id: {}", job.last_invocation_id)
    }
}

pub async fn list(client: &DaemonClient, args: JobsArgs, format: OutputFormat) -> Result<()> {
    let jobs = client.list_jobs(args.project).await?;
    let rows: Vec<JobRow<'_>> = jobs.iter().map(JobRow::from).collect();
    output::print_list(&rows, HEADER, "No jobs", format);
    Ok(())
}

pub async fn show(client: &DaemonClient, args: JobArgs, format: OutputFormat) -> Result<()> {
    let view = client.get_job(&args.job_id).await?;
    output::print(&JobDetail(&view), format);
    Ok(())
}
