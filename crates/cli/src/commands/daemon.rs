// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon status and maintenance commands

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tw_daemon::protocol::EngineStats;

use crate::client::DaemonClient;
use crate::output::{self, format_uptime, OutputFormat};

#[derive(Serialize)]
struct StatusOutput {
    socket: String,
    uptime_secs: u64,
    #[serde(flatten)]
    stats: EngineStats,
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Daemon: running")?;
        writeln!(f, "  Socket: {}", self.socket)?;
        writeln!(f, "  Uptime: {}", format_uptime(self.uptime_secs))?;
        writeln!(f, "  Projects: {}", self.stats.projects)?;
        writeln!(f, "  Jobs: {}", self.stats.jobs)?;
        writeln!(f, "  Active invocations: {}", self.stats.active_invocations)?;
        write!(f, "  Queued actions: {}", self.stats.queued_actions)
    }
}

pub async fn status(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let (uptime_secs, stats) = client.status().await?;
    let out = StatusOutput {
        socket: client.socket_path().display().to_string(),
        uptime_secs,
        stats,
    };
    output::print(&out, format);
    Ok(())
}

pub async fn shutdown(client: &DaemonClient) -> Result<()> {
    client.shutdown().await?;
    println!("Daemon stopping");
    Ok(())
}

pub async fn refresh(client: &DaemonClient) -> Result<()> {
    client.refresh().await?;
    println!("Catalog refreshed");
    Ok(())
}
