// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Forward a Pub/Sub push delivery to the daemon

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::client::DaemonClient;

#[derive(clap::Args)]
pub struct PushArgs {
    /// File with the push request body, or `-` for stdin
    pub body: PathBuf,
}

/// Read the body from a file, or stdin for `-`
pub fn read_body(path: &std::path::Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("reading push body from stdin")?;
        return Ok(body);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

pub async fn push(client: &DaemonClient, args: PushArgs) -> Result<()> {
    let body = read_body(&args.body)?;
    client.push(body).await?;
    println!("Delivered");
    Ok(())
}
