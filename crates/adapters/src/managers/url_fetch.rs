// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `url_fetch` tasks: a single HTTP GET; 2xx means success
//!
//! The fetch runs inside the launch call, so the engine's
//! `manager_call_timeout` must stay above [`UrlFetchManager::MAX_TIMEOUT`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tw_core::{Controller, Manager, Status, TaskDef, TaskError, Traits};

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UrlFetchTask {
    pub url: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct UrlFetchManager;

impl UrlFetchManager {
    pub const NAME: &'static str = "url_fetch";
    /// Longest `timeout` a task may ask for
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(480);
}

fn check_url(url: &str) -> Result<(), TaskError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| TaskError::fatal(format!("url {:?} must be http or https", url)))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err(TaskError::fatal(format!("url {:?} has no host", url)));
    }
    Ok(())
}

#[async_trait]
impl Manager for UrlFetchManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn traits(&self) -> Traits {
        Traits { multistage: false }
    }

    fn validate(&self, task: &TaskDef) -> Result<(), TaskError> {
        let params: UrlFetchTask = task.decode()?;
        check_url(&params.url)?;
        if params.timeout.is_zero() || params.timeout > Self::MAX_TIMEOUT {
            return Err(TaskError::fatal(format!(
                "timeout must be in (0s, {}s]",
                Self::MAX_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }

    async fn launch_task(&self, ctl: &mut dyn Controller) -> Result<(), TaskError> {
        let params: UrlFetchTask = ctl.task().decode()?;
        let agent = ctl.get_client(params.timeout)?;
        ctl.debug_log(&format!("GET {}", params.url));

        let url = params.url.clone();
        let started = Instant::now();
        let outcome = tokio::task::spawn_blocking(move || {
            agent.get(&url).call().map(|resp| resp.status().as_u16())
        })
        .await
        .map_err(|e| TaskError::transient(format!("fetch did not complete: {}", e)))?;
        let elapsed = started.elapsed();

        let status = match outcome {
            Ok(code) => {
                ctl.debug_log(&format!("HTTP {} in {:?}", code, elapsed));
                if (200..300).contains(&code) {
                    Status::Succeeded
                } else {
                    Status::Failed
                }
            }
            Err(ureq::Error::StatusCode(code)) => {
                ctl.debug_log(&format!("HTTP {} in {:?}", code, elapsed));
                Status::Failed
            }
            Err(e) => {
                ctl.debug_log(&format!("request failed after {:?}: {}", elapsed, e));
                Status::Failed
            }
        };
        ctl.state_mut().status = status;
        Ok(())
    }
}

#[cfg(test)]
#[path = "url_fetch_tests.rs"]
mod tests;
