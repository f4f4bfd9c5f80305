// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine and dispatcher policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped at `max`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    pub multiplier: u32,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2,
            max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exp);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for one manager call. Must exceed the longest task a
    /// single-stage manager runs inside its launch.
    #[serde(with = "humantime_serde")]
    pub manager_call_timeout: Duration,
    /// Launch retries per logical launch before giving up
    pub max_launch_retries: u32,
    pub launch_retry_backoff: Backoff,
    /// How long a trigger may wait in `Queued` before an overrun marks it slow
    #[serde(with = "humantime_serde")]
    pub slow_queue_threshold: Duration,
    /// Also record an `OVERRUN` invocation for each overrun trigger
    pub record_overrun_invocations: bool,
    pub max_page_size: usize,
    pub max_task_data_bytes: usize,
    pub max_debug_log_bytes: usize,
    /// Project that owns push topics
    pub pubsub_project: String,
    pub topic_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            manager_call_timeout: Duration::from_secs(600),
            max_launch_retries: 5,
            launch_retry_backoff: Backoff::default(),
            slow_queue_threshold: Duration::from_secs(30),
            record_overrun_invocations: false,
            max_page_size: 50,
            max_task_data_bytes: 64 * 1024,
            max_debug_log_bytes: 256 * 1024,
            pubsub_project: "tickwork".to_string(),
            topic_prefix: "tw".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delivery attempts before an action is abandoned
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Actions executed at the same time
    pub concurrency: usize,
    /// Upper bound on how long the loop sleeps between queue scans
    #[serde(with = "humantime_serde")]
    pub idle_poll: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::default(),
            concurrency: 8,
            idle_poll: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
