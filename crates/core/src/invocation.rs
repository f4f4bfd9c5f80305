// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Invocations: one execution attempt of a job's task

use crate::job::JobId;
use crate::task::{State, TaskDef};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Status of an invocation. The last four are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Starting,
    Running,
    Succeeded,
    Failed,
    Overrun,
    Aborted,
}

impl Status {
    pub fn is_final(&self) -> bool {
        !matches!(self, Status::Starting | Status::Running)
    }

    /// Whether `self -> next` is an allowed edge. Staying put is allowed for
    /// non-terminal statuses.
    pub fn can_transition_to(&self, next: Status) -> bool {
        match self {
            Status::Starting => true,
            Status::Running => next != Status::Starting,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Starting => "STARTING",
            Status::Running => "RUNNING",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Overrun => "OVERRUN",
            Status::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(Status::Starting),
            "RUNNING" => Ok(Status::Running),
            "SUCCEEDED" => Ok(Status::Succeeded),
            "FAILED" => Ok(Status::Failed),
            "OVERRUN" => Ok(Status::Overrun),
            "ABORTED" => Ok(Status::Aborted),
            other => Err(format!("unknown invocation status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("invalid status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Status,
    pub to: Status,
}

/// One execution attempt of a job's task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: i64,
    pub job_id: JobId,
    pub nonce: i64,
    #[serde(default)]
    pub retry_count: u32,
    pub status: Status,
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    /// Empty for scheduler-triggered invocations
    #[serde(default)]
    pub triggered_by: String,
    /// Task definition as it was when the invocation was created
    pub task: TaskDef,
    #[serde(default)]
    pub task_data: Vec<u8>,
    #[serde(default)]
    pub view_url: String,
    #[serde(default)]
    pub debug_log: String,
    /// Number of times a launch call was started for this id
    #[serde(default)]
    pub launch_attempts: u32,
    /// A launch call returned and its result was saved
    #[serde(default)]
    pub launched: bool,
}

impl Invocation {
    pub fn new(
        id: i64,
        job_id: JobId,
        nonce: i64,
        retry_count: u32,
        task: TaskDef,
        triggered_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_id,
            nonce,
            retry_count,
            status: Status::Starting,
            started: now,
            finished: None,
            triggered_by: triggered_by.into(),
            task,
            task_data: Vec::new(),
            view_url: String::new(),
            debug_log: String::new(),
            launch_attempts: 0,
            launched: false,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Move to `next`, stamping `finished` on terminal statuses
    pub fn set_status(&mut self, next: Status, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_final() && self.finished.is_none() {
            self.finished = Some(now);
        }
        Ok(())
    }

    /// Append a timestamped line, dropping the oldest lines past `max_bytes`
    pub fn append_log(&mut self, now: DateTime<Utc>, line: &str, max_bytes: usize) {
        let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        for part in line.lines() {
            self.debug_log.push_str(&format!("[{}] {}\n", stamp, part));
        }
        if self.debug_log.len() > max_bytes {
            let excess = self.debug_log.len() - max_bytes;
            let cut = self.debug_log.as_bytes()[excess..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| excess + i + 1)
                .unwrap_or(self.debug_log.len());
            self.debug_log.replace_range(..cut, "");
        }
    }

    /// Snapshot of the manager-visible fields
    pub fn state(&self) -> State {
        State {
            status: self.status,
            task_data: self.task_data.clone(),
            view_url: self.view_url.clone(),
        }
    }
}

#[cfg(test)]
#[path = "invocation_tests.rs"]
mod tests;
