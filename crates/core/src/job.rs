// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Jobs: named, schedulable units with a task definition

use crate::job_state::{JobState, JobStateKind};
use crate::task::{TaskDef, Traits};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobIdError {
    #[error("job id {0:?} must look like \"<project>/<name>\"")]
    Malformed(String),
}

/// Globally unique job identifier, `"<project>/<name>"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn new(project: &str, name: &str) -> Result<Self, JobIdError> {
        format!("{}/{}", project, name).parse()
    }

    pub fn project(&self) -> &str {
        self.0.split_once('/').map(|(p, _)| p).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((project, name)) if !project.is_empty() && !name.is_empty() => {
                Ok(Self(s.to_string()))
            }
            _ => Err(JobIdError::Malformed(s.to_string())),
        }
    }
}

impl TryFrom<String> for JobId {
    type Error = JobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job as listed by a catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    #[serde(rename = "id")]
    pub job_id: JobId,
    pub schedule: String,
    pub task: TaskDef,
}

/// Persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub schedule: String,
    pub task: TaskDef,
    /// False once the job disappears from the catalog
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub state: JobState,
    /// Highest invocation id ever allocated for this job
    #[serde(default)]
    pub last_invocation_id: i64,
    #[serde(default)]
    pub revision: u64,
}

impl Job {
    /// A freshly discovered job, not yet enabled
    pub fn new(def: JobDefinition) -> Self {
        Self {
            job_id: def.job_id,
            schedule: def.schedule,
            task: def.task,
            enabled: false,
            paused: false,
            state: JobState::default(),
            last_invocation_id: 0,
            revision: 0,
        }
    }

    pub fn project_id(&self) -> &str {
        self.job_id.project()
    }

    pub fn name(&self) -> &str {
        self.job_id.name()
    }

    /// Whether an invocation is queued or running
    pub fn is_active(&self) -> bool {
        self.state.kind.is_active()
    }

    /// Next invocation id; strictly increasing per job
    pub fn allocate_invocation_id(&mut self) -> i64 {
        self.last_invocation_id += 1;
        self.last_invocation_id
    }

    /// User-facing summary of the job state
    pub fn public_state(&self, traits: Traits) -> PublicState {
        match self.state.kind {
            JobStateKind::Disabled => PublicState::Disabled,
            JobStateKind::Suspended => PublicState::Paused,
            JobStateKind::Scheduled => PublicState::Scheduled,
            JobStateKind::Queued => {
                if self.state.invocation_id != 0 && !traits.multistage {
                    PublicState::Running
                } else {
                    PublicState::Starting
                }
            }
            JobStateKind::SlowQueue => {
                if self.state.invocation_retry_count > 0 {
                    PublicState::Retrying
                } else {
                    PublicState::Starting
                }
            }
            JobStateKind::Running => PublicState::Running,
            JobStateKind::Overrun => PublicState::Overrun,
        }
    }
}

/// Presentation-level job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicState {
    Disabled,
    Paused,
    Scheduled,
    Starting,
    Running,
    Retrying,
    Overrun,
}

impl fmt::Display for PublicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PublicState::Disabled => "DISABLED",
            PublicState::Paused => "PAUSED",
            PublicState::Scheduled => "SCHEDULED",
            PublicState::Starting => "STARTING",
            PublicState::Running => "RUNNING",
            PublicState::Retrying => "RETRYING",
            PublicState::Overrun => "OVERRUN",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
