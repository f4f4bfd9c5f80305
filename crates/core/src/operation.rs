// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operations for the write-ahead log

use crate::action::{NotificationBinding, PendingTimer, QueuedAction};
use crate::invocation::Invocation;
use crate::job::{Job, JobId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operations that can be persisted to the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Create or replace a job record
    JobPut { job: Job },

    /// Create or replace an invocation record
    InvocationPut { invocation: Invocation },

    /// Record a durable timer
    TimerPut { timer: PendingTimer },

    /// Remove a delivered or obsolete timer
    TimerDelete { job_id: JobId, timer_id: String },

    /// Record a push routing token
    BindingPut { binding: NotificationBinding },

    /// Remove a push routing token
    BindingDelete { token: String },

    /// Add a work item to the dispatch queue
    ActionEnqueue { action: QueuedAction },

    /// Push back a work item after a transient failure
    ActionReschedule {
        id: String,
        not_before: DateTime<Utc>,
        #[serde(default)]
        attempts: u32,
    },

    /// Remove a finished work item
    ActionComplete { id: String },
}

impl Operation {
    /// Job whose entity group the operation belongs to, if any
    pub fn group(&self) -> Option<&JobId> {
        match self {
            Operation::JobPut { job } => Some(&job.job_id),
            Operation::InvocationPut { invocation } => Some(&invocation.job_id),
            Operation::TimerPut { timer } => Some(&timer.job_id),
            Operation::TimerDelete { job_id, .. } => Some(job_id),
            Operation::BindingPut { binding } => Some(&binding.job_id),
            Operation::BindingDelete { .. }
            | Operation::ActionEnqueue { .. }
            | Operation::ActionReschedule { .. }
            | Operation::ActionComplete { .. } => None,
        }
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
