// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized actions and the durable records that produce them.
//!
//! Actions are the unit of work of the dispatch queue. Each one names the
//! invocation (or tick) it targets so the engine can re-validate it on
//! delivery; redelivering a stale action is a no-op.

use crate::job::JobId;
use crate::pubsub::PubSubMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope version written by this build
pub const ACTION_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    TickJob {
        job_id: JobId,
        tick_nonce: i64,
    },
    LaunchInvocation {
        job_id: JobId,
        invocation_id: i64,
        invocation_nonce: i64,
    },
    FireTimer {
        job_id: JobId,
        invocation_id: i64,
        timer_id: String,
    },
    DeliverNotification {
        job_id: JobId,
        invocation_id: i64,
        message: PubSubMessage,
    },
}

#[derive(Debug, Error)]
pub enum ActionDecodeError {
    #[error("action envelope version {0} is newer than this build supports")]
    UnsupportedVersion(u32),
    #[error("malformed action: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(default = "default_version")]
    v: u32,
    action: Action,
}

fn default_version() -> u32 {
    1
}

impl Action {
    pub fn job_id(&self) -> &JobId {
        match self {
            Action::TickJob { job_id, .. }
            | Action::LaunchInvocation { job_id, .. }
            | Action::FireTimer { job_id, .. }
            | Action::DeliverNotification { job_id, .. } => job_id,
        }
    }

    /// Target invocation, if the action has one
    pub fn invocation_id(&self) -> Option<i64> {
        match self {
            Action::TickJob { .. } => None,
            Action::LaunchInvocation { invocation_id, .. }
            | Action::FireTimer { invocation_id, .. }
            | Action::DeliverNotification { invocation_id, .. } => Some(*invocation_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::TickJob { .. } => "tick_job",
            Action::LaunchInvocation { .. } => "launch_invocation",
            Action::FireTimer { .. } => "fire_timer",
            Action::DeliverNotification { .. } => "deliver_notification",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope {
            v: ACTION_VERSION,
            action: self.clone(),
        })
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ActionDecodeError> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        if envelope.v > ACTION_VERSION {
            return Err(ActionDecodeError::UnsupportedVersion(envelope.v));
        }
        Ok(envelope.action)
    }
}

/// A durable work item in the dispatch queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: String,
    /// Encoded [`Action`] envelope
    pub payload: String,
    pub not_before: DateTime<Utc>,
    /// Failed delivery attempts so far
    #[serde(default)]
    pub attempts: u32,
}

/// A timer added through `Controller::add_timer` and flushed by a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTimer {
    pub id: String,
    pub job_id: JobId,
    pub invocation_id: i64,
    pub fire_at: DateTime<Utc>,
    pub name: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Routes pushes carrying `token` to one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBinding {
    pub token: String,
    pub job_id: JobId,
    pub invocation_id: i64,
    pub manager: String,
    pub topic: String,
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
