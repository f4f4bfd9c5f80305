// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task contract between the engine and pluggable task managers.
//!
//! A [`Manager`] implements one task kind. The engine hands it a
//! [`Controller`] scoped to a single invocation for the duration of one
//! call. Whatever the manager leaves in [`Controller::state_mut`] is
//! persisted when the call returns.

use crate::invocation::Status;
use crate::job::JobId;
use crate::pubsub::{PubSubMessage, TopicBinding};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by managers and controllers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    /// Retried by the action dispatcher
    #[error("transient: {0}")]
    Transient(String),
    /// Moves the invocation to FAILED
    #[error("{0}")]
    Fatal(String),
}

impl TaskError {
    pub fn transient(msg: impl Into<String>) -> Self {
        TaskError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        TaskError::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }
}

/// Static properties of a task kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traits {
    /// The manager owns the RUNNING -> finished transition and reports
    /// completion through timers or notifications.
    pub multistage: bool,
}

/// Manager-visible part of an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub status: Status,
    #[serde(default)]
    pub task_data: Vec<u8>,
    #[serde(default)]
    pub view_url: String,
}

impl State {
    pub fn starting() -> Self {
        Self {
            status: Status::Starting,
            task_data: Vec::new(),
            view_url: String::new(),
        }
    }
}

/// A task definition: the manager name plus manager-specific parameters.
///
/// Serialized flat, e.g. `{"kind": "url_fetch", "url": "https://..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub kind: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl TaskDef {
    /// Build a definition from a typed parameter struct
    pub fn new(kind: impl Into<String>, params: &impl Serialize) -> Result<Self, TaskError> {
        let kind = kind.into();
        let value = serde_json::to_value(params)
            .map_err(|e| TaskError::fatal(format!("unserializable {} task: {}", kind, e)))?;
        let serde_json::Value::Object(mut params) = value else {
            return Err(TaskError::fatal(format!(
                "{} task parameters must be a table",
                kind
            )));
        };
        params.remove("kind");
        Ok(Self { kind, params })
    }

    /// A definition with no parameters
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: serde_json::Map::new(),
        }
    }

    /// Decode the parameters into the manager's typed view
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_value(serde_json::Value::Object(self.params.clone()))
            .map_err(|e| TaskError::fatal(format!("malformed {} task: {}", self.kind, e)))
    }
}

/// Implementation of one task kind. Stateless; shared across invocations.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    /// Unique name, also the `kind` tag of task definitions it handles
    fn name(&self) -> &str;

    fn traits(&self) -> Traits;

    /// Pure structural validation of a definition
    fn validate(&self, task: &TaskDef) -> Result<(), TaskError>;

    /// Start an attempt. Must be idempotent per invocation nonce.
    async fn launch_task(&self, ctl: &mut dyn Controller) -> Result<(), TaskError>;

    /// Best-effort cancellation of external work
    async fn abort_task(&self, _ctl: &mut dyn Controller) -> Result<(), TaskError> {
        Ok(())
    }

    async fn handle_notification(
        &self,
        _ctl: &mut dyn Controller,
        _msg: &PubSubMessage,
    ) -> Result<(), TaskError> {
        Err(TaskError::fatal(format!(
            "{} does not expect notifications",
            self.name()
        )))
    }

    async fn handle_timer(
        &self,
        _ctl: &mut dyn Controller,
        name: &str,
        _payload: &[u8],
    ) -> Result<(), TaskError> {
        Err(TaskError::fatal(format!(
            "{} does not expect timers (got {:?})",
            self.name(),
            name
        )))
    }
}

/// Per-call handle a manager uses to report progress for one invocation
#[async_trait]
pub trait Controller: Send {
    fn job_id(&self) -> &JobId;

    fn invocation_id(&self) -> i64;

    fn invocation_nonce(&self) -> i64;

    fn task(&self) -> &TaskDef;

    fn state(&self) -> &State;

    fn state_mut(&mut self) -> &mut State;

    /// Append a line to the invocation's debug log. Never fails.
    fn debug_log(&mut self, line: &str);

    /// Queue a `handle_timer` delivery. Durable only after the next save.
    fn add_timer(&mut self, delay: Duration, name: &str, payload: Vec<u8>);

    /// Provision a push destination whose messages route to this invocation
    async fn prepare_topic(&mut self, publisher: &str) -> Result<TopicBinding, TaskError>;

    /// Outbound HTTP client; calls exceeding `timeout` are aborted
    fn get_client(&self, timeout: Duration) -> Result<ureq::Agent, TaskError>;

    /// Checkpoint state and flush queued timers
    async fn save(&mut self) -> Result<(), TaskError>;
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
