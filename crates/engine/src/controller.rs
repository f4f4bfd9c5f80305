// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The [`Controller`] the engine hands to managers.
//!
//! Log lines and timers are buffered in memory and written together with
//! the manager-visible state when the call returns (or on `save`). Only the
//! fields the manager changed since the last write are applied, so handlers
//! running side by side on one invocation do not undo each other.

use crate::engine::Engine;
use crate::error::EngineError;
use async_trait::async_trait;
use std::time::Duration;
use tw_core::{
    Clock, Controller, IdGen, Invocation, JobId, State, TaskDef, TaskError, TopicBinding,
};

/// A timer requested by a manager, not yet persisted
#[derive(Debug, Clone)]
pub(crate) struct TimerRequest {
    pub delay: Duration,
    pub name: String,
    pub payload: Vec<u8>,
}

/// How a controller's buffered state is written back
#[derive(Debug, Clone, Copy)]
pub(crate) enum Commit<'a> {
    /// Mid-call save; nothing else changes
    Checkpoint,
    /// The launch call returned
    Launched,
    /// A timer or notification handler returned; the timer is consumed
    Delivered { timer_id: Option<&'a str> },
    /// The launch failed before starting; replace this attempt
    RetryLaunch { reason: &'a str },
}

pub(crate) struct SaveRequest<'a> {
    pub job_id: &'a JobId,
    pub invocation_id: i64,
    /// What the controller last read or wrote
    pub base: &'a State,
    pub state: &'a State,
    pub log: &'a [String],
    pub timers: &'a [TimerRequest],
    pub commit: Commit<'a>,
}

pub(crate) struct InvocationController<'e, C: Clock, I: IdGen> {
    engine: &'e Engine<C, I>,
    job_id: JobId,
    invocation_id: i64,
    nonce: i64,
    task: TaskDef,
    base: State,
    state: State,
    log: Vec<String>,
    timers: Vec<TimerRequest>,
    completion_paths: usize,
}

impl<'e, C: Clock, I: IdGen> InvocationController<'e, C, I> {
    pub fn new(engine: &'e Engine<C, I>, inv: &Invocation) -> Self {
        Self {
            engine,
            job_id: inv.job_id.clone(),
            invocation_id: inv.id,
            nonce: inv.nonce,
            task: inv.task.clone(),
            base: inv.state(),
            state: inv.state(),
            log: Vec::new(),
            timers: Vec::new(),
            completion_paths: 0,
        }
    }

    /// A timer or topic was requested during this call
    pub fn has_completion_path(&self) -> bool {
        self.completion_paths > 0
    }

    /// Write buffered state back and refresh the status from storage
    pub fn commit(&mut self, commit: Commit<'_>) -> Result<(), EngineError> {
        let stored = self.engine.persist(SaveRequest {
            job_id: &self.job_id,
            invocation_id: self.invocation_id,
            base: &self.base,
            state: &self.state,
            log: &self.log,
            timers: &self.timers,
            commit,
        })?;
        self.log.clear();
        self.timers.clear();
        match stored {
            Some(status) => self.state.status = status,
            None => {
                if let Ok(inv) = self.engine.get_invocation(&self.job_id, self.invocation_id) {
                    self.state.status = inv.status;
                }
            }
        }
        self.base = self.state.clone();
        Ok(())
    }
}

#[async_trait]
impl<'e, C: Clock, I: IdGen> Controller for InvocationController<'e, C, I> {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn invocation_id(&self) -> i64 {
        self.invocation_id
    }

    fn invocation_nonce(&self) -> i64 {
        self.nonce
    }

    fn task(&self) -> &TaskDef {
        &self.task
    }

    fn state(&self) -> &State {
        &self.state
    }

    fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    fn debug_log(&mut self, line: &str) {
        self.log.push(line.to_string());
    }

    fn add_timer(&mut self, delay: Duration, name: &str, payload: Vec<u8>) {
        self.completion_paths += 1;
        self.timers.push(TimerRequest {
            delay,
            name: name.to_string(),
            payload,
        });
    }

    async fn prepare_topic(&mut self, publisher: &str) -> Result<TopicBinding, TaskError> {
        let binding = self
            .engine
            .bind_topic(&self.job_id, self.invocation_id, &self.task.kind, publisher)
            .await
            .map_err(EngineError::into_task_error)?;
        self.completion_paths += 1;
        self.log
            .push(format!("prepared topic {} for {}", binding.topic, publisher));
        Ok(binding)
    }

    fn get_client(&self, timeout: Duration) -> Result<ureq::Agent, TaskError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Ok(ureq::Agent::new_with_config(config))
    }

    async fn save(&mut self) -> Result<(), TaskError> {
        self.commit(Commit::Checkpoint)
            .map_err(EngineError::into_task_error)
    }
}
