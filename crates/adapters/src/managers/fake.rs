// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable manager and controller for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tw_core::{
    Controller, JobId, Manager, PubSubMessage, State, Status, TaskDef, TaskError, TopicBinding,
    Traits,
};

/// Which manager entry point was called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Launch,
    Abort,
    Timer,
    Notification,
}

/// Recorded manager call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerCall {
    pub kind: CallKind,
    pub job_id: JobId,
    pub invocation_id: i64,
    pub nonce: i64,
    /// Timer name or notification message id; empty otherwise
    pub detail: String,
}

/// One scripted thing a fake manager does to its controller
#[derive(Debug, Clone, PartialEq)]
pub enum FakeStep {
    Status(Status),
    Log(String),
    TaskData(Vec<u8>),
    ViewUrl(String),
    Timer {
        delay: Duration,
        name: String,
        payload: Vec<u8>,
    },
    PrepareTopic(String),
    Save,
    Sleep(Duration),
    Transient(String),
    Fatal(String),
}

#[derive(Default)]
struct Script {
    /// Used once each, in order, before falling back to `default`
    queued: VecDeque<Vec<FakeStep>>,
    default: Vec<FakeStep>,
}

impl Script {
    fn next(&mut self) -> Vec<FakeStep> {
        self.queued
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[derive(Default)]
struct Scripts {
    launch: Script,
    abort: Script,
    timer: Script,
    notification: Script,
}

/// Fake task manager driven by step scripts
#[derive(Clone)]
pub struct FakeManager {
    name: String,
    traits: Traits,
    invalid: Arc<Mutex<Option<String>>>,
    scripts: Arc<Mutex<Scripts>>,
    calls: Arc<Mutex<Vec<ManagerCall>>>,
}

impl FakeManager {
    /// Single-stage manager whose launches succeed immediately
    pub fn new(name: &str) -> Self {
        let manager = Self {
            name: name.to_string(),
            traits: Traits { multistage: false },
            invalid: Arc::new(Mutex::new(None)),
            scripts: Arc::new(Mutex::new(Scripts::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        manager.on_launch(vec![FakeStep::Status(Status::Succeeded)]);
        manager
    }

    /// Multistage manager whose launches move to RUNNING and wait
    pub fn multistage(name: &str) -> Self {
        let mut manager = Self::new(name);
        manager.traits = Traits { multistage: true };
        manager.on_launch(vec![FakeStep::Status(Status::Running)]);
        manager
    }

    fn scripts(&self) -> std::sync::MutexGuard<'_, Scripts> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Steps run by every launch without a queued override
    pub fn on_launch(&self, steps: Vec<FakeStep>) {
        self.scripts().launch.default = steps;
    }

    /// Steps for the next launch only
    pub fn push_launch(&self, steps: Vec<FakeStep>) {
        self.scripts().launch.queued.push_back(steps);
    }

    pub fn on_abort(&self, steps: Vec<FakeStep>) {
        self.scripts().abort.default = steps;
    }

    pub fn on_timer(&self, steps: Vec<FakeStep>) {
        self.scripts().timer.default = steps;
    }

    pub fn push_timer(&self, steps: Vec<FakeStep>) {
        self.scripts().timer.queued.push_back(steps);
    }

    pub fn on_notification(&self, steps: Vec<FakeStep>) {
        self.scripts().notification.default = steps;
    }

    /// Make `validate` reject every definition
    pub fn set_invalid(&self, reason: &str) {
        *self.invalid.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.to_string());
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<ManagerCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded calls of one kind
    pub fn calls_of(&self, kind: CallKind) -> Vec<ManagerCall> {
        self.calls().into_iter().filter(|c| c.kind == kind).collect()
    }

    fn record(&self, kind: CallKind, ctl: &dyn Controller, detail: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ManagerCall {
                kind,
                job_id: ctl.job_id().clone(),
                invocation_id: ctl.invocation_id(),
                nonce: ctl.invocation_nonce(),
                detail: detail.to_string(),
            });
    }

    async fn run(steps: Vec<FakeStep>, ctl: &mut dyn Controller) -> Result<(), TaskError> {
        for step in steps {
            match step {
                FakeStep::Status(status) => ctl.state_mut().status = status,
                FakeStep::Log(line) => ctl.debug_log(&line),
                FakeStep::TaskData(data) => ctl.state_mut().task_data = data,
                FakeStep::ViewUrl(url) => ctl.state_mut().view_url = url,
                FakeStep::Timer {
                    delay,
                    name,
                    payload,
                } => ctl.add_timer(delay, &name, payload),
                FakeStep::PrepareTopic(publisher) => {
                    let binding = ctl.prepare_topic(&publisher).await?;
                    ctl.debug_log(&format!("topic {}", binding.topic));
                }
                FakeStep::Save => ctl.save().await?,
                FakeStep::Sleep(d) => tokio::time::sleep(d).await,
                FakeStep::Transient(msg) => return Err(TaskError::transient(msg)),
                FakeStep::Fatal(msg) => return Err(TaskError::fatal(msg)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Manager for FakeManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn traits(&self) -> Traits {
        self.traits
    }

    fn validate(&self, _task: &TaskDef) -> Result<(), TaskError> {
        match self.invalid.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(reason) => Err(TaskError::fatal(reason.clone())),
            None => Ok(()),
        }
    }

    async fn launch_task(&self, ctl: &mut dyn Controller) -> Result<(), TaskError> {
        self.record(CallKind::Launch, ctl, "");
        let steps = self.scripts().launch.next();
        Self::run(steps, ctl).await
    }

    async fn abort_task(&self, ctl: &mut dyn Controller) -> Result<(), TaskError> {
        self.record(CallKind::Abort, ctl, "");
        let steps = self.scripts().abort.next();
        Self::run(steps, ctl).await
    }

    async fn handle_notification(
        &self,
        ctl: &mut dyn Controller,
        msg: &PubSubMessage,
    ) -> Result<(), TaskError> {
        self.record(CallKind::Notification, ctl, &msg.message_id);
        let steps = self.scripts().notification.next();
        Self::run(steps, ctl).await
    }

    async fn handle_timer(
        &self,
        ctl: &mut dyn Controller,
        name: &str,
        _payload: &[u8],
    ) -> Result<(), TaskError> {
        self.record(CallKind::Timer, ctl, name);
        let steps = self.scripts().timer.next();
        Self::run(steps, ctl).await
    }
}

/// A timer queued through [`FakeController::add_timer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedTimer {
    pub delay: Duration,
    pub name: String,
    pub payload: Vec<u8>,
}

/// In-memory controller for exercising a manager without an engine
pub struct FakeController {
    job_id: JobId,
    invocation_id: i64,
    nonce: i64,
    task: TaskDef,
    state: State,
    log: Vec<String>,
    timers: Vec<QueuedTimer>,
    topics: Vec<TopicBinding>,
    saves: usize,
}

impl FakeController {
    #[allow(clippy::expect_used)]
    pub fn new(task: TaskDef) -> Self {
        let job_id = JobId::new("fake", "job").expect("literal job id is well formed");
        Self::for_job(job_id, task)
    }

    pub fn for_job(job_id: JobId, task: TaskDef) -> Self {
        Self {
            job_id,
            invocation_id: 1,
            nonce: 1000,
            task,
            state: State::starting(),
            log: Vec::new(),
            timers: Vec::new(),
            topics: Vec::new(),
            saves: 0,
        }
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    pub fn timers(&self) -> &[QueuedTimer] {
        &self.timers
    }

    pub fn topics(&self) -> &[TopicBinding] {
        &self.topics
    }

    pub fn saves(&self) -> usize {
        self.saves
    }
}

#[async_trait]
impl Controller for FakeController {
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
        self.timers.push(QueuedTimer {
            delay,
            name: name.to_string(),
            payload,
        });
    }

    async fn prepare_topic(&mut self, publisher: &str) -> Result<TopicBinding, TaskError> {
        let binding = TopicBinding {
            topic: tw_core::topic_name("fake", "tw", &self.task.kind, publisher),
            token: format!("token-{}", self.topics.len() + 1),
        };
        self.topics.push(binding.clone());
        Ok(binding)
    }

    fn get_client(&self, timeout: Duration) -> Result<ureq::Agent, TaskError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Ok(ureq::Agent::new_with_config(config))
    }

    async fn save(&mut self) -> Result<(), TaskError> {
        self.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
