// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The engine: job reconciliation, triggers, launches and callbacks.
//!
//! Every state change runs inside one store transaction scoped to the
//! owning job. Work that must happen later (ticks, launches, timer fires,
//! notification deliveries) is written to the action queue in the same
//! transaction and executed by the dispatcher through
//! [`Engine::execute_serialized_action`].

use crate::config::EngineConfig;
use crate::controller::{Commit, InvocationController, SaveRequest};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};
use tw_core::clock::add_duration;
use tw_core::{
    topic_name, Action, Catalog, CatalogError, Clock, Controller, IdGen, Invocation, Job,
    JobAction, JobContext, JobDefinition, JobEvent, JobId, Manager, ManagerRegistry,
    NotificationBinding, PendingTimer, PublicState, PushEnvelope, QueuedAction, Schedule, Status,
    TaskError, TopicBinding, TopicProvisioner,
};
use tw_storage::{Store, Txn};

const COMPLETION_CHANNEL_CAPACITY: usize = 256;

/// Announced when an invocation reaches a terminal status
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub job_id: JobId,
    pub invocation_id: i64,
    pub nonce: i64,
    pub status: Status,
}

/// One page of [`Engine::list_invocations`], newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPage {
    pub invocations: Vec<Invocation>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Counters for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub projects: usize,
    pub jobs: usize,
    pub active_invocations: usize,
    pub queued_actions: usize,
}

/// Side effects collected during a transaction, published after commit
#[derive(Default)]
struct Effects {
    enqueued: bool,
    completions: Vec<Completion>,
}

enum TriggerOutcome {
    Started(i64),
    Busy(i64),
}

pub struct Engine<C: Clock, I: IdGen> {
    store: Arc<Store>,
    registry: Arc<ManagerRegistry>,
    topics: Arc<dyn TopicProvisioner>,
    clock: C,
    ids: I,
    config: EngineConfig,
    queue_signal: Arc<Notify>,
    completions: broadcast::Sender<Completion>,
}

impl<C: Clock, I: IdGen> Engine<C, I> {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ManagerRegistry>,
        topics: Arc<dyn TopicProvisioner>,
        clock: C,
        ids: I,
        config: EngineConfig,
    ) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            store,
            registry,
            topics,
            clock,
            ids,
            config,
            queue_signal: Arc::new(Notify::new()),
            completions,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ManagerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Notified whenever an action is enqueued
    pub fn queue_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.queue_signal)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Completion> {
        self.completions.subscribe()
    }

    // =========================================================================
    // Catalog reconciliation
    // =========================================================================

    /// Make the stored jobs of `project` match `defs`.
    ///
    /// Invalid definitions are skipped as if absent. Each job is updated in
    /// its own transaction; the first failure is returned after all jobs
    /// have been attempted.
    pub fn update_project_jobs(
        &self,
        project: &str,
        defs: Vec<JobDefinition>,
    ) -> Result<(), EngineError> {
        let span = info_span!("engine.update_project_jobs", project);
        let _guard = span.enter();

        let now = self.clock.now();
        let mut wanted: BTreeMap<JobId, JobDefinition> = BTreeMap::new();
        for def in defs {
            if let Err(reason) = self.check_definition(project, &def) {
                warn!(job_id = %def.job_id, %reason, "skipping invalid job definition");
                continue;
            }
            wanted.insert(def.job_id.clone(), def);
        }

        let stored: Vec<JobId> = self.store.read(|s| {
            s.jobs_in_project(project)
                .map(|j| j.job_id.clone())
                .collect()
        });

        let mut first_err: Option<EngineError> = None;
        for def in wanted.values() {
            if let Err(e) = self.upsert_job(def, now) {
                error!(job_id = %def.job_id, error = %e, "failed to update job");
                first_err.get_or_insert(e);
            }
        }
        for job_id in stored.iter().filter(|id| !wanted.contains_key(*id)) {
            if let Err(e) = self.disable_job(job_id, now) {
                error!(%job_id, error = %e, "failed to disable job");
                first_err.get_or_insert(e);
            }
        }

        debug!(jobs = wanted.len(), "project reconciled");
        first_err.map_or(Ok(()), Err)
    }

    /// Reconcile every project the catalog or the store knows about.
    ///
    /// Projects the catalog no longer lists have all their jobs disabled.
    pub async fn refresh_projects(&self, catalog: &dyn Catalog) -> Result<(), EngineError> {
        let mut projects: BTreeSet<String> =
            catalog.get_all_projects().await?.into_iter().collect();
        projects.extend(self.store.read(|s| s.projects()));

        let mut first_err: Option<EngineError> = None;
        for project in &projects {
            let defs = match catalog.get_project_jobs(project).await {
                Ok(defs) => defs,
                Err(CatalogError::UnknownProject(_)) => Vec::new(),
                Err(e) => {
                    warn!(project, error = %e, "catalog lookup failed, keeping jobs as they are");
                    first_err.get_or_insert(e.into());
                    continue;
                }
            };
            if let Err(e) = self.update_project_jobs(project, defs) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn check_definition(&self, project: &str, def: &JobDefinition) -> Result<(), String> {
        if def.job_id.project() != project {
            return Err(format!("job belongs to project {:?}", def.job_id.project()));
        }
        Schedule::parse(&def.schedule).map_err(|e| e.to_string())?;
        self.registry.validate(&def.task).map_err(|e| e.to_string())
    }

    fn upsert_job(&self, def: &JobDefinition, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transact(&def.job_id, |txn, fx| {
            let (mut job, event) = match txn.job() {
                None => {
                    let mut job = Job::new(def.clone());
                    job.enabled = true;
                    info!(job_id = %job.job_id, schedule = %job.schedule, "job added");
                    (job, Some(JobEvent::Enabled))
                }
                Some(current) => {
                    let mut job = current.clone();
                    let schedule_changed = job.schedule != def.schedule;
                    let task_changed = job.task != def.task;
                    job.schedule = def.schedule.clone();
                    job.task = def.task.clone();
                    let event = if !job.enabled {
                        job.enabled = true;
                        info!(job_id = %job.job_id, "job re-enabled");
                        Some(JobEvent::Enabled)
                    } else if schedule_changed {
                        info!(job_id = %job.job_id, schedule = %job.schedule, "schedule changed");
                        Some(JobEvent::ScheduleChanged)
                    } else if task_changed {
                        job.revision += 1;
                        None
                    } else {
                        return Ok(());
                    };
                    (job, event)
                }
            };
            if let Some(event) = event {
                self.fire(txn, &mut job, event, now, fx)?;
            }
            txn.put_job(job)?;
            Ok(())
        })
    }

    fn disable_job(&self, job_id: &JobId, now: DateTime<Utc>) -> Result<(), EngineError> {
        self.transact(job_id, |txn, fx| {
            let Some(current) = txn.job() else {
                return Ok(());
            };
            if !current.enabled {
                return Ok(());
            }
            let mut job = current.clone();
            job.enabled = false;
            info!(%job_id, "job disabled");
            self.fire(txn, &mut job, JobEvent::Disabled, now, fx)?;
            txn.put_job(job)?;
            Ok(())
        })
    }

    // =========================================================================
    // Read API
    // =========================================================================

    pub fn get_all_projects(&self) -> Vec<String> {
        self.store.read(|s| s.projects().into_iter().collect())
    }

    pub fn get_all_jobs(&self) -> Vec<Job> {
        self.store.read(|s| s.jobs.values().cloned().collect())
    }

    pub fn get_project_jobs(&self, project: &str) -> Vec<Job> {
        self.store
            .read(|s| s.jobs_in_project(project).cloned().collect())
    }

    pub fn get_job(&self, job_id: &JobId) -> Result<Job, EngineError> {
        self.store
            .read(|s| s.job(job_id).cloned())
            .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))
    }

    /// Presentation state of a job, using its manager's traits
    pub fn public_state(&self, job: &Job) -> PublicState {
        let traits = self.registry.traits(&job.task.kind).unwrap_or_default();
        job.public_state(traits)
    }

    /// A page of a job's invocations, newest first.
    ///
    /// `page_size` 0 means the largest allowed page. `cursor` is the
    /// `next_cursor` of a previous page.
    pub fn list_invocations(
        &self,
        job_id: &JobId,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<InvocationPage, EngineError> {
        let max = self.config.max_page_size.max(1);
        let limit = match page_size {
            0 => max,
            n => n.min(max),
        };
        let before = cursor
            .filter(|c| !c.is_empty())
            .map(decode_cursor)
            .transpose()?;

        self.store.read(|s| {
            if s.job(job_id).is_none() {
                return Err(EngineError::JobNotFound(job_id.clone()));
            }
            let mut invocations: Vec<Invocation> = s
                .invocations_desc(job_id, before, limit + 1)
                .into_iter()
                .cloned()
                .collect();
            let next_cursor = if invocations.len() > limit {
                invocations.truncate(limit);
                invocations.last().map(|inv| encode_cursor(inv.id))
            } else {
                None
            };
            Ok(InvocationPage {
                invocations,
                next_cursor,
            })
        })
    }

    pub fn get_invocation(&self, job_id: &JobId, id: i64) -> Result<Invocation, EngineError> {
        self.store
            .read(|s| s.invocation(job_id, id).cloned())
            .ok_or_else(|| EngineError::InvocationNotFound {
                job_id: job_id.clone(),
                id,
            })
    }

    /// Every attempt of one logical launch, oldest first
    pub fn get_invocations_by_nonce(&self, nonce: i64) -> Vec<Invocation> {
        let mut found: Vec<Invocation> = self
            .store
            .read(|s| s.invocations_by_nonce(nonce).into_iter().cloned().collect());
        found.sort_by_key(|inv| inv.id);
        found
    }

    /// Wait until the launch identified by `nonce` has finished.
    ///
    /// Returns its last attempt, or `None` if it is still in progress (or
    /// unknown) when `timeout` runs out.
    pub async fn wait_for_invocation(&self, nonce: i64, timeout: Duration) -> Option<Invocation> {
        let mut completions = self.completions.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(done) = self.finished_launch(nonce) {
                return Some(done);
            }
            if tokio::time::timeout_at(deadline, completions.recv())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    fn finished_launch(&self, nonce: i64) -> Option<Invocation> {
        self.store.read(|s| {
            let attempts = s.invocations_by_nonce(nonce);
            if attempts.iter().any(|inv| !inv.is_final()) {
                return None;
            }
            attempts.into_iter().max_by_key(|inv| inv.id).cloned()
        })
    }

    pub fn stats(&self) -> EngineStats {
        self.store.read(|s| EngineStats {
            projects: s.projects().len(),
            jobs: s.jobs.len(),
            active_invocations: s
                .jobs
                .keys()
                .map(|id| s.active_invocations(id).len())
                .sum(),
            queued_actions: s.actions.len(),
        })
    }

    // =========================================================================
    // Control API
    // =========================================================================

    pub fn pause_job(&self, job_id: &JobId, who: &str) -> Result<Job, EngineError> {
        self.set_paused(job_id, who, true)
    }

    pub fn resume_job(&self, job_id: &JobId, who: &str) -> Result<Job, EngineError> {
        self.set_paused(job_id, who, false)
    }

    fn set_paused(&self, job_id: &JobId, who: &str, paused: bool) -> Result<Job, EngineError> {
        let now = self.clock.now();
        self.transact(job_id, |txn, fx| {
            let mut job = load_job(txn)?;
            if job.paused == paused {
                return Ok(job);
            }
            job.paused = paused;
            let event = if paused {
                JobEvent::Paused
            } else {
                JobEvent::Resumed
            };
            info!(%job_id, who, paused, "pause flag changed");
            self.fire(txn, &mut job, event, now, fx)?;
            txn.put_job(job.clone())?;
            Ok(job)
        })
    }

    /// Abort the job's active invocation, if any. Returns what was aborted.
    pub async fn abort_job(&self, job_id: &JobId, who: &str) -> Result<Vec<Invocation>, EngineError> {
        let active: Vec<i64> = self.store.read(|s| {
            s.job(job_id)
                .map(|_| s.active_invocations(job_id).iter().map(|i| i.id).collect())
                .ok_or_else(|| EngineError::JobNotFound(job_id.clone()))
        })?;
        let mut aborted = Vec::new();
        for id in active {
            aborted.push(self.abort_invocation(job_id, id, who).await?);
        }
        Ok(aborted)
    }

    /// Ask the manager to stop, then force `ABORTED`. A no-op for finished
    /// invocations.
    pub async fn abort_invocation(
        &self,
        job_id: &JobId,
        id: i64,
        who: &str,
    ) -> Result<Invocation, EngineError> {
        let inv = self.get_invocation(job_id, id)?;
        if inv.is_final() {
            return Ok(inv);
        }

        let mut ctl = InvocationController::new(self, &inv);
        if let Some(manager) = self.registry.get(&inv.task.kind) {
            let call = manager.abort_task(&mut ctl);
            match tokio::time::timeout(self.config.manager_call_timeout, call).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => ctl.debug_log(&format!("abort request failed: {}", e)),
                Err(_) => ctl.debug_log("abort request timed out"),
            }
        }
        if who.is_empty() {
            ctl.debug_log("invocation aborted");
        } else {
            ctl.debug_log(&format!("invocation aborted by {}", who));
        }
        ctl.state_mut().status = Status::Aborted;
        ctl.commit(Commit::Checkpoint)?;
        info!(%job_id, invocation_id = id, who, "invocation aborted");
        self.get_invocation(job_id, id)
    }

    /// Start an invocation now, even if the job is paused.
    ///
    /// Returns the nonce of the new launch. When an invocation is already
    /// active the overrun is recorded and `JobBusy` returned.
    pub fn trigger_invocation(&self, job_id: &JobId, who: &str) -> Result<i64, EngineError> {
        let now = self.clock.now();
        let outcome = self.transact(job_id, |txn, fx| {
            let mut job = load_job(txn)?;
            if !job.enabled {
                return Err(EngineError::JobDisabled(job_id.clone()));
            }
            let was_active = job.is_active();
            let running = job.state.invocation_id;
            self.fire(
                txn,
                &mut job,
                JobEvent::ManualTrigger {
                    triggered_by: who.to_string(),
                },
                now,
                fx,
            )?;
            let outcome = if was_active {
                TriggerOutcome::Busy(running)
            } else {
                TriggerOutcome::Started(job.state.invocation_nonce)
            };
            txn.put_job(job)?;
            Ok(outcome)
        })?;

        match outcome {
            TriggerOutcome::Started(nonce) => {
                info!(%job_id, who, nonce, "manual trigger");
                Ok(nonce)
            }
            TriggerOutcome::Busy(invocation_id) => Err(EngineError::JobBusy {
                job_id: job_id.clone(),
                invocation_id,
            }),
        }
    }

    // =========================================================================
    // Action execution
    // =========================================================================

    /// Execute one delivery of a queued action. Safe to call repeatedly
    /// with the same payload.
    pub async fn execute_serialized_action(
        &self,
        payload: &[u8],
        attempt: u32,
    ) -> Result<(), EngineError> {
        let action = Action::decode(payload).map_err(|e| TaskError::fatal(e.to_string()))?;
        let span = info_span!(
            "action",
            kind = action.kind(),
            job_id = %action.job_id(),
            attempt,
        );
        async {
            match action {
                Action::TickJob { job_id, tick_nonce } => self.handle_tick(&job_id, tick_nonce),
                Action::LaunchInvocation {
                    job_id,
                    invocation_id,
                    invocation_nonce,
                } => {
                    self.handle_launch(&job_id, invocation_id, invocation_nonce)
                        .await
                }
                Action::FireTimer {
                    job_id,
                    invocation_id,
                    timer_id,
                } => self.handle_timer(&job_id, invocation_id, &timer_id).await,
                Action::DeliverNotification {
                    job_id,
                    invocation_id,
                    message,
                } => {
                    self.handle_notification(&job_id, invocation_id, &message)
                        .await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Give up on an action the dispatcher could not deliver; its target
    /// invocation is forced to `FAILED`.
    pub fn abandon_action(&self, payload: &[u8], reason: &str) -> Result<(), EngineError> {
        let Ok(action) = Action::decode(payload) else {
            return Ok(());
        };
        let now = self.clock.now();
        let job_id = action.job_id().clone();
        warn!(%job_id, kind = action.kind(), reason, "abandoning action");

        self.transact(&job_id, |txn, fx| {
            let Some(current) = txn.job() else {
                return Ok(());
            };
            let mut job = current.clone();
            match action {
                Action::TickJob { tick_nonce, .. } => {
                    if job.state.tick_nonce != tick_nonce {
                        return Ok(());
                    }
                    // replan so the job does not wait forever on a lost tick
                    self.fire(txn, &mut job, JobEvent::ScheduleChanged, now, fx)?;
                }
                other => {
                    let Some(inv) = other.invocation_id().and_then(|id| txn.invocation(id)) else {
                        return Ok(());
                    };
                    if inv.is_final() {
                        return Ok(());
                    }
                    let mut inv = inv.clone();
                    self.fail(&mut inv, &format!("giving up after repeated failures: {}", reason), now);
                    self.finish_in_txn(txn, &mut job, &inv, now, fx)?;
                    txn.put_invocation(inv)?;
                }
            }
            txn.put_job(job)?;
            Ok(())
        })
    }

    fn handle_tick(&self, job_id: &JobId, tick_nonce: i64) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.transact(job_id, |txn, fx| {
            let Some(current) = txn.job() else {
                debug!("tick for unknown job dropped");
                return Ok(());
            };
            if current.state.tick_nonce != tick_nonce {
                debug!("stale tick dropped");
                return Ok(());
            }
            let mut job = current.clone();
            self.fire(txn, &mut job, JobEvent::Tick { tick_nonce }, now, fx)?;
            txn.put_job(job)?;
            Ok(())
        })
    }

    async fn handle_launch(
        &self,
        job_id: &JobId,
        invocation_id: i64,
        nonce: i64,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        let prepared = self.transact(job_id, |txn, fx| {
            let Some(inv) = txn.invocation(invocation_id) else {
                return Ok(None);
            };
            if inv.nonce != nonce || inv.is_final() || inv.launched {
                return Ok(None);
            }
            let mut inv = inv.clone();
            if inv.launch_attempts > 0 {
                let mut job = load_job(txn)?;
                self.retry_launch(txn, &mut job, inv, "previous launch attempt did not complete", now, fx)?;
                txn.put_job(job)?;
                return Ok(None);
            }
            inv.launch_attempts += 1;
            txn.put_invocation(inv.clone())?;
            Ok(Some(inv))
        })?;
        let Some(inv) = prepared else {
            debug!(invocation_id, "launch target is stale");
            return Ok(());
        };

        let mut ctl = InvocationController::new(self, &inv);
        let Some(manager) = self.resolve_manager(&inv, &mut ctl) else {
            ctl.state_mut().status = Status::Failed;
            ctl.commit(Commit::Launched)?;
            return Ok(());
        };

        let traits = manager.traits();
        let timeout = self.config.manager_call_timeout;
        let result = match tokio::time::timeout(timeout, manager.launch_task(&mut ctl)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::transient(format!(
                "launch did not return within {:?}",
                timeout
            ))),
        };

        match result {
            Ok(()) => {
                Self::check_launch_outcome(&mut ctl, traits.multistage);
                ctl.commit(Commit::Launched)?;
            }
            Err(e) if e.is_transient() && ctl.state().status == Status::Starting => {
                let reason = e.to_string();
                ctl.commit(Commit::RetryLaunch { reason: &reason })?;
            }
            Err(e) if e.is_transient() => {
                // the manager already moved on; its completion path decides the outcome
                ctl.debug_log(&format!("launch returned an error after starting: {}", e));
                Self::check_launch_outcome(&mut ctl, traits.multistage);
                ctl.commit(Commit::Launched)?;
            }
            Err(e) => {
                ctl.debug_log(&format!("launch failed: {}", e));
                ctl.state_mut().status = Status::Failed;
                ctl.commit(Commit::Launched)?;
            }
        }
        Ok(())
    }

    /// Fail a launch that left its invocation with no way to finish
    fn check_launch_outcome(ctl: &mut InvocationController<'_, C, I>, multistage: bool) {
        let status = ctl.state().status;
        if !multistage && !status.is_final() {
            ctl.debug_log(&format!(
                "protocol violation: single-stage task returned with status {}",
                status
            ));
            ctl.state_mut().status = Status::Failed;
        } else if status == Status::Starting && !ctl.has_completion_path() {
            ctl.debug_log("protocol violation: task left STARTING without a timer or topic");
            ctl.state_mut().status = Status::Failed;
        }
    }

    async fn handle_timer(
        &self,
        job_id: &JobId,
        invocation_id: i64,
        timer_id: &str,
    ) -> Result<(), EngineError> {
        let found = self.store.read(|s| {
            let timer = s.timer(job_id, timer_id)?.clone();
            let inv = s.invocation(job_id, invocation_id).cloned();
            Some((timer, inv))
        });
        let Some((timer, inv)) = found else {
            debug!(timer_id, "timer already consumed");
            return Ok(());
        };
        let inv = match inv {
            Some(inv) if !inv.is_final() => inv,
            _ => {
                debug!(timer_id, "timer for finished invocation dropped");
                return self.transact(job_id, |txn, _| {
                    txn.delete_timer(timer_id);
                    Ok(())
                });
            }
        };

        let mut ctl = InvocationController::new(self, &inv);
        let Some(manager) = self.resolve_manager(&inv, &mut ctl) else {
            ctl.state_mut().status = Status::Failed;
            ctl.commit(Commit::Delivered {
                timer_id: Some(timer_id),
            })?;
            return Ok(());
        };
        let call = manager.handle_timer(&mut ctl, &timer.name, &timer.payload);
        let result = self.bounded(call, "timer").await;
        self.conclude_callback(ctl, result, Some(timer_id))
    }

    async fn handle_notification(
        &self,
        job_id: &JobId,
        invocation_id: i64,
        message: &tw_core::PubSubMessage,
    ) -> Result<(), EngineError> {
        let inv = self
            .store
            .read(|s| s.invocation(job_id, invocation_id).cloned());
        let inv = match inv {
            Some(inv) if !inv.is_final() => inv,
            _ => {
                debug!(invocation_id, message_id = %message.message_id, "notification for finished invocation dropped");
                return Ok(());
            }
        };

        let mut ctl = InvocationController::new(self, &inv);
        let Some(manager) = self.resolve_manager(&inv, &mut ctl) else {
            ctl.state_mut().status = Status::Failed;
            ctl.commit(Commit::Delivered { timer_id: None })?;
            return Ok(());
        };
        let call = manager.handle_notification(&mut ctl, message);
        let result = self.bounded(call, "notification").await;
        self.conclude_callback(ctl, result, None)
    }

    async fn bounded(
        &self,
        call: impl std::future::Future<Output = Result<(), TaskError>>,
        what: &str,
    ) -> Result<(), TaskError> {
        let timeout = self.config.manager_call_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::transient(format!(
                "{} handler did not return within {:?}",
                what, timeout
            ))),
        }
    }

    /// Persist what a timer or notification handler left behind
    fn conclude_callback(
        &self,
        mut ctl: InvocationController<'_, C, I>,
        result: Result<(), TaskError>,
        timer_id: Option<&str>,
    ) -> Result<(), EngineError> {
        match result {
            Ok(()) => {
                ctl.commit(Commit::Delivered { timer_id })?;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                ctl.commit(Commit::Checkpoint)?;
                Err(EngineError::Task(e))
            }
            Err(e) => {
                ctl.debug_log(&format!("handler failed: {}", e));
                ctl.state_mut().status = Status::Failed;
                ctl.commit(Commit::Delivered { timer_id })?;
                Ok(())
            }
        }
    }

    fn resolve_manager(
        &self,
        inv: &Invocation,
        ctl: &mut InvocationController<'_, C, I>,
    ) -> Option<Arc<dyn Manager>> {
        let Some(manager) = self.registry.get(&inv.task.kind) else {
            ctl.debug_log(&format!("unknown task kind {:?}", inv.task.kind));
            return None;
        };
        if let Err(e) = manager.validate(&inv.task) {
            ctl.debug_log(&format!("invalid task definition: {}", e));
            return None;
        }
        Some(manager)
    }

    // =========================================================================
    // Push notifications
    // =========================================================================

    /// Route an inbound push to the invocation named by its token.
    ///
    /// Malformed and unroutable pushes are acknowledged and dropped. Only a
    /// failure to queue the delivery is returned (as transient).
    pub fn process_pubsub_push(&self, body: &[u8]) -> Result<(), EngineError> {
        let envelope: PushEnvelope = match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed push");
                return Ok(());
            }
        };
        let message = envelope.message;
        let Some(token) = message.auth_token() else {
            warn!(message_id = %message.message_id, "dropping push without routing token");
            return Ok(());
        };
        let target = self.store.read(|s| {
            let binding = s.binding(token)?;
            let inv = s.invocation(&binding.job_id, binding.invocation_id)?;
            (!inv.is_final()).then(|| (binding.job_id.clone(), binding.invocation_id))
        });
        let Some((job_id, invocation_id)) = target else {
            info!(message_id = %message.message_id, "dropping unroutable push");
            return Ok(());
        };

        debug!(%job_id, invocation_id, message_id = %message.message_id, "push routed");
        let action = Action::DeliverNotification {
            job_id,
            invocation_id,
            message,
        };
        let queued = self.queued(&action, self.clock.now())?;
        self.store.enqueue(queued)?;
        self.queue_signal.notify_one();
        Ok(())
    }

    // =========================================================================
    // Controller support
    // =========================================================================

    /// Provision a topic for `manager` and bind a fresh token to the invocation
    pub(crate) async fn bind_topic(
        &self,
        job_id: &JobId,
        invocation_id: i64,
        manager: &str,
        publisher: &str,
    ) -> Result<TopicBinding, EngineError> {
        let topic = topic_name(
            &self.config.pubsub_project,
            &self.config.topic_prefix,
            manager,
            publisher,
        );
        self.topics.ensure_topic(&topic, publisher).await?;

        let token = self.ids.next();
        let binding = NotificationBinding {
            token: token.clone(),
            job_id: job_id.clone(),
            invocation_id,
            manager: manager.to_string(),
            topic: topic.clone(),
        };
        self.transact(job_id, |txn, _| {
            match txn.invocation(invocation_id) {
                Some(inv) if !inv.is_final() => {}
                _ => return Err(TaskError::fatal("invocation is no longer active").into()),
            }
            txn.put_binding(binding)?;
            Ok(())
        })?;
        Ok(TopicBinding { topic, token })
    }

    /// Write a controller's state back to its invocation
    pub(crate) fn persist(&self, req: SaveRequest<'_>) -> Result<Option<Status>, EngineError> {
        let now = self.clock.now();
        let max_log = self.config.max_debug_log_bytes;
        self.transact(req.job_id, |txn, fx| {
            let Some(stored) = txn.invocation(req.invocation_id) else {
                return Ok(None);
            };
            if stored.is_final() {
                if let Commit::Delivered {
                    timer_id: Some(timer_id),
                } = req.commit
                {
                    txn.delete_timer(timer_id);
                }
                return Ok(None);
            }

            let mut inv = stored.clone();
            for line in req.log {
                inv.append_log(now, line, max_log);
            }
            self.apply_state(&mut inv, req.base, req.state, now);
            let mut job = load_job(txn)?;

            if let Commit::RetryLaunch { reason } = req.commit {
                self.retry_launch(txn, &mut job, inv, reason, now, fx)?;
                txn.put_job(job)?;
                return Ok(Some(Status::Failed));
            }

            if let Commit::Delivered {
                timer_id: Some(timer_id),
            } = req.commit
            {
                txn.delete_timer(timer_id);
            }
            let launching = matches!(req.commit, Commit::Launched) && !stored.launched;
            if matches!(req.commit, Commit::Launched) {
                inv.launched = true;
            }

            if inv.is_final() {
                self.finish_in_txn(txn, &mut job, &inv, now, fx)?;
            } else {
                for timer in req.timers {
                    let fire_at = add_duration(now, timer.delay);
                    let pending = PendingTimer {
                        id: self.ids.next(),
                        job_id: inv.job_id.clone(),
                        invocation_id: inv.id,
                        fire_at,
                        name: timer.name.clone(),
                        payload: timer.payload.clone(),
                    };
                    let action = Action::FireTimer {
                        job_id: inv.job_id.clone(),
                        invocation_id: inv.id,
                        timer_id: pending.id.clone(),
                    };
                    txn.put_timer(pending)?;
                    self.enqueue_in(txn, &action, fire_at, fx)?;
                }
                if launching {
                    self.fire(
                        txn,
                        &mut job,
                        JobEvent::InvocationLaunched {
                            invocation_id: inv.id,
                        },
                        now,
                        fx,
                    )?;
                }
            }

            let status = inv.status;
            txn.put_invocation(inv)?;
            txn.put_job(job)?;
            Ok(Some(status))
        })
    }

    /// Apply the fields the manager changed since `base` onto `inv`, failing
    /// it on contract violations. Untouched fields keep their stored value.
    fn apply_state(
        &self,
        inv: &mut Invocation,
        base: &tw_core::State,
        state: &tw_core::State,
        now: DateTime<Utc>,
    ) {
        if state.task_data != base.task_data {
            if state.task_data.len() > self.config.max_task_data_bytes {
                let line = format!(
                    "protocol violation: task data is {} bytes, the limit is {}",
                    state.task_data.len(),
                    self.config.max_task_data_bytes
                );
                self.fail(inv, &line, now);
                return;
            }
            inv.task_data = state.task_data.clone();
        }
        if state.view_url != base.view_url {
            inv.view_url = state.view_url.clone();
        }
        if state.status != base.status && state.status != inv.status {
            if let Err(e) = inv.set_status(state.status, now) {
                self.fail(inv, &format!("protocol violation: {}", e), now);
            }
        }
    }

    fn fail(&self, inv: &mut Invocation, line: &str, now: DateTime<Utc>) {
        inv.append_log(now, line, self.config.max_debug_log_bytes);
        if !inv.is_final() {
            let _ = inv.set_status(Status::Failed, now);
        }
    }

    // =========================================================================
    // Transaction helpers
    // =========================================================================

    fn transact<T>(
        &self,
        job_id: &JobId,
        f: impl FnOnce(&mut Txn<'_>, &mut Effects) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut fx = Effects::default();
        let out = self.store.transact(job_id, |txn| f(txn, &mut fx))?;
        if fx.enqueued {
            self.queue_signal.notify_one();
        }
        for completion in fx.completions {
            // no receivers is fine
            let _ = self.completions.send(completion);
        }
        Ok(out)
    }

    /// Feed `event` to the job's state machine and carry out its actions
    fn fire(
        &self,
        txn: &mut Txn<'_>,
        job: &mut Job,
        event: JobEvent,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> Result<(), EngineError> {
        let schedule = Schedule::parse(&job.schedule).unwrap_or_else(|e| {
            warn!(job_id = %job.job_id, error = %e, "stored schedule is invalid, treating as triggered");
            Schedule::triggered()
        });
        let ctx = JobContext {
            now,
            schedule: &schedule,
            enabled: job.enabled,
            paused: job.paused,
            slow_queue_threshold: self.config.slow_queue_threshold,
        };
        let (next, actions) = job.state.transition(&event, &ctx, &self.ids);
        if next != job.state {
            debug!(
                job_id = %job.job_id,
                from = %job.state.kind,
                to = %next.kind,
                ?event,
                "job state changed"
            );
        }
        job.state = next;
        job.revision += 1;

        for action in actions {
            match action {
                JobAction::TickLater { when, tick_nonce } => {
                    let tick = Action::TickJob {
                        job_id: job.job_id.clone(),
                        tick_nonce,
                    };
                    self.enqueue_in(txn, &tick, when, fx)?;
                }
                JobAction::StartInvocation {
                    invocation_nonce,
                    triggered_by,
                } => {
                    self.create_invocation(
                        txn,
                        job,
                        invocation_nonce,
                        0,
                        &triggered_by,
                        now,
                        Duration::ZERO,
                        fx,
                    )?;
                }
                JobAction::RecordOverrun {
                    running_invocation_id,
                } => self.record_overrun(txn, job, running_invocation_id, now)?,
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_invocation(
        &self,
        txn: &mut Txn<'_>,
        job: &mut Job,
        nonce: i64,
        retry_count: u32,
        triggered_by: &str,
        now: DateTime<Utc>,
        delay: Duration,
        fx: &mut Effects,
    ) -> Result<i64, EngineError> {
        let id = job.allocate_invocation_id();
        let mut inv = Invocation::new(
            id,
            job.job_id.clone(),
            nonce,
            retry_count,
            job.task.clone(),
            triggered_by,
            now,
        );
        let line = match (retry_count, triggered_by) {
            (0, "") => "invocation created by the schedule".to_string(),
            (0, who) => format!("invocation triggered by {}", who),
            (n, _) => format!("retry {} of launch {}", n, nonce),
        };
        inv.append_log(now, &line, self.config.max_debug_log_bytes);
        txn.put_invocation(inv)?;
        info!(job_id = %job.job_id, invocation_id = id, nonce, retry_count, "invocation created");

        self.fire(
            txn,
            job,
            JobEvent::InvocationCreated {
                invocation_id: id,
                retry_count,
            },
            now,
            fx,
        )?;
        let launch = Action::LaunchInvocation {
            job_id: job.job_id.clone(),
            invocation_id: id,
            invocation_nonce: nonce,
        };
        self.enqueue_in(txn, &launch, add_duration(now, delay), fx)?;
        Ok(id)
    }

    fn record_overrun(
        &self,
        txn: &mut Txn<'_>,
        job: &mut Job,
        running: i64,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        warn!(
            job_id = %job.job_id,
            running_invocation = running,
            overruns = job.state.overruns,
            "trigger overran the active invocation"
        );
        if !self.config.record_overrun_invocations {
            return Ok(());
        }
        let id = job.allocate_invocation_id();
        let mut inv = Invocation::new(
            id,
            job.job_id.clone(),
            self.ids.next_nonce(),
            0,
            job.task.clone(),
            "",
            now,
        );
        let line = format!("not started: invocation {} is still active", running);
        inv.append_log(now, &line, self.config.max_debug_log_bytes);
        inv.set_status(Status::Overrun, now)
            .map_err(|e| TaskError::fatal(e.to_string()))?;
        txn.put_invocation(inv)?;
        Ok(())
    }

    /// Fail a launch attempt and queue the next one with the same nonce
    #[allow(clippy::too_many_arguments)]
    fn retry_launch(
        &self,
        txn: &mut Txn<'_>,
        job: &mut Job,
        mut inv: Invocation,
        reason: &str,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> Result<(), EngineError> {
        self.fail(&mut inv, &format!("launch attempt failed: {}", reason), now);
        self.cleanup_in_txn(txn, &inv)?;
        fx.completions.push(completion_of(&inv));

        let retry = inv.retry_count + 1;
        if retry > self.config.max_launch_retries {
            inv.append_log(now, "launch retries exhausted", self.config.max_debug_log_bytes);
            warn!(job_id = %inv.job_id, invocation_id = inv.id, nonce = inv.nonce, "launch retries exhausted");
            self.fire(
                txn,
                job,
                JobEvent::InvocationFinished {
                    invocation_id: inv.id,
                },
                now,
                fx,
            )?;
        } else {
            let delay = self.config.launch_retry_backoff.delay(retry);
            let next = self.create_invocation(
                txn,
                job,
                inv.nonce,
                retry,
                &inv.triggered_by,
                now,
                delay,
                fx,
            )?;
            let line = format!("retrying as invocation {} in {:?}", next, delay);
            inv.append_log(now, &line, self.config.max_debug_log_bytes);
        }
        txn.put_invocation(inv)?;
        Ok(())
    }

    /// Bookkeeping once `inv` is terminal
    fn finish_in_txn(
        &self,
        txn: &mut Txn<'_>,
        job: &mut Job,
        inv: &Invocation,
        now: DateTime<Utc>,
        fx: &mut Effects,
    ) -> Result<(), EngineError> {
        self.cleanup_in_txn(txn, inv)?;
        self.fire(
            txn,
            job,
            JobEvent::InvocationFinished {
                invocation_id: inv.id,
            },
            now,
            fx,
        )?;
        info!(job_id = %inv.job_id, invocation_id = inv.id, status = %inv.status, "invocation finished");
        fx.completions.push(completion_of(inv));
        Ok(())
    }

    /// Drop an invocation's timers and routing tokens
    fn cleanup_in_txn(&self, txn: &mut Txn<'_>, inv: &Invocation) -> Result<(), EngineError> {
        let state = txn.state();
        for timer in state.timers_for_invocation(&inv.job_id, inv.id) {
            txn.delete_timer(&timer.id);
        }
        for binding in state.bindings_for_invocation(&inv.job_id, inv.id) {
            txn.delete_binding(&binding.token)?;
        }
        Ok(())
    }

    fn queued(&self, action: &Action, not_before: DateTime<Utc>) -> Result<QueuedAction, EngineError> {
        let payload = action.encode().map_err(|e| {
            TaskError::fatal(format!("cannot encode {} action: {}", action.kind(), e))
        })?;
        Ok(QueuedAction {
            id: self.ids.next(),
            payload,
            not_before,
            attempts: 0,
        })
    }

    fn enqueue_in(
        &self,
        txn: &mut Txn<'_>,
        action: &Action,
        not_before: DateTime<Utc>,
        fx: &mut Effects,
    ) -> Result<(), EngineError> {
        txn.enqueue(self.queued(action, not_before)?);
        fx.enqueued = true;
        Ok(())
    }
}

fn load_job(txn: &Txn<'_>) -> Result<Job, EngineError> {
    txn.job()
        .cloned()
        .ok_or_else(|| EngineError::JobNotFound(txn.group().clone()))
}

fn completion_of(inv: &Invocation) -> Completion {
    Completion {
        job_id: inv.job_id.clone(),
        invocation_id: inv.id,
        nonce: inv.nonce,
        status: inv.status,
    }
}

fn encode_cursor(id: i64) -> String {
    format!("c{:x}", id)
}

fn decode_cursor(cursor: &str) -> Result<i64, EngineError> {
    cursor
        .strip_prefix('c')
        .and_then(|hex| i64::from_str_radix(hex, 16).ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| EngineError::InvalidRequest(format!("malformed cursor {:?}", cursor)))
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
