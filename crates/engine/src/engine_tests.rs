// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{Dispatcher, DispatcherConfig};
use async_trait::async_trait;
use std::sync::Mutex;
use tw_adapters::{CallKind, FakeManager, FakeStep, FakeTopicProvisioner};
use tw_core::{FakeClock, JobStateKind, SequentialIdGen, TaskDef};

const PROJECT: &str = "proj";

struct Harness {
    engine: Arc<Engine<FakeClock, SequentialIdGen>>,
    dispatcher: Dispatcher<FakeClock, SequentialIdGen>,
    clock: FakeClock,
    single: FakeManager,
    multi: FakeManager,
    topics: FakeTopicProvisioner,
}

fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

fn harness_with(config: EngineConfig) -> Harness {
    let single = FakeManager::new("single");
    let multi = FakeManager::multistage("multi");
    let registry = ManagerRegistry::builder()
        .register(single.clone())
        .unwrap()
        .register(multi.clone())
        .unwrap()
        .build();
    let topics = FakeTopicProvisioner::new();
    let clock = FakeClock::new();
    let engine = Arc::new(Engine::new(
        Arc::new(Store::in_memory()),
        Arc::new(registry),
        Arc::new(topics.clone()),
        clock.clone(),
        SequentialIdGen::new("id"),
        config,
    ));
    let dispatcher = Dispatcher::new(Arc::clone(&engine), DispatcherConfig::default());
    Harness {
        engine,
        dispatcher,
        clock,
        single,
        multi,
        topics,
    }
}

fn job_id(name: &str) -> JobId {
    JobId::new(PROJECT, name).unwrap()
}

fn definition(name: &str, schedule: &str, kind: &str) -> JobDefinition {
    JobDefinition {
        job_id: job_id(name),
        schedule: schedule.to_string(),
        task: TaskDef::bare(kind),
    }
}

impl Harness {
    /// Make `name` the only job of the project
    fn add(&self, name: &str, schedule: &str, kind: &str) -> JobId {
        self.engine
            .update_project_jobs(PROJECT, vec![definition(name, schedule, kind)])
            .unwrap();
        job_id(name)
    }

    async fn run(&self) -> usize {
        self.dispatcher.run_until_idle().await
    }

    fn job(&self, id: &JobId) -> Job {
        self.engine.get_job(id).unwrap()
    }

    fn latest(&self, id: &JobId) -> Invocation {
        self.engine.list_invocations(id, 1, None).unwrap().invocations[0].clone()
    }

    fn queued(&self) -> Vec<Action> {
        self.engine.store().read(|s| {
            s.actions
                .values()
                .map(|a| Action::decode(a.payload.as_bytes()).unwrap())
                .collect()
        })
    }

    fn launch_payload(&self) -> String {
        self.engine.store().read(|s| {
            s.actions
                .values()
                .find(|a| a.payload.contains("launch"))
                .unwrap()
                .payload
                .clone()
        })
    }
}

// =============================================================================
// Catalog reconciliation
// =============================================================================

#[test]
fn new_job_is_enabled_and_scheduled() {
    let h = harness();
    let id = h.add("a", "with 10s interval", "single");

    let job = h.job(&id);
    assert!(job.enabled);
    assert_eq!(job.state.kind, JobStateKind::Scheduled);
    assert_ne!(job.state.tick_nonce, 0);
    assert_eq!(
        h.queued(),
        vec![Action::TickJob {
            job_id: id,
            tick_nonce: job.state.tick_nonce,
        }]
    );
}

#[test]
fn invalid_definitions_are_skipped() {
    let h = harness();
    let other = JobDefinition {
        job_id: JobId::new("elsewhere", "x").unwrap(),
        schedule: "triggered".into(),
        task: TaskDef::bare("single"),
    };
    h.engine
        .update_project_jobs(
            PROJECT,
            vec![
                definition("good", "triggered", "single"),
                definition("bad-schedule", "every tuesday", "single"),
                definition("bad-kind", "triggered", "nope"),
                other,
            ],
        )
        .unwrap();

    let names: Vec<String> = h
        .engine
        .get_all_jobs()
        .iter()
        .map(|j| j.name().to_string())
        .collect();
    assert_eq!(names, vec!["good"]);
}

#[test]
fn unlisted_job_is_disabled_and_relisting_enables_it() {
    let h = harness();
    let id = h.add("a", "with 10s interval", "single");
    h.engine.update_project_jobs(PROJECT, vec![]).unwrap();

    let job = h.job(&id);
    assert!(!job.enabled);
    assert_eq!(job.state.kind, JobStateKind::Disabled);
    assert_eq!(job.state.tick_nonce, 0);
    assert_eq!(h.engine.public_state(&job), PublicState::Disabled);

    h.add("a", "with 10s interval", "single");
    let job = h.job(&id);
    assert!(job.enabled);
    assert_eq!(job.state.kind, JobStateKind::Scheduled);
}

#[test]
fn schedule_change_replans_the_tick() {
    let h = harness();
    let id = h.add("a", "with 10s interval", "single");
    let before = h.job(&id).state;

    h.add("a", "with 1m interval", "single");
    let after = h.job(&id).state;
    assert_ne!(after.tick_nonce, before.tick_nonce);
    assert_eq!(
        after.tick_time,
        Some(h.clock.now() + chrono::Duration::minutes(1))
    );
}

#[test]
fn unchanged_definition_is_not_rewritten() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    let revision = h.job(&id).revision;
    h.add("a", "triggered", "single");
    assert_eq!(h.job(&id).revision, revision);
}

struct MapCatalog {
    projects: BTreeMap<String, Vec<JobDefinition>>,
    unavailable: Mutex<bool>,
}

#[async_trait]
impl Catalog for MapCatalog {
    async fn get_all_projects(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.projects.keys().cloned().collect())
    }

    async fn get_project_jobs(&self, project: &str) -> Result<Vec<JobDefinition>, CatalogError> {
        if *self.unavailable.lock().unwrap() {
            return Err(CatalogError::Unavailable("catalog is down".into()));
        }
        self.projects
            .get(project)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownProject(project.to_string()))
    }
}

#[tokio::test]
async fn refresh_disables_jobs_of_vanished_projects() {
    let h = harness();
    let old = JobId::new("old", "x").unwrap();
    h.engine
        .update_project_jobs(
            "old",
            vec![JobDefinition {
                job_id: old.clone(),
                schedule: "triggered".into(),
                task: TaskDef::bare("single"),
            }],
        )
        .unwrap();

    let catalog = MapCatalog {
        projects: BTreeMap::from([(
            PROJECT.to_string(),
            vec![definition("a", "triggered", "single")],
        )]),
        unavailable: Mutex::new(false),
    };
    h.engine.refresh_projects(&catalog).await.unwrap();

    assert!(h.job(&job_id("a")).enabled);
    assert_eq!(h.job(&old).state.kind, JobStateKind::Disabled);
    assert_eq!(h.engine.get_all_projects(), vec!["old", "proj"]);
}

#[tokio::test]
async fn refresh_keeps_jobs_when_catalog_is_unavailable() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    let catalog = MapCatalog {
        projects: BTreeMap::new(),
        unavailable: Mutex::new(true),
    };

    let err = h.engine.refresh_projects(&catalog).await.unwrap_err();
    assert!(err.is_transient());
    assert!(h.job(&id).enabled);
}

// =============================================================================
// Triggers and launches
// =============================================================================

#[tokio::test]
async fn manual_trigger_runs_single_stage_task() {
    let h = harness();
    let id = h.add("a", "triggered", "single");

    let nonce = h.engine.trigger_invocation(&id, "user:alice").unwrap();
    assert_eq!(h.job(&id).state.kind, JobStateKind::Queued);
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.nonce, nonce);
    assert_eq!(inv.status, Status::Succeeded);
    assert_eq!(inv.triggered_by, "user:alice");
    assert!(inv.finished.is_some());
    assert!(inv.debug_log.contains("invocation triggered by user:alice"));
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);
    assert_eq!(h.single.calls_of(CallKind::Launch).len(), 1);
}

#[tokio::test]
async fn tick_starts_invocation_and_plans_next_tick() {
    let h = harness();
    let id = h.add("a", "with 10s interval", "single");

    h.clock.advance(Duration::from_secs(10));
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Succeeded);
    assert_eq!(inv.triggered_by, "");
    let job = h.job(&id);
    assert_eq!(job.state.kind, JobStateKind::Scheduled);
    assert_eq!(
        h.queued(),
        vec![Action::TickJob {
            job_id: id,
            tick_nonce: job.state.tick_nonce,
        }]
    );
}

#[test]
fn trigger_rejects_unknown_and_disabled_jobs() {
    let h = harness();
    let err = h.engine.trigger_invocation(&job_id("ghost"), "u").unwrap_err();
    assert!(err.is_not_found());

    let id = h.add("a", "triggered", "single");
    h.engine.update_project_jobs(PROJECT, vec![]).unwrap();
    let err = h.engine.trigger_invocation(&id, "u").unwrap_err();
    assert!(matches!(err, EngineError::JobDisabled(_)));
}

#[tokio::test]
async fn trigger_while_running_counts_overrun() {
    let h = harness();
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    assert_eq!(h.job(&id).state.kind, JobStateKind::Running);

    let err = h.engine.trigger_invocation(&id, "u").unwrap_err();
    assert!(matches!(
        err,
        EngineError::JobBusy {
            invocation_id: 1,
            ..
        }
    ));
    let job = h.job(&id);
    assert_eq!(job.state.kind, JobStateKind::Overrun);
    assert_eq!(job.state.overruns, 1);
    assert_eq!(h.engine.list_invocations(&id, 0, None).unwrap().invocations.len(), 1);
}

#[tokio::test]
async fn overrun_invocations_are_recorded_when_enabled() {
    let h = harness_with(EngineConfig {
        record_overrun_invocations: true,
        ..EngineConfig::default()
    });
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    let _ = h.engine.trigger_invocation(&id, "u");

    let page = h.engine.list_invocations(&id, 0, None).unwrap();
    assert_eq!(page.invocations.len(), 2);
    let overrun = &page.invocations[0];
    assert_eq!(overrun.status, Status::Overrun);
    assert!(overrun.debug_log.contains("invocation 1 is still active"));
    assert_eq!(page.invocations[1].status, Status::Running);
}

#[tokio::test]
async fn pause_suspends_ticks_but_allows_manual_trigger() {
    let h = harness();
    let id = h.add("a", "with 10s interval", "single");

    let job = h.engine.pause_job(&id, "u").unwrap();
    assert!(job.paused);
    assert_eq!(job.state.kind, JobStateKind::Suspended);
    assert_eq!(h.engine.public_state(&job), PublicState::Paused);

    h.clock.advance(Duration::from_secs(10));
    h.run().await;
    assert!(h.single.calls().is_empty());

    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    assert_eq!(h.latest(&id).status, Status::Succeeded);
    assert_eq!(h.job(&id).state.kind, JobStateKind::Suspended);

    let job = h.engine.resume_job(&id, "u").unwrap();
    assert_eq!(job.state.kind, JobStateKind::Scheduled);
    assert_ne!(job.state.tick_nonce, 0);
}

#[test]
fn pause_is_idempotent() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    let first = h.engine.pause_job(&id, "u").unwrap();
    let second = h.engine.pause_job(&id, "u").unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn single_stage_task_left_running_fails() {
    let h = harness();
    h.single.on_launch(vec![FakeStep::Status(Status::Running)]);
    let id = h.add("a", "triggered", "single");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv.debug_log.contains("protocol violation"));
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);
}

#[tokio::test]
async fn single_stage_transient_error_after_running_fails() {
    let h = harness();
    h.single.push_launch(vec![
        FakeStep::Status(Status::Running),
        FakeStep::Transient("flaky".into()),
    ]);
    let id = h.add("a", "triggered", "single");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv.debug_log.contains("launch returned an error after starting: transient: flaky"));
    assert!(inv.debug_log.contains("protocol violation"));
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);

    // the job is free to run again
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    assert_eq!(h.latest(&id).status, Status::Succeeded);
}

#[tokio::test]
async fn multistage_task_left_starting_without_callback_fails() {
    let h = harness();
    h.multi.on_launch(vec![]);
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv.debug_log.contains("protocol violation"));
}

#[tokio::test]
async fn oversized_task_data_fails_invocation() {
    let h = harness_with(EngineConfig {
        max_task_data_bytes: 4,
        ..EngineConfig::default()
    });
    h.single.on_launch(vec![
        FakeStep::TaskData(vec![0; 8]),
        FakeStep::Status(Status::Succeeded),
    ]);
    let id = h.add("a", "triggered", "single");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv.debug_log.contains("task data is 8 bytes"));
}

#[tokio::test]
async fn fatal_launch_error_fails_invocation() {
    let h = harness();
    h.single.on_launch(vec![
        FakeStep::Log("starting".into()),
        FakeStep::Fatal("bad config".into()),
    ]);
    let id = h.add("a", "triggered", "single");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv.debug_log.contains("starting"));
    assert!(inv.debug_log.contains("launch failed: bad config"));
    assert_eq!(h.engine.list_invocations(&id, 0, None).unwrap().invocations.len(), 1);
}

#[tokio::test]
async fn transient_launch_error_retries_with_same_nonce() {
    let h = harness();
    h.single
        .push_launch(vec![FakeStep::Transient("backend busy".into())]);
    let id = h.add("a", "triggered", "single");
    let nonce = h.engine.trigger_invocation(&id, "u").unwrap();

    h.run().await;
    assert_eq!(h.job(&id).state.kind, JobStateKind::SlowQueue);
    assert_eq!(h.engine.public_state(&h.job(&id)), PublicState::Retrying);
    h.clock.advance(Duration::from_secs(2));
    h.run().await;

    let attempts = h.engine.get_invocations_by_nonce(nonce);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, Status::Failed);
    assert!(attempts[0].debug_log.contains("backend busy"));
    assert_eq!(attempts[1].status, Status::Succeeded);
    assert_eq!(attempts[1].retry_count, 1);
    assert!(attempts[1].debug_log.contains(&format!("retry 1 of launch {}", nonce)));

    let launches = h.single.calls_of(CallKind::Launch);
    assert_eq!(launches.len(), 2);
    assert!(launches.iter().all(|c| c.nonce == nonce));
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);
}

#[tokio::test]
async fn launch_retries_are_bounded() {
    let h = harness_with(EngineConfig {
        max_launch_retries: 1,
        ..EngineConfig::default()
    });
    h.single.on_launch(vec![FakeStep::Transient("down".into())]);
    let id = h.add("a", "triggered", "single");
    let nonce = h.engine.trigger_invocation(&id, "u").unwrap();

    h.run().await;
    h.clock.advance(Duration::from_secs(2));
    h.run().await;
    h.clock.advance(Duration::from_secs(10));
    h.run().await;

    let attempts = h.engine.get_invocations_by_nonce(nonce);
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|i| i.status == Status::Failed));
    assert!(attempts[1].debug_log.contains("launch retries exhausted"));
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);
}

#[tokio::test]
async fn launch_timeout_is_retried() {
    let h = harness_with(EngineConfig {
        manager_call_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    });
    h.single.push_launch(vec![
        FakeStep::Sleep(Duration::from_millis(500)),
        FakeStep::Status(Status::Succeeded),
    ]);
    let id = h.add("a", "triggered", "single");
    let nonce = h.engine.trigger_invocation(&id, "u").unwrap();

    h.run().await;
    h.clock.advance(Duration::from_secs(2));
    h.run().await;

    let attempts = h.engine.get_invocations_by_nonce(nonce);
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].debug_log.contains("did not return"));
    assert_eq!(attempts[1].status, Status::Succeeded);
}

#[tokio::test]
async fn interrupted_launch_is_replaced() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    let nonce = h.engine.trigger_invocation(&id, "u").unwrap();

    // a launch that started but never recorded its result
    h.engine
        .store()
        .transact::<_, EngineError>(&id, |txn| {
            let mut inv = txn.invocation(1).unwrap().clone();
            inv.launch_attempts = 1;
            txn.put_invocation(inv)?;
            Ok(())
        })
        .unwrap();

    h.run().await;
    h.clock.advance(Duration::from_secs(2));
    h.run().await;

    let attempts = h.engine.get_invocations_by_nonce(nonce);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, Status::Failed);
    assert!(attempts[0].debug_log.contains("did not complete"));
    assert_eq!(attempts[1].status, Status::Succeeded);
    assert_eq!(h.single.calls_of(CallKind::Launch).len(), 1);
}

#[tokio::test]
async fn invalid_task_fails_at_launch() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.single.set_invalid("url is required");
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv.debug_log.contains("invalid task definition: url is required"));
    assert!(h.single.calls().is_empty());
}

// =============================================================================
// Action handling
// =============================================================================

#[tokio::test]
async fn redelivered_launch_is_a_no_op() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    h.engine.trigger_invocation(&id, "u").unwrap();
    let payload = h.launch_payload();
    h.run().await;

    h.engine
        .execute_serialized_action(payload.as_bytes(), 2)
        .await
        .unwrap();
    assert_eq!(h.single.calls_of(CallKind::Launch).len(), 1);
    assert_eq!(h.latest(&id).status, Status::Succeeded);
}

#[tokio::test]
async fn stale_tick_is_dropped() {
    let h = harness();
    let id = h.add("a", "with 10s interval", "single");
    let stale = Action::TickJob {
        job_id: id.clone(),
        tick_nonce: 1,
    };
    h.engine
        .execute_serialized_action(stale.encode().unwrap().as_bytes(), 1)
        .await
        .unwrap();
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);
    assert!(h.engine.list_invocations(&id, 0, None).unwrap().invocations.is_empty());
}

#[tokio::test]
async fn undecodable_action_is_fatal() {
    let h = harness();
    let err = h
        .engine
        .execute_serialized_action(b"not json", 1)
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[test]
fn abandoning_a_launch_fails_the_invocation() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    h.engine.trigger_invocation(&id, "u").unwrap();
    let payload = h.launch_payload();

    h.engine.abandon_action(payload.as_bytes(), "store offline").unwrap();

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv
        .debug_log
        .contains("giving up after repeated failures: store offline"));
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);
}

#[test]
fn abandoning_a_tick_replans_it() {
    let h = harness();
    let id = h.add("a", "with 10s interval", "single");
    let before = h.job(&id).state.tick_nonce;
    let tick = Action::TickJob {
        job_id: id.clone(),
        tick_nonce: before,
    };

    h.engine
        .abandon_action(tick.encode().unwrap().as_bytes(), "x")
        .unwrap();
    let after = h.job(&id).state.tick_nonce;
    assert_ne!(after, 0);
    assert_ne!(after, before);
}

// =============================================================================
// Timers and notifications
// =============================================================================

#[tokio::test]
async fn timer_completes_multistage_invocation() {
    let h = harness();
    h.multi.on_launch(vec![
        FakeStep::Status(Status::Running),
        FakeStep::Timer {
            delay: Duration::from_secs(5),
            name: "poll".into(),
            payload: b"p".to_vec(),
        },
    ]);
    h.multi.push_timer(vec![FakeStep::Transient("not yet".into())]);
    h.multi.on_timer(vec![FakeStep::Status(Status::Succeeded)]);
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();

    h.run().await;
    assert_eq!(h.latest(&id).status, Status::Running);
    assert_eq!(h.engine.store().read(|s| s.timers.len()), 1);

    h.clock.advance(Duration::from_secs(5));
    h.run().await;
    assert_eq!(h.latest(&id).status, Status::Running);

    h.clock.advance(Duration::from_secs(1));
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Succeeded);
    let timers = h.multi.calls_of(CallKind::Timer);
    assert_eq!(timers.len(), 2);
    assert_eq!(timers[0].detail, "poll");
    assert!(h.engine.store().read(|s| s.timers.is_empty()));
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);
}

#[tokio::test]
async fn concurrent_handlers_keep_each_others_changes() {
    let h = harness();
    h.multi.on_launch(vec![FakeStep::Timer {
        delay: Duration::from_secs(5),
        name: "poll".into(),
        payload: Vec::new(),
    }]);
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Starting);

    // both handlers read the invocation before either writes
    let mut first = InvocationController::new(&*h.engine, &inv);
    let mut second = InvocationController::new(&*h.engine, &inv);

    first.state_mut().status = Status::Running;
    first.state_mut().task_data = b"progress".to_vec();
    first.commit(Commit::Delivered { timer_id: None }).unwrap();

    second.state_mut().view_url = "https://ci.example.com/7".into();
    second.commit(Commit::Delivered { timer_id: None }).unwrap();

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Running);
    assert_eq!(inv.task_data, b"progress".to_vec());
    assert_eq!(inv.view_url, "https://ci.example.com/7");
    assert!(!inv.debug_log.contains("protocol violation"));
}

#[tokio::test]
async fn late_status_change_to_the_same_status_is_absorbed() {
    let h = harness();
    h.multi.on_launch(vec![FakeStep::Timer {
        delay: Duration::from_secs(5),
        name: "poll".into(),
        payload: Vec::new(),
    }]);
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    let inv = h.latest(&id);

    let mut first = InvocationController::new(&*h.engine, &inv);
    let mut second = InvocationController::new(&*h.engine, &inv);
    first.state_mut().status = Status::Running;
    second.state_mut().status = Status::Running;
    first.commit(Commit::Checkpoint).unwrap();
    second.commit(Commit::Checkpoint).unwrap();

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Running);
    assert!(!inv.debug_log.contains("protocol violation"));
}

#[tokio::test]
async fn notification_for_finished_invocation_is_a_no_op() {
    let h = harness();
    h.multi.on_launch(vec![
        FakeStep::Status(Status::Running),
        FakeStep::PrepareTopic("builder@example.com".into()),
    ]);
    h.multi.on_notification(vec![FakeStep::Status(Status::Succeeded)]);
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    let token = h
        .engine
        .store()
        .read(|s| s.bindings.keys().next().cloned())
        .unwrap();

    // two deliveries queued while the invocation is still running
    h.engine.process_pubsub_push(&push_body(&token, "m-1")).unwrap();
    h.engine.process_pubsub_push(&push_body(&token, "m-2")).unwrap();
    let payloads: Vec<String> = h
        .engine
        .store()
        .read(|s| s.actions.values().map(|a| a.payload.clone()).collect());
    assert_eq!(payloads.len(), 2);
    let (first, second) = if payloads[0].contains("m-1") {
        (&payloads[0], &payloads[1])
    } else {
        (&payloads[1], &payloads[0])
    };

    h.engine
        .execute_serialized_action(first.as_bytes(), 1)
        .await
        .unwrap();
    let finished = h.latest(&id);
    assert_eq!(finished.status, Status::Succeeded);

    for attempt in 1..=2 {
        h.engine
            .execute_serialized_action(second.as_bytes(), attempt)
            .await
            .unwrap();
    }
    assert_eq!(h.multi.calls_of(CallKind::Notification).len(), 1);
    assert_eq!(h.latest(&id), finished);
}

#[tokio::test]
async fn timer_for_aborted_invocation_is_a_no_op() {
    let h = harness();
    h.multi.on_launch(vec![
        FakeStep::Status(Status::Running),
        FakeStep::Timer {
            delay: Duration::from_secs(5),
            name: "poll".into(),
            payload: Vec::new(),
        },
    ]);
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;
    let timer_payload = h.engine.store().read(|s| {
        s.actions
            .values()
            .find(|a| a.payload.contains("fire_timer"))
            .unwrap()
            .payload
            .clone()
    });

    let aborted = h.engine.abort_invocation(&id, 1, "user:bob").await.unwrap();
    assert_eq!(aborted.status, Status::Aborted);

    for attempt in 1..=2 {
        h.engine
            .execute_serialized_action(timer_payload.as_bytes(), attempt)
            .await
            .unwrap();
    }
    assert!(h.multi.calls_of(CallKind::Timer).is_empty());
    assert_eq!(h.latest(&id), aborted);
}

fn push_body(token: &str, message_id: &str) -> Vec<u8> {
    serde_json::json!({
        "message": {
            "messageId": message_id,
            "attributes": {"auth_token": token},
            "data": "",
        },
        "subscription": "projects/tickwork/subscriptions/tw",
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn push_notification_reaches_its_invocation() {
    let h = harness();
    h.multi.on_launch(vec![
        FakeStep::Status(Status::Running),
        FakeStep::PrepareTopic("builder@example.com".into()),
    ]);
    h.multi.on_notification(vec![FakeStep::Status(Status::Succeeded)]);
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    assert_eq!(
        h.topics.topics(),
        vec!["projects/tickwork/topics/tw+multi+builder_example_com"]
    );
    let token = h
        .engine
        .store()
        .read(|s| s.bindings.keys().next().cloned())
        .unwrap();

    h.engine.process_pubsub_push(&push_body(&token, "m-1")).unwrap();
    h.run().await;
    assert_eq!(h.latest(&id).status, Status::Succeeded);
    assert!(h.engine.store().read(|s| s.bindings.is_empty()));

    // a late duplicate is acknowledged and dropped
    h.engine.process_pubsub_push(&push_body(&token, "m-1")).unwrap();
    assert!(h.queued().is_empty());
    assert_eq!(h.multi.calls_of(CallKind::Notification).len(), 1);
}

#[test]
fn malformed_and_unroutable_pushes_are_dropped() {
    let h = harness();
    h.engine.process_pubsub_push(b"{ nope").unwrap();
    h.engine
        .process_pubsub_push(br#"{"message": {"messageId": "m"}}"#)
        .unwrap();
    h.engine
        .process_pubsub_push(&push_body("unknown-token", "m"))
        .unwrap();
    assert!(h.queued().is_empty());
}

#[tokio::test]
async fn topic_failure_is_reported_to_manager() {
    let h = harness();
    h.multi.on_launch(vec![
        FakeStep::Status(Status::Running),
        FakeStep::PrepareTopic("svc".into()),
    ]);
    h.topics.fail_next(TaskError::fatal("permission denied"));
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    let inv = h.latest(&id);
    assert_eq!(inv.status, Status::Failed);
    assert!(inv.debug_log.contains("permission denied"));
}

// =============================================================================
// Abort and reads
// =============================================================================

#[tokio::test]
async fn abort_running_invocation() {
    let h = harness();
    let id = h.add("a", "triggered", "multi");
    h.engine.trigger_invocation(&id, "u").unwrap();
    h.run().await;

    let inv = h.engine.abort_invocation(&id, 1, "user:bob").await.unwrap();
    assert_eq!(inv.status, Status::Aborted);
    assert!(inv.debug_log.contains("invocation aborted by user:bob"));
    assert_eq!(h.multi.calls_of(CallKind::Abort).len(), 1);
    assert_eq!(h.job(&id).state.kind, JobStateKind::Scheduled);

    let again = h.engine.abort_invocation(&id, 1, "user:bob").await.unwrap();
    assert_eq!(again, inv);
    assert_eq!(h.multi.calls_of(CallKind::Abort).len(), 1);
}

#[tokio::test]
async fn abort_job_aborts_active_invocation() {
    let h = harness();
    let id = h.add("a", "triggered", "multi");
    assert!(h.engine.abort_job(&id, "u").await.unwrap().is_empty());

    h.engine.trigger_invocation(&id, "u").unwrap();
    let aborted = h.engine.abort_job(&id, "u").await.unwrap();
    assert_eq!(aborted.len(), 1);
    assert_eq!(aborted[0].status, Status::Aborted);

    // the queued launch finds a finished invocation
    h.run().await;
    assert!(h.multi.calls_of(CallKind::Launch).is_empty());
}

#[tokio::test]
async fn abort_unknown_invocation_is_not_found() {
    let h = harness();
    let id = h.add("a", "triggered", "multi");
    let err = h.engine.abort_invocation(&id, 7, "u").await.unwrap_err();
    assert!(matches!(err, EngineError::InvocationNotFound { id: 7, .. }));
}

#[tokio::test]
async fn list_invocations_pages_newest_first() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    for _ in 0..3 {
        h.engine.trigger_invocation(&id, "u").unwrap();
        h.run().await;
    }

    let first = h.engine.list_invocations(&id, 2, None).unwrap();
    let ids: Vec<i64> = first.invocations.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![3, 2]);
    let cursor = first.next_cursor.unwrap();

    let second = h.engine.list_invocations(&id, 2, Some(&cursor)).unwrap();
    let ids: Vec<i64> = second.invocations.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![1]);
    assert_eq!(second.next_cursor, None);
}

#[test]
fn list_invocations_rejects_bad_input() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    let err = h.engine.list_invocations(&id, 10, Some("zzz")).unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = h
        .engine
        .list_invocations(&job_id("ghost"), 10, None)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn wait_for_invocation_returns_once_finished() {
    let h = harness();
    let id = h.add("a", "triggered", "single");
    let nonce = h.engine.trigger_invocation(&id, "u").unwrap();

    let engine = Arc::clone(&h.engine);
    let waiter =
        tokio::spawn(async move { engine.wait_for_invocation(nonce, Duration::from_secs(5)).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.run().await;

    let done = waiter.await.unwrap().unwrap();
    assert_eq!(done.nonce, nonce);
    assert_eq!(done.status, Status::Succeeded);
}

#[tokio::test]
async fn wait_for_invocation_times_out() {
    let h = harness();
    let found = h
        .engine
        .wait_for_invocation(424242, Duration::from_millis(20))
        .await;
    assert!(found.is_none());
}

#[tokio::test]
async fn stats_count_jobs_and_queue() {
    let h = harness();
    h.engine
        .update_project_jobs(
            PROJECT,
            vec![
                definition("a", "with 10s interval", "single"),
                definition("b", "triggered", "multi"),
            ],
        )
        .unwrap();
    h.engine.trigger_invocation(&job_id("b"), "u").unwrap();
    h.run().await;

    let stats = h.engine.stats();
    assert_eq!(stats.projects, 1);
    assert_eq!(stats.jobs, 2);
    assert_eq!(stats.active_invocations, 1);
    assert_eq!(stats.queued_actions, 1);
}

#[test]
fn cursor_encoding() {
    assert_eq!(encode_cursor(255), "cff");
    assert_eq!(decode_cursor("cff").unwrap(), 255);
    assert!(decode_cursor("ff").is_err());
    assert!(decode_cursor("c0").is_err());
}
