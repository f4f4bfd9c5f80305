// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

//! tw-core: core library for the Tickwork job scheduler
//!
//! This crate provides:
//! - The task contract (`Manager`, `Controller`) and the manager registry
//! - Job and invocation records and the pure job state machine
//! - Schedules, serialized actions, and WAL operations
//! - Clock and id abstractions for deterministic tests

pub mod clock;
pub mod id;

pub mod action;
pub mod catalog;
pub mod invocation;
pub mod job;
pub mod job_state;
pub mod operation;
pub mod pubsub;
pub mod registry;
pub mod schedule;
pub mod task;

pub use action::{Action, ActionDecodeError, NotificationBinding, PendingTimer, QueuedAction};
pub use catalog::{Catalog, CatalogError};
pub use clock::{Clock, FakeClock, SystemClock};
pub use id::{IdGen, SequentialIdGen, UuidIdGen};
pub use invocation::{Invocation, Status, TransitionError};
pub use job::{Job, JobDefinition, JobId, JobIdError, PublicState};
pub use job_state::{JobAction, JobContext, JobEvent, JobState, JobStateKind};
pub use operation::Operation;
pub use pubsub::{topic_name, PubSubMessage, PushEnvelope, TopicBinding, TopicProvisioner};
pub use registry::{ManagerRegistry, ManagerRegistryBuilder, RegistryError};
pub use schedule::{Schedule, ScheduleError};
pub use task::{Controller, Manager, State, TaskDef, TaskError, Traits};
