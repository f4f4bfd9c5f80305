// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job state machine.
//!
//! Pure: `transition` returns the next state and the actions the engine
//! must carry out. All I/O (persisting invocations, enqueueing ticks and
//! launches) happens in the engine.

use crate::id::IdGen;
use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStateKind {
    /// Not present in the catalog any more
    #[default]
    Disabled,
    /// Waiting for the next tick
    Scheduled,
    /// Paused with nothing running
    Suspended,
    /// Invocation created, launch pending
    Queued,
    /// Launch has been pending too long, or is being retried
    SlowQueue,
    Running,
    /// Running, and at least one trigger arrived meanwhile
    Overrun,
}

impl JobStateKind {
    /// An invocation is queued or running
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStateKind::Queued
                | JobStateKind::SlowQueue
                | JobStateKind::Running
                | JobStateKind::Overrun
        )
    }
}

impl fmt::Display for JobStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStateKind::Disabled => "DISABLED",
            JobStateKind::Scheduled => "SCHEDULED",
            JobStateKind::Suspended => "SUSPENDED",
            JobStateKind::Queued => "QUEUED",
            JobStateKind::SlowQueue => "SLOW_QUEUE",
            JobStateKind::Running => "RUNNING",
            JobStateKind::Overrun => "OVERRUN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub kind: JobStateKind,
    /// Nonce of the pending tick; 0 when no tick is planned
    #[serde(default)]
    pub tick_nonce: i64,
    #[serde(default)]
    pub tick_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prev_tick_time: Option<DateTime<Utc>>,
    /// Nonce of the active logical launch; 0 when idle
    #[serde(default)]
    pub invocation_nonce: i64,
    /// Id of the current attempt; 0 until the engine creates it
    #[serde(default)]
    pub invocation_id: i64,
    #[serde(default)]
    pub invocation_retry_count: u32,
    #[serde(default)]
    pub queued_at: Option<DateTime<Utc>>,
    /// Triggers that arrived while an invocation was active
    #[serde(default)]
    pub overruns: u64,
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Enabled,
    Disabled,
    ScheduleChanged,
    Paused,
    Resumed,
    Tick { tick_nonce: i64 },
    ManualTrigger { triggered_by: String },
    InvocationCreated { invocation_id: i64, retry_count: u32 },
    InvocationLaunched { invocation_id: i64 },
    InvocationFinished { invocation_id: i64 },
}

/// Work the engine must perform after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    TickLater {
        when: DateTime<Utc>,
        tick_nonce: i64,
    },
    StartInvocation {
        invocation_nonce: i64,
        triggered_by: String,
    },
    RecordOverrun {
        running_invocation_id: i64,
    },
}

/// Job attributes the transition depends on
#[derive(Debug, Clone)]
pub struct JobContext<'a> {
    pub now: DateTime<Utc>,
    pub schedule: &'a Schedule,
    pub enabled: bool,
    pub paused: bool,
    pub slow_queue_threshold: Duration,
}

impl JobState {
    pub fn transition(
        &self,
        event: &JobEvent,
        ctx: &JobContext<'_>,
        ids: &impl IdGen,
    ) -> (JobState, Vec<JobAction>) {
        let mut next = self.clone();
        let mut actions = Vec::new();
        let idle = !self.kind.is_active();

        match event {
            JobEvent::Enabled | JobEvent::Resumed => {
                if idle {
                    next.settle_idle(ctx, ids, &mut actions);
                } else {
                    next.ensure_tick(ctx, ids, &mut actions);
                }
            }
            JobEvent::Disabled | JobEvent::Paused => {
                next.clear_tick();
                if idle {
                    next.settle_idle(ctx, ids, &mut actions);
                }
            }
            JobEvent::ScheduleChanged => {
                next.clear_tick();
                if idle {
                    next.settle_idle(ctx, ids, &mut actions);
                } else {
                    next.ensure_tick(ctx, ids, &mut actions);
                }
            }
            JobEvent::Tick { tick_nonce } => {
                if self.tick_nonce == 0 || *tick_nonce != self.tick_nonce {
                    return (next, actions);
                }
                next.prev_tick_time = next.tick_time;
                next.clear_tick();
                next.ensure_tick(ctx, ids, &mut actions);
                if ctx.enabled && !ctx.paused {
                    if idle {
                        next.start(ctx, ids, String::new(), &mut actions);
                    } else {
                        next.overrun(ctx, &mut actions);
                    }
                }
            }
            JobEvent::ManualTrigger { triggered_by } => {
                if !ctx.enabled {
                    return (next, actions);
                }
                if idle {
                    next.start(ctx, ids, triggered_by.clone(), &mut actions);
                } else {
                    next.overrun(ctx, &mut actions);
                }
            }
            JobEvent::InvocationCreated {
                invocation_id,
                retry_count,
            } => {
                if matches!(next.kind, JobStateKind::Queued | JobStateKind::SlowQueue) {
                    next.invocation_id = *invocation_id;
                    next.invocation_retry_count = *retry_count;
                    if *retry_count > 0 {
                        next.kind = JobStateKind::SlowQueue;
                    }
                }
            }
            JobEvent::InvocationLaunched { invocation_id } => {
                if self.invocation_id == *invocation_id
                    && matches!(next.kind, JobStateKind::Queued | JobStateKind::SlowQueue)
                {
                    next.kind = JobStateKind::Running;
                }
            }
            JobEvent::InvocationFinished { invocation_id } => {
                if !idle && self.invocation_id == *invocation_id {
                    next.settle_idle(ctx, ids, &mut actions);
                }
            }
        }

        (next, actions)
    }

    fn settle_idle(&mut self, ctx: &JobContext<'_>, ids: &impl IdGen, actions: &mut Vec<JobAction>) {
        self.invocation_nonce = 0;
        self.invocation_id = 0;
        self.invocation_retry_count = 0;
        self.queued_at = None;
        if ctx.paused {
            self.kind = JobStateKind::Suspended;
            self.clear_tick();
        } else if !ctx.enabled {
            self.kind = JobStateKind::Disabled;
            self.clear_tick();
        } else {
            self.kind = JobStateKind::Scheduled;
            self.ensure_tick(ctx, ids, actions);
        }
    }

    fn ensure_tick(&mut self, ctx: &JobContext<'_>, ids: &impl IdGen, actions: &mut Vec<JobAction>) {
        if self.tick_nonce != 0 || !ctx.enabled || ctx.paused {
            return;
        }
        if let Some(when) = ctx.schedule.next_tick(ctx.now) {
            let tick_nonce = ids.next_nonce();
            self.tick_nonce = tick_nonce;
            self.tick_time = Some(when);
            actions.push(JobAction::TickLater { when, tick_nonce });
        }
    }

    fn clear_tick(&mut self) {
        self.tick_nonce = 0;
        self.tick_time = None;
    }

    fn start(
        &mut self,
        ctx: &JobContext<'_>,
        ids: &impl IdGen,
        triggered_by: String,
        actions: &mut Vec<JobAction>,
    ) {
        let invocation_nonce = ids.next_nonce();
        self.kind = JobStateKind::Queued;
        self.invocation_nonce = invocation_nonce;
        self.invocation_id = 0;
        self.invocation_retry_count = 0;
        self.queued_at = Some(ctx.now);
        actions.push(JobAction::StartInvocation {
            invocation_nonce,
            triggered_by,
        });
    }

    fn overrun(&mut self, ctx: &JobContext<'_>, actions: &mut Vec<JobAction>) {
        self.overruns += 1;
        match self.kind {
            JobStateKind::Running => self.kind = JobStateKind::Overrun,
            JobStateKind::Queued => {
                let waited = self
                    .queued_at
                    .and_then(|t| (ctx.now - t).to_std().ok())
                    .unwrap_or_default();
                if waited >= ctx.slow_queue_threshold {
                    self.kind = JobStateKind::SlowQueue;
                }
            }
            _ => {}
        }
        actions.push(JobAction::RecordOverrun {
            running_invocation_id: self.invocation_id,
        });
    }
}

#[cfg(test)]
#[path = "job_state_tests.rs"]
mod tests;
