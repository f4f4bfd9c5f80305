// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action dispatcher: delivers queued actions to the engine.
//!
//! Delivery is at-least-once. An action leaves the queue only after the
//! engine accepted it, gave up on it, or rejected it as fatal. Transient
//! failures are rescheduled with backoff up to `max_attempts`.

use crate::config::DispatcherConfig;
use crate::engine::Engine;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tw_core::clock::add_duration;
use tw_core::{Clock, IdGen, QueuedAction};

pub struct Dispatcher<C: Clock, I: IdGen> {
    engine: Arc<Engine<C, I>>,
    config: DispatcherConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<C: Clock, I: IdGen> Clone for Dispatcher<C, I> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            config: self.config.clone(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<C: Clock, I: IdGen> Dispatcher<C, I> {
    pub fn new(engine: Arc<Engine<C, I>>, config: DispatcherConfig) -> Self {
        Self {
            engine,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn in_flight(&self) -> HashSet<String> {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Deliver actions until `shutdown` flips to true, then wait for the
    /// deliveries already started.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let signal = self.engine.queue_signal();
        let concurrency = self.config.concurrency.max(1);
        let mut running: JoinSet<()> = JoinSet::new();
        info!(concurrency, "dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let free = concurrency.saturating_sub(running.len());
            if free > 0 {
                let skip = self.in_flight();
                let due = self.engine.store().due_actions(self.engine.now(), free, &skip);
                for action in due {
                    self.in_flight
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(action.id.clone());
                    let this = self.clone();
                    running.spawn(async move {
                        let id = action.id.clone();
                        this.execute_one(action).await;
                        this.in_flight
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .remove(&id);
                    });
                }
            }

            // a full pool wakes on join_next instead of the queue
            let wait = if running.len() < concurrency {
                self.next_wait()
            } else {
                self.config.idle_poll
            };
            tokio::select! {
                _ = signal.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "action task panicked");
                    }
                }
                _ = shutdown.changed() => {}
            }
        }

        info!(pending = running.len(), "dispatcher draining");
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "action task panicked");
            }
        }
        info!("dispatcher stopped");
    }

    /// Time until the next queued action is due, capped at the idle poll
    fn next_wait(&self) -> Duration {
        let idle = self.config.idle_poll;
        match self.engine.store().next_action_time(&self.in_flight()) {
            Some(at) => (at - self.engine.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(idle),
            None => idle,
        }
    }

    /// Deliver every due action one at a time until none are due.
    ///
    /// Returns the number of deliveries made.
    pub async fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        loop {
            let skip = self.in_flight();
            let due = self.engine.store().due_actions(self.engine.now(), 1, &skip);
            let Some(action) = due.into_iter().next() else {
                return delivered;
            };
            self.execute_one(action).await;
            delivered += 1;
        }
    }

    async fn execute_one(&self, action: QueuedAction) {
        let attempt = action.attempts + 1;
        let result = self
            .engine
            .execute_serialized_action(action.payload.as_bytes(), attempt)
            .await;

        let store = self.engine.store();
        let settled = match result {
            Ok(()) => store.complete_action(&action.id),
            Err(e) if e.is_transient() => {
                if attempt >= self.config.max_attempts {
                    warn!(action_id = %action.id, attempt, error = %e, "action exhausted its attempts");
                    if let Err(abandon) = self.engine.abandon_action(action.payload.as_bytes(), &e.to_string()) {
                        error!(action_id = %action.id, error = %abandon, "failed to abandon action");
                    }
                    store.complete_action(&action.id)
                } else {
                    let delay = self.config.backoff.delay(attempt);
                    debug!(action_id = %action.id, attempt, ?delay, error = %e, "action will be retried");
                    store.reschedule_action(
                        &action.id,
                        add_duration(self.engine.now(), delay),
                        attempt,
                    )
                }
            }
            Err(e) => {
                error!(action_id = %action.id, attempt, error = %e, "action failed permanently");
                store.complete_action(&action.id)
            }
        };
        if let Err(e) = settled {
            error!(action_id = %action.id, error = %e, "failed to settle action");
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
