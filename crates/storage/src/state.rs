// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tw_core::{
    Invocation, Job, JobId, NotificationBinding, Operation, PendingTimer, QueuedAction,
};

/// Materialized state built from WAL operations
#[derive(Debug, Default, Clone)]
pub struct MaterializedState {
    pub jobs: BTreeMap<JobId, Job>,
    pub invocations: HashMap<JobId, BTreeMap<i64, Invocation>>,
    pub timers: HashMap<JobId, BTreeMap<String, PendingTimer>>,
    pub bindings: HashMap<String, NotificationBinding>,
    pub actions: BTreeMap<String, QueuedAction>,
    nonce_index: HashMap<i64, BTreeSet<(JobId, i64)>>,
}

impl MaterializedState {
    /// Apply an operation to update the state
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::JobPut { job } => {
                self.jobs.insert(job.job_id.clone(), job.clone());
            }

            Operation::InvocationPut { invocation } => {
                let per_job = self.invocations.entry(invocation.job_id.clone()).or_default();
                if let Some(old) = per_job.insert(invocation.id, invocation.clone()) {
                    if old.nonce != invocation.nonce {
                        if let Some(set) = self.nonce_index.get_mut(&old.nonce) {
                            set.remove(&(old.job_id.clone(), old.id));
                        }
                    }
                }
                self.nonce_index
                    .entry(invocation.nonce)
                    .or_default()
                    .insert((invocation.job_id.clone(), invocation.id));
            }

            Operation::TimerPut { timer } => {
                self.timers
                    .entry(timer.job_id.clone())
                    .or_default()
                    .insert(timer.id.clone(), timer.clone());
            }

            Operation::TimerDelete { job_id, timer_id } => {
                if let Some(timers) = self.timers.get_mut(job_id) {
                    timers.remove(timer_id);
                    if timers.is_empty() {
                        self.timers.remove(job_id);
                    }
                }
            }

            Operation::BindingPut { binding } => {
                self.bindings.insert(binding.token.clone(), binding.clone());
            }

            Operation::BindingDelete { token } => {
                self.bindings.remove(token);
            }

            Operation::ActionEnqueue { action } => {
                self.actions.insert(action.id.clone(), action.clone());
            }

            Operation::ActionReschedule {
                id,
                not_before,
                attempts,
            } => {
                if let Some(action) = self.actions.get_mut(id) {
                    action.not_before = *not_before;
                    action.attempts = *attempts;
                }
            }

            Operation::ActionComplete { id } => {
                self.actions.remove(id);
            }
        }
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn jobs_in_project<'a>(&'a self, project: &'a str) -> impl Iterator<Item = &'a Job> + 'a {
        self.jobs.values().filter(move |j| j.project_id() == project)
    }

    /// Projects with at least one stored job
    pub fn projects(&self) -> BTreeSet<String> {
        self.jobs
            .keys()
            .map(|id| id.project().to_string())
            .collect()
    }

    pub fn invocation(&self, job_id: &JobId, id: i64) -> Option<&Invocation> {
        self.invocations.get(job_id).and_then(|m| m.get(&id))
    }

    /// Invocations of a job with id below `before`, newest first
    pub fn invocations_desc(
        &self,
        job_id: &JobId,
        before: Option<i64>,
        limit: usize,
    ) -> Vec<&Invocation> {
        let Some(per_job) = self.invocations.get(job_id) else {
            return Vec::new();
        };
        let upper = before.unwrap_or(i64::MAX);
        per_job.range(..upper).rev().map(|(_, inv)| inv).take(limit).collect()
    }

    pub fn invocations_by_nonce(&self, nonce: i64) -> Vec<&Invocation> {
        self.nonce_index
            .get(&nonce)
            .into_iter()
            .flatten()
            .filter_map(|(job_id, id)| self.invocation(job_id, *id))
            .collect()
    }

    /// Non-terminal invocations of a job
    pub fn active_invocations(&self, job_id: &JobId) -> Vec<&Invocation> {
        self.invocations
            .get(job_id)
            .into_iter()
            .flat_map(|m| m.values())
            .filter(|inv| !inv.is_final())
            .collect()
    }

    pub fn timer(&self, job_id: &JobId, timer_id: &str) -> Option<&PendingTimer> {
        self.timers.get(job_id).and_then(|m| m.get(timer_id))
    }

    pub fn timers_for_invocation(&self, job_id: &JobId, invocation_id: i64) -> Vec<&PendingTimer> {
        self.timers
            .get(job_id)
            .into_iter()
            .flat_map(|m| m.values())
            .filter(|t| t.invocation_id == invocation_id)
            .collect()
    }

    pub fn binding(&self, token: &str) -> Option<&NotificationBinding> {
        self.bindings.get(token)
    }

    pub fn bindings_for_invocation(
        &self,
        job_id: &JobId,
        invocation_id: i64,
    ) -> Vec<&NotificationBinding> {
        let mut found: Vec<_> = self
            .bindings
            .values()
            .filter(|b| &b.job_id == job_id && b.invocation_id == invocation_id)
            .collect();
        found.sort_by(|a, b| a.token.cmp(&b.token));
        found
    }

    /// Queued actions due at `now`, oldest first, excluding `skip`
    pub fn due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        skip: &HashSet<String>,
    ) -> Vec<QueuedAction> {
        let mut due: Vec<_> = self
            .actions
            .values()
            .filter(|a| a.not_before <= now && !skip.contains(&a.id))
            .collect();
        due.sort_by(|a, b| a.not_before.cmp(&b.not_before).then_with(|| a.id.cmp(&b.id)));
        due.into_iter().take(limit).cloned().collect()
    }

    /// Earliest `not_before` among queued actions not in `skip`
    pub fn next_action_time(&self, skip: &HashSet<String>) -> Option<DateTime<Utc>> {
        self.actions
            .values()
            .filter(|a| !skip.contains(&a.id))
            .map(|a| a.not_before)
            .min()
    }

    /// Operations that rebuild this state from scratch
    pub fn snapshot_ops(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        for job in self.jobs.values() {
            ops.push(Operation::JobPut { job: job.clone() });
        }
        for per_job in self.invocations.values() {
            for invocation in per_job.values() {
                ops.push(Operation::InvocationPut {
                    invocation: invocation.clone(),
                });
            }
        }
        for per_job in self.timers.values() {
            for timer in per_job.values() {
                ops.push(Operation::TimerPut {
                    timer: timer.clone(),
                });
            }
        }
        for binding in self.bindings.values() {
            ops.push(Operation::BindingPut {
                binding: binding.clone(),
            });
        }
        for action in self.actions.values() {
            ops.push(Operation::ActionEnqueue {
                action: action.clone(),
            });
        }
        ops
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
