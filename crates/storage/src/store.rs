// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional store over the WAL and materialized state.
//!
//! Every mutation of a job's records runs in [`Store::transact`], scoped to
//! that job's entity group. Transactions are serialized; a closure sees the
//! committed state, buffers writes in a [`Txn`], and its writes become one
//! WAL entry that is applied only after it is durable.

use crate::state::MaterializedState;
use crate::wal::{Wal, WalError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::info;
use tw_core::{
    Invocation, Job, JobId, NotificationBinding, Operation, PendingTimer, QueuedAction,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("transaction on {group} cannot write records of {target}")]
    CrossGroup { group: JobId, target: JobId },
    #[error("no queued action {0}")]
    UnknownAction(String),
}

struct Inner {
    wal: Option<Wal>,
    state: MaterializedState,
}

impl Inner {
    fn commit(&mut self, ops: Vec<Operation>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        if let Some(wal) = self.wal.as_mut() {
            wal.append(&ops)?;
        }
        for op in &ops {
            self.state.apply(op);
        }
        Ok(())
    }
}

pub struct Store {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open a durable store, replaying the WAL at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(WalError::from)?;
        }
        let mut state = MaterializedState::default();
        for op in Wal::replay(path)? {
            state.apply(&op);
        }
        let wal = Wal::open(path)?;
        info!(
            path = %path.display(),
            jobs = state.jobs.len(),
            queued_actions = state.actions.len(),
            "store opened"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                wal: Some(wal),
                state,
            }),
            path: Some(path.to_path_buf()),
        })
    }

    /// A store without durability, for tests and dry runs
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                wal: None,
                state: MaterializedState::default(),
            }),
            path: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` as one transaction in the entity group of `group`.
    ///
    /// Writes are committed only if `f` returns `Ok`.
    pub fn transact<T, E>(
        &self,
        group: &JobId,
        f: impl FnOnce(&mut Txn<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut inner = self.lock();
        let mut txn = Txn {
            group,
            state: &inner.state,
            ops: Vec::new(),
        };
        let out = f(&mut txn)?;
        let ops = txn.ops;
        inner.commit(ops)?;
        Ok(out)
    }

    /// Read a consistent view of the committed state
    pub fn read<T>(&self, f: impl FnOnce(&MaterializedState) -> T) -> T {
        f(&self.lock().state)
    }

    /// Enqueue an action outside of any job transaction
    pub fn enqueue(&self, action: QueuedAction) -> Result<(), StoreError> {
        self.lock().commit(vec![Operation::ActionEnqueue { action }])
    }

    /// Remove a delivered action. Unknown ids are ignored.
    pub fn complete_action(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.state.actions.contains_key(id) {
            return Ok(());
        }
        inner.commit(vec![Operation::ActionComplete { id: id.to_string() }])
    }

    pub fn reschedule_action(
        &self,
        id: &str,
        not_before: DateTime<Utc>,
        attempts: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.state.actions.contains_key(id) {
            return Err(StoreError::UnknownAction(id.to_string()));
        }
        inner.commit(vec![Operation::ActionReschedule {
            id: id.to_string(),
            not_before,
            attempts,
        }])
    }

    pub fn due_actions(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        skip: &HashSet<String>,
    ) -> Vec<QueuedAction> {
        self.lock().state.due_actions(now, limit, skip)
    }

    pub fn next_action_time(&self, skip: &HashSet<String>) -> Option<DateTime<Utc>> {
        self.lock().state.next_action_time(skip)
    }

    /// Rewrite the WAL so it holds only the live records
    pub fn compact(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut inner = self.lock();
        let ops = inner.state.snapshot_ops();
        let wal = Wal::rewrite(path, &ops)?;
        inner.wal = Some(wal);
        info!(path = %path.display(), records = ops.len(), "WAL compacted");
        Ok(())
    }
}

/// Buffered writes of one transaction plus read access to committed state
pub struct Txn<'a> {
    group: &'a JobId,
    state: &'a MaterializedState,
    ops: Vec<Operation>,
}

impl<'a> Txn<'a> {
    pub fn group(&self) -> &JobId {
        self.group
    }

    /// Committed state as of the start of the transaction
    pub fn state(&self) -> &'a MaterializedState {
        self.state
    }

    pub fn job(&self) -> Option<&'a Job> {
        self.state.job(self.group)
    }

    pub fn invocation(&self, id: i64) -> Option<&'a Invocation> {
        self.state.invocation(self.group, id)
    }

    fn check(&self, target: &JobId) -> Result<(), StoreError> {
        if target != self.group {
            return Err(StoreError::CrossGroup {
                group: self.group.clone(),
                target: target.clone(),
            });
        }
        Ok(())
    }

    pub fn put_job(&mut self, job: Job) -> Result<(), StoreError> {
        self.check(&job.job_id)?;
        self.ops.push(Operation::JobPut { job });
        Ok(())
    }

    pub fn put_invocation(&mut self, invocation: Invocation) -> Result<(), StoreError> {
        self.check(&invocation.job_id)?;
        self.ops.push(Operation::InvocationPut { invocation });
        Ok(())
    }

    pub fn put_timer(&mut self, timer: PendingTimer) -> Result<(), StoreError> {
        self.check(&timer.job_id)?;
        self.ops.push(Operation::TimerPut { timer });
        Ok(())
    }

    pub fn delete_timer(&mut self, timer_id: &str) {
        self.ops.push(Operation::TimerDelete {
            job_id: self.group.clone(),
            timer_id: timer_id.to_string(),
        });
    }

    pub fn put_binding(&mut self, binding: NotificationBinding) -> Result<(), StoreError> {
        self.check(&binding.job_id)?;
        self.ops.push(Operation::BindingPut { binding });
        Ok(())
    }

    pub fn delete_binding(&mut self, token: &str) -> Result<(), StoreError> {
        if let Some(binding) = self.state.binding(token) {
            self.check(&binding.job_id)?;
        }
        self.ops.push(Operation::BindingDelete {
            token: token.to_string(),
        });
        Ok(())
    }

    pub fn enqueue(&mut self, action: QueuedAction) {
        self.ops.push(Operation::ActionEnqueue { action });
    }

    /// Whether the transaction has buffered any writes
    pub fn is_dirty(&self) -> bool {
        !self.ops.is_empty()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
