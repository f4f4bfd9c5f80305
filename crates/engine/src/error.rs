// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine

use thiserror::Error;
use tw_core::{CatalogError, JobId, TaskError};
use tw_storage::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("invocation {id} of {job_id} not found")]
    InvocationNotFound { job_id: JobId, id: i64 },
    #[error("job {0} is disabled")]
    JobDisabled(JobId),
    #[error("job {job_id} is busy with invocation {invocation_id}")]
    JobBusy { job_id: JobId, invocation_id: i64 },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl EngineError {
    /// Retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Store(_) => true,
            EngineError::Catalog(e) => matches!(e, CatalogError::Unavailable(_)),
            EngineError::Task(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::JobNotFound(_) | EngineError::InvocationNotFound { .. }
        )
    }

    /// The form a manager sees when a controller call fails
    pub fn into_task_error(self) -> TaskError {
        match self {
            EngineError::Task(e) => e,
            e if e.is_transient() => TaskError::transient(e.to_string()),
            e => TaskError::fatal(e.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
