// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Catalog: read-only source of job definitions

use crate::job::JobDefinition;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("unknown project: {0}")]
    UnknownProject(String),
}

/// Supplies job definitions per project. The engine never mutates it.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_all_projects(&self) -> Result<Vec<String>, CatalogError>;

    async fn get_project_jobs(&self, project: &str) -> Result<Vec<JobDefinition>, CatalogError>;
}
