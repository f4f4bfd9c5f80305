// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration file (`tickwork.toml`) and the static catalog it defines.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tw_core::{Catalog, CatalogError, JobDefinition, JobId, ManagerRegistry, Schedule};
use tw_engine::{DispatcherConfig, EngineConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("job {0} is defined twice")]
    DuplicateJob(JobId),

    #[error("job {job_id}: {reason}")]
    InvalidJob { job_id: JobId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// How often the catalog is re-applied to the engine
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Contents of `tickwork.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub engine: EngineConfig,
    pub dispatcher: DispatcherConfig,
    pub catalog: CatalogConfig,
    #[serde(rename = "job")]
    pub jobs: Vec<JobDefinition>,
}

impl DaemonConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read the config at `path`. A missing file yields the defaults and no jobs.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, starting without jobs");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// A catalog whose job list is fixed at load time
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    projects: BTreeMap<String, Vec<JobDefinition>>,
}

impl StaticCatalog {
    /// Group `jobs` by project, rejecting duplicates, bad schedules and
    /// tasks the registry cannot run
    pub fn new(jobs: &[JobDefinition], registry: &ManagerRegistry) -> Result<Self, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut projects: BTreeMap<String, Vec<JobDefinition>> = BTreeMap::new();
        for def in jobs {
            if !seen.insert(def.job_id.clone()) {
                return Err(ConfigError::DuplicateJob(def.job_id.clone()));
            }
            let invalid = |reason: String| ConfigError::InvalidJob {
                job_id: def.job_id.clone(),
                reason,
            };
            Schedule::parse(&def.schedule).map_err(|e| invalid(e.to_string()))?;
            registry
                .validate(&def.task)
                .map_err(|e| invalid(e.to_string()))?;
            projects
                .entry(def.job_id.project().to_string())
                .or_default()
                .push(def.clone());
        }
        Ok(Self { projects })
    }

    pub fn job_count(&self) -> usize {
        self.projects.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn get_all_projects(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.projects.keys().cloned().collect())
    }

    async fn get_project_jobs(&self, project: &str) -> Result<Vec<JobDefinition>, CatalogError> {
        self.projects
            .get(project)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownProject(project.to_string()))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
