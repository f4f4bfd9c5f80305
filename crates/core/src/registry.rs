// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of task managers, keyed by task kind.
//!
//! Built once at startup and read-only afterwards; share it behind an `Arc`.

use crate::task::{Manager, TaskDef, TaskError, Traits};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("task manager {0:?} registered twice")]
    Duplicate(String),
    #[error("task manager name must not be empty")]
    EmptyName,
}

#[derive(Default)]
pub struct ManagerRegistryBuilder {
    managers: BTreeMap<String, Arc<dyn Manager>>,
}

impl ManagerRegistryBuilder {
    pub fn register<M: Manager>(self, manager: M) -> Result<Self, RegistryError> {
        self.register_arc(Arc::new(manager))
    }

    pub fn register_arc(mut self, manager: Arc<dyn Manager>) -> Result<Self, RegistryError> {
        let name = manager.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.managers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.managers.insert(name, manager);
        Ok(self)
    }

    pub fn build(self) -> ManagerRegistry {
        ManagerRegistry {
            managers: self.managers,
        }
    }
}

pub struct ManagerRegistry {
    managers: BTreeMap<String, Arc<dyn Manager>>,
}

impl ManagerRegistry {
    pub fn builder() -> ManagerRegistryBuilder {
        ManagerRegistryBuilder::default()
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Manager>> {
        self.managers.get(kind).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    pub fn traits(&self, kind: &str) -> Option<Traits> {
        self.managers.get(kind).map(|m| m.traits())
    }

    /// Validate a definition with the manager its kind selects
    pub fn validate(&self, task: &TaskDef) -> Result<(), TaskError> {
        match self.managers.get(&task.kind) {
            Some(manager) => manager.validate(task),
            None => Err(TaskError::fatal(format!(
                "unknown task kind {:?}",
                task.kind
            ))),
        }
    }
}

impl std::fmt::Debug for ManagerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.managers.keys()).finish()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
