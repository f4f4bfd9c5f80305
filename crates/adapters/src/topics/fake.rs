// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake topic provisioner for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tw_core::{TaskError, TopicProvisioner};

/// Recorded provisioning call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCall {
    pub topic: String,
    pub publisher: String,
}

#[derive(Default)]
struct FakeTopicState {
    calls: Vec<TopicCall>,
    topics: BTreeSet<String>,
    fail_next: Option<TaskError>,
}

/// Fake provisioner that remembers which topics exist
#[derive(Clone, Default)]
pub struct FakeTopicProvisioner {
    inner: Arc<Mutex<FakeTopicState>>,
}

impl FakeTopicProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<TopicCall> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    /// Topics created so far
    pub fn topics(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .topics
            .iter()
            .cloned()
            .collect()
    }

    /// Make the next call fail with `err`
    pub fn fail_next(&self, err: TaskError) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).fail_next = Some(err);
    }
}

#[async_trait]
impl TopicProvisioner for FakeTopicProvisioner {
    async fn ensure_topic(&self, topic: &str, publisher: &str) -> Result<(), TaskError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.calls.push(TopicCall {
            topic: topic.to_string(),
            publisher: publisher.to_string(),
        });
        if let Some(err) = inner.fail_next.take() {
            return Err(err);
        }
        inner.topics.insert(topic.to_string());
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
