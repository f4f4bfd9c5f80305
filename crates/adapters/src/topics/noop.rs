// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provisioner for deployments without a messaging backend

use async_trait::async_trait;
use tw_core::{TaskError, TopicProvisioner};

/// Accepts every topic without creating anything. Push messages are
/// expected to arrive through the daemon's `push` request instead.
#[derive(Debug, Clone, Default)]
pub struct NoOpTopicProvisioner;

impl NoOpTopicProvisioner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TopicProvisioner for NoOpTopicProvisioner {
    async fn ensure_topic(&self, _topic: &str, _publisher: &str) -> Result<(), TaskError> {
        Ok(())
    }
}
