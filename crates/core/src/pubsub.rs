// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-notification types and the topic provisioning collaborator

use crate::task::TaskError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message attribute carrying the routing token
pub const AUTH_TOKEN_ATTR: &str = "auth_token";

/// An inbound push message, as delivered by the publisher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Payload, base64 as delivered
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub publish_time: Option<String>,
}

impl PubSubMessage {
    pub fn auth_token(&self) -> Option<&str> {
        self.attributes
            .get(AUTH_TOKEN_ATTR)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }
}

/// Raw push body: `{"message": {...}, "subscription": "..."}`
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: String,
}

/// Destination handed to a manager by `Controller::prepare_topic`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBinding {
    /// Full topic name the external publisher should publish to
    pub topic: String,
    /// Token the publisher must echo back in the `auth_token` attribute
    pub token: String,
}

/// Provisions push topics on the messaging backend
#[async_trait]
pub trait TopicProvisioner: Send + Sync + 'static {
    /// Create the topic if missing and allow `publisher` to publish to it
    async fn ensure_topic(&self, topic: &str, publisher: &str) -> Result<(), TaskError>;
}

/// Topic name shared by all invocations of one manager for one publisher
pub fn topic_name(project: &str, prefix: &str, manager: &str, publisher: &str) -> String {
    let publisher: String = publisher
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("projects/{}/topics/{}+{}+{}", project, prefix, manager, publisher)
}

#[cfg(test)]
#[path = "pubsub_tests.rs"]
mod tests;
