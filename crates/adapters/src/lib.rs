// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for external I/O: task managers and topic provisioners

pub mod managers;
pub mod topics;
pub mod traced;

pub use managers::{NoopManager, NoopTask, UrlFetchManager, UrlFetchTask};
pub use topics::NoOpTopicProvisioner;
pub use traced::{TracedManager, TracedTopicProvisioner};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use managers::{CallKind, FakeController, FakeManager, FakeStep, ManagerCall, QueuedTimer};
#[cfg(any(test, feature = "test-support"))]
pub use topics::{FakeTopicProvisioner, TopicCall};
