// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task managers shipped with the scheduler

mod noop;
mod url_fetch;

pub use noop::{NoopManager, NoopTask};
pub use url_fetch::{UrlFetchManager, UrlFetchTask};

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{CallKind, FakeController, FakeManager, FakeStep, ManagerCall, QueuedTimer};
