// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tickwork scheduling engine

mod config;
mod controller;
mod dispatcher;
mod engine;
mod error;

pub use config::{Backoff, DispatcherConfig, EngineConfig};
pub use dispatcher::Dispatcher;
pub use engine::{Completion, Engine, EngineStats, InvocationPage};
pub use error::EngineError;
