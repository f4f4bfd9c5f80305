// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI command implementations

pub mod control;
pub mod daemon;
pub mod invocations;
pub mod jobs;
pub mod push;
