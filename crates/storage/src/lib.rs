// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Durable storage for Tickwork: a checksummed write-ahead log, the state
//! materialized from it, and entity-group transactions on top.

mod state;
mod store;
mod wal;

pub use state::MaterializedState;
pub use store::{Store, StoreError, Txn};
pub use wal::{Wal, WalError};
