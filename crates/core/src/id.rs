// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ID and nonce generation abstractions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generates unique identifiers and trigger nonces
pub trait IdGen: Clone + Send + Sync + 'static {
    /// Opaque string id (queued actions, timers, routing tokens)
    fn next(&self) -> String;

    /// Positive, non-zero nonce identifying a tick or a logical launch
    fn next_nonce(&self) -> i64;
}

/// UUID-based ID generator for production use
#[derive(Clone, Default)]
pub struct UuidIdGen;

impl IdGen for UuidIdGen {
    fn next(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn next_nonce(&self) -> i64 {
        loop {
            let bits = (uuid::Uuid::new_v4().as_u128() >> 65) as i64;
            if bits != 0 {
                return bits;
            }
        }
    }
}

/// Sequential ID generator for testing
#[derive(Clone)]
pub struct SequentialIdGen {
    prefix: String,
    counter: Arc<AtomicU64>,
    nonces: Arc<AtomicU64>,
}

impl SequentialIdGen {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Arc::new(AtomicU64::new(1)),
            nonces: Arc::new(AtomicU64::new(1000)),
        }
    }
}

impl Default for SequentialIdGen {
    fn default() -> Self {
        Self::new("id")
    }
}

impl IdGen for SequentialIdGen {
    fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, n)
    }

    fn next_nonce(&self) -> i64 {
        self.nonces.fetch_add(1, Ordering::SeqCst) as i64
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
