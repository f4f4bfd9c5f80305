// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{info, warn};
use tw_adapters::{
    NoOpTopicProvisioner, NoopManager, TracedManager, TracedTopicProvisioner, UrlFetchManager,
};
use tw_core::{ManagerRegistry, RegistryError, SystemClock, UuidIdGen};
use tw_engine::{Dispatcher, Engine};
use tw_storage::{Store, StoreError};

use crate::config::{ConfigError, DaemonConfig, StaticCatalog};
use crate::server::DaemonContext;

/// Engine with the production clock and id source
pub type DaemonEngine = Engine<SystemClock, UuidIdGen>;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding every file below except possibly the socket
    pub state_dir: PathBuf,
    /// Path to Unix socket
    pub socket_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to version file
    pub version_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Path to the write-ahead log
    pub wal_path: PathBuf,
    /// Path to `tickwork.toml`
    pub config_path: PathBuf,
}

impl Config {
    /// Resolve paths from the process environment and the first CLI argument
    pub fn load() -> Result<Self, LifecycleError> {
        let arg = std::env::args_os().nth(1).map(PathBuf::from);
        Self::resolve(|key| std::env::var(key).ok(), arg)
    }

    /// Resolve paths from `env` lookups; `config_arg` wins over `TICKWORK_CONFIG`
    pub fn resolve(
        env: impl Fn(&str) -> Option<String>,
        config_arg: Option<PathBuf>,
    ) -> Result<Self, LifecycleError> {
        let set = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let state_dir = match set("TICKWORK_STATE_DIR") {
            Some(dir) => dir,
            None => match set("XDG_STATE_HOME") {
                Some(xdg) => xdg.join("tickwork"),
                None => set("HOME")
                    .ok_or(LifecycleError::NoStateDir)?
                    .join(".local/state/tickwork"),
            },
        };

        Ok(Self {
            socket_path: set("TICKWORK_SOCKET").unwrap_or_else(|| state_dir.join("daemon.sock")),
            lock_path: state_dir.join("daemon.pid"),
            version_path: state_dir.join("daemon.version"),
            log_path: state_dir.join("daemon.log"),
            wal_path: state_dir.join("wal").join("state.wal"),
            config_path: config_arg
                .or_else(|| set("TICKWORK_CONFIG"))
                .unwrap_or_else(|| state_dir.join("tickwork.toml")),
            state_dir,
        })
    }
}

/// Daemon state during operation
pub struct DaemonState {
    /// Configuration
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// Unix socket listener
    pub listener: UnixListener,
    /// Shared with every connection task
    pub context: Arc<DaemonContext<SystemClock, UuidIdGen>>,
    pub dispatcher: Dispatcher<SystemClock, UuidIdGen>,
    pub refresh_interval: Duration,
}

impl DaemonState {
    /// Shutdown the daemon gracefully
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("Shutting down daemon...");

        self.context.request_shutdown();

        for path in [
            &self.config.socket_path,
            &self.config.lock_path,
            &self.config.version_path,
        ] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove daemon file");
                }
            }
        }

        // Lock file is released automatically when self.lock_file is dropped

        info!("Daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(PathBuf, std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Managers available to jobs, each wrapped with tracing
pub fn build_registry() -> Result<ManagerRegistry, RegistryError> {
    Ok(ManagerRegistry::builder()
        .register(TracedManager::new(NoopManager))?
        .register(TracedManager::new(UrlFetchManager))?
        .build())
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    match startup_inner(config).await {
        Ok(state) => Ok(state),
        // The files belong to the daemon that holds the lock
        Err(e @ LifecycleError::LockFailed(_)) => Err(e),
        Err(e) => {
            // Clean up any resources created before failure
            cleanup_on_failure(config);
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &Config) -> Result<DaemonState, LifecycleError> {
    // 1. Create state directory (needed for socket, lock, etc.)
    std::fs::create_dir_all(&config.state_dir)?;
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // 2. Acquire lock file FIRST - prevents races
    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write PID to lock file
    use std::io::Write;
    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // Write version file
    std::fs::write(&config.version_path, env!("CARGO_PKG_VERSION"))?;

    // 3. Load config and validate jobs BEFORE binding socket
    let daemon_config = DaemonConfig::load(&config.config_path)?;
    let registry = build_registry()?;
    let catalog = StaticCatalog::new(&daemon_config.jobs, &registry)?;

    // 4. Replay the WAL, then rewrite it without dead records
    let store = Store::open(&config.wal_path)?;
    store.compact()?;

    let engine = Arc::new(DaemonEngine::new(
        Arc::new(store),
        Arc::new(registry),
        Arc::new(TracedTopicProvisioner::new(NoOpTopicProvisioner::new())),
        SystemClock,
        UuidIdGen,
        daemon_config.engine,
    ));
    let stats = engine.stats();
    info!(
        jobs = stats.jobs,
        active_invocations = stats.active_invocations,
        queued_actions = stats.queued_actions,
        catalog_jobs = catalog.job_count(),
        "state loaded"
    );

    let dispatcher = Dispatcher::new(Arc::clone(&engine), daemon_config.dispatcher);
    let context = Arc::new(DaemonContext::new(engine, Arc::new(catalog)));

    // 5. Remove stale socket and bind (LAST - only after all validation passes)
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;

    info!(state_dir = %config.state_dir.display(), "Daemon started");

    Ok(DaemonState {
        config: config.clone(),
        lock_file,
        listener,
        context,
        dispatcher,
        refresh_interval: daemon_config.catalog.refresh_interval,
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    // Remove socket if we created it
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }

    // Remove version file
    if config.version_path.exists() {
        let _ = std::fs::remove_file(&config.version_path);
    }

    // Remove PID/lock file
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
