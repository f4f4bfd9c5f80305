// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client for CLI commands

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UnixStream;
use tracing::debug;
use tw_core::{Invocation, JobId};
use tw_daemon::lifecycle::Config;
use tw_daemon::protocol::{self, EngineStats, InvocationPage, ProtocolError};
use tw_daemon::{JobView, Request, Response};

// Timeout configuration (env vars in milliseconds)
fn parse_duration_ms(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Timeout for IPC requests
pub fn timeout_ipc() -> Duration {
    parse_duration_ms("TW_TIMEOUT_IPC_MS").unwrap_or(Duration::from_secs(5))
}

/// How long `trigger --wait` waits for the launch to finish
pub fn timeout_wait() -> Duration {
    parse_duration_ms("TW_TIMEOUT_WAIT_MS").unwrap_or(Duration::from_secs(30))
}

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon not running")]
    DaemonNotRunning,

    #[error("Daemon failed to start: {0}")]
    DaemonStartFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{message}")]
    Rejected { message: String, transient: bool },

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine state directory")]
    NoStateDir,
}

impl ClientError {
    fn rejected(message: String, transient: bool) -> Self {
        ClientError::Rejected { message, transient }
    }
}

/// Outcome of `trigger --wait`
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    Finished(Invocation),
    StillRunning,
}

/// Daemon client
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    /// Connect to the daemon at the socket named by the environment
    pub fn connect() -> Result<Self, ClientError> {
        let config = Config::resolve(|key| std::env::var(key).ok(), None)
            .map_err(|_| ClientError::NoStateDir)?;
        match Self::at(config.socket_path) {
            Err(ClientError::DaemonNotRunning) => match read_startup_error(&config.log_path) {
                Some(err) => Err(ClientError::DaemonStartFailed(err)),
                None => Err(ClientError::DaemonNotRunning),
            },
            other => other,
        }
    }

    /// Connect to the daemon listening on `socket_path`
    pub fn at(socket_path: PathBuf) -> Result<Self, ClientError> {
        if !socket_path.exists() {
            return Err(ClientError::DaemonNotRunning);
        }
        Ok(Self { socket_path })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and receive a response with specific timeouts
    async fn send_with_timeout(
        &self,
        request: Request,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Response, ClientError> {
        let stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(ClientError::DaemonNotRunning)
            }
            Err(e) => return Err(e.into()),
        };
        let (mut reader, mut writer) = stream.into_split();
        debug!(socket = %self.socket_path.display(), ?request, "sending request");

        // Encode and send request with write timeout
        let data = protocol::encode(&request)?;
        tokio::time::timeout(write_timeout, protocol::write_message(&mut writer, &data))
            .await
            .map_err(|_| ProtocolError::Timeout)??;

        // Read response with read timeout
        let response_bytes =
            tokio::time::timeout(read_timeout, protocol::read_message(&mut reader))
                .await
                .map_err(|_| ProtocolError::Timeout)??;

        let response: Response = protocol::decode(&response_bytes)?;
        debug!(bytes = response_bytes.len(), "received response");
        Ok(response)
    }

    /// Send a request and receive a response
    pub async fn send(&self, request: Request) -> Result<Response, ClientError> {
        self.send_with_timeout(request, timeout_ipc(), timeout_ipc())
            .await
    }

    /// Get daemon status: uptime and engine counters
    pub async fn status(&self) -> Result<(u64, EngineStats), ClientError> {
        match self.send(Request::Status).await? {
            Response::Status { uptime_secs, stats } => Ok((uptime_secs, stats)),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Request daemon shutdown
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        match self.send(Request::Shutdown).await? {
            Response::Ok | Response::ShuttingDown => Ok(()),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn list_jobs(&self, project: Option<String>) -> Result<Vec<JobView>, ClientError> {
        match self.send(Request::GetJobs { project }).await? {
            Response::Jobs { jobs } => Ok(jobs),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<JobView, ClientError> {
        let request = Request::GetJob {
            job_id: job_id.clone(),
        };
        self.expect_job(request).await
    }

    pub async fn list_invocations(
        &self,
        job_id: &JobId,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<InvocationPage, ClientError> {
        let request = Request::ListInvocations {
            job_id: job_id.clone(),
            limit,
            cursor,
        };
        match self.send(request).await? {
            Response::Invocations { page } => Ok(page),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn get_invocation(&self, job_id: &JobId, id: i64) -> Result<Invocation, ClientError> {
        let request = Request::GetInvocation {
            job_id: job_id.clone(),
            invocation_id: id,
        };
        match self.send(request).await? {
            Response::Invocation { invocation } => Ok(*invocation),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn pause_job(&self, job_id: &JobId, who: &str) -> Result<JobView, ClientError> {
        let request = Request::PauseJob {
            job_id: job_id.clone(),
            who: who.to_string(),
        };
        self.expect_job(request).await
    }

    pub async fn resume_job(&self, job_id: &JobId, who: &str) -> Result<JobView, ClientError> {
        let request = Request::ResumeJob {
            job_id: job_id.clone(),
            who: who.to_string(),
        };
        self.expect_job(request).await
    }

    async fn expect_job(&self, request: Request) -> Result<JobView, ClientError> {
        match self.send(request).await? {
            Response::Job { job } => Ok(*job),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn abort_job(&self, job_id: &JobId, who: &str) -> Result<Vec<Invocation>, ClientError> {
        let request = Request::AbortJob {
            job_id: job_id.clone(),
            who: who.to_string(),
        };
        self.expect_aborted(request).await
    }

    pub async fn abort_invocation(
        &self,
        job_id: &JobId,
        id: i64,
        who: &str,
    ) -> Result<Vec<Invocation>, ClientError> {
        let request = Request::AbortInvocation {
            job_id: job_id.clone(),
            invocation_id: id,
            who: who.to_string(),
        };
        self.expect_aborted(request).await
    }

    async fn expect_aborted(&self, request: Request) -> Result<Vec<Invocation>, ClientError> {
        match self.send(request).await? {
            Response::Aborted { invocations } => Ok(invocations),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Start an invocation now; returns the launch nonce
    pub async fn trigger(&self, job_id: &JobId, who: &str) -> Result<i64, ClientError> {
        let request = Request::TriggerInvocation {
            job_id: job_id.clone(),
            who: who.to_string(),
        };
        match self.send(request).await? {
            Response::Triggered { nonce } => Ok(nonce),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Wait for the launch `nonce` to finish, giving the daemon `timeout`
    pub async fn wait(&self, nonce: i64, timeout: Duration) -> Result<WaitOutcome, ClientError> {
        let request = Request::WaitInvocation {
            nonce,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        // the daemon answers once the wait is over
        let read_timeout = timeout + timeout_ipc();
        match self
            .send_with_timeout(request, read_timeout, timeout_ipc())
            .await?
        {
            Response::Finished {
                invocation: Some(invocation),
            } => Ok(WaitOutcome::Finished(*invocation)),
            Response::Finished { invocation: None } => Ok(WaitOutcome::StillRunning),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Forward a push delivery body to the daemon
    pub async fn push(&self, body: String) -> Result<(), ClientError> {
        match self.send(Request::PubSubPush { body }).await? {
            Response::Ok => Ok(()),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn refresh(&self) -> Result<(), ClientError> {
        match self.send(Request::RefreshCatalog).await? {
            Response::Ok => Ok(()),
            Response::Error { message, transient } => Err(ClientError::rejected(message, transient)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Startup marker prefix that daemon writes to log before anything else.
/// Full format: "--- twd: starting (pid: 12345) ---"
const STARTUP_MARKER_PREFIX: &str = "--- twd: starting (pid: ";

const STARTUP_ERROR_PREFIX: &str = "Failed to start daemon: ";

/// Read daemon log from the last startup marker, looking for errors.
/// Returns the error message if found, None otherwise.
pub fn read_startup_error(log_path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(log_path).ok()?;

    // Find the last startup marker
    let start_pos = content.rfind(STARTUP_MARKER_PREFIX)?;
    let startup_log = &content[start_pos..];

    // The same failure is written once directly and once through tracing
    let mut errors: Vec<String> = startup_log
        .lines()
        .filter_map(|line| line.split_once(STARTUP_ERROR_PREFIX))
        .map(|(_, msg)| msg.trim().to_string())
        .collect();
    errors.dedup();

    if errors.is_empty() {
        None
    } else {
        Some(errors.join("\n"))
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
