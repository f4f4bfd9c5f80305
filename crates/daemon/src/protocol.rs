// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC protocol between `tw` and `twd`.
//!
//! One request and one response per connection. Each message is JSON
//! preceded by a 4-byte big-endian length.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tw_core::{Invocation, Job, JobId, PublicState};
pub use tw_engine::{EngineStats, InvocationPage};

/// Bumped on incompatible changes to [`Request`] or [`Response`]
pub const PROTOCOL_VERSION: &str = "1";

/// Read/write deadline for one message on the daemon side
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest accepted message body
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message of {0} bytes exceeds the size limit")]
    MessageTooLarge(usize),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,

    Hello {
        version: String,
    },

    Status,

    Shutdown,

    /// Jobs of one project, or of every project when `project` is absent
    GetJobs {
        #[serde(default)]
        project: Option<String>,
    },

    GetJob {
        job_id: JobId,
    },

    ListInvocations {
        job_id: JobId,
        /// 0 asks for the largest page
        #[serde(default)]
        limit: usize,
        #[serde(default)]
        cursor: Option<String>,
    },

    GetInvocation {
        job_id: JobId,
        invocation_id: i64,
    },

    GetInvocationsByNonce {
        nonce: i64,
    },

    /// Block until the launch with `nonce` finishes or `timeout_ms` elapses
    WaitInvocation {
        nonce: i64,
        timeout_ms: u64,
    },

    PauseJob {
        job_id: JobId,
        who: String,
    },

    ResumeJob {
        job_id: JobId,
        who: String,
    },

    AbortJob {
        job_id: JobId,
        who: String,
    },

    AbortInvocation {
        job_id: JobId,
        invocation_id: i64,
        who: String,
    },

    TriggerInvocation {
        job_id: JobId,
        who: String,
    },

    /// A push subscription delivery, the JSON body as received
    PubSubPush {
        body: String,
    },

    RefreshCatalog,
}

/// A job with its user-facing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job: Job,
    pub state: PublicState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Pong,

    Hello {
        version: String,
    },

    Ok,

    ShuttingDown,

    Status {
        uptime_secs: u64,
        stats: EngineStats,
    },

    Jobs {
        jobs: Vec<JobView>,
    },

    Job {
        job: Box<JobView>,
    },

    Invocations {
        page: InvocationPage,
    },

    Invocation {
        invocation: Box<Invocation>,
    },

    /// Attempts of one launch, oldest first
    Attempts {
        invocations: Vec<Invocation>,
    },

    /// `invocation` is absent when the wait timed out
    Finished {
        invocation: Option<Box<Invocation>>,
    },

    Triggered {
        nonce: i64,
    },

    Aborted {
        invocations: Vec<Invocation>,
    },

    Error {
        message: String,
        /// Retrying the same request may succeed
        #[serde(default)]
        transient: bool,
    },
}

/// Serialize a message to JSON (no length prefix)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Write one length-prefixed frame
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(data.len()));
    }
    let len = u32::try_from(data.len()).map_err(|_| ProtocolError::MessageTooLarge(data.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(len));
    }
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

pub async fn read_request<R: AsyncRead + Unpin>(
    reader: &mut R,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    let data = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&data)
}

pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let data = encode(response)?;
    tokio::time::timeout(timeout, write_message(writer, &data))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
