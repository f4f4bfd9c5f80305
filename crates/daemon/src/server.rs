// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket server and connection handling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tw_core::{Catalog, Clock, IdGen};
use tw_engine::{Engine, EngineError};

use crate::protocol::{
    self, JobView, Request, Response, DEFAULT_TIMEOUT, PROTOCOL_VERSION,
};

/// Longest a single `WaitInvocation` request may block
pub const MAX_WAIT: Duration = Duration::from_secs(600);

/// State shared by every connection
pub struct DaemonContext<C: Clock, I: IdGen> {
    pub engine: Arc<Engine<C, I>>,
    catalog: Arc<dyn Catalog>,
    start_time: Instant,
    shutdown: watch::Sender<bool>,
}

impl<C: Clock, I: IdGen> DaemonContext<C, I> {
    pub fn new(engine: Arc<Engine<C, I>>, catalog: Arc<dyn Catalog>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            engine,
            catalog,
            start_time: Instant::now(),
            shutdown,
        }
    }

    /// Flips to true once shutdown has been requested
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Re-apply the catalog to the engine
    pub async fn refresh_catalog(&self) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.engine.refresh_projects(self.catalog.as_ref()).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => debug!(elapsed_ms, "catalog refreshed"),
            Err(e) => warn!(elapsed_ms, error = %e, "catalog refresh failed"),
        }
        result
    }
}

/// Handle a single client connection
pub async fn handle_connection<C: Clock, I: IdGen>(
    ctx: Arc<DaemonContext<C, I>>,
    stream: UnixStream,
) -> Result<(), ServerError> {
    // Split stream for reading/writing
    let (mut reader, mut writer) = stream.into_split();

    // Read request with timeout
    let request = match protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await {
        Ok(req) => req,
        Err(protocol::ProtocolError::Timeout) => {
            error!("Request read timeout");
            return Err(ServerError::Timeout);
        }
        Err(protocol::ProtocolError::ConnectionClosed) => {
            debug!("Client disconnected before sending request");
            return Ok(());
        }
        Err(e) => {
            error!("Failed to read request: {}", e);
            return Err(ServerError::Protocol(e));
        }
    };

    debug!("Received request: {:?}", request);

    let response = handle_request(&ctx, request).await;

    debug!("Sending response: {:?}", response);

    protocol::write_response(&mut writer, &response, DEFAULT_TIMEOUT)
        .await
        .map_err(ServerError::Protocol)?;

    Ok(())
}

fn engine_error(e: EngineError) -> Response {
    Response::Error {
        message: e.to_string(),
        transient: e.is_transient(),
    }
}

fn job_view<C: Clock, I: IdGen>(ctx: &DaemonContext<C, I>, job: tw_core::Job) -> JobView {
    let state = ctx.engine.public_state(&job);
    JobView { job, state }
}

/// Handle a single request and return a response
async fn handle_request<C: Clock, I: IdGen>(ctx: &DaemonContext<C, I>, request: Request) -> Response {
    let engine = &ctx.engine;
    match request {
        Request::Ping => Response::Pong,

        Request::Hello { version: _ } => Response::Hello {
            version: PROTOCOL_VERSION.to_string(),
        },

        Request::Status => Response::Status {
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            stats: engine.stats(),
        },

        Request::Shutdown => {
            info!("shutdown requested over IPC");
            ctx.request_shutdown();
            Response::ShuttingDown
        }

        Request::GetJobs { project } => {
            let jobs = match project {
                Some(project) => engine.get_project_jobs(&project),
                None => engine.get_all_jobs(),
            };
            Response::Jobs {
                jobs: jobs.into_iter().map(|job| job_view(ctx, job)).collect(),
            }
        }

        Request::GetJob { job_id } => match engine.get_job(&job_id) {
            Ok(job) => Response::Job {
                job: Box::new(job_view(ctx, job)),
            },
            Err(e) => engine_error(e),
        },

        Request::ListInvocations {
            job_id,
            limit,
            cursor,
        } => match engine.list_invocations(&job_id, limit, cursor.as_deref()) {
            Ok(page) => Response::Invocations { page },
            Err(e) => engine_error(e),
        },

        Request::GetInvocation {
            job_id,
            invocation_id,
        } => match engine.get_invocation(&job_id, invocation_id) {
            Ok(invocation) => Response::Invocation {
                invocation: Box::new(invocation),
            },
            Err(e) => engine_error(e),
        },

        Request::GetInvocationsByNonce { nonce } => Response::Attempts {
            invocations: engine.get_invocations_by_nonce(nonce),
        },

        Request::WaitInvocation { nonce, timeout_ms } => {
            let timeout = Duration::from_millis(timeout_ms).min(MAX_WAIT);
            let invocation = engine.wait_for_invocation(nonce, timeout).await;
            Response::Finished {
                invocation: invocation.map(Box::new),
            }
        }

        Request::PauseJob { job_id, who } => match engine.pause_job(&job_id, &who) {
            Ok(job) => Response::Job {
                job: Box::new(job_view(ctx, job)),
            },
            Err(e) => engine_error(e),
        },

        Request::ResumeJob { job_id, who } => match engine.resume_job(&job_id, &who) {
            Ok(job) => Response::Job {
                job: Box::new(job_view(ctx, job)),
            },
            Err(e) => engine_error(e),
        },

        Request::AbortJob { job_id, who } => match engine.abort_job(&job_id, &who).await {
            Ok(invocations) => Response::Aborted { invocations },
            Err(e) => engine_error(e),
        },

        Request::AbortInvocation {
            job_id,
            invocation_id,
            who,
        } => match engine.abort_invocation(&job_id, invocation_id, &who).await {
            Ok(invocation) => Response::Aborted {
                invocations: vec![invocation],
            },
            Err(e) => engine_error(e),
        },

        Request::TriggerInvocation { job_id, who } => {
            match engine.trigger_invocation(&job_id, &who) {
                Ok(nonce) => Response::Triggered { nonce },
                Err(e) => engine_error(e),
            }
        }

        Request::PubSubPush { body } => match engine.process_pubsub_push(body.as_bytes()) {
            Ok(()) => Response::Ok,
            Err(e) => engine_error(e),
        },

        Request::RefreshCatalog => match ctx.refresh_catalog().await {
            Ok(()) => Response::Ok,
            Err(e) => engine_error(e),
        },
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Request timeout")]
    Timeout,
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
