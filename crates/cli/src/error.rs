// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-friendly error display with context and suggestions.

use std::fmt;

use crate::client::ClientError;

/// Error with context and recovery suggestions for user-friendly display.
#[derive(Debug)]
pub struct TwError {
    /// What went wrong
    pub message: String,
    /// Why it might have happened
    pub context: Vec<String>,
    /// How to fix it
    pub suggestions: Vec<String>,
}

impl TwError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Add context about why this error might have happened.
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    /// Add a suggestion for how to fix this error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn daemon_not_running() -> Self {
        TwError::new("Daemon is not running")
            .with_context("No socket found at TICKWORK_SOCKET or in the state directory")
            .with_suggestion("Start it with: twd [path/to/tickwork.toml]")
            .with_suggestion("Point TICKWORK_STATE_DIR or TICKWORK_SOCKET at a running daemon")
    }

    pub fn daemon_start_failed(reason: &str) -> Self {
        TwError::new("Daemon failed to start")
            .with_context(reason.to_string())
            .with_suggestion("Fix the error above and start twd again")
            .with_suggestion("See the full log in <state_dir>/daemon.log")
    }

    pub fn daemon_unresponsive() -> Self {
        TwError::new("Daemon did not answer in time")
            .with_context("The daemon may be overloaded or stuck")
            .with_suggestion("Raise the deadline with TW_TIMEOUT_IPC_MS")
            .with_suggestion("Check the daemon log in <state_dir>/daemon.log")
    }

    /// The daemon refused the request
    pub fn rejected(message: &str, transient: bool) -> Self {
        let err = TwError::new(message.to_string());
        if transient {
            err.with_context("The failure is transient")
                .with_suggestion("Retry the command")
        } else {
            err
        }
    }
}

impl From<ClientError> for TwError {
    fn from(err: ClientError) -> Self {
        use tw_daemon::protocol::ProtocolError;

        match err {
            ClientError::DaemonNotRunning => TwError::daemon_not_running(),
            ClientError::DaemonStartFailed(reason) => TwError::daemon_start_failed(&reason),
            ClientError::Protocol(ProtocolError::Timeout) => TwError::daemon_unresponsive(),
            ClientError::Rejected { message, transient } => TwError::rejected(&message, transient),
            other => TwError::new(other.to_string()),
        }
    }
}

impl fmt::Display for TwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.message)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            for ctx in &self.context {
                writeln!(f, "  -> {}", ctx)?;
            }
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            writeln!(f, "suggestions:")?;
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for TwError {}
