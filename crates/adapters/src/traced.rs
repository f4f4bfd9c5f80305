// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability

use async_trait::async_trait;
use std::time::Instant;
use tracing::Instrument;
use tw_core::{
    Controller, Manager, PubSubMessage, TaskDef, TaskError, TopicProvisioner, Traits,
};

/// Wrapper that adds tracing to any Manager
#[derive(Clone)]
pub struct TracedManager<M> {
    inner: M,
}

impl<M> TracedManager<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: Manager> TracedManager<M> {
    /// Precondition: the definition must belong to this manager
    fn check_kind(&self, ctl: &dyn Controller) -> Result<(), TaskError> {
        let kind = &ctl.task().kind;
        if kind != self.inner.name() {
            tracing::error!(kind = %kind, "task routed to the wrong manager");
            return Err(TaskError::fatal(format!(
                "task kind {:?} routed to manager {:?}",
                kind,
                self.inner.name()
            )));
        }
        Ok(())
    }

    fn log_outcome(
        &self,
        what: &str,
        ctl: &dyn Controller,
        started: Instant,
        result: &Result<(), TaskError>,
    ) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => tracing::info!(
                elapsed_ms,
                status = %ctl.state().status,
                "{} returned",
                what
            ),
            Err(e) if e.is_transient() => {
                tracing::warn!(elapsed_ms, error = %e, "{} failed transiently", what)
            }
            Err(e) => tracing::error!(elapsed_ms, error = %e, "{} failed", what),
        }
    }
}

#[async_trait]
impl<M: Manager> Manager for TracedManager<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn traits(&self) -> Traits {
        self.inner.traits()
    }

    fn validate(&self, task: &TaskDef) -> Result<(), TaskError> {
        let result = self.inner.validate(task);
        if let Err(e) = &result {
            tracing::debug!(manager = self.inner.name(), error = %e, "definition rejected");
        }
        result
    }

    async fn launch_task(&self, ctl: &mut dyn Controller) -> Result<(), TaskError> {
        let span = tracing::info_span!(
            "manager.launch",
            manager = self.inner.name(),
            job = %ctl.job_id(),
            invocation = ctl.invocation_id(),
        );
        async {
            self.check_kind(ctl)?;
            tracing::info!(nonce = ctl.invocation_nonce(), "starting");
            let started = Instant::now();
            let result = self.inner.launch_task(ctl).await;
            self.log_outcome("launch", ctl, started, &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn abort_task(&self, ctl: &mut dyn Controller) -> Result<(), TaskError> {
        let span = tracing::info_span!(
            "manager.abort",
            manager = self.inner.name(),
            invocation = ctl.invocation_id(),
        );
        async {
            let result = self.inner.abort_task(ctl).await;
            // abort is best effort; the invocation is aborted regardless
            match &result {
                Ok(()) => tracing::info!("aborted"),
                Err(e) => tracing::warn!(error = %e, "abort failed (may be expected)"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn handle_notification(
        &self,
        ctl: &mut dyn Controller,
        msg: &PubSubMessage,
    ) -> Result<(), TaskError> {
        let span = tracing::info_span!(
            "manager.notification",
            manager = self.inner.name(),
            invocation = ctl.invocation_id(),
            message_id = %msg.message_id,
        );
        async {
            self.check_kind(ctl)?;
            let started = Instant::now();
            let result = self.inner.handle_notification(ctl, msg).await;
            self.log_outcome("notification", ctl, started, &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn handle_timer(
        &self,
        ctl: &mut dyn Controller,
        name: &str,
        payload: &[u8],
    ) -> Result<(), TaskError> {
        let span = tracing::info_span!(
            "manager.timer",
            manager = self.inner.name(),
            invocation = ctl.invocation_id(),
            timer = name,
        );
        async {
            self.check_kind(ctl)?;
            tracing::debug!(payload_len = payload.len(), "firing");
            let started = Instant::now();
            let result = self.inner.handle_timer(ctl, name, payload).await;
            self.log_outcome("timer", ctl, started, &result);
            result
        }
        .instrument(span)
        .await
    }
}

/// Wrapper that adds tracing to any TopicProvisioner
#[derive(Clone)]
pub struct TracedTopicProvisioner<T> {
    inner: T,
}

impl<T> TracedTopicProvisioner<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: TopicProvisioner> TopicProvisioner for TracedTopicProvisioner<T> {
    async fn ensure_topic(&self, topic: &str, publisher: &str) -> Result<(), TaskError> {
        let span = tracing::info_span!("topics.ensure", topic, publisher);
        async {
            let started = Instant::now();
            let result = self.inner.ensure_topic(topic, publisher).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(()) => tracing::info!(elapsed_ms, "topic ready"),
                Err(e) => tracing::error!(elapsed_ms, error = %e, "topic setup failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
