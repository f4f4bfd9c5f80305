// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `noop` tasks: optionally sleep, then succeed

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tw_core::{Controller, Manager, Status, TaskDef, TaskError, Traits};

/// Upper bound on the sleep a noop task may request
const MAX_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoopTask {
    #[serde(default, with = "humantime_serde")]
    pub sleep: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct NoopManager;

impl NoopManager {
    pub const NAME: &'static str = "noop";
}

#[async_trait]
impl Manager for NoopManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn traits(&self) -> Traits {
        Traits { multistage: false }
    }

    fn validate(&self, task: &TaskDef) -> Result<(), TaskError> {
        let params: NoopTask = task.decode()?;
        if params.sleep > MAX_SLEEP {
            return Err(TaskError::fatal(format!(
                "noop sleep {:?} exceeds {:?}",
                params.sleep, MAX_SLEEP
            )));
        }
        Ok(())
    }

    async fn launch_task(&self, ctl: &mut dyn Controller) -> Result<(), TaskError> {
        let params: NoopTask = ctl.task().decode()?;
        if !params.sleep.is_zero() {
            ctl.debug_log(&format!("sleeping {:?}", params.sleep));
            tokio::time::sleep(params.sleep).await;
        }
        ctl.debug_log("done");
        ctl.state_mut().status = Status::Succeeded;
        Ok(())
    }
}

#[cfg(test)]
#[path = "noop_tests.rs"]
mod tests;
