// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::task::TaskDef;

fn job_id() -> JobId {
    JobId::new("proj", "job").unwrap()
}

#[test]
fn record_operations_report_their_group() {
    let op = Operation::TimerDelete {
        job_id: job_id(),
        timer_id: "t".to_string(),
    };
    assert_eq!(op.group(), Some(&job_id()));

    let op = Operation::ActionComplete {
        id: "a".to_string(),
    };
    assert_eq!(op.group(), None);
}

#[test]
fn reschedule_without_attempts_defaults_to_zero() {
    let op: Operation = serde_json::from_str(
        r#"{"ActionReschedule":{"id":"a-1","not_before":"2026-01-01T00:00:00Z"}}"#,
    )
    .unwrap();
    assert!(matches!(op, Operation::ActionReschedule { attempts: 0, .. }));
}

#[test]
fn job_put_serializes_externally_tagged() {
    let job = Job::new(crate::job::JobDefinition {
        job_id: job_id(),
        schedule: "triggered".to_string(),
        task: TaskDef::bare("noop"),
    });
    let json = serde_json::to_value(Operation::JobPut { job }).unwrap();
    assert_eq!(json["JobPut"]["job"]["job_id"], "proj/job");
}
