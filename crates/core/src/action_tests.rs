// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn job() -> JobId {
    JobId::new("proj", "job").unwrap()
}

#[test]
fn encoded_payload_is_versioned_and_tagged() {
    let action = Action::LaunchInvocation {
        job_id: job(),
        invocation_id: 4,
        invocation_nonce: 99,
    };
    let payload = action.encode().unwrap();
    let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(value["v"], 1);
    assert_eq!(value["action"]["kind"], "launch_invocation");
    assert_eq!(value["action"]["job_id"], "proj/job");
    assert_eq!(Action::decode(payload.as_bytes()).unwrap(), action);
}

#[test]
fn decode_ignores_fields_added_later() {
    let payload = br#"{"v":1,"trace":"abc","action":{"kind":"fire_timer","job_id":"proj/job","invocation_id":2,"timer_id":"t-1","priority":5}}"#;
    let action = Action::decode(payload).unwrap();
    assert_eq!(
        action,
        Action::FireTimer {
            job_id: job(),
            invocation_id: 2,
            timer_id: "t-1".to_string(),
        }
    );
}

#[test]
fn decode_accepts_unversioned_envelope() {
    let payload = br#"{"action":{"kind":"tick_job","job_id":"proj/job","tick_nonce":5}}"#;
    let action = Action::decode(payload).unwrap();
    assert_eq!(action.kind(), "tick_job");
    assert_eq!(action.invocation_id(), None);
}

#[test]
fn decode_rejects_newer_version() {
    let payload = br#"{"v":7,"action":{"kind":"tick_job","job_id":"proj/job","tick_nonce":5}}"#;
    assert!(matches!(
        Action::decode(payload),
        Err(ActionDecodeError::UnsupportedVersion(7))
    ));
}

#[test]
fn decode_rejects_unknown_kind_and_garbage() {
    assert!(Action::decode(br#"{"v":1,"action":{"kind":"explode"}}"#).is_err());
    assert!(Action::decode(b"not json").is_err());
}

#[test]
fn deliver_notification_carries_message() {
    let mut message = PubSubMessage {
        message_id: "m1".to_string(),
        ..Default::default()
    };
    message
        .attributes
        .insert("auth_token".to_string(), "tok".to_string());
    let action = Action::DeliverNotification {
        job_id: job(),
        invocation_id: 9,
        message,
    };
    let decoded = Action::decode(action.encode().unwrap().as_bytes()).unwrap();
    assert_eq!(decoded.invocation_id(), Some(9));
    assert_eq!(decoded.job_id(), &job());
    assert_eq!(decoded, action);
}
