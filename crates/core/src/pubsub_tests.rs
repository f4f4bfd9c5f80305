// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn push_envelope_parses_publisher_format() {
    let body = r#"{
        "message": {
            "attributes": {"auth_token": "tok-1", "build": "42"},
            "data": "aGVsbG8=",
            "messageId": "m-7",
            "publishTime": "2026-01-01T00:00:00Z"
        },
        "subscription": "projects/p/subscriptions/s"
    }"#;
    let envelope: PushEnvelope = serde_json::from_str(body).unwrap();
    assert_eq!(envelope.message.message_id, "m-7");
    assert_eq!(envelope.message.auth_token(), Some("tok-1"));
    assert_eq!(envelope.message.data, "aGVsbG8=");
    assert_eq!(envelope.subscription, "projects/p/subscriptions/s");
}

#[test]
fn missing_or_empty_token_is_none() {
    let mut msg = PubSubMessage::default();
    assert_eq!(msg.auth_token(), None);
    msg.attributes
        .insert(AUTH_TOKEN_ATTR.to_string(), String::new());
    assert_eq!(msg.auth_token(), None);
}

#[test]
fn topic_name_sanitizes_publisher() {
    assert_eq!(
        topic_name("cloud", "tickwork", "build", "ci.example.com"),
        "projects/cloud/topics/tickwork+build+ci_example_com"
    );
}
