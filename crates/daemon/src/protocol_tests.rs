// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol unit tests

use super::*;
use yare::parameterized;

fn job_id() -> JobId {
    JobId::new("web", "deploy").unwrap()
}

#[test]
fn encode_decode_roundtrip_request() {
    let request = Request::ListInvocations {
        job_id: job_id(),
        limit: 20,
        cursor: Some("c1f".to_string()),
    };

    let encoded = encode(&request).expect("encode failed");
    let decoded: Request = decode(&encoded).expect("decode failed");

    assert_eq!(request, decoded);
}

#[test]
fn encode_decode_roundtrip_response() {
    let response = Response::Status {
        uptime_secs: 3600,
        stats: EngineStats {
            projects: 2,
            jobs: 5,
            active_invocations: 1,
            queued_actions: 3,
        },
    };

    let encoded = encode(&response).expect("encode failed");
    let decoded: Response = decode(&encoded).expect("decode failed");

    assert_eq!(response, decoded);
}

#[test]
fn encode_returns_json_without_length_prefix() {
    let response = Response::Ok;
    let encoded = encode(&response).expect("encode failed");

    // encode() returns raw JSON, no length prefix
    let json_str = std::str::from_utf8(&encoded).expect("should be valid UTF-8");
    assert!(
        json_str.starts_with('{'),
        "should be JSON object: {}",
        json_str
    );
}

#[parameterized(
    ping = { r#"{"type":"Ping"}"#, Request::Ping },
    all_jobs = { r#"{"type":"GetJobs"}"#, Request::GetJobs { project: None } },
    first_page = {
        r#"{"type":"ListInvocations","job_id":"web/deploy"}"#,
        Request::ListInvocations { job_id: JobId::new("web", "deploy").unwrap(), limit: 0, cursor: None }
    },
    trigger = {
        r#"{"type":"TriggerInvocation","job_id":"web/deploy","who":"alice"}"#,
        Request::TriggerInvocation { job_id: JobId::new("web", "deploy").unwrap(), who: "alice".into() }
    },
)]
fn decodes_wire_requests(json: &str, expected: Request) {
    let decoded: Request = decode(json.as_bytes()).unwrap();
    assert_eq!(decoded, expected);
}

#[test]
fn malformed_job_id_is_rejected() {
    let json = r#"{"type":"GetJob","job_id":"no-slash"}"#;
    assert!(matches!(
        decode::<Request>(json.as_bytes()),
        Err(ProtocolError::Json(_))
    ));
}

#[test]
fn error_defaults_to_permanent() {
    let decoded: Response = decode(br#"{"type":"Error","message":"nope"}"#).unwrap();
    assert_eq!(
        decoded,
        Response::Error {
            message: "nope".into(),
            transient: false,
        }
    );
}

#[test]
fn job_view_serialization() {
    let def = tw_core::JobDefinition {
        job_id: job_id(),
        schedule: "triggered".into(),
        task: tw_core::TaskDef::bare("noop"),
    };
    let view = JobView {
        job: Job::new(def),
        state: PublicState::Disabled,
    };

    let response = Response::Jobs {
        jobs: vec![view.clone()],
    };

    let encoded = encode(&response).expect("encode failed");
    let decoded: Response = decode(&encoded).expect("decode failed");

    match decoded {
        Response::Jobs { jobs } => {
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0], view);
        }
        _ => panic!("Expected Jobs response"),
    }
}

#[tokio::test]
async fn read_write_message_roundtrip() {
    let original = b"hello world";

    let mut buffer = Vec::new();
    write_message(&mut buffer, original)
        .await
        .expect("write failed");

    // write_message adds 4-byte length prefix
    assert_eq!(buffer.len(), 4 + original.len());

    let mut cursor = std::io::Cursor::new(buffer);
    let read_back = read_message(&mut cursor).await.expect("read failed");

    assert_eq!(read_back, original);
}

#[tokio::test]
async fn write_message_adds_length_prefix() {
    let data = b"test data";

    let mut buffer = Vec::new();
    write_message(&mut buffer, data)
        .await
        .expect("write failed");

    // First 4 bytes are the length prefix
    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;

    // Length should match the data size
    assert_eq!(len, data.len());
    assert_eq!(&buffer[4..], data);
}

#[tokio::test]
async fn empty_stream_is_connection_closed() {
    let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
    assert!(matches!(
        read_message(&mut cursor).await,
        Err(ProtocolError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn oversized_frame_is_rejected_before_reading_body() {
    let len = (MAX_MESSAGE_SIZE as u32) + 1;
    let mut cursor = std::io::Cursor::new(len.to_be_bytes().to_vec());
    assert!(matches!(
        read_message(&mut cursor).await,
        Err(ProtocolError::MessageTooLarge(n)) if n == MAX_MESSAGE_SIZE + 1
    ));
}

#[tokio::test]
async fn request_survives_framing() {
    let request = Request::PubSubPush {
        body: r#"{"message":{"data":"","messageId":"1"}}"#.into(),
    };
    let mut buffer = Vec::new();
    write_message(&mut buffer, &encode(&request).unwrap())
        .await
        .unwrap();

    let mut cursor = std::io::Cursor::new(buffer);
    let read_back = read_request(&mut cursor, DEFAULT_TIMEOUT).await.unwrap();
    assert_eq!(read_back, request);
}

#[tokio::test]
async fn silent_peer_times_out() {
    let (mut client, _server) = tokio::io::duplex(64);
    let result = read_request(&mut client, std::time::Duration::from_millis(20)).await;
    assert!(matches!(result, Err(ProtocolError::Timeout)));
}
