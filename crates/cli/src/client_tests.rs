// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for daemon client behavior.

use super::*;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tw_daemon::protocol::{read_request, write_response};

/// Serve one connection: capture the request and answer with `response`
fn serve_once(response: Response) -> (TempDir, PathBuf, oneshot::Receiver<Request>) {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = stream.into_split();
        let request = read_request(&mut reader, Duration::from_secs(5))
            .await
            .unwrap();
        let _ = tx.send(request);
        write_response(&mut writer, &response, Duration::from_secs(5))
            .await
            .unwrap();
    });

    (dir, socket_path, rx)
}

fn job_id() -> JobId {
    "web/deploy".parse().unwrap()
}

#[test]
fn connect_without_socket_reports_not_running() {
    let dir = tempdir().unwrap();
    let result = DaemonClient::at(dir.path().join("daemon.sock"));
    assert!(matches!(result, Err(ClientError::DaemonNotRunning)));
}

#[tokio::test]
async fn shutdown_round_trip() {
    let (_dir, socket, rx) = serve_once(Response::ShuttingDown);
    let client = DaemonClient::at(socket).unwrap();

    client.shutdown().await.unwrap();
    assert!(matches!(rx.await.unwrap(), Request::Shutdown));
}

#[tokio::test]
async fn trigger_sends_job_and_actor() {
    let (_dir, socket, rx) = serve_once(Response::Triggered { nonce: 42 });
    let client = DaemonClient::at(socket).unwrap();

    let nonce = client.trigger(&job_id(), "alice").await.unwrap();

    assert_eq!(nonce, 42);
    match rx.await.unwrap() {
        Request::TriggerInvocation { job_id, who } => {
            assert_eq!(job_id.to_string(), "web/deploy");
            assert_eq!(who, "alice");
        }
        other => panic!("unexpected request {:?}", other),
    }
}

#[tokio::test]
async fn daemon_error_becomes_rejected() {
    let (_dir, socket, _rx) = serve_once(Response::Error {
        message: "job web/deploy not found".to_string(),
        transient: false,
    });
    let client = DaemonClient::at(socket).unwrap();

    let err = client.get_job(&job_id()).await.unwrap_err();

    match err {
        ClientError::Rejected { message, transient } => {
            assert_eq!(message, "job web/deploy not found");
            assert!(!transient);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn transient_push_failure_is_flagged() {
    let (_dir, socket, rx) = serve_once(Response::Error {
        message: "store unavailable".to_string(),
        transient: true,
    });
    let client = DaemonClient::at(socket).unwrap();

    let err = client.push("{}".to_string()).await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Rejected {
            transient: true,
            ..
        }
    ));
    assert!(matches!(rx.await.unwrap(), Request::PubSubPush { body } if body == "{}"));
}

#[tokio::test]
async fn wrong_variant_is_unexpected() {
    let (_dir, socket, _rx) = serve_once(Response::Pong);
    let client = DaemonClient::at(socket).unwrap();

    let err = client.refresh().await.unwrap_err();
    assert!(matches!(err, ClientError::UnexpectedResponse));
}

#[tokio::test]
async fn wait_without_result_is_still_running() {
    let (_dir, socket, rx) = serve_once(Response::Finished { invocation: None });
    let client = DaemonClient::at(socket).unwrap();

    let outcome = client.wait(7, Duration::from_millis(250)).await.unwrap();

    assert_eq!(outcome, WaitOutcome::StillRunning);
    match rx.await.unwrap() {
        Request::WaitInvocation { nonce, timeout_ms } => {
            assert_eq!(nonce, 7);
            assert_eq!(timeout_ms, 250);
        }
        other => panic!("unexpected request {:?}", other),
    }
}

#[tokio::test]
async fn silent_daemon_times_out() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("daemon.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();
    tokio::spawn(async move {
        // Accept and hold the connection without answering
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });
    let client = DaemonClient::at(socket_path).unwrap();

    let result = client
        .send_with_timeout(
            Request::Ping,
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .await;

    assert!(matches!(
        result,
        Err(ClientError::Protocol(ProtocolError::Timeout))
    ));
}

#[test]
fn startup_error_is_read_from_last_attempt() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("daemon.log");
    std::fs::write(
        &log,
        "--- twd: starting (pid: 10) ---\n\
         ERROR Failed to start daemon: Config error: old failure\n\
         --- twd: starting (pid: 11) ---\n\
         INFO Starting twd\n\
         ERROR Failed to start daemon: Failed to acquire lock: daemon already running?\n\
         2026-10-18T09:00:00Z ERROR twd: Failed to start daemon: Failed to acquire lock: daemon already running?\n",
    )
    .unwrap();

    assert_eq!(
        read_startup_error(&log).as_deref(),
        Some("Failed to acquire lock: daemon already running?")
    );
}

#[test]
fn clean_startup_has_no_error() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("daemon.log");
    std::fs::write(&log, "--- twd: starting (pid: 12) ---\nINFO Daemon started\n").unwrap();

    assert_eq!(read_startup_error(&log), None);
    assert_eq!(read_startup_error(&dir.path().join("missing.log")), None);
}
