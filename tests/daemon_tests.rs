// End-to-end tests of the daemon's serve loop over TCP and the unix socket
#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chunk_orchestrator_lib::config::OrchestratorConfig;
use chunk_orchestrator_lib::daemon::{daemon_status, serve, DaemonContext, DaemonPaths};
use chunk_orchestrator_lib::{WorkUnitPhase, WorkUnitStatus};
use common::{wait_for, MockAgent, TestProject};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

async fn request<S>(mut stream: S, method: &str, path: &str, body: Option<&str>) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let body = body.unwrap_or("");
    let raw = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        method,
        path,
        body.len(),
        body
    );
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serve_answers_on_both_listeners() {
    let project = TestProject::new();
    let paths = DaemonPaths::new(&project.path);
    let cancel = CancellationToken::new();

    let config = OrchestratorConfig {
        dispatch_interval_secs: 1,
        conflict_checks: false,
        ..OrchestratorConfig::default()
    };
    let ctx = DaemonContext::with_reader(
        &project.path,
        config,
        project.reader.clone(),
        Arc::new(MockAgent::completing()),
        cancel.clone(),
    )
    .unwrap();
    let server = tokio::spawn(serve(ctx));

    assert!(wait_for(WAIT, || paths.port.exists() && paths.socket.exists()).await);
    let port: u16 = std::fs::read_to_string(&paths.port)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let response = request(tcp, "GET", "/health", None).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains(r#""status":"ok""#));

    let unix = UnixStream::connect(&paths.socket).await.unwrap();
    let response = request(
        unix,
        "POST",
        "/work-units",
        Some(r#"{"chunk":"via_socket","priority":3}"#),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 201"), "{}", response);

    // The dispatch loop picks the unit up and moves it past GOAL
    assert!(
        wait_for(WAIT, || {
            project
                .store
                .get("via_socket")
                .unwrap()
                .map(|u| u.phase != WorkUnitPhase::Goal)
                .unwrap_or(false)
        })
        .await
    );

    cancel.cancel();
    tokio::time::timeout(WAIT, server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let status = daemon_status(&project.path).unwrap();
    assert!(!status.running);
    assert_eq!(status.counts.values().sum::<i64>(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serve_recovers_interrupted_units() {
    let project = TestProject::new();
    let mut unit = chunk_orchestrator_lib::WorkUnit::new("orphan");
    project.store.create(&unit).unwrap();
    unit.status = WorkUnitStatus::Running;
    project.store.update(&unit).unwrap();

    let cancel = CancellationToken::new();
    let agent = Arc::new(MockAgent::completing().holding());
    let ctx = DaemonContext::with_reader(
        &project.path,
        OrchestratorConfig {
            conflict_checks: false,
            stop_timeout_secs: 1,
            ..OrchestratorConfig::default()
        },
        project.reader.clone(),
        agent.clone(),
        cancel.clone(),
    )
    .unwrap();
    let server = tokio::spawn(serve(ctx));

    // Recovered to READY, then dispatched again by the first tick
    assert!(wait_for(WAIT, || agent.count("phase:orphan:GOAL") == 1).await);
    let history: Vec<_> = project
        .store
        .get_status_history("orphan")
        .unwrap()
        .into_iter()
        .map(|e| e.new_status)
        .collect();
    assert_eq!(
        history,
        vec![
            WorkUnitStatus::Running,
            WorkUnitStatus::Ready,
            WorkUnitStatus::Running
        ]
    );

    cancel.cancel();
    tokio::time::timeout(WAIT, server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
