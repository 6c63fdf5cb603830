//! Full-system scenarios: several clients, runs and sessions at once

use assert_matches::assert_matches;
use polyglot_common::{ClientMessage, ReplInput, ReplTarget, ServerEvent};
use polyglot_sandbox::testing::{ProviderCall, ScriptedProvider};
use polyglot_sandbox::{NamedRun, SessionState};
use polyglot_tests::{setup_test_logging, test_languages, wait_until, TestServer};
use std::sync::Arc;
use std::time::Duration;

fn start_repl(language: &str) -> ClientMessage {
    ClientMessage::StartRepl(ReplTarget {
        language_id: language.to_string(),
    })
}

fn repl_in(text: &str) -> ClientMessage {
    ClientMessage::ReplIn(ReplInput::Text(text.to_string()))
}

#[tokio::test]
async fn test_second_client_replaces_session() {
    setup_test_logging();
    let server = TestServer::start().await;
    let sessions = server.state.service.sessions();

    let mut first = server.connect().await;
    first.send(&start_repl("text")).await;
    first.send(&repl_in("one\n")).await;
    assert_eq!(
        first.next_event().await,
        ServerEvent::ReplOut("one\n".to_string())
    );

    let mut second = server.connect().await;
    second.send(&start_repl("text")).await;
    second.send(&repl_in("two\n")).await;
    assert_eq!(
        second.next_event().await,
        ServerEvent::ReplOut("two\n".to_string())
    );

    // The first client lost its session and hears nothing further
    assert!(first
        .next_event_within(Duration::from_millis(300))
        .await
        .is_none());
    let active = sessions.active_sessions().await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].language_id, "text");

    // Closing the first connection leaves the second client's session alone
    first.close().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sessions.state("text").await, SessionState::Running);

    second.send(&repl_in("still here\n")).await;
    assert_eq!(
        second.next_event().await,
        ServerEvent::ReplOut("still here\n".to_string())
    );

    second.close().await;
    assert!(
        wait_until(Duration::from_secs(2), || async move {
            sessions.state("text").await == SessionState::Absent
        })
        .await
    );

    server.stop().await;
}

#[tokio::test]
async fn test_superseded_client_cannot_drive_new_session() {
    let server = TestServer::start().await;
    let sessions = server.state.service.sessions();

    let mut first = server.connect().await;
    first.send(&start_repl("upper")).await;
    assert!(
        wait_until(Duration::from_secs(2), || async move {
            sessions.state("upper").await == SessionState::Running
        })
        .await
    );
    let mut second = server.connect().await;
    second.send(&start_repl("upper")).await;
    second.send(&repl_in("ready\n")).await;
    assert_eq!(
        second.next_event().await,
        ServerEvent::ReplOut("READY\n".to_string())
    );

    first.send(&repl_in("injected\n")).await;
    assert_matches!(
        first.next_event().await,
        ServerEvent::Error(payload) if payload.kind == "session_not_running"
    );
    assert!(second
        .next_event_within(Duration::from_millis(300))
        .await
        .is_none());

    first.close().await;
    second.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_close_during_slow_start_is_seen_at_once() {
    let provider = ScriptedProvider::new().with_pull_delay(Duration::from_millis(1500));
    let server = TestServer::start_with(Arc::new(provider.clone()), test_languages()).await;
    let sessions = server.state.service.sessions();
    let mut client = server.connect().await;

    client.send(&start_repl("upper")).await;
    assert!(
        wait_until(Duration::from_secs(1), || async move {
            sessions.state("upper").await == SessionState::Starting
        })
        .await
    );

    client.close().await;
    assert!(
        wait_until(Duration::from_millis(500), || async move {
            sessions.state("upper").await == SessionState::Absent
        })
        .await
    );

    // Once the pull completes the orphaned start is torn down
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(sessions.state("upper").await, SessionState::Absent);
    assert_eq!(provider.live_named("upper_repl"), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_stop_during_slow_start_is_seen_at_once() {
    let provider = ScriptedProvider::new().with_pull_delay(Duration::from_millis(1500));
    let server = TestServer::start_with(Arc::new(provider.clone()), test_languages()).await;
    let sessions = server.state.service.sessions();
    let mut client = server.connect().await;

    client.send(&start_repl("upper")).await;
    assert!(
        wait_until(Duration::from_secs(1), || async move {
            sessions.state("upper").await == SessionState::Starting
        })
        .await
    );

    client
        .send(&ClientMessage::StopRepl(ReplTarget {
            language_id: "upper".to_string(),
        }))
        .await;
    assert!(
        wait_until(Duration::from_millis(500), || async move {
            sessions.state("upper").await == SessionState::Absent
        })
        .await
    );

    // The cancelled start reports itself when the pull finishes
    assert_matches!(
        client.next_event().await,
        ServerEvent::Error(payload) if payload.kind == "session_not_running"
    );
    assert!(provider.wait_for_live_named("upper_repl", 0).await);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_runs_with_distinct_files() {
    let server = TestServer::start().await;

    let (a, b, c) = tokio::join!(
        server.run("text", "a.txt", "alpha\n"),
        server.run("text", "b.txt", "beta\n"),
        server.run("copy", "c.src", "gamma\n"),
    );
    assert_eq!(a, (200, "alpha\n".to_string()));
    assert_eq!(b, (200, "beta\n".to_string()));
    assert_eq!(c, (200, "gamma\n".to_string()));

    server.stop().await;
}

#[tokio::test]
async fn test_sequential_runs_reuse_filename() {
    let server = TestServer::start().await;

    for source in ["first\n", "second\n", "third\n"] {
        let (status, body) = server.run("text", "same.txt", source).await;
        assert_eq!(status, 200);
        assert_eq!(body, source);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_run_and_repl_on_one_connection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send(&start_repl("text")).await;
    client
        .send_raw(&format!(
            r#"{{"event":"run","data":{{"language":{{"id":"text"}},"filename":"r.txt","content":"{}"}}}}"#,
            polyglot_tests::encode("from run\n")
        ))
        .await;
    assert_eq!(
        client.next_event().await,
        ServerEvent::StdoutStream("from run\n".to_string())
    );

    client.send(&repl_in("from repl\n")).await;
    assert_eq!(
        client.next_event().await,
        ServerEvent::ReplOut("from repl\n".to_string())
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_repl_lifecycle_against_container_provider() {
    let provider = ScriptedProvider::new();
    let server = TestServer::start_with(Arc::new(provider.clone()), test_languages()).await;
    let mut client = server.connect().await;

    client.send(&start_repl("upper")).await;
    client.send(&start_repl("upper")).await;
    client.send(&repl_in("hi\n")).await;
    assert_eq!(
        client.next_event().await,
        ServerEvent::ReplOut("hi\n".to_string())
    );
    assert!(provider.wait_for_live_named("upper_repl", 1).await);

    // Every start clears the container name before reusing it
    let calls = provider.calls();
    let removes = calls
        .iter()
        .filter(|c| matches!(c, ProviderCall::RemoveNamed(name) if name == "upper_repl"))
        .count();
    let starts: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            ProviderCall::RunNamed(run) => Some(run.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 2);
    assert!(removes >= 2);
    assert_eq!(
        starts[0],
        NamedRun {
            name: "upper_repl".to_string(),
            image: "local/upper".to_string(),
            command: "while read -r line; do echo \"$line\" | tr a-z A-Z; done".to_string(),
        }
    );

    // Explicit stop works regardless of which connection owns the session
    let sessions = server.state.service.sessions();
    assert_eq!(sessions.active_sessions().await.len(), 1);
    assert!(sessions.stop_repl("upper").await.unwrap());
    assert!(provider.wait_for_live_named("upper_repl", 0).await);

    client.close().await;
    server.stop().await;
}
