//! WebSocket transport against a live server

use assert_matches::assert_matches;
use polyglot_common::{
    ClientMessage, LanguageRef, ReplInput, ReplTarget, ServerEvent, SocketRunRequest,
};
use polyglot_sandbox::SessionState;
use polyglot_tests::{encode, wait_until, TestServer};
use std::time::Duration;

fn start_repl(language: &str) -> ClientMessage {
    ClientMessage::StartRepl(ReplTarget {
        language_id: language.to_string(),
    })
}

fn stop_repl(language: &str) -> ClientMessage {
    ClientMessage::StopRepl(ReplTarget {
        language_id: language.to_string(),
    })
}

fn repl_in(text: &str) -> ClientMessage {
    ClientMessage::ReplIn(ReplInput::Text(text.to_string()))
}

#[tokio::test]
async fn test_run_streams_stdout_events() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send(&ClientMessage::Run(SocketRunRequest {
            language: LanguageRef {
                id: "text".to_string(),
            },
            filename: "hello.txt".to_string(),
            content: encode("hi over ws\n"),
        }))
        .await;

    assert_eq!(client.collect_text("hi over ws\n").await, "hi over ws\n");

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_run_stderr_is_tagged() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send_raw(&format!(
            r#"{{"event":"run","data":{{"language":{{"id":"shell"}},"filename":"e.sh","content":"{}"}}}}"#,
            encode("echo bad >&2\n")
        ))
        .await;

    assert_eq!(
        client.next_event().await,
        ServerEvent::StderrStream("bad\n".to_string())
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_multibyte_output_across_read_boundary() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    // Pads stdout so "é" straddles the first pipe read
    client
        .send(&ClientMessage::Run(SocketRunRequest {
            language: LanguageRef {
                id: "shell".to_string(),
            },
            filename: "accent.sh".to_string(),
            content: encode("printf '%8191s' ''\nprintf '\\303\\251\\n'\n"),
        }))
        .await;

    let expected = format!("{}é\n", " ".repeat(8191));
    let text = client.collect_text(&expected).await;
    assert!(!text.contains('\u{FFFD}'));
    assert_eq!(text, expected);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_repl_lifecycle() {
    let server = TestServer::start().await;
    let service = &server.state.service;
    let mut client = server.connect().await;

    client.send(&start_repl("text")).await;
    client.send(&repl_in("ping\n")).await;
    assert_eq!(
        client.next_event().await,
        ServerEvent::ReplOut("ping\n".to_string())
    );
    assert_eq!(
        service.sessions().state("text").await,
        SessionState::Running
    );

    client.send(&stop_repl("text")).await;
    assert!(
        wait_until(Duration::from_secs(2), || async move {
            service.sessions().state("text").await == SessionState::Absent
        })
        .await
    );

    // Input after stop is reported, not delivered
    client.send(&repl_in("lost\n")).await;
    assert_matches!(
        client.next_event().await,
        ServerEvent::Error(payload) if payload.kind == "session_not_running"
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_targeted_repl_input() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send(&start_repl("upper")).await;
    client.send(&start_repl("text")).await;

    // Untargeted input goes to the most recently started session
    client.send(&repl_in("last\n")).await;
    assert_eq!(
        client.next_event().await,
        ServerEvent::ReplOut("last\n".to_string())
    );

    client
        .send(&ClientMessage::ReplIn(ReplInput::Targeted {
            language_id: "upper".to_string(),
            data: "shout\n".to_string(),
        }))
        .await;
    assert_eq!(
        client.next_event().await,
        ServerEvent::ReplOut("SHOUT\n".to_string())
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_repl_for_language_without_shell() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send(&start_repl("shell")).await;
    assert_matches!(
        client.next_event().await,
        ServerEvent::Error(payload) if payload.kind == "unsupported_operation"
    );
    assert!(server.state.service.sessions().active_sessions().await.is_empty());

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_stop_absent_session_is_silent() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send(&stop_repl("text")).await;
    assert!(client
        .next_event_within(Duration::from_millis(300))
        .await
        .is_none());

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_message_reports_error() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_raw(r#"{"event":"explode","data":{}}"#).await;
    assert_matches!(
        client.next_event().await,
        ServerEvent::Error(payload) if payload.kind == "invalid_message"
    );

    client
        .send_raw(r#"{"event":"run","data":{"language":{"id":"nope"},"filename":"a","content":""}}"#)
        .await;
    assert_matches!(
        client.next_event().await,
        ServerEvent::Error(payload) if payload.kind == "unknown_language"
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_stops_owned_sessions() {
    let server = TestServer::start().await;
    let service = &server.state.service;
    let mut client = server.connect().await;

    client.send(&start_repl("text")).await;
    client.send(&repl_in("up\n")).await;
    assert_eq!(
        client.next_event().await,
        ServerEvent::ReplOut("up\n".to_string())
    );

    client.close().await;
    assert!(
        wait_until(Duration::from_secs(2), || async move {
            service.sessions().state("text").await == SessionState::Absent
        })
        .await
    );

    server.stop().await;
}
