//! HTTP API against a live server

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use polyglot_common::{CodeSampleResponse, PublicLanguage};
use polyglot_tests::TestServer;
use serde_json::Value;

#[tokio::test]
async fn test_run_streams_stdout() {
    let server = TestServer::start().await;

    let (status, body) = server.run("text", "hello.txt", "hi\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, "hi\n");

    server.stop().await;
}

#[tokio::test]
async fn test_run_with_compile_step() {
    let server = TestServer::start().await;

    let (status, body) = server.run("copy", "Main.src", "compiled output\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, "compiled output\n");
    assert!(server.dir.path().join("runtime").join("Main.out").exists());

    server.stop().await;
}

#[tokio::test]
async fn test_stderr_only_output_is_returned() {
    let server = TestServer::start().await;

    let (status, body) = server.run("shell", "fail.sh", "echo boom >&2\nexit 1\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, "boom\n");

    server.stop().await;
}

#[tokio::test]
async fn test_first_stream_wins_without_interleaving() {
    let server = TestServer::start().await;

    let script = "echo early >&2\nsleep 0.3\necho late\n";
    let (_, body) = server.run("shell", "race.sh", script).await;
    assert_eq!(body, "early\n");

    server.stop().await;
}

#[tokio::test]
async fn test_silent_program_gives_empty_body() {
    let server = TestServer::start().await;

    let (status, body) = server.run("shell", "quiet.sh", "true\n").await;
    assert_eq!(status, 200);
    assert_eq!(body, "");

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_language_is_404() {
    let server = TestServer::start().await;

    let (status, body) = server.run("cobol", "a.cob", "x").await;
    assert_eq!(status, 404);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"]["kind"], "unknown_language");

    server.stop().await;
}

#[tokio::test]
async fn test_escaping_filename_is_rejected() {
    let server = TestServer::start().await;

    let (status, body) = server.run("text", "../escape.txt", "x").await;
    assert_eq!(status, 400);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["error"]["kind"], "invalid_filename");
    assert!(!server.dir.path().join("escape.txt").exists());

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_base64_is_rejected() {
    let server = TestServer::start().await;

    let response = reqwest::Client::new()
        .post(server.url("/run/text"))
        .json(&serde_json::json!({ "filename": "a.txt", "content": "not base64!!" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "invalid_source");

    server.stop().await;
}

#[tokio::test]
async fn test_languages_in_configuration_order() {
    let server = TestServer::start().await;

    let languages: Vec<PublicLanguage> = reqwest::get(server.url("/languages"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = languages.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["text", "shell", "copy", "upper"]);
    let repl: Vec<_> = languages.iter().map(|l| l.repl).collect();
    assert_eq!(repl, vec![true, false, false, true]);

    // Images and command templates stay private
    let raw: Value = reqwest::get(server.url("/languages"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(raw[0].get("imagename").is_none());
    assert!(raw[0].get("run").is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_code_sample() {
    let server = TestServer::start().await;

    let response = reqwest::get(server.url("/codesample/text")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let sample: CodeSampleResponse = response.json().await.unwrap();
    assert_eq!(
        STANDARD.decode(sample.base64encodedsample).unwrap(),
        b"hello sample\n"
    );

    let response = reqwest::get(server.url("/codesample/shell")).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);

    server.stop().await;
}

#[tokio::test]
async fn test_health_reports_provider() {
    let server = TestServer::start().await;

    let body: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "host");

    server.stop().await;
}
