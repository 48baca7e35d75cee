//! Listener lifecycle, connection handling and panic recovery.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use common::{chat_completion, config_from_json, mock_config, send};
use inference_gateway::config::ModelConfig;
use inference_gateway::server::with_middleware;
use inference_gateway::{Server, ServerError};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn local_config() -> inference_gateway::Config {
    let mut config = mock_config(false);
    config.http.addr = "127.0.0.1:0".to_string();
    config
}

#[tokio::test]
async fn test_serve_until_cancelled() {
    let server = Server::bind(local_config()).await.unwrap();
    let addr = server.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(shutdown.clone()));

    let response = reqwest::get(format!("http://{addr}/healthz")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");

    let models: serde_json::Value = reqwest::get(format!("http://{addr}/v1/models"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["models"][0]["id"], "mock-1");

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let mut config = local_config();
    config.http.idle_timeout = Duration::from_millis(200);
    config.http.read_header_timeout = Duration::from_secs(30);

    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.serve(shutdown.clone()));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // The keep-alive connection ends on its own once it goes idle.
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received))
        .await
        .expect("idle connection was not closed")
        .unwrap();

    let received = String::from_utf8_lossy(&received);
    assert!(received.starts_with("HTTP/1.1 200 OK"), "{received}");

    shutdown.cancel();
}

/// Read one `Content-Length` framed response off a keep-alive connection.
async fn read_response(stream: &mut TcpStream) -> String {
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-response");
        received.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&received).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().unwrap())
                })
                .unwrap();
            if received.len() >= end + 4 + length {
                return text;
            }
        }
    }
}

#[tokio::test]
async fn test_slow_response_keeps_connection_open() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_completion("slow"))
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&upstream)
        .await;

    let mut config = config_from_json(json!({
        "models": [{
            "id": "chat-a",
            "engine": {"type": "upstream_http", "base_url": upstream.uri()}
        }]
    }));
    config.http.addr = "127.0.0.1:0".to_string();
    config.http.idle_timeout = Duration::from_millis(300);

    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.serve(shutdown.clone()));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let body = json!({"model": "chat-a", "messages": [{"role": "user", "content": "hi"}]})
        .to_string();
    let request = format!(
        "POST /v1/text/generate HTTP/1.1\r\nHost: localhost\r\n\
         Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    // The request outlives the idle timeout; the idle period starts once it is answered.
    let first = read_response(&mut stream).await;
    assert!(first.starts_with("HTTP/1.1 200 OK"), "{first}");
    assert!(first.contains("slow"), "{first}");

    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let second = read_response(&mut stream).await;
    assert!(second.starts_with("HTTP/1.1 200 OK"), "{second}");

    shutdown.cancel();
}

#[tokio::test]
async fn test_bind_failure() {
    let mut config = local_config();
    config.http.addr = "not-an-address".to_string();

    match Server::bind(config).await {
        Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, "not-an-address"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("bind should fail"),
    }
}

#[tokio::test]
async fn test_duplicate_model_ids_fail_startup() {
    let mut config = local_config();
    config.models = vec![ModelConfig::sample_mock(), ModelConfig::sample_mock()];

    match Server::bind(config).await {
        Err(ServerError::Router(err)) => assert!(err.to_string().contains("mock-1")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("duplicate models should be rejected"),
    }
}

async fn boom() -> &'static str {
    panic!("boom")
}

#[tokio::test]
async fn test_panics_become_internal_errors() {
    let app = with_middleware(Router::new().route("/boom", get(boom)), 1024);

    let response = send(&app, common::get("/boom")).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json()["error"]["code"], "server_error");
    assert!(response.headers.contains_key("x-request-id"));

    // The stack keeps serving after a panic.
    let response = send(&app, common::get("/boom")).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
}
