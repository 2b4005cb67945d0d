//! Tests for the envelope HTTP transport: envelope unwrapping, status
//! mapping onto the error taxonomy, and credential handling.

use reqwest::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use sirocco::error::SiroccoError;
use sirocco::transport::{Credentials, Transport};

/// Helper: bind a TCP listener on localhost and return (listener, port).
async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn http_response(status_line: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serve one request with a canned response, returning the raw request head.
async fn serve_one(listener: TcpListener, response: String) -> String {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = vec![0u8; 8192];
    let n = socket.read(&mut buf).await.unwrap();
    socket.write_all(response.as_bytes()).await.unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

fn transport(port: u16, credentials: Credentials) -> Transport {
    Transport::new(format!("http://127.0.0.1:{port}"), credentials, "local")
}

// ---------------------------------------------------------------------------
// Envelope unwrapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_envelope_returns_data() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response("200 OK", r#"{"success":true,"data":{"value":42}}"#),
    ));

    let data = transport(port, Credentials::None)
        .request(Method::GET, "/stats", None)
        .await
        .unwrap();

    assert_eq!(data["value"], 42);
    server.await.unwrap();
}

#[tokio::test]
async fn failure_envelope_maps_to_api_error_with_code() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response(
            "200 OK",
            r#"{"success":false,"error":{"code":"model_not_loaded","message":"model cold"}}"#,
        ),
    ));

    let err = transport(port, Credentials::None)
        .request(Method::GET, "/jobs/j1", None)
        .await
        .unwrap_err();

    match err {
        SiroccoError::Api {
            provider,
            code,
            status,
            message,
        } => {
            assert_eq!(provider, "local");
            assert_eq!(code, "model_not_loaded");
            assert_eq!(status, None);
            assert_eq!(message, "model cold");
        }
        other => panic!("expected Api, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn missing_data_field_yields_null() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response("200 OK", r#"{"success":true}"#),
    ));

    let data = transport(port, Credentials::None)
        .request(Method::POST, "/jobs/j1/cancel", None)
        .await
        .unwrap();

    assert!(data.is_null());
    server.await.unwrap();
}

#[tokio::test]
async fn garbage_body_maps_to_schema_parse() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response("200 OK", "not json at all"),
    ));

    let err = transport(port, Credentials::None)
        .request(Method::GET, "/health", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SiroccoError::SchemaParse(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn oversize_body_is_rejected() {
    let (listener, port) = mock_listener().await;
    // A 3 MiB payload inside an otherwise well-formed success envelope.
    let padding = "x".repeat(3 * 1024 * 1024);
    let body = format!(r#"{{"success":true,"data":{{"blob":"{padding}"}}}}"#);
    let server = tokio::spawn(serve_one(listener, http_response("200 OK", &body)));

    let err = transport(port, Credentials::None)
        .request(Method::GET, "/jobs/j1", None)
        .await
        .unwrap_err();

    match err {
        SiroccoError::Api { code, status, .. } => {
            assert_eq!(code, "response_too_large");
            assert_eq!(status, Some(200));
        }
        other => panic!("expected Api, got {other:?}"),
    }
    server.await.unwrap();
}

// ---------------------------------------------------------------------------
// HTTP status mapping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_401_maps_to_auth_failed() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response("401 Unauthorized", r#"{"success":false}"#),
    ));

    let err = transport(port, Credentials::Bearer("expired".to_string()))
        .request(Method::GET, "/jobs/j1", None)
        .await
        .unwrap_err();

    match err {
        SiroccoError::AuthFailed { ref provider, .. } => assert_eq!(provider, "local"),
        other => panic!("expected AuthFailed, got {other:?}"),
    }
    assert!(!err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn http_429_maps_to_rate_limited() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response("429 Too Many Requests", "{}"),
    ));

    let err = transport(port, Credentials::None)
        .request(Method::GET, "/jobs/j1", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SiroccoError::RateLimited { .. }));
    assert!(err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn http_500_with_envelope_error_keeps_code_and_status() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response(
            "500 Internal Server Error",
            r#"{"success":false,"error":{"code":"gpu_oom","message":"out of memory"}}"#,
        ),
    ));

    let err = transport(port, Credentials::None)
        .request(Method::POST, "/inference/image", Some(&serde_json::json!({})))
        .await
        .unwrap_err();

    match &err {
        SiroccoError::Api { code, status, .. } => {
            assert_eq!(code, "gpu_oom");
            assert_eq!(*status, Some(500));
        }
        other => panic!("expected Api, got {other:?}"),
    }
    // 5xx is retryable.
    assert!(err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn connection_refused_maps_to_network() {
    // Bind then drop to get a port nothing is listening on.
    let (listener, port) = mock_listener().await;
    drop(listener);

    let err = transport(port, Credentials::None)
        .request(Method::GET, "/health", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SiroccoError::Network(_)));
    assert!(err.is_retryable());
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[tokio::test]
async fn api_key_sent_as_x_api_key_header() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response("200 OK", r#"{"success":true,"data":null}"#),
    ));

    transport(port, Credentials::ApiKey("sk-test-123".to_string()))
        .request(Method::GET, "/health", None)
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert!(request.to_lowercase().contains("x-api-key: sk-test-123"));
}

#[tokio::test]
async fn bearer_token_sent_as_authorization_header() {
    let (listener, port) = mock_listener().await;
    let server = tokio::spawn(serve_one(
        listener,
        http_response("200 OK", r#"{"success":true,"data":null}"#),
    ));

    transport(port, Credentials::Bearer("tok-abc".to_string()))
        .request(Method::GET, "/health", None)
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert!(request.to_lowercase().contains("authorization: bearer tok-abc"));
}

#[test]
fn credentials_debug_redacts_secrets() {
    let api_key = format!("{:?}", Credentials::ApiKey("sk-super-secret".to_string()));
    let bearer = format!("{:?}", Credentials::Bearer("tok-super-secret".to_string()));

    assert!(api_key.contains("[REDACTED]"));
    assert!(!api_key.contains("sk-super-secret"));
    assert!(bearer.contains("[REDACTED]"));
    assert!(!bearer.contains("tok-super-secret"));
}
