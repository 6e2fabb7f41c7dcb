//! DashboardClient against a local canned-response HTTP server.

use std::sync::{Arc, Mutex};

use orgmove_gateway::{
    DashboardClient, DashboardConfig, DeviceGateway, GatewayError, OrgCredentials, Region,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Serve `responses` in order, one per connection, capturing each request.
async fn serve(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);

    tokio::spawn(async move {
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            sink.lock().unwrap().push(request);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{addr}/api/v1"), captured)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(idx) = text.find("\r\n\r\n") {
            let content_length = text[..idx]
                .lines()
                .find_map(|l| {
                    let lower = l.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() >= idx + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn response(status: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n{body}",
        body.len()
    )
}

fn creds() -> OrgCredentials {
    OrgCredentials::new("secret-key-1234", Region::Global, "org-dst")
}

fn client(base: &str, retries: u32) -> DashboardClient {
    DashboardClient::new(
        DashboardConfig::default()
            .with_base_url(base)
            .with_max_retries(retries),
    )
    .unwrap()
}

#[tokio::test]
async fn claim_posts_serials_with_bearer_auth() {
    let (base, captured) = serve(vec![response("200 OK", "", "{}")]).await;
    let serials = vec!["Q2AA-AAAA-AAAA".to_string(), "Q2BB-BBBB-BBBB".to_string()];

    client(&base, 0)
        .claim_to_inventory(&creds(), "org-dst", &serials)
        .await
        .unwrap();

    let requests = captured.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert!(req.starts_with("POST /api/v1/organizations/org-dst/inventory/claim"));
    assert!(req.to_ascii_lowercase().contains("authorization: bearer secret-key-1234"));
    assert!(req.contains("Q2AA-AAAA-AAAA"));
    assert!(req.contains("Q2BB-BBBB-BBBB"));
}

#[tokio::test]
async fn api_errors_surface_platform_messages() {
    let (base, _captured) = serve(vec![response(
        "400 Bad Request",
        "",
        r#"{"errors":["Device with serial Q2AA-AAAA-AAAA is already claimed"]}"#,
    )])
    .await;

    let err = client(&base, 0)
        .add_to_network(&creds(), "N_dst", &["Q2AA-AAAA-AAAA".to_string()])
        .await
        .unwrap_err();

    match err {
        GatewayError::Api { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("already claimed"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_is_retried_then_succeeds() {
    let (base, captured) = serve(vec![
        response("429 Too Many Requests", "Retry-After: 0\r\n", r#"{"errors":["slow down"]}"#),
        response("200 OK", "", "{}"),
    ])
    .await;

    client(&base, 2)
        .remove_from_network(&creds(), "N_src", "Q2AA-AAAA-AAAA")
        .await
        .unwrap();

    let requests = captured.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].starts_with("POST /api/v1/networks/N_src/devices/remove"));
}

#[tokio::test]
async fn rate_limit_without_retries_is_reported() {
    let (base, _captured) = serve(vec![response(
        "429 Too Many Requests",
        "Retry-After: 0\r\n",
        r#"{"errors":["rate limited"]}"#,
    )])
    .await;

    let err = client(&base, 0)
        .unclaim_from_inventory(&creds(), "org-src", &["Q2AA-AAAA-AAAA".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::RateLimited { .. }));
    assert!(err.to_string().contains("rate limited"));
    assert!(err.is_transient());
}
