//! End-to-End: STP/0 handshake, enable, and command posting.
//!
//! 1. A proxy is started in-process on ephemeral ports.
//! 2. A scripted scope host (FakeHost) connects on the scope port.
//! 3. An HTTP client drives the six-route interface and both sides of the
//!    bridge are asserted byte-for-byte (the FakeHost decodes with the real
//!    framers, so frame lengths are verified implicitly).

use proxy::Proxy;
use proxy::config::ProxyConfig;
use scope_test_utils::FakeHost;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

fn test_config() -> ProxyConfig {
    ProxyConfig {
        scope_port: 0,
        http_port: 0,
        poll_timeout: Duration::from_millis(400),
        snapshot_dir: std::env::temp_dir(),
        ..ProxyConfig::default()
    }
}

/// Start a proxy and connect a fake host to its scope port.
async fn start() -> (Proxy, FakeHost, reqwest::Client, String) {
    let proxy = Proxy::start(test_config()).await.expect("proxy starts");
    let host = FakeHost::connect(proxy.scope_addr)
        .await
        .expect("host connects");
    // let the acceptor attach the host session
    tokio::time::sleep(Duration::from_millis(30)).await;
    let base = format!("http://{}", proxy.http_addr);
    (proxy, host, reqwest::Client::new(), base)
}

async fn get(client: &reqwest::Client, base: &str, path: &str) -> (reqwest::StatusCode, String) {
    let resp = client
        .get(format!("{base}{path}"))
        .send()
        .await
        .expect("request sent");
    let status = resp.status();
    (status, resp.text().await.expect("body read"))
}

// ---------------------------------------------------------------------------
// Scenario A: STP/0 handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_catalog_is_served_as_xml() {
    let (_proxy, mut host, client, base) = start().await;
    host.send_services("a,b").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = get(&client, &base, "/services").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(
        body,
        "<services><service name=\"a\"/><service name=\"b\"/></services>"
    );
}

#[tokio::test]
async fn responses_carry_no_cache() {
    let (_proxy, mut host, client, base) = start().await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = client
        .get(format!("{base}/services"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("cache-control").unwrap(),
        "no-cache"
    );
}

// ---------------------------------------------------------------------------
// Scenario B: enable and post
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enable_reaches_the_host_and_posting_wraps_the_body() {
    let (_proxy, mut host, client, base) = start().await;
    host.send_services("a,b").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = get(&client, &base, "/enable/a").await;
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body, "<ok/>");
    assert_eq!(
        host.recv_stp0().await.unwrap(),
        ("*enable".to_owned(), "a".to_owned())
    );

    let resp = client
        .post(format!("{base}/post-command/a"))
        .body("<x/>")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "<ok/>");
    assert_eq!(
        host.recv_stp0().await.unwrap(),
        ("a".to_owned(), "<?xml version=\"1.0\"?><x/>".to_owned())
    );
}

#[tokio::test]
async fn posted_body_with_prelude_is_not_wrapped_again() {
    let (_proxy, mut host, client, base) = start().await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    get(&client, &base, "/enable/a").await;
    host.recv_stp0().await.unwrap();

    client
        .post(format!("{base}/post-command/a"))
        .body("<?xml version=\"1.0\"?><y/>")
        .send()
        .await
        .unwrap();
    assert_eq!(
        host.recv_stp0().await.unwrap(),
        ("a".to_owned(), "<?xml version=\"1.0\"?><y/>".to_owned())
    );
}

#[tokio::test]
async fn host_messages_flow_to_the_polling_client() {
    let (_proxy, mut host, client, base) = start().await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    get(&client, &base, "/enable/a").await;

    host.send_stp0("a <status>ready</status>").await.unwrap();
    let resp = client
        .get(format!("{base}/get-message"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("x-scope-message-service").unwrap(),
        "a"
    );
    assert_eq!(resp.text().await.unwrap(), "<status>ready</status>");
}

// ---------------------------------------------------------------------------
// Semantic failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enabling_an_unknown_service_is_refused() {
    let (_proxy, mut host, client, base) = start().await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = get(&client, &base, "/enable/nope").await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(body, "<bad/>");
}

#[tokio::test]
async fn posting_before_enable_is_refused_and_session_survives() {
    let (_proxy, mut host, client, base) = start().await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = client
        .post(format!("{base}/post-command/a"))
        .body("<x/>")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "<bad/>");

    // the session is unharmed: enabling still works
    let (status, _) = get(&client, &base, "/enable/a").await;
    assert_eq!(status, reqwest::StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Snapshot route
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_is_written_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config();
    cfg.snapshot_dir = dir.path().to_path_buf();
    let proxy = Proxy::start(cfg).await.unwrap();
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{}/snapshot", proxy.http_addr))
        .body("page\r\n<root><p/></root>")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "<ok/>");
    let written = std::fs::read_to_string(dir.path().join("page.xml")).unwrap();
    assert_eq!(written, "<root><p/></root>");
}
