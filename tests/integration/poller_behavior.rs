//! End-to-End: long-poll parking, timeouts, ordering, and host-loss behavior.

use proxy::Proxy;
use proxy::config::ProxyConfig;
use scope_test_utils::FakeHost;
use std::time::{Duration, Instant};

fn test_config(poll_timeout: Duration) -> ProxyConfig {
    ProxyConfig {
        scope_port: 0,
        http_port: 0,
        poll_timeout,
        snapshot_dir: std::env::temp_dir(),
        ..ProxyConfig::default()
    }
}

async fn start(poll_timeout: Duration) -> (Proxy, FakeHost, reqwest::Client, String) {
    let proxy = Proxy::start(test_config(poll_timeout)).await.expect("proxy starts");
    let host = FakeHost::connect(proxy.scope_addr)
        .await
        .expect("host connects");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let base = format!("http://{}", proxy.http_addr);
    (proxy, host, reqwest::Client::new(), base)
}

// ---------------------------------------------------------------------------
// Scenario E: poll timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idle_poll_answers_timeout_after_the_deadline() {
    let (_proxy, mut host, client, base) = start(Duration::from_millis(300)).await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let resp = client
        .get(format!("{base}/get-message"))
        .send()
        .await
        .unwrap();
    let elapsed = started.elapsed();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "<timeout/>");
    assert!(
        elapsed >= Duration::from_millis(250),
        "poll returned after {elapsed:?}, before the deadline"
    );
}

// ---------------------------------------------------------------------------
// Ordering: host submission order is delivery order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buffered_messages_are_delivered_in_host_order() {
    let (_proxy, mut host, client, base) = start(Duration::from_millis(400)).await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .get(format!("{base}/enable/a"))
        .send()
        .await
        .unwrap();

    for i in 0..4 {
        host.send_stp0(&format!("a <m n=\"{i}\"/>")).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    for i in 0..4 {
        let body = client
            .get(format!("{base}/get-message"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, format!("<m n=\"{i}\"/>"));
    }
}

#[tokio::test]
async fn parked_poller_is_answered_by_the_next_host_message() {
    let (_proxy, mut host, client, base) = start(Duration::from_secs(5)).await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client
        .get(format!("{base}/enable/a"))
        .send()
        .await
        .unwrap();

    let poll = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            client
                .get(format!("{base}/get-message"))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        })
    };
    // let the poller park before the host emits
    tokio::time::sleep(Duration::from_millis(100)).await;
    host.send_stp0("a <late/>").await.unwrap();
    assert_eq!(poll.await.unwrap(), "<late/>");
}

// ---------------------------------------------------------------------------
// Host loss: parked pollers are answered, state is reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn host_close_answers_the_parked_poller_and_clears_the_catalog() {
    let (proxy, mut host, client, base) = start(Duration::from_secs(5)).await;
    host.send_services("a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let poll = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            client
                .get(format!("{base}/get-message"))
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(host);

    let resp = poll.await.unwrap();
    assert_eq!(
        resp.headers().get("x-scope-message-service").unwrap(),
        "*hostquit"
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(proxy.session.catalog_is_empty().await);

    // a fresh host can reconnect and start over
    let mut host = FakeHost::connect(proxy.scope_addr).await.unwrap();
    host.send_services("b").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let body = client
        .get(format!("{base}/services"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "<services><service name=\"b\"/></services>");
}
