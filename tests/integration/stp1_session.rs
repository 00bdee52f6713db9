//! End-to-End: STP/1 negotiation, tagged round-trips, and schema discovery.
//!
//! The fake host upgrades the session with the `STP/1\n` sentinel after the
//! client enables `stp-1`, then speaks binary frames. Discovery runs against
//! a scripted introspection responder.

use proxy::Proxy;
use proxy::config::ProxyConfig;
use scope_test_utils::FakeHost;
use std::time::Duration;
use stp_wire::{Stp1Message, Stp1MessageType};

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

async fn start() -> (Proxy, FakeHost, reqwest::Client, String) {
    let proxy = Proxy::start(test_config()).await.expect("proxy starts");
    let host = FakeHost::connect(proxy.scope_addr)
        .await
        .expect("host connects");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let base = format!("http://{}", proxy.http_addr);
    (proxy, host, reqwest::Client::new(), base)
}

/// Drive the session from fresh STP/0 into STP/1: catalog, enable, sentinel.
async fn negotiate_stp1(
    host: &mut FakeHost,
    client: &reqwest::Client,
    base: &str,
    services: &str,
) {
    host.send_services(services).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let resp = client
        .get(format!("{base}/enable/stp-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "<ok/>");
    assert_eq!(
        host.recv_stp0().await.unwrap(),
        ("*enable".to_owned(), "stp-1".to_owned())
    );
    host.announce_stp1().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn event(service: &str, payload: &[u8]) -> Stp1Message {
    let mut msg = Stp1Message::new(Stp1MessageType::Event);
    msg.service = service.to_owned();
    msg.format = 1;
    msg.payload = payload.to_vec();
    msg
}

fn response(tag: u32, payload: &[u8]) -> Stp1Message {
    let mut msg = Stp1Message::new(Stp1MessageType::Response);
    msg.service = "scope".to_owned();
    msg.format = 1;
    msg.tag = tag;
    msg.payload = payload.to_vec();
    msg
}

// ---------------------------------------------------------------------------
// Scenario C: negotiation and the hello event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn negotiated_host_event_reaches_the_client_with_headers() {
    let (_proxy, mut host, client, base) = start().await;
    negotiate_stp1(&mut host, &client, &base, "window-manager,stp-1").await;

    host.send_stp1(&event("scope", b"[\"hello\"]"), 5)
        .await
        .unwrap();
    let resp = client
        .get(format!("{base}/get-message"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers().get("x-scope-message-service").unwrap(),
        "scope"
    );
    assert_eq!(resp.headers().get("x-scope-message-command").unwrap(), "0");
    assert_eq!(resp.headers().get("x-scope-message-status").unwrap(), "0");
    assert_eq!(resp.headers().get("x-scope-message-tag").unwrap(), "0");
    assert_eq!(resp.text().await.unwrap(), "[\"hello\"]");
}

// ---------------------------------------------------------------------------
// Client-originated STP/1 commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn posted_command_carries_the_captured_client_id() {
    let (_proxy, mut host, client, base) = start().await;
    negotiate_stp1(&mut host, &client, &base, "window-manager,stp-1").await;

    // the first host message fixes the session identity at clientID=5
    host.send_stp1(&event("scope", b"[\"hello\"]"), 5)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = client
        .post(format!("{base}/post-command/window-manager/3/42"))
        .body("[1]")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "<ok/>");

    let cmd = host.recv_stp1().await.unwrap();
    assert_eq!(cmd.msg_type, Stp1MessageType::Command);
    assert_eq!(cmd.service, "window-manager");
    assert_eq!(cmd.command_id, 3);
    assert_eq!(cmd.tag, 42);
    assert_eq!(cmd.format, 1);
    assert_eq!(cmd.client_id, 5);
    assert_eq!(cmd.payload, b"[1]");
}

#[tokio::test]
async fn command_before_any_host_message_derives_uuid_from_payload() {
    let (_proxy, mut host, client, base) = start().await;
    negotiate_stp1(&mut host, &client, &base, "window-manager,stp-1").await;

    client
        .post(format!("{base}/post-command/window-manager/1/7"))
        .body("[\"json\",\"uuid:798551239038509750\"]")
        .send()
        .await
        .unwrap();

    let cmd = host.recv_stp1().await.unwrap();
    assert_eq!(cmd.client_id, 0);
    assert_eq!(cmd.uuid.as_deref(), Some("uuid:798551239038509750"));
}

// ---------------------------------------------------------------------------
// Scenario F: empty payload workaround
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_stp1_payload_is_served_as_a_single_space() {
    let (_proxy, mut host, client, base) = start().await;
    negotiate_stp1(&mut host, &client, &base, "window-manager,stp-1").await;

    host.send_stp1(&response(0, b""), 5).await.unwrap();
    let resp = client
        .get(format!("{base}/get-message"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers().get("content-length").unwrap(), "1");
    assert_eq!(resp.text().await.unwrap(), " ");
}

// ---------------------------------------------------------------------------
// Scenario D: schema discovery round-trips never reach the client
// ---------------------------------------------------------------------------

/// Answer the introspection exchange: HostInfo at scope 1.0 (no enums),
/// then CommandInfo + MessageInfo per introspected service.
async fn answer_discovery(host: &mut FakeHost) {
    const HOST_INFO: u32 = 10;
    const COMMAND_INFO: u32 = 7;
    const MESSAGE_INFO: u32 = 11;

    let mut message_infos = 0;
    loop {
        let cmd = host.recv_stp1().await.unwrap();
        assert_eq!(cmd.msg_type, Stp1MessageType::Command);
        assert_eq!(cmd.service, "scope");
        assert_ne!(cmd.tag, 0, "introspection commands must be tagged");
        let payload: &[u8] = match cmd.command_id {
            HOST_INFO => br#"[0, "host", "ua", "plat", "os", [["scope", "1.0"]]]"#,
            COMMAND_INFO => br#"[[["ListWindows", 1, 1, 2]]]"#,
            MESSAGE_INFO => {
                br#"[[[1, "ListWindowsArg", []], [2, "WindowList", [["windowID", 5, 1]]]]]"#
            }
            other => panic!("unexpected introspection command {other}"),
        };
        host.send_stp1(&response(cmd.tag, payload), 5).await.unwrap();
        if cmd.command_id == MESSAGE_INFO {
            message_infos += 1;
            // window-manager and scope both get introspected
            if message_infos == 2 {
                return;
            }
        }
    }
}

#[tokio::test]
async fn discovery_runs_on_first_service_listing_and_stays_off_the_poll_stream() {
    let (proxy, mut host, client, base) = start().await;
    negotiate_stp1(&mut host, &client, &base, "window-manager,stp-1").await;

    let responder = tokio::spawn(async move {
        answer_discovery(&mut host).await;
        host
    });
    let resp = client
        .get(format!("{base}/services"))
        .send()
        .await
        .unwrap();
    let body = resp.text().await.unwrap();
    assert!(
        body.contains("<service name=\"window-manager\"/>"),
        "got {body}"
    );
    // the catalog gained the HostInfo-advertised scope service
    assert!(body.contains("<service name=\"scope\"/>"), "got {body}");
    responder.await.unwrap();

    let schema = proxy.session.schema().await.expect("schema was built");
    let wm = schema.get("window-manager").expect("window-manager schema");
    assert_eq!(wm.commands_by_number.get(&1).unwrap().name, "ListWindows");

    // every introspection reply was claimed by its tag: nothing leaked to
    // the allocator or the client stream
    assert_eq!(proxy.session.tags.outstanding().await, 0);
    let resp = client
        .get(format!("{base}/get-message"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "<timeout/>");
}
