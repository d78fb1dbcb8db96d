use futures_util::{SinkExt, StreamExt};
use jc_channel::{ChannelClient, ChannelConfig, ChannelStatus, LeadListener, ReconnectPolicy, StatsListener};
use jc_core::channel_wire::{decode_frame, DEFAULT_MAX_FRAME_BYTES};
use jc_core::{LeadEvent, StatSnapshot};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

async fn bind() -> (TcpListener, ChannelConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let mut config = ChannelConfig::new(Url::parse(&format!("ws://{addr}")).expect("url"));
    config.reconnect = ReconnectPolicy {
        delay: Duration::from_millis(50),
        max_attempts: 3,
        connect_timeout: Duration::from_secs(2),
    };
    (listener, config)
}

async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("accept timed out")
        .expect("accept");
    let mut path = String::new();
    let socket = accept_hdr_async(stream, |request: &Request, response: Response| {
        path = request.uri().path().to_string();
        Ok::<Response, ErrorResponse>(response)
    })
    .await
    .expect("handshake");
    (socket, path)
}

async fn send(socket: &mut WebSocketStream<TcpStream>, frame: Value) {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .expect("server send");
}

async fn wait_status(mut status: watch::Receiver<ChannelStatus>, target: ChannelStatus) {
    timeout(WAIT, status.wait_for(|current| *current == target))
        .await
        .expect("status timed out")
        .expect("status channel open");
}

fn stats(value: u32) -> StatSnapshot {
    StatSnapshot {
        open_positions: value,
        successful_placements: value,
        consultations_per_month: value,
        courses: value,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribed_callback_receives_namespace_events() {
    let (listener, config) = bind().await;
    let client = ChannelClient::new(&config, "stats").expect("client");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _binding = client.subscribe("stats_update", move |data| {
        let _ = tx.send(data.clone());
    });
    assert!(client.start());

    let (mut server, path) = accept(&listener).await;
    assert_eq!(path, "/ws/stats");
    wait_status(client.status_watch(), ChannelStatus::Connected).await;

    send(&mut server, json!({"event": "unknown", "data": 1})).await;
    send(&mut server, json!({"event": "stats_update", "data": {"n": 0}, "namespace": "leads"})).await;
    send(&mut server, json!({"event": "stats_update", "data": {"n": 1}})).await;

    let received = timeout(WAIT, rx.recv()).await.expect("callback").expect("value");
    assert_eq!(received, json!({"n": 1}));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn emit_is_delivered_only_while_connected() {
    let (listener, config) = bind().await;
    let client = ChannelClient::new(&config, "leads").expect("client");
    assert!(!client.emit("hello", json!({"early": true})));

    client.start();
    let (mut server, _) = accept(&listener).await;
    wait_status(client.status_watch(), ChannelStatus::Connected).await;

    assert!(client.emit("hello", json!({"early": false})));
    let message = timeout(WAIT, server.next())
        .await
        .expect("read timed out")
        .expect("frame")
        .expect("ok");
    let text = message.into_text().expect("text");
    let frame = decode_frame(&text, DEFAULT_MAX_FRAME_BYTES).expect("decode");
    assert_eq!(frame.event, "hello");
    assert_eq!(frame.data, json!({"early": false}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stats_listener_keeps_its_bindings_across_reconnect() {
    let (listener, config) = bind().await;
    let stats_listener = StatsListener::start(&config).expect("listener");
    let mut updates = stats_listener.updates();

    let (mut server, _) = accept(&listener).await;
    send(&mut server, json!({"event": "initial_stats", "data": stats(1)})).await;
    timeout(WAIT, updates.wait_for(|value| *value == Some(stats(1))))
        .await
        .expect("initial")
        .expect("open");
    assert!(stats_listener.is_connected());

    server.close(None).await.expect("close");
    drop(server);

    let (mut server, path) = accept(&listener).await;
    assert_eq!(path, "/ws/stats");
    wait_status(stats_listener.status_watch(), ChannelStatus::Connected).await;
    send(&mut server, json!({"event": "stats_update", "data": stats(2)})).await;
    timeout(WAIT, updates.wait_for(|value| *value == Some(stats(2))))
        .await
        .expect("update after reconnect")
        .expect("open");
    assert_eq!(stats_listener.data(), Some(stats(2)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_initial_snapshot_overwrites_newer_update() {
    let (listener, config) = bind().await;
    let stats_listener = StatsListener::start(&config).expect("listener");
    let mut updates = stats_listener.updates();

    let (mut server, _) = accept(&listener).await;
    send(&mut server, json!({"event": "stats_update", "data": stats(7)})).await;
    send(&mut server, json!({"event": "stats_update", "data": {"openPositions": "lots"}})).await;
    send(&mut server, json!({"event": "initial_stats", "data": stats(3)})).await;
    timeout(WAIT, updates.wait_for(|value| *value == Some(stats(3))))
        .await
        .expect("last write wins")
        .expect("open");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gives_up_after_bounded_failures_and_can_be_restarted() {
    let (listener, mut config) = bind().await;
    config.reconnect.max_attempts = 2;
    let client = ChannelClient::connect(&config, "stats").expect("client");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _binding = client.subscribe("stats_update", move |data| {
        let _ = tx.send(data.clone());
    });

    // Two handshakes fail by dropping the raw connection.
    for _ in 0..2 {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("accept timed out")
            .expect("accept");
        drop(stream);
    }
    timeout(WAIT, async {
        while !client.has_given_up() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("give up");
    assert_eq!(client.status(), ChannelStatus::Disconnected);
    assert!(!client.emit("ping", Value::Null));

    assert!(client.reconnect());
    assert!(!client.has_given_up());
    let (mut server, _) = accept(&listener).await;
    wait_status(client.status_watch(), ChannelStatus::Connected).await;
    send(&mut server, json!({"event": "stats_update", "data": 5})).await;
    assert_eq!(
        timeout(WAIT, rx.recv()).await.expect("callback").expect("value"),
        json!(5)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_handshakes_count_as_failures() {
    let (listener, mut config) = bind().await;
    config.reconnect.max_attempts = 2;
    config.reconnect.connect_timeout = Duration::from_millis(200);
    let client = ChannelClient::connect(&config, "stats").expect("client");

    // Accept the TCP connection, read the upgrade request and never answer it.
    let mut stalled = Vec::new();
    for _ in 0..2 {
        let (mut stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("retry after stalled handshake")
            .expect("accept");
        let mut request = [0u8; 1024];
        let _ = timeout(WAIT, stream.read(&mut request)).await;
        stalled.push(stream);
    }
    timeout(WAIT, async {
        while !client.has_given_up() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("give up");
    assert_eq!(client.status(), ChannelStatus::Disconnected);
    drop(stalled);

    assert!(client.reconnect());
    let (_server, path) = accept(&listener).await;
    assert_eq!(path, "/ws/stats");
    wait_status(client.status_watch(), ChannelStatus::Connected).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lead_listener_keeps_its_binding_across_reconnect() {
    let (listener, config) = bind().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<LeadEvent>();
    let lead_listener = LeadListener::start(&config, move |lead| {
        let _ = tx.send(lead);
    })
    .expect("listener");

    let (mut server, path) = accept(&listener).await;
    assert_eq!(path, "/ws/leads");
    wait_status(lead_listener.status_watch(), ChannelStatus::Connected).await;
    server.close(None).await.expect("close");
    drop(server);

    let (mut server, path) = accept(&listener).await;
    assert_eq!(path, "/ws/leads");
    wait_status(lead_listener.status_watch(), ChannelStatus::Connected).await;
    send(
        &mut server,
        json!({"type": "new_lead", "data": {"id": 2, "name": "Ben", "position": "Koch", "source": "kontakt"}}),
    )
    .await;
    let lead = timeout(WAIT, rx.recv())
        .await
        .expect("lead after reconnect")
        .expect("value");
    assert_eq!(lead.name, "Ben");
    assert_eq!(lead.source, "kontakt");
    assert!(lead_listener.is_connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_callbacks_after_close() {
    let (listener, config) = bind().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<LeadEvent>();
    let lead_listener = LeadListener::start(&config, move |lead| {
        let _ = tx.send(lead);
    })
    .expect("listener");

    let (mut server, path) = accept(&listener).await;
    assert_eq!(path, "/ws/leads");
    wait_status(lead_listener.status_watch(), ChannelStatus::Connected).await;

    send(&mut server, json!({"type": "new_lead", "data": {"name": "broken"}})).await;
    send(
        &mut server,
        json!({"type": "new_lead", "data": {"id": 1, "name": "Anna", "position": "Developer", "source": "jobs"}}),
    )
    .await;
    let lead = timeout(WAIT, rx.recv()).await.expect("lead").expect("value");
    assert_eq!(lead.name, "Anna");
    assert_eq!(lead.position, "Developer");

    lead_listener.close();
    assert!(!lead_listener.is_connected());
    let _ = server
        .send(Message::Text(
            json!({"type": "new_lead", "data": {"name": "Late", "position": "x", "source": "jobs"}}).to_string(),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
}
