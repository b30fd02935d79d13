use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use lib_stations::core::{
    EngineSettings, LivenessMonitor, ShutdownCoordinator, ShutdownPhase, SocketState, StopHandle,
    StreamContext,
};
use lib_stations::dataset::{Dataset, Record};
use lib_stations::server;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    ctx: Arc<StreamContext>,
    addr: SocketAddr,
    liveness: StopHandle,
    transport: StopHandle,
}

fn station(id: i64) -> Record {
    Record::new(id, "37.7749", "-122.4194", "CCS", "Available")
}

async fn start(lists: Vec<Vec<Record>>, tick_ms: u64, ping_ms: u64, static_dir: Option<PathBuf>) -> TestServer {
    let dataset = Dataset::new(lists).unwrap();
    let settings = EngineSettings {
        tick_interval: Duration::from_millis(tick_ms),
        ping_interval: Duration::from_millis(ping_ms),
        ..Default::default()
    };
    let ctx = StreamContext::new(Arc::new(dataset), settings);
    let liveness = LivenessMonitor::spawn(Arc::clone(&ctx.registry), ctx.settings.ping_interval);
    let running = server::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&ctx), static_dir)
        .await
        .unwrap();

    TestServer {
        ctx,
        addr: running.local_addr,
        liveness,
        transport: running.transport,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    connect_to(addr, "/ws").await
}

async fn connect_to(addr: SocketAddr, path: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

/// Next JSON text message, skipping control frames.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection ended")
            .expect("transport error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_update(ws: &mut Client) -> (u64, i64) {
    let msg = next_json(ws).await;
    assert_eq!(msg["type"], "station_update", "got {msg}");
    (
        msg["streamId"].as_u64().unwrap(),
        msg["data"]["chargerId"].as_i64().unwrap(),
    )
}

async fn wait_for_connections(ctx: &StreamContext, expected: usize) {
    let deadline = Instant::now() + WAIT;
    while ctx.registry.len() != expected {
        assert!(Instant::now() < deadline, "registry never reached {expected} connections");
        sleep(Duration::from_millis(10)).await;
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut raw)).await.unwrap().unwrap();
    let raw = String::from_utf8_lossy(&raw).to_string();
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    (head.to_string(), body.to_string())
}

#[tokio::test]
async fn welcome_comes_first_then_records_cycle() {
    let server = start(vec![vec![station(1), station(2), station(3)]], 40, 10_000, None).await;
    let mut ws = connect(server.addr).await;

    let welcome = next_json(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["message"], "Connected to Charging Stations Stream");

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(next_update(&mut ws).await);
    }
    assert_eq!(seen, vec![(0, 1), (0, 2), (0, 3), (0, 1)]);
}

#[tokio::test]
async fn every_list_cycles_on_its_own_stream() {
    let lists = vec![
        vec![station(10), station(11)],
        vec![station(20), station(21), station(22)],
    ];
    let server = start(lists, 30, 10_000, None).await;
    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "welcome");

    let mut per_stream: HashMap<u64, Vec<i64>> = HashMap::new();
    for _ in 0..10 {
        let (stream_id, charger_id) = next_update(&mut ws).await;
        per_stream.entry(stream_id).or_default().push(charger_id);
    }

    let expected: HashMap<u64, Vec<i64>> =
        HashMap::from([(0, vec![10, 11]), (1, vec![20, 21, 22])]);
    for (stream_id, ids) in &per_stream {
        let cycle = &expected[stream_id];
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*id, cycle[i % cycle.len()], "stream {stream_id} out of order: {ids:?}");
        }
    }
    assert_eq!(per_stream.len(), 2, "both streams should deliver: {per_stream:?}");
}

#[tokio::test]
async fn upgrades_are_accepted_on_any_path() {
    let server = start(vec![vec![station(1)]], 40, 10_000, None).await;

    for path in ["/", "/stations"] {
        let mut ws = connect_to(server.addr, path).await;
        let welcome = next_json(&mut ws).await;
        assert_eq!(welcome["type"], "welcome", "no welcome on {path}");
        assert_eq!(next_update(&mut ws).await, (0, 1));
    }
}

#[tokio::test]
async fn malformed_client_text_keeps_the_connection_open() {
    let server = start(vec![vec![station(1), station(2)]], 40, 10_000, None).await;
    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "welcome");

    ws.send(Message::Text("not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"hello"}"#.into())).await.unwrap();

    let (stream_id, _) = next_update(&mut ws).await;
    assert_eq!(stream_id, 0);
    assert_eq!(server.ctx.registry.len(), 1);
}

#[tokio::test]
async fn silent_client_is_terminated_after_two_probes() {
    let server = start(vec![vec![station(1)]], 10_000, 100, None).await;
    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "welcome");
    wait_for_connections(&server.ctx, 1).await;

    // Not polling the client means its pongs are never written.
    sleep(Duration::from_millis(500)).await;
    wait_for_connections(&server.ctx, 0).await;

    // The server dropped the socket without a close handshake.
    let ended = timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) => return,
                Some(Ok(Message::Close(_))) => panic!("termination must not send a close frame"),
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}

#[tokio::test]
async fn stalled_reader_is_terminated_while_writes_are_blocked() {
    // Large records on a fast tick fill the socket buffers of a peer that never reads.
    let big = Record::new(1, "37.7749", "-122.4194", "x".repeat(256 * 1024), "Available");
    let server = start(vec![vec![big]], 5, 600, None).await;

    let _ws = connect(server.addr).await;
    wait_for_connections(&server.ctx, 1).await;
    let conn = server.ctx.registry.snapshot().remove(0);

    wait_for_connections(&server.ctx, 0).await;
    assert!(conn.is_terminated());
    assert!(conn.is_torn_down());
}

#[tokio::test]
async fn responsive_client_survives_many_probes() {
    let server = start(vec![vec![station(1), station(2)]], 30, 80, None).await;
    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "welcome");

    // Reading flushes the automatic pong replies.
    let deadline = Instant::now() + Duration::from_millis(600);
    let mut updates = 0;
    while Instant::now() < deadline {
        if next_json(&mut ws).await["type"] == "station_update" {
            updates += 1;
        }
    }

    assert!(updates > 5, "only {updates} updates");
    assert_eq!(server.ctx.registry.len(), 1);
}

#[tokio::test]
async fn closing_the_client_removes_it_from_the_registry() {
    let server = start(vec![vec![station(1)]], 40, 10_000, None).await;
    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "welcome");
    wait_for_connections(&server.ctx, 1).await;

    ws.close(None).await.unwrap();
    wait_for_connections(&server.ctx, 0).await;
}

#[tokio::test]
async fn streams_stop_once_the_client_has_closed() {
    let server = start(vec![vec![station(1), station(2)], vec![station(3)]], 20, 10_000, None).await;
    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "welcome");
    next_update(&mut ws).await;
    let conn = server.ctx.registry.snapshot().remove(0);
    assert_eq!(conn.stream_count(), 2);

    ws.close(None).await.unwrap();
    wait_for_connections(&server.ctx, 0).await;

    // Several tick intervals later no producer is left to write anything.
    sleep(Duration::from_millis(200)).await;
    assert!(conn.is_torn_down());
    assert_eq!(conn.live_streams(), 0);
    assert_eq!(conn.socket_state(), SocketState::Closed);

    // The client side sees nothing but the end of the connection.
    let rest = timeout(WAIT, async {
        let mut updates = 0;
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(msg, Message::Text(_)) {
                updates += 1;
            }
        }
        updates
    })
    .await
    .unwrap();
    assert!(rest <= 4, "{rest} updates after close");
}

#[tokio::test]
async fn health_reports_connections_and_streams() {
    let server = start(vec![vec![station(1)], vec![station(2)], vec![station(3)]], 10_000, 10_000, None).await;

    let (head, body) = http_get(server.addr, "/health").await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 0);
    assert_eq!(health["streams"], 3);

    let mut ws = connect(server.addr).await;
    assert_eq!(next_json(&mut ws).await["type"], "welcome");
    wait_for_connections(&server.ctx, 1).await;

    let (_, body) = http_get(server.addr, "/health").await;
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["connections"], 1);
}

#[tokio::test]
async fn static_files_are_served_for_other_paths() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>stations</h1>").unwrap();
    let server = start(vec![vec![station(1)]], 10_000, 10_000, Some(dir.path().to_path_buf())).await;

    let (head, body) = http_get(server.addr, "/index.html").await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    assert_eq!(body, "<h1>stations</h1>");

    let (head, body) = http_get(server.addr, "/").await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    assert_eq!(body, "<h1>stations</h1>");

    let (head, _) = http_get(server.addr, "/missing.html").await;
    assert!(head.starts_with("HTTP/1.1 404"), "{head}");
}

#[tokio::test]
async fn shutdown_closes_clients_then_the_listener() {
    let server = start(vec![vec![station(1), station(2)]], 40, 10_000, None).await;
    let TestServer {
        ctx,
        addr,
        liveness,
        transport,
    } = server;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;
    assert_eq!(next_json(&mut first).await["type"], "welcome");
    assert_eq!(next_json(&mut second).await["type"], "welcome");
    wait_for_connections(&ctx, 2).await;

    let coordinator = ShutdownCoordinator::new(Arc::clone(&ctx.registry), liveness, transport);
    let phase = coordinator.subscribe();
    timeout(WAIT, coordinator.run()).await.unwrap().unwrap();

    assert_eq!(*phase.borrow(), ShutdownPhase::Exited);
    assert!(ctx.registry.is_empty());
    assert!(ctx.registry.is_sealed());

    for ws in [&mut first, &mut second] {
        let code = timeout(WAIT, async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
                    Some(Ok(_)) => continue,
                    other => panic!("expected a close frame, got {other:?}"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(code, Some(CloseCode::Away));
    }

    assert!(TcpStream::connect(addr).await.is_err());
}
