//! Integration tests for the full gateway over loopback TCP.
//!
//! Each test starts a real listener on an ephemeral port with
//! `run_server`, connects one or more fake devices speaking the framed
//! protocol, and checks the replies on the wire together with the events
//! published to observers.
//!
//! ```text
//! FakeDevice ──TCP──► run_server ──► Dispatcher ──► SessionRegistry
//!     ▲                                   │
//!     └────────────── replies ◄───────────┘        EventSubscription
//! ```

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use radar_core::protocol::payloads::{
    CommonMessage, GetServerRequest, PropertyItem, PropertyItems, RegisterRequest,
    SetPropertyResponse,
};
use radar_core::{DeviceMessage, Frame, FrameCodec};
use radar_server::application::context::{EngineSettings, ServerContext};
use radar_server::application::correlator::CorrelationError;
use radar_server::application::device_commands::{CommandError, DeviceCommands};
use radar_server::application::events::{EventFilter, EventKind, EventSubscription, ServerEvent};
use radar_server::infrastructure::network::{bind, run_server, ConnectionOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

const WAIT: Duration = Duration::from_secs(2);

// ── Harness ───────────────────────────────────────────────────────────────────

struct TestServer {
    ctx: Arc<ServerContext>,
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TestServer {
    async fn start(settings: EngineSettings, options: ConnectionOptions) -> Self {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.expect("bind");
        let addr = listener.local_addr().unwrap();
        let ctx = ServerContext::new(settings);
        let running = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            let running = Arc::clone(&running);
            async move {
                run_server(listener, ctx, options, running)
                    .await
                    .expect("server");
            }
        });
        Self {
            ctx,
            addr,
            running,
            handle,
        }
    }

    async fn start_default() -> Self {
        Self::start(EngineSettings::default(), ConnectionOptions::default()).await
    }

    fn commands(&self) -> DeviceCommands {
        DeviceCommands::new(Arc::clone(&self.ctx))
    }

    fn events(&self) -> EventSubscription {
        self.ctx.events.subscribe(EventFilter::ALL)
    }

    async fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        timeout(WAIT, self.handle)
            .await
            .expect("server stops")
            .expect("server task");
    }
}

struct FakeDevice {
    io: Framed<TcpStream, FrameCodec>,
}

impl FakeDevice {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self {
            io: Framed::new(stream, FrameCodec::default()),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.io.get_ref().local_addr().unwrap()
    }

    async fn send(&mut self, msg: DeviceMessage) {
        self.io.send(msg.to_frame()).await.expect("send");
    }

    async fn send_frame(&mut self, frame: Frame) {
        self.io.send(frame).await.expect("send frame");
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.io.get_mut().write_all(bytes).await.expect("send raw");
    }

    async fn recv(&mut self) -> DeviceMessage {
        let frame = timeout(WAIT, self.io.next())
            .await
            .expect("reply within 2s")
            .expect("stream open")
            .expect("valid frame");
        DeviceMessage::from_frame(&frame).expect("decodable reply")
    }

    /// True once the server has closed the socket.
    async fn closed_by_server(&mut self, within: Duration) -> bool {
        loop {
            match timeout(within, self.io.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    async fn register(&mut self, device_id: &str) -> DeviceMessage {
        self.send(DeviceMessage::RegisterRequest(RegisterRequest {
            uid: device_id.to_string(),
            firmware_version: "1.2.0".to_string(),
        }))
        .await;
        self.recv().await
    }

    async fn heartbeat(&mut self) -> DeviceMessage {
        self.send(DeviceMessage::HeartbeatRequest(CommonMessage::default()))
            .await;
        self.recv().await
    }
}

async fn next_of(events: &mut EventSubscription, kind: EventKind) -> ServerEvent {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if event.kind() == kind => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind:?} event within 2s"))
}

// ── End-to-end scenario ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_register_heartbeat_set_property_disconnect() {
    let server = TestServer::start_default().await;
    let mut events = server.events();
    let commands = server.commands();
    let mut device = FakeDevice::connect(server.addr).await;

    // Register
    let reply = device.register("DEV1").await;
    assert_eq!(
        reply,
        DeviceMessage::RegisterResponse(radar_core::protocol::payloads::RegisterResponse {
            result: 0
        })
    );
    assert_eq!(
        next_of(&mut events, EventKind::DeviceConnected).await,
        ServerEvent::DeviceConnected {
            device_id: "DEV1".to_string(),
            ip_address: "127.0.0.1".to_string(),
        }
    );

    // Heartbeat
    assert_eq!(device.heartbeat().await, DeviceMessage::heartbeat_ack());
    assert_eq!(
        next_of(&mut events, EventKind::Heartbeat).await,
        ServerEvent::Heartbeat {
            device_id: "DEV1".to_string()
        }
    );

    // Set property
    let call = tokio::spawn({
        let commands = commands.clone();
        async move {
            commands
                .set_property("DEV1", "radar_install_height", "28")
                .await
        }
    });
    let request = device.recv().await;
    assert_eq!(request, DeviceMessage::set_property("radar_install_height", "28"));
    device
        .send(DeviceMessage::SetPropertyResponse(SetPropertyResponse {
            seq: 9,
            result: 0,
            errmsg: String::new(),
        }))
        .await;
    let result = timeout(WAIT, call).await.expect("answered").expect("task");
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(
        commands.cached_property("DEV1", "radar_install_height").as_deref(),
        Some("28")
    );

    // Disconnect
    drop(device);
    assert_eq!(
        next_of(&mut events, EventKind::DeviceDisconnected).await,
        ServerEvent::DeviceDisconnected {
            device_id: "DEV1".to_string()
        }
    );
    assert!(server.ctx.sessions.resolve("DEV1").is_none());

    server.stop().await;
}

// ── Sessions ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_registration_evicts_first_connection() {
    // Arrange
    let server = TestServer::start_default().await;
    let mut first = FakeDevice::connect(server.addr).await;
    let mut second = FakeDevice::connect(server.addr).await;
    first.register("DEV1").await;

    // Act
    second.register("DEV1").await;

    // Assert
    assert!(first.closed_by_server(WAIT).await, "first socket must be closed");
    let bound = server.ctx.sessions.resolve("DEV1").expect("still registered");
    assert_eq!(bound.peer(), second.local_addr());
    assert_eq!(second.heartbeat().await, DeviceMessage::heartbeat_ack());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_registrations_leave_one_session() {
    // Arrange
    let server = TestServer::start_default().await;
    let mut events = server.events();
    let mut devices = Vec::new();
    for _ in 0..4 {
        devices.push(FakeDevice::connect(server.addr).await);
    }

    // Act
    let register = RegisterRequest {
        uid: "DEV1".to_string(),
        firmware_version: "1.2.0".to_string(),
    };
    futures_util::future::join_all(
        devices
            .iter_mut()
            .map(|device| device.send(DeviceMessage::RegisterRequest(register.clone()))),
    )
    .await;
    for _ in 0..devices.len() {
        next_of(&mut events, EventKind::DeviceConnected).await;
    }

    // Assert
    let bound = server.ctx.sessions.resolve("DEV1").expect("one session survives");
    let (winners, losers): (Vec<_>, Vec<_>) = devices
        .into_iter()
        .partition(|device| device.local_addr() == bound.peer());
    assert_eq!(winners.len(), 1);
    for mut loser in losers {
        assert!(loser.closed_by_server(WAIT).await, "replaced socket must be closed");
    }
    let mut winner = winners.into_iter().next().expect("winner");
    assert!(matches!(winner.recv().await, DeviceMessage::RegisterResponse(r) if r.result == 0));
    assert_eq!(winner.heartbeat().await, DeviceMessage::heartbeat_ack());
    assert_eq!(
        server.ctx.sessions.resolve("DEV1").map(|c| c.peer()),
        Some(bound.peer())
    );

    server.stop().await;
}

#[tokio::test]
async fn test_blank_device_id_is_refused() {
    let server = TestServer::start_default().await;
    let mut device = FakeDevice::connect(server.addr).await;

    let reply = device.register("   ").await;

    assert!(matches!(reply, DeviceMessage::RegisterResponse(r) if r.result == 1));
    assert!(server.ctx.sessions.is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_get_server_returns_listening_address() {
    let server = TestServer::start_default().await;
    let mut device = FakeDevice::connect(server.addr).await;

    device
        .send(DeviceMessage::GetServerRequest(GetServerRequest {
            uid: "DEV9".to_string(),
        }))
        .await;

    match device.recv().await {
        DeviceMessage::GetServerResponse(resp) => {
            assert_eq!(resp.host, "127.0.0.1");
            assert_eq!(resp.port, i32::from(server.addr.port()));
        }
        other => panic!("unexpected reply {other:?}"),
    }
    server.stop().await;
}

// ── Idle supervision ──────────────────────────────────────────────────────────

fn short_idle() -> ConnectionOptions {
    ConnectionOptions {
        idle_timeout: Duration::from_millis(300),
        ..ConnectionOptions::default()
    }
}

#[tokio::test]
async fn test_silent_connection_is_closed_after_idle_window() {
    let server = TestServer::start(EngineSettings::default(), short_idle()).await;
    let mut device = FakeDevice::connect(server.addr).await;

    assert!(device.closed_by_server(WAIT).await);
    server.stop().await;
}

#[tokio::test]
async fn test_regular_heartbeats_keep_connection_open() {
    // Arrange
    let server = TestServer::start(EngineSettings::default(), short_idle()).await;
    let mut device = FakeDevice::connect(server.addr).await;
    device.register("DEV1").await;

    // Act: three full windows, a heartbeat every third of a window
    for _ in 0..9 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(device.heartbeat().await, DeviceMessage::heartbeat_ack());
    }

    // Assert
    assert!(server.ctx.sessions.resolve("DEV1").is_some());
    server.stop().await;
}

// ── Correlation over the wire ─────────────────────────────────────────────────

#[tokio::test]
async fn test_query_properties_round_trip() {
    // Arrange
    let server = TestServer::start_default().await;
    let mut device = FakeDevice::connect(server.addr).await;
    device.register("DEV1").await;
    let commands = server.commands();

    // Act
    let call = tokio::spawn({
        let commands = commands.clone();
        async move { commands.query_properties("DEV1").await }
    });
    assert_eq!(device.recv().await, DeviceMessage::GetProperties);
    device
        .send(DeviceMessage::Properties(PropertyItems {
            properties: vec![
                PropertyItem {
                    key: "radar_install_height".to_string(),
                    value: "28".to_string(),
                },
                PropertyItem {
                    key: "radar_install_style".to_string(),
                    value: "1".to_string(),
                },
            ],
        }))
        .await;
    let values = timeout(WAIT, call).await.unwrap().unwrap().expect("query");

    // Assert
    assert_eq!(values.len(), 2);
    assert_eq!(commands.cached_properties("DEV1"), values);
    server.stop().await;
}

#[tokio::test]
async fn test_silent_device_yields_timeout() {
    let settings = EngineSettings {
        response_timeout: Duration::from_millis(300),
        ..EngineSettings::default()
    };
    let server = TestServer::start(settings, ConnectionOptions::default()).await;
    let mut device = FakeDevice::connect(server.addr).await;
    device.register("DEV1").await;

    let result = server.commands().query_properties("DEV1").await;

    assert!(matches!(
        result,
        Err(CommandError::Correlation(CorrelationError::Timeout(_)))
    ));
    assert_eq!(server.ctx.correlator.pending_count(), 0);
    server.stop().await;
}

#[tokio::test]
async fn test_socket_drop_releases_waiter_promptly() {
    // Arrange
    let server = TestServer::start_default().await;
    let mut device = FakeDevice::connect(server.addr).await;
    device.register("DEV1").await;
    let commands = server.commands();
    let call = tokio::spawn(async move { commands.query_properties("DEV1").await });
    assert_eq!(device.recv().await, DeviceMessage::GetProperties);

    // Act
    drop(device);

    // Assert: well inside the 4s response bound
    let result = timeout(Duration::from_secs(1), call)
        .await
        .expect("waiter released")
        .unwrap();
    assert!(matches!(
        result,
        Err(CommandError::Correlation(CorrelationError::ConnectionClosed))
    ));
    server.stop().await;
}

// ── Framing faults ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_zero_length_frame_closes_connection() {
    let server = TestServer::start_default().await;
    let mut device = FakeDevice::connect(server.addr).await;
    device.register("DEV1").await;

    device.send_raw(&[0, 0, 0, 0]).await;

    assert!(device.closed_by_server(WAIT).await);
    server.stop().await;
}

#[tokio::test]
async fn test_oversized_length_closes_connection() {
    let server = TestServer::start_default().await;
    let mut device = FakeDevice::connect(server.addr).await;

    device.send_raw(&[0x7F, 0xFF, 0xFF, 0xFF, 7]).await;

    assert!(device.closed_by_server(WAIT).await);
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_tag_is_dropped_and_connection_survives() {
    // Arrange
    let server = TestServer::start_default().await;
    let mut events = server.events();
    let mut device = FakeDevice::connect(server.addr).await;
    device.register("DEV1").await;

    // Act
    device.send_frame(Frame::new(99, vec![1, 2, 3])).await;

    // Assert
    assert_eq!(device.heartbeat().await, DeviceMessage::heartbeat_ack());
    loop {
        match next_of(&mut events, EventKind::MessageReceived).await {
            ServerEvent::MessageReceived { kind, .. } if kind == "Unknown(99)" => break,
            _ => continue,
        }
    }
    server.stop().await;
}

// ── Shutdown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_closes_devices_and_announces_stop() {
    // Arrange
    let server = TestServer::start_default().await;
    let mut events = server.events();
    let mut device = FakeDevice::connect(server.addr).await;
    device.register("DEV1").await;
    let ctx = Arc::clone(&server.ctx);

    // Act
    server.stop().await;

    // Assert
    assert!(device.closed_by_server(WAIT).await);
    assert!(ctx.sessions.is_empty());
    assert_eq!(
        next_of(&mut events, EventKind::DeviceDisconnected).await,
        ServerEvent::DeviceDisconnected {
            device_id: "DEV1".to_string()
        }
    );
    let stopped = ServerEvent::system("Server stopped");
    while next_of(&mut events, EventKind::MessageReceived).await != stopped {}
}
