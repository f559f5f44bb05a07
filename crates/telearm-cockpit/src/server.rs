//! [`CockpitServer`] – HTTP + WebSocket server for the teleop UI.
//!
//! Listens on `0.0.0.0:5000` (configurable via [`CockpitServer::with_port`])
//! and hands every connection to the [`routes::router`]. Each connection
//! carries one request and must deliver it within the request timeout; a
//! WebSocket upgrade leaves the connection and runs on its own task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use telearm_hal::RobotLink;
use telearm_middleware::EventBus;
use telearm_types::ArmError;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::routes::{self, AppState};

/// Default TCP port for the cockpit.
pub const DEFAULT_PORT: u16 = 5000;

/// Default time a client has to send its request and receive the answer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// HTTP + WebSocket server in front of a [`RobotLink`].
pub struct CockpitServer {
    link: Arc<RobotLink>,
    bus: Arc<EventBus>,
    port: u16,
    request_timeout: Duration,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(link: Arc<RobotLink>, bus: Arc<EventBus>) -> Self {
        Self {
            link,
            bus,
            port: DEFAULT_PORT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override how long a connection may take to complete its request.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Server`] if the listener cannot bind.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ArmError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ArmError::Server(format!("bind error on {addr}: {e}")))?;
        self.serve(listener, cancel).await;
        Ok(())
    }

    /// Serve connections from an already-bound `listener` until `cancel`
    /// fires. Pending connections are dropped and open WebSocket sessions are
    /// closed on the way out.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "cockpit listening"),
            Err(e) => warn!(error = %e, "cockpit listening on unknown address"),
        }

        let app = routes::router(AppState {
            link: self.link,
            bus: self.bus,
            shutdown: cancel.clone(),
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(
                            stream,
                            peer,
                            app.clone(),
                            cancel.child_token(),
                            self.request_timeout,
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept error"),
                }
            }
        }
        info!("cockpit stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    cancel: CancellationToken,
    request_timeout: Duration,
) {
    let service = service_fn(move |req: hyper::Request<Incoming>| app.clone().oneshot(req));
    let conn = http1::Builder::new()
        .keep_alive(false)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades();

    // Dropping `conn` closes the socket.
    tokio::select! {
        _ = cancel.cancelled() => debug!(%peer, "connection dropped on shutdown"),
        result = tokio::time::timeout(request_timeout, conn) => match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(%peer, error = %e, "client error"),
            Err(_) => debug!(%peer, "request timed out"),
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use telearm_hal::LinkConfig;
    use telearm_middleware::Topic;
    use telearm_types::{Event, EventPayload, Liveness, StatusSnapshot};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    fn make_server() -> (CockpitServer, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let link = Arc::new(RobotLink::new(
            LinkConfig {
                address: "127.0.0.1:1".to_string(),
                ..LinkConfig::default()
            },
            bus.clone(),
        ));
        (CockpitServer::new(link, bus.clone()), bus)
    }

    async fn spawn(server: CockpitServer) -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        tokio::spawn(server.serve(listener, cancel.clone()));
        (addr, cancel)
    }

    async fn raw_http(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
            .await
            .expect("server never closed the connection")
            .ok();
        String::from_utf8_lossy(&out).into_owned()
    }

    /// `true` once the server has closed `stream` (EOF or reset).
    async fn released_within(stream: &mut TcpStream, within: Duration) -> bool {
        let mut buf = [0u8; 64];
        matches!(
            tokio::time::timeout(within, stream.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }

    #[test]
    fn default_port_is_5000() {
        let (server, _) = make_server();
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.with_port(9999).port(), 9999);
    }

    #[tokio::test]
    async fn serves_page_and_api_over_tcp() {
        let (server, _bus) = make_server();
        let (addr, cancel) = spawn(server).await;

        let page = raw_http(addr, "GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(page.starts_with("HTTP/1.1 200 OK"), "{page}");
        assert!(page.contains("text/html"));

        let jog = raw_http(
            addr,
            "POST /jog HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: 9\r\n\r\n{\"x\":0.5}",
        )
        .await;
        assert!(jog.starts_with("HTTP/1.1 200 OK"), "{jog}");
        assert!(jog.ends_with(r#"{"error":"Robot not connected","success":false}"#));

        let bad = raw_http(addr, "GARBAGE\r\n\r\n").await;
        assert!(bad.is_empty() || bad.starts_with("HTTP/1.1 400"), "{bad}");
        cancel.cancel();
    }

    #[tokio::test]
    async fn idle_client_is_released_after_request_timeout() {
        let (server, _bus) = make_server();
        let (addr, cancel) = spawn(server.with_request_timeout(Duration::from_millis(200))).await;

        let mut idle = TcpStream::connect(addr).await.unwrap();
        assert!(released_within(&mut idle, Duration::from_secs(3)).await);

        let mut partial = TcpStream::connect(addr).await.unwrap();
        partial.write_all(b"POST /jog HTTP/1.1\r\n").await.unwrap();
        assert!(released_within(&mut partial, Duration::from_secs(3)).await);
        cancel.cancel();
    }

    #[tokio::test]
    async fn idle_client_is_released_on_shutdown() {
        let (server, _bus) = make_server();
        let (addr, cancel) = spawn(server.with_request_timeout(Duration::from_secs(60))).await;

        let mut idle = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        assert!(released_within(&mut idle, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn websocket_receives_bus_events() {
        let (server, bus) = make_server();
        let (addr, cancel) = spawn(server).await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while bus.subscriber_count(Topic::RobotStatus) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "bridge never subscribed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        bus.publish_to(
            Topic::RobotStatus,
            Event::new("test", EventPayload::RobotStatus(StatusSnapshot::now(Liveness::Error))),
        )
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        assert_eq!(json["payload"]["type"], "robot_status");
        assert_eq!(json["payload"]["status"], "error");

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(2), ws.next()).await.unwrap();
        assert!(matches!(closed, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
    }
}
