#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use natter_common::frame::Kind;
use natter_common::{unix_now, Envelope, UserId};
use natters::auth::TokenAuthority;
use natters::config::{ServerConfig, StoreKind};
use natters::server::ServerState;
use natters::store::MemoryFriendStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub const SECRET: &[u8] = b"integration-test-secret-0123456789";

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        api_addr: "127.0.0.1:0".parse().unwrap(),
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_conns: 1000,
        max_frame_size: 65_536,
        outbound_queue: 64,
        login_timeout: 5,
        ping_interval: 30,
        token_ttl: 3600,
        store: StoreKind::Memory,
        db_path: "natter.db".into(),
        chat_alerts: false,
    }
}

pub fn issuer() -> TokenAuthority {
    TokenAuthority::new(SECRET, 3600).unwrap()
}

pub fn token_for(uid: &str) -> String {
    issuer().issue(&UserId::from(uid))
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<WsStream, Message>,
    pub ws_rx: futures_util::stream::SplitStream<WsStream>,
    pub uid: String,
}

/// Open a WebSocket to the server without logging in.
pub async fn connect_raw(addr: &SocketAddr) -> WsStream {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    let url = format!("ws://{addr}/ws");
    let mut req = url.into_client_request().unwrap();
    req.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        natter_common::types::PROTOCOL_VERSION.parse().unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
    ws
}

impl TestClient {
    /// Connect without sending a login frame.
    pub async fn unauthenticated(addr: &SocketAddr) -> Self {
        let (ws_tx, ws_rx) = connect_raw(addr).await.split();
        Self {
            ws_tx,
            ws_rx,
            uid: String::new(),
        }
    }

    /// Connect and complete the login handshake as `uid`.
    pub async fn connect(addr: &SocketAddr, uid: &str) -> Self {
        let mut client = Self::unauthenticated(addr).await;
        client.uid = uid.to_owned();

        client.send(&Envelope::login(&token_for(uid))).await;
        let ack = client.recv_frame().await;
        assert_eq!(ack.kind, Kind::Login, "expected login ack, got {ack:?}");
        assert_eq!(ack.to, uid);
        client
    }

    pub async fn send(&mut self, frame: &Envelope) {
        self.ws_tx
            .send(Message::Binary(frame.serialize()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, data: Vec<u8>) {
        self.ws_tx.send(Message::Binary(data)).await.unwrap();
    }

    pub async fn chat(&mut self, to: &str, content: &str) {
        self.send(&Envelope::chat(to, content, unix_now())).await;
    }

    pub async fn recv_frame(&mut self) -> Envelope {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Binary(data) => return Envelope::parse(&data).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected binary frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        let result = tokio::time::timeout(timeout, self.recv_frame()).await;
        result.ok()
    }

    /// Wait for the server to close the socket. Returns false on timeout.
    pub async fn wait_closed(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                match self.ws_rx.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .is_ok()
    }
}

pub fn make_state(config: ServerConfig) -> Arc<ServerState> {
    Arc::new(ServerState::new(
        config,
        Arc::new(MemoryFriendStore::new()),
        Arc::new(issuer()),
    ))
}

pub async fn start_server_with(config: impl FnOnce(&mut ServerConfig)) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut cfg = test_config(addr);
    config(&mut cfg);
    let state = make_state(cfg);

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = natters::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    start_server_with(|_| {}).await
}

/// Poll until `uid`'s presence matches `online`.
pub async fn wait_presence(state: &ServerState, uid: &str, online: bool) {
    let uid = UserId::from(uid);
    for _ in 0..100 {
        if state.registry.is_online(&uid) == online {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("presence of {uid} never became {online}");
}
