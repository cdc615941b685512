use crate::error::NattersError;
use crate::handshake::{self, HandshakeError};
use crate::metrics::{counters, gauges, histograms};
use crate::registry::{ConnHandle, ConnId, SessionRegistry};
use crate::server::ServerState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use natter_common::frame::{Envelope, FrameError, Kind};
use natter_common::types::{reply_text, PROTOCOL_VERSION};
use natter_common::{unix_now, UserId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{interval, timeout_at, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Lifecycle of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for the `login` frame.
    Unauthenticated,
    /// Logged in as the given identity.
    Authenticated(UserId),
    /// Terminal.
    Closed,
}

/// Frames to write back on the connection's own socket, and whether to
/// close it afterwards.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// Frames for the client, in order.
    pub frames: Vec<Envelope>,
    /// Close the connection after writing `frames`.
    pub close: bool,
}

impl Reply {
    fn none() -> Self {
        Self::default()
    }

    fn send(frame: Envelope) -> Self {
        Self {
            frames: vec![frame],
            close: false,
        }
    }

    fn error(text: &str) -> Self {
        Self::send(Envelope::error(text, unix_now()))
    }

    fn fatal(text: &str) -> Self {
        Self {
            frames: vec![Envelope::error(text, unix_now())],
            close: true,
        }
    }
}

/// Per-connection state machine: `Unauthenticated → Authenticated → Closed`.
///
/// Owns the sending half of the connection's outbound queue so it can bind
/// itself in the session registry on login.
pub struct Connection {
    state: ConnState,
    conn_id: ConnId,
    tx: mpsc::Sender<Vec<u8>>,
    evict: Arc<Notify>,
}

impl Connection {
    /// Create an unauthenticated connection whose peers deliver into `tx`.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            state: ConnState::Unauthenticated,
            conn_id: ConnId::next(),
            tx,
            evict: Arc::new(Notify::new()),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ConnState {
        &self.state
    }

    /// This connection's identifier.
    #[must_use]
    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    /// Bound identity, once authenticated.
    #[must_use]
    pub fn user(&self) -> Option<&UserId> {
        match &self.state {
            ConnState::Authenticated(uid) => Some(uid),
            _ => None,
        }
    }

    /// Signal raised when a newer session for the same identity replaces
    /// this one.
    #[must_use]
    pub fn eviction(&self) -> Arc<Notify> {
        Arc::clone(&self.evict)
    }

    /// Handle one inbound binary message and return what to write back.
    pub fn handle_inbound(&mut self, data: &[u8], server: &ServerState) -> Reply {
        match &self.state {
            ConnState::Unauthenticated => match self.login(data, server) {
                Ok(ack) => Reply::send(ack),
                Err(e) if e.is_fatal() => Reply::fatal(e.reply_text()),
                Err(e) => Reply::error(e.reply_text()),
            },
            ConnState::Authenticated(uid) => self.relay(uid, data, server),
            ConnState::Closed => Reply {
                frames: Vec::new(),
                close: true,
            },
        }
    }

    /// Run the login handshake on the first frame.
    ///
    /// On success the identity is bound in the registry, evicting any older
    /// session, and the `login` acknowledgement is returned. A fatal failure
    /// moves the connection to `Closed`; an undecodable frame leaves it
    /// waiting for a login.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError`] when the frame is not a valid login.
    pub fn login(&mut self, data: &[u8], server: &ServerState) -> Result<Envelope, HandshakeError> {
        if self.state != ConnState::Unauthenticated {
            return Err(HandshakeError::NotLogin(Kind::Login.as_str()));
        }
        let uid = match handshake::login(data, server.auth.as_ref()) {
            Ok(uid) => uid,
            Err(e) => {
                counters::handshakes_total(e.label());
                tracing::debug!(conn = %self.conn_id, "login failed: {}", e);
                if e.is_fatal() {
                    self.state = ConnState::Closed;
                }
                return Err(e);
            }
        };

        let handle = ConnHandle::new(uid.clone(), self.tx.clone(), self.conn_id, self.eviction());
        if let Some(old) = server.registry.bind(handle) {
            counters::sessions_evicted_total();
            tracing::info!(uid = %uid, old = %old.conn_id, new = %self.conn_id, "session replaced");
            old.evict();
        }
        counters::handshakes_total("ok");
        gauges::inc_sessions_active();
        tracing::debug!(uid = %uid, conn = %self.conn_id, "logged in");

        let ack = Envelope::login_ack(uid.as_str(), reply_text::LOGIN_OK, unix_now());
        self.state = ConnState::Authenticated(uid);
        Ok(ack)
    }

    fn relay(&self, uid: &UserId, data: &[u8], server: &ServerState) -> Reply {
        let mut frame = match Envelope::parse(data) {
            Ok(frame) => frame,
            Err(FrameError::UnknownType(tag)) => {
                counters::frames_dropped_total("unknown_type");
                tracing::debug!(uid = %uid, "dropping frame of unknown type 0x{:02x}", tag);
                return Reply::none();
            }
            Err(e) => {
                counters::frames_dropped_total("malformed");
                tracing::debug!(uid = %uid, "malformed frame: {}", e);
                return Reply::error(reply_text::MALFORMED_FRAME);
            }
        };
        uid.as_str().clone_into(&mut frame.from);

        match frame.kind {
            Kind::Chat | Kind::Emoji | Kind::Image | Kind::File => {
                if frame.to.is_empty() {
                    counters::frames_dropped_total("unaddressed");
                    tracing::debug!(uid = %uid, kind = frame.kind.as_str(), "dropping unaddressed frame");
                    return Reply::none();
                }
                match server.router().route(&frame) {
                    Ok(()) => Reply::none(),
                    Err(e) => {
                        tracing::debug!(uid = %uid, "route failed: {}", e);
                        Reply::error(e.reply_text())
                    }
                }
            }
            Kind::Login | Kind::Error | Kind::Notification(_) => {
                counters::frames_dropped_total("unexpected");
                tracing::debug!(
                    uid = %uid,
                    frame_type = frame.frame_type(),
                    "ignoring unexpected frame type post-login"
                );
                Reply::none()
            }
        }
    }

    /// Move to `Closed`, unbinding the identity if the registry still points
    /// at this connection.
    pub fn close(&mut self, registry: &SessionRegistry) {
        if let ConnState::Authenticated(uid) = std::mem::replace(&mut self.state, ConnState::Closed) {
            registry.unbind(&uid, self.conn_id);
            gauges::dec_sessions_active();
            tracing::debug!(uid = %uid, conn = %self.conn_id, "connection closed");
        }
    }
}

async fn send_frame<S>(ws_tx: &mut S, frame: &Envelope) -> Result<(), NattersError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    ws_tx
        .send(Message::Binary(frame.serialize()))
        .await
        .map_err(NattersError::WebSocket)
}

async fn write_reply<S>(ws_tx: &mut S, reply: &Reply) -> Result<(), NattersError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for frame in &reply.frames {
        send_frame(ws_tx, frame).await?;
    }
    Ok(())
}

/// Echo our subprotocol when the client offers it. Clients that offer none
/// are still accepted.
fn negotiate_protocol(req: &Request, mut resp: Response) -> Result<Response, ErrorResponse> {
    if let Some(protocols) = req.headers().get("sec-websocket-protocol") {
        if let Ok(proto_str) = protocols.to_str() {
            if proto_str.split(',').map(str::trim).any(|p| p == PROTOCOL_VERSION) {
                resp.headers_mut().insert(
                    "sec-websocket-protocol",
                    HeaderValue::from_static(PROTOCOL_VERSION),
                );
            }
        }
    }
    Ok(resp)
}

/// Read frames until one logs the connection in, a fatal handshake error
/// occurs, or the login timeout expires. Undecodable frames are answered and
/// the wait continues.
async fn perform_login(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    conn: &mut Connection,
    state: &ServerState,
) -> Result<(), NattersError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(state.config.login_timeout);

    loop {
        let data = match timeout_at(deadline, ws_rx.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => data,
            Ok(Some(Ok(Message::Text(_)))) => {
                counters::handshakes_total("malformed");
                send_frame(ws_tx, &Envelope::error(reply_text::MALFORMED_FRAME, unix_now())).await?;
                continue;
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)))) => continue,
            Ok(Some(Ok(Message::Close(_))) | None) => {
                counters::handshakes_total("closed");
                return Err(NattersError::ConnectionClosed);
            }
            Ok(Some(Err(e))) => {
                counters::handshakes_total("closed");
                return Err(NattersError::WebSocket(e));
            }
            Err(_) => {
                counters::handshakes_total("timeout");
                let _ = send_frame(ws_tx, &Envelope::error(reply_text::LOGIN_TIMEOUT, unix_now())).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                tracing::debug!(conn = %conn.conn_id(), "sent login timeout to client");
                return Err(NattersError::LoginTimeout);
            }
        };

        match conn.login(&data, state) {
            Ok(ack) => return send_frame(ws_tx, &ack).await,
            Err(e) if e.is_fatal() => {
                let _ = send_frame(ws_tx, &Envelope::error(e.reply_text(), unix_now())).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                return Err(NattersError::Handshake(e));
            }
            Err(e) => send_frame(ws_tx, &Envelope::error(e.reply_text(), unix_now())).await?,
        }
    }
}

/// Drive the select loop for an authenticated connection.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    deliver_rx: &mut mpsc::Receiver<Vec<u8>>,
    conn: &mut Connection,
    state: &ServerState,
    shutdown: &mut watch::Receiver<()>,
) -> Result<(), NattersError> {
    let mut ping_interval = interval(Duration::from_secs(state.config.ping_interval));
    let evicted = conn.eviction();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        counters::frame_bytes_total("in", data.len() as u64);
                        let reply = conn.handle_inbound(&data, state);
                        write_reply(ws_tx, &reply).await?;
                        histograms::inbound_latency_seconds(start.elapsed().as_secs_f64());
                        if reply.close {
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Text(_))) => {
                        counters::frames_dropped_total("malformed");
                        write_reply(ws_tx, &Reply::error(reply_text::MALFORMED_FRAME)).await?;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            tracing::debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(NattersError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(data) = deliver_rx.recv() => {
                counters::frame_bytes_total("out", data.len() as u64);
                ws_tx.send(Message::Binary(data)).await.map_err(NattersError::WebSocket)?;
            }
            () = evicted.notified() => {
                let _ = send_frame(ws_tx, &Envelope::error(reply_text::SIGNED_IN_ELSEWHERE, unix_now())).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = ping_interval.tick() => {
                if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                    tracing::debug!("failed to send ping: {}", e);
                }
            }
            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Serve one accepted TCP stream until it closes.
///
/// # Errors
///
/// Returns an error if the WebSocket upgrade or the login handshake fails, or
/// the transport breaks.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), NattersError> {
    // Bound the number of connections sitting in the handshake.
    let permit = state.pending_logins.acquire().await.map_err(|_| {
        tracing::debug!("pending-login semaphore closed");
        NattersError::ConnectionClosed
    })?;

    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_frame_size),
        max_frame_size: Some(state.config.max_frame_size),
        ..WebSocketConfig::default()
    };
    let ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, negotiate_protocol, Some(ws_config))
            .await
            .map_err(NattersError::WebSocket)?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (deliver_tx, mut deliver_rx) = mpsc::channel::<Vec<u8>>(state.config.outbound_queue);
    let mut conn = Connection::new(deliver_tx);
    tracing::debug!(conn = %conn.conn_id(), peer = %peer_addr, "connection opened");

    let login = perform_login(&mut ws_tx, &mut ws_rx, &mut conn, &state).await;
    drop(permit);
    if let Err(e) = login {
        conn.close(&state.registry);
        return Err(e);
    }

    let result = run_message_loop(
        &mut ws_tx,
        &mut ws_rx,
        &mut deliver_rx,
        &mut conn,
        &state,
        &mut shutdown,
    )
    .await;

    conn.close(&state.registry);
    result
}
