//! STOMP-over-WebSocket connector.
//!
//! [`StompConnector::connect`] performs one connection attempt: WebSocket
//! upgrade, STOMP `CONNECT` with the bearer credential, and waits for
//! `CONNECTED`. On success it spawns a pump task and hands back a [`Link`],
//! a pair of channels carrying parsed frames in both directions. The pump
//! owns heart-beating and reports the end of the connection exactly once
//! as [`LinkEvent::Closed`].
//!
//! Retrying is not this module's concern; callers decide whether and when
//! to call `connect` again.
//!
//! ```rust,ignore
//! let connector = StompConnector::new(StompConfig::for_server(&server_url)?);
//! let mut link = connector.connect(&token).await?;
//! link.send(Frame::subscribe("sub-0", "/user/queue/messages"));
//! while let Some(LinkEvent::Frame(frame)) = link.inbound.recv().await {
//!     println!("{}", frame.body);
//! }
//! ```

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::stomp::{Command, Frame, negotiate_heart_beat};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Heart-beat we offer in `CONNECT`: `(client sends every, client wants every)`.
const DEFAULT_HEART_BEAT: (u64, u64) = (10_000, 10_000);

// ── StompConfig ──────────────────────────────────────────────────────

/// Connection parameters for the STOMP endpoint.
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// Full WebSocket URL (`ws://` or `wss://`), usually `<server>/ws`.
    pub url: Url,
    /// Heart-beat offer in milliseconds; `0` disables a direction.
    pub heart_beat: (u64, u64),
    /// Upper bound for upgrade plus `CONNECTED`. Default: 10s.
    pub connect_timeout: Duration,
}

impl StompConfig {
    /// Derive the STOMP endpoint from the backend base URL.
    pub fn for_server(server: &Url) -> Result<Self, Error> {
        Ok(Self {
            url: websocket_url(server)?,
            heart_beat: DEFAULT_HEART_BEAT,
            connect_timeout: Duration::from_secs(10),
        })
    }
}

/// Map an `http(s)://host/base` server URL to `ws(s)://host/base/ws`.
///
/// A URL that already uses `ws`/`wss` is returned unchanged.
pub fn websocket_url(server: &Url) -> Result<Url, Error> {
    let mut url = server.clone();
    match server.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => url
            .set_scheme("ws")
            .map_err(|()| Error::WebSocketConnect("cannot derive ws:// URL".into()))?,
        "https" => url
            .set_scheme("wss")
            .map_err(|()| Error::WebSocketConnect("cannot derive wss:// URL".into()))?,
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported server URL scheme: {other}"
            )));
        }
    }
    let path = format!("{}/ws", server.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    Ok(url)
}

// ── Link ─────────────────────────────────────────────────────────────

/// Something the pump (or a test double) reports about the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A parsed server frame (`MESSAGE`, `RECEIPT`, ...).
    Frame(Frame),
    /// The connection is gone. Sent at most once, always last.
    Closed(String),
}

/// The caller's side of one live STOMP connection.
///
/// Dropping the `Link` closes the WebSocket.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// The transport's side of a [`Link`].
#[derive(Debug)]
pub struct LinkPeer {
    pub outbound: mpsc::UnboundedReceiver<Frame>,
    pub inbound: mpsc::UnboundedSender<LinkEvent>,
}

impl Link {
    /// Create a connected `Link`/`LinkPeer` pair.
    pub fn pair() -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Link {
                outbound: out_tx,
                inbound: in_rx,
            },
            LinkPeer {
                outbound: out_rx,
                inbound: in_tx,
            },
        )
    }

    /// Queue a frame for sending. Returns `false` once the link is closed.
    pub fn send(&self, frame: Frame) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

// ── StompConnector ───────────────────────────────────────────────────

/// Opens STOMP sessions against one endpoint.
#[derive(Debug, Clone)]
pub struct StompConnector {
    config: StompConfig,
}

impl StompConnector {
    pub fn new(config: StompConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StompConfig {
        &self.config
    }

    /// Perform one connection attempt.
    ///
    /// Fails with [`Error::AuthRejected`] if the server answers `CONNECT`
    /// with `ERROR`, and with [`Error::Timeout`] if `CONNECTED` does not
    /// arrive within `connect_timeout`.
    pub async fn connect(&self, token: &SecretString) -> Result<Link, Error> {
        let timeout = self.config.connect_timeout;
        let (write, read, heart_beat, early) =
            tokio::time::timeout(timeout, self.handshake(token))
                .await
                .map_err(|_| Error::Timeout {
                    operation: "STOMP CONNECTED",
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })??;

        tracing::info!(
            url = %self.config.url,
            outgoing_ms = heart_beat.0,
            incoming_ms = heart_beat.1,
            "STOMP session established"
        );

        let (link, peer) = Link::pair();
        for frame in early {
            let _ = peer.inbound.send(LinkEvent::Frame(frame));
        }
        tokio::spawn(pump(write, read, peer, heart_beat));
        Ok(link)
    }

    async fn handshake(
        &self,
        token: &SecretString,
    ) -> Result<(WsWrite, WsRead, (u64, u64), Vec<Frame>), Error> {
        let url = &self.config.url;
        tracing::debug!(url = %url, "Connecting to STOMP endpoint");

        let uri: tungstenite::http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| {
                Error::WebSocketConnect(e.to_string())
            })?;
        let request = ClientRequestBuilder::new(uri);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_upgrade_error)?;
        let (mut write, mut read) = ws_stream.split();

        let host = url.host_str().unwrap_or("localhost");
        let connect = Frame::connect(host, token, self.config.heart_beat);
        write
            .send(Message::Text(connect.encode().into()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        loop {
            let Some(msg) = read.next().await else {
                return Err(Error::WebSocketClosed {
                    code: 1006,
                    reason: "stream ended during STOMP handshake".into(),
                });
            };
            match msg.map_err(|e| Error::WebSocketConnect(e.to_string()))? {
                Message::Text(text) => {
                    let mut frames = Frame::parse_all(&text)?.into_iter();
                    while let Some(frame) = frames.next() {
                        match frame.command {
                            Command::Connected => {
                                let server_hb = frame.heart_beat().unwrap_or((0, 0));
                                let negotiated =
                                    negotiate_heart_beat(self.config.heart_beat, server_hb);
                                return Ok((write, read, negotiated, frames.collect()));
                            }
                            Command::Error => {
                                return Err(Error::AuthRejected {
                                    message: frame.error_message(),
                                });
                            }
                            other => {
                                tracing::debug!(command = %other, "Ignoring frame before CONNECTED");
                            }
                        }
                    }
                }
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or((1005, String::new()), |cf| {
                        (u16::from(cf.code), cf.reason.to_string())
                    });
                    return Err(Error::WebSocketClosed { code, reason });
                }
                _ => {}
            }
        }
    }
}

fn map_upgrade_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Error::AuthRejected {
                message: format!("WebSocket upgrade refused ({})", response.status()),
            }
        }
        other => Error::WebSocketConnect(other.to_string()),
    }
}

// ── Pump ─────────────────────────────────────────────────────────────

/// Shuttle frames between the socket and the link until either side ends.
async fn pump(mut write: WsWrite, mut read: WsRead, mut peer: LinkPeer, heart_beat: (u64, u64)) {
    let (outgoing_ms, incoming_ms) = heart_beat;
    let mut beat = (outgoing_ms > 0).then(|| {
        let period = Duration::from_millis(outgoing_ms);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let silence_limit = (incoming_ms > 0).then(|| Duration::from_millis(incoming_ms.saturating_mul(2)));
    let mut last_seen = Instant::now();

    let reason = loop {
        let deadline = silence_limit.map(|limit| last_seen + limit);
        tokio::select! {
            outbound = peer.outbound.recv() => {
                let Some(frame) = outbound else {
                    // Link dropped by its owner: close quietly.
                    let _ = write.send(Message::Close(None)).await;
                    tracing::debug!("STOMP link released, socket closed");
                    return;
                };
                tracing::trace!(command = %frame.command, "STOMP >>");
                if let Err(e) = write.send(Message::Text(frame.encode().into())).await {
                    break format!("send failed: {e}");
                }
            }
            () = tick(beat.as_mut()) => {
                if let Err(e) = write.send(Message::Text("\n".into())).await {
                    break format!("heart-beat send failed: {e}");
                }
            }
            () = watchdog(deadline) => {
                tracing::warn!(incoming_ms, "No data from server within heart-beat window");
                break "heart-beat timeout".to_owned();
            }
            msg = read.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reason) = forward(&text, &peer) {
                            break reason;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map_or_else(
                            || "closed by server".to_owned(),
                            |cf| format!("closed by server ({}): {}", cf.code, cf.reason),
                        );
                    }
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_owned(),
                    // Ping/Pong handled by tungstenite; binary frames are not STOMP.
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    tracing::info!(reason = %reason, "STOMP link closed");
    let _ = peer.inbound.send(LinkEvent::Closed(reason));
}

/// Parse one text message and hand its frames to the link.
///
/// Returns `Some(reason)` when the connection must end.
fn forward(text: &str, peer: &LinkPeer) -> Option<String> {
    let frames = match Frame::parse_all(text) {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed STOMP data");
            return None;
        }
    };
    for frame in frames {
        tracing::trace!(command = %frame.command, "STOMP <<");
        if frame.command == Command::Error {
            return Some(format!("STOMP error: {}", frame.error_message()));
        }
        if peer.inbound.send(LinkEvent::Frame(frame)).is_err() {
            return Some("link receiver dropped".to_owned());
        }
    }
    None
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn watchdog(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
