//! One task per socket attempt.
//!
//! The task dials the gateway's Unix socket, runs the WebSocket client
//! handshake over it, then pumps frames both ways. Every event it reports is
//! tagged with the attempt's epoch; the bridge decides whether it still cares.

use crate::error::TransportError;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::net::UnixStream;
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{WebSocketStream, client_async};

pub(crate) const REASON_CONNECT_FAILED: &str = "connect_failed";
pub(crate) const REASON_CONNECT_TIMEOUT: &str = "connect_timeout";
const REASON_CLOSED_BY_CLIENT: &str = "closed_by_client";
/// Close code for a connection that ended without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code for a close frame that carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug)]
pub(crate) enum SocketEvent {
    Opened { epoch: u64 },
    Frame { epoch: u64, text: String },
    Closed { epoch: u64, reason: String },
}

/// The bridge's handle on one socket attempt. Dropping it closes the socket.
pub(crate) struct SocketHandle {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SocketHandle {
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn write(&self, frame: String) {
        if self.outbound.send(Outbound::Text(frame)).is_err() {
            trace!("Socket epoch {} already finished, frame dropped", self.epoch);
        }
    }

    pub(crate) fn close(self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

pub(crate) fn spawn_socket(
    epoch: u64,
    socket_path: PathBuf,
    url: String,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<SocketEvent>,
) -> SocketHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    TokioSpawn(run_socket(
        epoch,
        socket_path,
        url,
        connect_timeout,
        outbound_rx,
        events,
    ));
    SocketHandle {
        epoch,
        outbound: outbound_tx,
    }
}

async fn run_socket(
    epoch: u64,
    socket_path: PathBuf,
    url: String,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    let opened = tokio::select! {
        opened = timeout(connect_timeout, open(&socket_path, &url)) => opened,
        () = closed_while_opening(&mut outbound) => {
            debug!("Socket epoch {epoch} closed before the handshake finished");
            let _ = events.send(SocketEvent::Closed {
                epoch,
                reason: REASON_CLOSED_BY_CLIENT.to_string(),
            });
            return;
        }
    };

    let reason = match opened {
        Ok(Ok(ws)) => {
            debug!("Socket epoch {epoch} open via {}", socket_path.display());
            let _ = events.send(SocketEvent::Opened { epoch });
            pump(epoch, ws, &mut outbound, &events).await
        }
        Ok(Err(e)) => {
            warn!(
                "Socket epoch {epoch} failed to open {}: {e}",
                socket_path.display()
            );
            REASON_CONNECT_FAILED.to_string()
        }
        Err(_) => {
            warn!(
                "Socket epoch {epoch}: no handshake from {} within {connect_timeout:?}",
                socket_path.display()
            );
            REASON_CONNECT_TIMEOUT.to_string()
        }
    };

    let _ = events.send(SocketEvent::Closed { epoch, reason });
}

async fn open(socket_path: &Path, url: &str) -> Result<WebSocketStream<UnixStream>, TransportError> {
    let stream = UnixStream::connect(socket_path).await?;
    let (ws, _response) = client_async(url, stream).await?;
    Ok(ws)
}

/// Resolves once the bridge asks to close. Nothing is written before the
/// socket opens, so stray frames are dropped.
async fn closed_while_opening(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Some(out) = outbound.recv().await {
        match out {
            Outbound::Close => return,
            Outbound::Text(_) => trace!("Frame dropped while the socket is opening"),
        }
    }
}

/// Relay frames until either side closes. Returns the close reason.
async fn pump(
    epoch: u64,
    ws: WebSocketStream<UnixStream>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::UnboundedSender<SocketEvent>,
) -> String {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(frame)) => {
                    if let Err(e) = write.send(Message::Text(frame.into())).await {
                        let error = TransportError::Send {
                            message: e.to_string(),
                            location: ErrorLocation::from(Location::caller()),
                        };
                        warn!("Socket epoch {epoch}: {error}");
                        return close_reason_for_code(ABNORMAL_CLOSURE);
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    return REASON_CLOSED_BY_CLIENT.to_string();
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(SocketEvent::Frame { epoch, text: text.as_str().to_owned() });
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(SocketEvent::Frame { epoch, text });
                    }
                    Err(_) => warn!("Socket epoch {epoch}: dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => return close_reason(frame),
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let error = TransportError::Read {
                        message: e.to_string(),
                        location: ErrorLocation::from(Location::caller()),
                    };
                    warn!("Socket epoch {epoch}: {error}");
                    return close_reason_for_code(ABNORMAL_CLOSURE);
                }
                None => return close_reason_for_code(ABNORMAL_CLOSURE),
            },
        }
    }
}

pub(crate) fn close_reason(frame: Option<CloseFrame>) -> String {
    match frame {
        Some(frame) => {
            let reason = frame.reason.as_str().trim();
            if reason.is_empty() {
                close_reason_for_code(u16::from(frame.code))
            } else {
                reason.to_string()
            }
        }
        None => close_reason_for_code(NO_STATUS_RECEIVED),
    }
}

fn close_reason_for_code(code: u16) -> String {
    format!("ws_close_{code}")
}
