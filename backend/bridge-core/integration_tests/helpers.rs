//! Test helpers for bridge integration tests.
//!
//! This module provides a mock gateway daemon for end-to-end tests:
//! - WebSocket server on a Unix socket in a temp directory
//! - `auth`, `ping`, `echo` and `silent` methods
//! - Server-initiated pushes and abrupt connection drops
//! - A listener that accepts but never completes the handshake

use bridge_core::config::BridgeConfig;
use bridge_core::diagnostics::DiagnosticsLog;
use bridge_core::token::FileTokenSource;
use bridge_core::{BridgeEvent, BridgeEvents, GatewayBridge, StateChange};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub const TEST_TOKEN: &str = "test-token-12345";
/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
enum ServerCommand {
    Push(String),
    DropAll,
}

/// A gateway stand-in listening on `{dir}/gateway.sock`.
pub struct MockGateway {
    pub dir: TempDir,
    pub socket_path: PathBuf,
    pub token_path: PathBuf,
    pub log_path: PathBuf,
    commands: broadcast::Sender<ServerCommand>,
    accepted: Arc<AtomicUsize>,
}

impl MockGateway {
    /// Start listening and write `token` (if any) to the token file.
    pub async fn start(token: Option<&str>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let socket_path = dir.path().join("gateway.sock");
        let token_path = dir.path().join("gateway-token");
        let log_path = dir.path().join("logs").join("gateway.log");
        if let Some(token) = token {
            std::fs::write(&token_path, format!("{token}\n")).expect("Failed to write token");
        }

        let listener = UnixListener::bind(&socket_path).expect("Failed to bind mock gateway");
        let (commands, _) = broadcast::channel(16);
        let accepted = Arc::new(AtomicUsize::new(0));

        let server_commands = commands.clone();
        let server_accepted = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = server_accepted.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::spawn(serve(stream, n, server_commands.subscribe()));
            }
        });

        Self {
            dir,
            socket_path,
            token_path,
            log_path,
            commands,
            accepted,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Send an unsolicited frame on every live connection.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.commands.send(ServerCommand::Push(frame.into()));
    }

    /// Drop every live connection without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(ServerCommand::DropAll);
    }

    /// Bridge wired to this gateway with fast reconnects.
    pub fn spawn_bridge(&self) -> (GatewayBridge, BridgeEvents) {
        GatewayBridge::spawn(
            fast_config(),
            self.socket_path.clone(),
            FileTokenSource::new(&self.token_path),
            DiagnosticsLog::to_file(&self.log_path),
        )
    }
}

/// Accepts connections on `{dir}/gateway.sock` and never answers, like a
/// daemon that is hung mid-startup.
pub struct StalledListener {
    pub dir: TempDir,
    pub socket_path: PathBuf,
    accepted: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl StalledListener {
    pub fn start() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let socket_path = dir.path().join("gateway.sock");
        let listener = UnixListener::bind(&socket_path).expect("Failed to bind stalled listener");
        let accepted = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));

        let server_accepted = Arc::clone(&accepted);
        let server_released = Arc::clone(&released);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                server_accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(hold(stream, Arc::clone(&server_released)));
            }
        });

        Self {
            dir,
            socket_path,
            accepted,
            released,
        }
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Connections the client has since closed.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

/// Swallow the handshake request and wait for the client to hang up.
async fn hold(mut stream: UnixStream, released: Arc<AtomicUsize>) {
    let mut buf = [0u8; 1024];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
    released.fetch_add(1, Ordering::SeqCst);
}

/// Poll `condition` until it holds, failing the test after [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timed out waiting for condition");
}

pub fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.reconnect.base_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;
    config.reconnect.jitter_ms = 0;
    config.timing.auth_timeout_ms = 1_000;
    config
}

async fn serve(stream: UnixStream, n: usize, mut commands: broadcast::Receiver<ServerCommand>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(ServerCommand::Push(frame)) => {
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                // Dropping the stream ends the connection without a close frame.
                Ok(ServerCommand::DropAll) | Err(_) => return,
            },
            inbound = ws.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(_)) => continue,
                    _ => return,
                };
                if let Some(reply) = respond(&text, n) {
                    if ws.send(Message::Text(reply.into())).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn respond(text: &str, n: usize) -> Option<String> {
    let request: Value = serde_json::from_str(text).ok()?;
    let id = request.get("id")?.clone();
    let method = request.get("method")?.as_str()?;

    let reply = match method {
        "auth" => {
            if request["params"]["token"] == TEST_TOKEN {
                json!({ "id": id, "result": { "authenticated": true, "connectId": format!("conn-{n}") } })
            } else {
                json!({ "id": id, "error": "invalid token" })
            }
        }
        "ping" => json!({ "id": id, "result": "pong" }),
        "echo" => json!({ "id": id, "result": request.get("params").cloned().unwrap_or(Value::Null) }),
        "silent" => return None,
        other => json!({ "id": id, "error": format!("unknown method: {other}") }),
    };
    Some(reply.to_string())
}

/// Next state change, failing the test if none arrives in time.
pub async fn next_state(events: &mut BridgeEvents) -> StateChange {
    tokio::time::timeout(WAIT, events.next_state())
        .await
        .expect("Timed out waiting for a state change")
        .expect("Bridge event feed closed")
}

/// Next event of any kind, failing the test if none arrives in time.
pub async fn next_event(events: &mut BridgeEvents) -> BridgeEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("Timed out waiting for an event")
        .expect("Bridge event feed closed")
}
