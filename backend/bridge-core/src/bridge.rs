//! The bridge handle and the task that owns all connection state.
//!
//! # Architecture
//!
//! Uses an actor pattern so every mutation is serialized:
//! - Public methods send commands over an unbounded channel and never block
//! - Socket tasks report events over a second channel, tagged with their epoch
//! - A dedicated task feeds both, plus timer deadlines, into [`BridgeMachine`]
//!   and carries out the effects it returns
//! - Reads go through a `watch` snapshot updated after every input

use crate::config::BridgeConfig;
use crate::correlator::CallResult;
use crate::diagnostics::DiagnosticsLog;
use crate::error::RpcError;
use crate::machine::{BridgeMachine, Effect, Input};
use crate::paths::GatewayPaths;
use crate::state::{BridgeEvent, BridgeSnapshot, StateChange};
use crate::token::{FileTokenSource, TokenSource};
use crate::transport::{SocketEvent, SocketHandle, spawn_socket};

use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use serde_json::Value;
use tokio::spawn as TokioSpawn;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(String),
    Call {
        method: String,
        params: Option<Value>,
        timeout: Duration,
        reply: oneshot::Sender<CallResult>,
    },
}

impl From<Command> for Input {
    fn from(command: Command) -> Self {
        match command {
            Command::Connect => Input::Connect,
            Command::Disconnect => Input::Disconnect,
            Command::Send(frame) => Input::Send(frame),
            Command::Call {
                method,
                params,
                timeout,
                reply,
            } => Input::Call {
                method,
                params,
                timeout,
                reply,
            },
        }
    }
}

impl From<SocketEvent> for Input {
    fn from(event: SocketEvent) -> Self {
        match event {
            SocketEvent::Opened { epoch } => Input::Opened { epoch },
            SocketEvent::Frame { epoch, text } => Input::Frame { epoch, text },
            SocketEvent::Closed { epoch, reason } => Input::Closed { epoch, reason },
        }
    }
}

/// Handle to a running gateway bridge.
///
/// This type is `Clone`; all clones drive the same connection. When the last
/// clone is dropped the bridge disconnects and its task exits.
#[derive(Clone)]
pub struct GatewayBridge {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<BridgeSnapshot>,
    default_call_timeout: Duration,
}

/// Ordered feed of state changes and push messages for the UI layer.
pub struct BridgeEvents {
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl BridgeEvents {
    /// Next event, or `None` once the bridge task has stopped.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next state change, skipping push messages.
    pub async fn next_state(&mut self) -> Option<StateChange> {
        while let Some(event) = self.rx.recv().await {
            if let BridgeEvent::State(change) = event {
                return Some(change);
            }
        }
        None
    }
}

impl GatewayBridge {
    /// Start the bridge task. The bridge stays idle until [`connect`](Self::connect).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(
        config: BridgeConfig,
        socket_path: PathBuf,
        tokens: impl TokenSource,
        diagnostics: DiagnosticsLog,
    ) -> (Self, BridgeEvents) {
        let target = format!("{} via {}", config.gateway.url, socket_path.display());
        let machine = BridgeMachine::new(&config, Box::new(tokens), diagnostics, target);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

        let driver = BridgeDriver {
            machine,
            socket: None,
            socket_path,
            url: config.gateway.url.clone(),
            connect_timeout: config.timing.connect_timeout(),
            socket_tx,
            event_tx,
            snapshot_tx,
        };
        TokioSpawn(driver.run(command_rx, socket_rx));

        let bridge = Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            default_call_timeout: config.timing.default_call_timeout(),
        };
        (bridge, BridgeEvents { rx: event_rx })
    }

    /// Start a bridge wired to the gateway's well-known files.
    ///
    /// Config overrides win over the detected paths.
    pub fn spawn_with_paths(config: BridgeConfig, paths: &GatewayPaths) -> (Self, BridgeEvents) {
        let socket_path = config.socket_path(paths);
        let tokens = FileTokenSource::new(config.token_path(paths));
        let diagnostics = DiagnosticsLog::to_file(config.log_path(paths));
        Self::spawn(config, socket_path, tokens, diagnostics)
    }

    /// Open a connection unless one is already open or opening.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close the connection and suppress automatic reconnects until the next `connect`.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Forward a raw frame to the gateway. Dropped silently if the socket is not open.
    pub fn send(&self, frame: impl Into<String>) {
        self.command(Command::Send(frame.into()));
    }

    /// Current state as of the last processed event.
    pub fn state(&self) -> BridgeSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn watch_state(&self) -> watch::Receiver<BridgeSnapshot> {
        self.snapshot.clone()
    }

    /// Issue a correlated RPC.
    ///
    /// # Errors
    ///
    /// - [`RpcError::NotConnected`] if the socket is not open
    /// - [`RpcError::Remote`] if the gateway answered with `error`
    /// - [`RpcError::Timeout`] if nothing arrived within `timeout`
    /// - [`RpcError::ConnectionClosed`] if the socket went away first
    /// - [`RpcError::BridgeStopped`] if the bridge task is gone
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Call {
                method: method.into(),
                params,
                timeout,
                reply,
            })
            .map_err(|_| RpcError::bridge_stopped())?;

        response.await.map_err(|_| RpcError::bridge_stopped())?
    }

    /// [`call`](Self::call) with the configured default timeout.
    pub async fn call_default(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        self.call(method, params, self.default_call_timeout).await
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Bridge task is not running, command dropped");
        }
    }
}

struct BridgeDriver {
    machine: BridgeMachine,
    socket: Option<SocketHandle>,
    socket_path: PathBuf,
    url: String,
    connect_timeout: Duration,
    socket_tx: mpsc::UnboundedSender<SocketEvent>,
    event_tx: mpsc::UnboundedSender<BridgeEvent>,
    snapshot_tx: watch::Sender<BridgeSnapshot>,
}

impl BridgeDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    ) {
        info!("Gateway bridge task started");

        loop {
            let deadline = self.machine.next_deadline();
            let input = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Input::from(command),
                    None => break,
                },
                Some(event) = socket_events.recv() => Input::from(event),
                _ = sleep_until_deadline(deadline) => Input::Tick,
            };
            self.apply(input);
        }

        // Every handle is gone: settle like a manual disconnect.
        self.apply(Input::Disconnect);
        info!("Gateway bridge task stopped");
    }

    fn apply(&mut self, input: Input) {
        for effect in self.machine.handle(input, Instant::now()) {
            self.execute(effect);
        }
        self.snapshot_tx.send_replace(self.machine.snapshot());
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Open { epoch } => {
                if let Some(previous) = self.socket.take() {
                    previous.close();
                }
                self.socket = Some(spawn_socket(
                    epoch,
                    self.socket_path.clone(),
                    self.url.clone(),
                    self.connect_timeout,
                    self.socket_tx.clone(),
                ));
            }
            Effect::Write { epoch, frame } => match &self.socket {
                Some(socket) if socket.epoch() == epoch => socket.write(frame),
                _ => warn!("No open socket for epoch {epoch}, frame dropped"),
            },
            Effect::Close { epoch } => {
                if self.socket.as_ref().is_some_and(|s| s.epoch() == epoch) {
                    if let Some(socket) = self.socket.take() {
                        socket.close();
                    }
                }
            }
            Effect::Emit(event) => {
                // The UI may have stopped listening; that is not our failure.
                let _ = self.event_tx.send(event);
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
