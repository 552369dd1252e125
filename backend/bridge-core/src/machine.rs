//! Connection state machine.
//!
//! [`BridgeMachine::handle`] is the only transition function. It consumes one
//! [`Input`] at a time (public commands, socket events tagged with their epoch,
//! timer ticks) and returns the [`Effect`]s the driver must carry out. It never
//! performs socket I/O itself, which keeps every transition testable with
//! explicit instants.
//!
//! # Epochs
//!
//! Each socket attempt gets a fresh epoch. Events from any epoch other than the
//! one held by the current phase are stale and ignored, so a superseded socket's
//! late close or message cannot disturb its replacement.

use crate::config::{BridgeConfig, TimingConfig};
use crate::correlator::{CallResult, RpcCorrelator, Settled, Waiter};
use crate::diagnostics::DiagnosticsLog;
use crate::error::RpcError;
use crate::heartbeat::{Heartbeat, HeartbeatAction};
use crate::protocol::{AuthResult, METHOD_AUTH, METHOD_PING, parse_response};
use crate::reconnect::ReconnectPolicy;
use crate::state::{BridgeEvent, BridgeSnapshot, ConnectionState, StateChange};
use crate::token::TokenSource;

use std::time::Duration;

use backoff::backoff::Backoff;
use log::{debug, trace};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::Instant;

pub const REASON_MANUAL_DISCONNECT: &str = "manual_disconnect";
pub const REASON_MISSING_TOKEN: &str = "missing_token";
pub const REASON_AUTH_TIMEOUT: &str = "auth_timeout";
pub const REASON_AUTH_REJECTED: &str = "auth_rejected";
pub const REASON_AUTH_FAILED: &str = "auth_failed";
pub const REASON_HEARTBEAT_TIMEOUT: &str = "heartbeat_timeout";
pub const REASON_HEARTBEAT_STALLED: &str = "heartbeat_stalled";

#[derive(Debug)]
pub enum Input {
    Connect,
    Disconnect,
    /// Fire-and-forget raw frame from the UI layer.
    Send(String),
    Call {
        method: String,
        params: Option<Value>,
        timeout: Duration,
        reply: oneshot::Sender<CallResult>,
    },
    Opened {
        epoch: u64,
    },
    Frame {
        epoch: u64,
        text: String,
    },
    Closed {
        epoch: u64,
        reason: String,
    },
    /// A deadline from [`BridgeMachine::next_deadline`] may have passed.
    Tick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a new socket attempt tagged `epoch`.
    Open { epoch: u64 },
    Write { epoch: u64, frame: String },
    Close { epoch: u64 },
    Emit(BridgeEvent),
}

#[derive(Debug)]
enum Phase {
    Disconnected {
        retry_at: Option<Instant>,
    },
    Connecting {
        epoch: u64,
    },
    Connected {
        epoch: u64,
        auth_call: Option<u64>,
    },
    Authenticated {
        epoch: u64,
        heartbeat: Heartbeat,
    },
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Phase::Disconnected { .. } => ConnectionState::Disconnected,
            Phase::Connecting { .. } => ConnectionState::Connecting,
            Phase::Connected { .. } => ConnectionState::Connected,
            Phase::Authenticated { .. } => ConnectionState::Authenticated,
        }
    }

    /// Epoch of the socket this phase owns, open or opening.
    fn epoch(&self) -> Option<u64> {
        match self {
            Phase::Disconnected { .. } => None,
            Phase::Connecting { epoch }
            | Phase::Connected { epoch, .. }
            | Phase::Authenticated { epoch, .. } => Some(*epoch),
        }
    }

    /// Epoch of the socket if it is open for writes.
    fn open_epoch(&self) -> Option<u64> {
        match self {
            Phase::Connected { epoch, .. } | Phase::Authenticated { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }
}

pub struct BridgeMachine {
    phase: Phase,
    last_epoch: u64,
    manually_closed: bool,
    reconnect_count: u64,
    connect_id: Option<String>,
    last_reason: Option<String>,
    correlator: RpcCorrelator,
    policy: ReconnectPolicy,
    timing: TimingConfig,
    tokens: Box<dyn TokenSource>,
    diagnostics: DiagnosticsLog,
    target: String,
    effects: Vec<Effect>,
}

impl BridgeMachine {
    /// `target` only labels diagnostics (e.g. "ws://localhost via /path/gateway.sock").
    pub fn new(
        config: &BridgeConfig,
        tokens: Box<dyn TokenSource>,
        diagnostics: DiagnosticsLog,
        target: impl Into<String>,
    ) -> Self {
        Self {
            phase: Phase::Disconnected { retry_at: None },
            last_epoch: 0,
            manually_closed: false,
            reconnect_count: 0,
            connect_id: None,
            last_reason: None,
            correlator: RpcCorrelator::new(),
            policy: ReconnectPolicy::from_config(&config.reconnect),
            timing: config.timing.clone(),
            tokens,
            diagnostics,
            target: target.into(),
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.phase.state()
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            state: self.phase.state(),
            reconnect_count: self.reconnect_count,
            connect_id: self.connect_id.clone(),
            last_reason: self.last_reason.clone(),
        }
    }

    /// Attempts since the last successful authentication.
    pub fn reconnect_attempt(&self) -> u32 {
        self.policy.attempt()
    }

    pub fn pending_calls(&self) -> usize {
        self.correlator.len()
    }

    /// Epoch of the socket currently owned, if any.
    pub fn current_epoch(&self) -> Option<u64> {
        self.phase.epoch()
    }

    /// Earliest instant at which a [`Input::Tick`] has work to do.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        let phase_deadline = match &self.phase {
            Phase::Disconnected { retry_at } => *retry_at,
            Phase::Authenticated { heartbeat, .. } => Some(heartbeat.next_tick()),
            _ => None,
        };
        match (phase_deadline, self.correlator.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Effect> {
        match input {
            Input::Connect => self.connect(),
            Input::Disconnect => self.disconnect(),
            Input::Send(frame) => self.send(frame),
            Input::Call {
                method,
                params,
                timeout,
                reply,
            } => self.call(method, params, timeout, reply, now),
            Input::Opened { epoch } => self.opened(epoch, now),
            Input::Frame { epoch, text } => self.frame(epoch, text, now),
            Input::Closed { epoch, reason } => self.closed(epoch, reason, now),
            Input::Tick => self.tick(now),
        }
        std::mem::take(&mut self.effects)
    }

    // ============================================
    // PUBLIC COMMANDS
    // ============================================

    fn connect(&mut self) {
        self.manually_closed = false;
        if self.phase.epoch().is_some() {
            debug!("connect() ignored: socket already {}", self.phase.state());
            return;
        }
        // Replacing the phase drops any scheduled retry.
        self.open_socket();
    }

    fn disconnect(&mut self) {
        self.manually_closed = true;
        let epoch = self.phase.epoch();

        // Cancels the retry timer and stops the heartbeat.
        self.phase = Phase::Disconnected { retry_at: None };
        let failed = self.correlator.fail_all(RpcError::connection_closed);
        if failed > 0 {
            debug!("Failed {failed} pending call(s) on manual disconnect");
        }
        if let Some(epoch) = epoch {
            self.effects.push(Effect::Close { epoch });
        }
        self.connect_id = None;
        self.transition(
            ConnectionState::Disconnected,
            Some(REASON_MANUAL_DISCONNECT.to_string()),
            None,
        );
    }

    fn send(&mut self, frame: String) {
        match self.phase.open_epoch() {
            Some(epoch) => self.effects.push(Effect::Write { epoch, frame }),
            None => debug!("Dropping send while {}", self.phase.state()),
        }
    }

    fn call(
        &mut self,
        method: String,
        params: Option<Value>,
        timeout: Duration,
        reply: oneshot::Sender<CallResult>,
        now: Instant,
    ) {
        let Some(epoch) = self.phase.open_epoch() else {
            let _ = reply.send(Err(RpcError::not_connected()));
            return;
        };

        // Encode failures are reported to the caller by the correlator.
        if let Ok(registered) = self.correlator.register(
            &method,
            params.as_ref(),
            timeout,
            now,
            Waiter::Caller(reply),
        ) {
            self.effects.push(Effect::Write {
                epoch,
                frame: registered.frame,
            });
        }
    }

    // ============================================
    // SOCKET EVENTS
    // ============================================

    fn opened(&mut self, epoch: u64, now: Instant) {
        match self.phase {
            Phase::Connecting { epoch: current } if current == epoch => {}
            _ => {
                trace!("Ignoring open from stale socket epoch {epoch}");
                return;
            }
        }

        self.diagnostics.record("socket open, authenticating...");
        self.phase = Phase::Connected {
            epoch,
            auth_call: None,
        };
        self.transition(ConnectionState::Connected, None, None);
        self.authenticate(epoch, now);
    }

    fn frame(&mut self, epoch: u64, text: String, now: Instant) {
        if self.phase.epoch() != Some(epoch) {
            trace!("Ignoring frame from stale socket epoch {epoch}");
            return;
        }

        if let Some(response) = parse_response(&text) {
            if let Some(settled) = self.correlator.resolve(response) {
                self.on_settled(settled, now);
                return;
            }
        }

        self.effects
            .push(Effect::Emit(BridgeEvent::Message(text)));
    }

    fn closed(&mut self, epoch: u64, reason: String, now: Instant) {
        if self.phase.epoch() != Some(epoch) {
            trace!("Ignoring close from stale socket epoch {epoch}: {reason}");
            return;
        }

        self.diagnostics
            .record(format!("socket closed (epoch {epoch}): reason={reason}"));
        self.lose_connection(reason, now);
    }

    fn tick(&mut self, now: Instant) {
        for settled in self.correlator.expire(now) {
            self.on_settled(settled, now);
        }

        let heartbeat = match &mut self.phase {
            Phase::Authenticated { epoch, heartbeat } => {
                heartbeat.poll(now).map(|action| (*epoch, action))
            }
            _ => None,
        };
        match heartbeat {
            Some((epoch, HeartbeatAction::Probe)) => self.send_probe(epoch, now),
            Some((_, HeartbeatAction::Stalled)) => {
                self.diagnostics
                    .record("previous ping never answered, forcing close");
                self.drop_connection(REASON_HEARTBEAT_STALLED, now);
            }
            None => {}
        }

        if let Phase::Disconnected {
            retry_at: Some(retry_at),
        } = self.phase
        {
            if retry_at <= now {
                if self.manually_closed {
                    self.phase = Phase::Disconnected { retry_at: None };
                } else {
                    self.open_socket();
                }
            }
        }
    }

    // ============================================
    // AUTHENTICATION AND HEARTBEAT
    // ============================================

    fn authenticate(&mut self, epoch: u64, now: Instant) {
        let Some(token) = self.tokens.read_token() else {
            self.diagnostics.record(format!(
                "auth failed: no token at {}",
                self.tokens.describe()
            ));
            self.drop_connection(REASON_MISSING_TOKEN, now);
            return;
        };
        self.diagnostics
            .record(format!("sending auth (token length={})", token.len()));

        let params = json!({ "token": token.expose() });
        match self.correlator.register(
            METHOD_AUTH,
            Some(&params),
            self.timing.auth_timeout(),
            now,
            Waiter::Auth,
        ) {
            Ok(registered) => {
                self.phase = Phase::Connected {
                    epoch,
                    auth_call: Some(registered.id),
                };
                self.effects.push(Effect::Write {
                    epoch,
                    frame: registered.frame,
                });
            }
            Err(e) => {
                self.diagnostics
                    .record(format!("auth request could not be encoded: {e}"));
                self.drop_connection(REASON_AUTH_FAILED, now);
            }
        }
    }

    fn on_settled(&mut self, settled: Settled, now: Instant) {
        match settled {
            Settled::Delivered => {}
            Settled::Auth { id, outcome } => self.on_auth_result(id, outcome, now),
            Settled::Heartbeat { id, outcome } => self.on_heartbeat_result(id, outcome, now),
        }
    }

    fn on_auth_result(&mut self, id: u64, outcome: CallResult, now: Instant) {
        let epoch = match self.phase {
            Phase::Connected {
                epoch,
                auth_call: Some(call),
            } if call == id => epoch,
            _ => {
                trace!("Ignoring settled auth call {id} outside its connection");
                return;
            }
        };

        match outcome {
            Ok(value) => {
                let auth = AuthResult::from_value(value);
                if auth.is_rejected() {
                    self.diagnostics.record("auth rejected by gateway");
                    self.drop_connection(REASON_AUTH_REJECTED, now);
                    return;
                }

                self.connect_id = auth.connect_id;
                self.policy.reset();
                self.diagnostics.record(format!(
                    "authenticated, connectId={}",
                    self.connect_id.as_deref().unwrap_or("<none>")
                ));
                self.phase = Phase::Authenticated {
                    epoch,
                    heartbeat: Heartbeat::start(self.timing.heartbeat_interval(), now),
                };
                self.transition(ConnectionState::Authenticated, None, None);
            }
            Err(RpcError::Timeout { .. }) => {
                self.diagnostics.record("auth timed out");
                self.drop_connection(REASON_AUTH_TIMEOUT, now);
            }
            Err(e) => {
                let reason = match e.message() {
                    "" => REASON_AUTH_FAILED.to_string(),
                    message => message.to_string(),
                };
                self.diagnostics.record(format!("auth failed: {reason}"));
                self.drop_connection(&reason, now);
            }
        }
    }

    fn send_probe(&mut self, epoch: u64, now: Instant) {
        let timeout = self.timing.heartbeat_timeout();
        match self
            .correlator
            .register(METHOD_PING, None, timeout, now, Waiter::Heartbeat)
        {
            Ok(registered) => {
                if let Phase::Authenticated { heartbeat, .. } = &mut self.phase {
                    heartbeat.probe_sent(registered.id);
                }
                trace!("Heartbeat probe {} sent", registered.id);
                self.effects.push(Effect::Write {
                    epoch,
                    frame: registered.frame,
                });
            }
            Err(e) => debug!("Heartbeat probe could not be encoded: {e}"),
        }
    }

    fn on_heartbeat_result(&mut self, id: u64, outcome: CallResult, now: Instant) {
        let Phase::Authenticated { heartbeat, .. } = &mut self.phase else {
            return;
        };
        if !heartbeat.settle(id) {
            return;
        }

        match outcome {
            Ok(_) => trace!("Heartbeat probe {id} answered"),
            Err(RpcError::Timeout { .. }) => {
                self.diagnostics
                    .record(format!("ping {id} timed out, forcing close"));
                self.drop_connection(REASON_HEARTBEAT_TIMEOUT, now);
            }
            // Any response proves the peer is alive.
            Err(e) => debug!("Heartbeat probe {id} answered with error: {e}"),
        }
    }

    // ============================================
    // TEARDOWN AND RECONNECT
    // ============================================

    fn open_socket(&mut self) {
        self.last_epoch += 1;
        let epoch = self.last_epoch;
        self.phase = Phase::Connecting { epoch };

        self.diagnostics.record(format!(
            "opening socket to {} (attempt {}, epoch {epoch})",
            self.target,
            self.policy.attempt()
        ));
        self.transition(ConnectionState::Connecting, None, None);
        self.effects.push(Effect::Open { epoch });
    }

    /// Close the socket we own, then tear down as if the transport had closed.
    fn drop_connection(&mut self, reason: &str, now: Instant) {
        if let Some(epoch) = self.phase.epoch() {
            self.effects.push(Effect::Close { epoch });
        }
        self.lose_connection(reason.to_string(), now);
    }

    fn lose_connection(&mut self, reason: String, now: Instant) {
        // Leaving the connected phases stops the heartbeat.
        self.phase = Phase::Disconnected { retry_at: None };
        let failed = self.correlator.fail_all(RpcError::connection_closed);
        if failed > 0 {
            debug!("Failed {failed} pending call(s): {reason}");
        }
        self.connect_id = None;

        if self.manually_closed {
            self.transition(ConnectionState::Disconnected, Some(reason), None);
        } else {
            self.schedule_reconnect(reason, now);
        }
    }

    fn schedule_reconnect(&mut self, reason: String, now: Instant) {
        if self.manually_closed {
            return;
        }
        if let Phase::Disconnected { retry_at: Some(_) } = self.phase {
            trace!("Reconnect already scheduled, ignoring: {reason}");
            return;
        }

        let delay = self
            .policy
            .next_backoff()
            .unwrap_or_else(|| self.policy.base_delay(u32::MAX));
        self.reconnect_count += 1;
        self.phase = Phase::Disconnected {
            retry_at: Some(now + delay),
        };

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.diagnostics
            .record(format!("reconnecting in {delay_ms}ms (reason={reason})"));
        self.transition(ConnectionState::Disconnected, Some(reason), Some(delay_ms));
    }

    fn transition(
        &mut self,
        state: ConnectionState,
        reason: Option<String>,
        reconnect_in_ms: Option<u64>,
    ) {
        if let Some(reason) = &reason {
            self.last_reason = Some(reason.clone());
        }
        self.diagnostics.record(format!(
            "state -> {state}{}",
            reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default()
        ));

        self.effects.push(Effect::Emit(BridgeEvent::State(StateChange {
            state,
            reason,
            reconnect_in_ms,
            reconnect_count: self.reconnect_count,
            connect_id: self.connect_id.clone(),
        })));
    }
}
