use crate::config::BridgeConfig;
use crate::diagnostics::DiagnosticsLog;
use crate::error::RpcError;
use crate::machine::{
    BridgeMachine, Effect, Input, REASON_AUTH_REJECTED, REASON_AUTH_TIMEOUT,
    REASON_HEARTBEAT_STALLED, REASON_HEARTBEAT_TIMEOUT, REASON_MANUAL_DISCONNECT,
    REASON_MISSING_TOKEN,
};
use crate::state::{BridgeEvent, ConnectionState, StateChange};
use crate::token::StaticTokenSource;

use common::RedactedToken;

use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::Instant;

const TOKEN: &str = "secret-token";

fn machine_with(config: &BridgeConfig, token: Option<&str>) -> BridgeMachine {
    let tokens = StaticTokenSource::new(token.map(RedactedToken::new));
    BridgeMachine::new(
        config,
        Box::new(tokens),
        DiagnosticsLog::disabled(),
        "ws://localhost via test.sock",
    )
}

fn machine(token: Option<&str>) -> BridgeMachine {
    machine_with(&BridgeConfig::default(), token)
}

fn state_changes(effects: &[Effect]) -> Vec<StateChange> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Emit(BridgeEvent::State(change)) => Some(change.clone()),
            _ => None,
        })
        .collect()
}

fn states(effects: &[Effect]) -> Vec<ConnectionState> {
    state_changes(effects).iter().map(|c| c.state).collect()
}

fn writes(effects: &[Effect]) -> Vec<Value> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Write { frame, .. } => serde_json::from_str(frame).ok(),
            _ => None,
        })
        .collect()
}

fn closes(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|effect| matches!(effect, Effect::Close { .. }))
        .count()
}

fn opens(effects: &[Effect]) -> Vec<u64> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Open { epoch } => Some(*epoch),
            _ => None,
        })
        .collect()
}

/// Drive a fresh socket through open and a successful auth. Returns the epoch.
fn authenticate(machine: &mut BridgeMachine, now: Instant) -> u64 {
    let effects = machine.handle(Input::Connect, now);
    let epoch = opens(&effects)[0];
    let effects = machine.handle(Input::Opened { epoch }, now);
    let auth = &writes(&effects)[0];
    let id = auth["id"].as_u64().unwrap();

    let response = json!({ "id": id, "result": { "authenticated": true, "connectId": "abc" } });
    machine.handle(
        Input::Frame {
            epoch,
            text: response.to_string(),
        },
        now,
    );
    assert_eq!(machine.state(), ConnectionState::Authenticated);
    epoch
}

/// **VALUE**: Verifies the full transition sequence when the token file is missing.
///
/// **WHY THIS MATTERS**: The daemon may not have written its token yet. The UI must see
/// connecting, connected, then disconnected with a reason it can show, and the bridge must
/// schedule a retry on its own.
///
/// **BUG THIS CATCHES**: Would catch sending `auth` with an empty token, leaving the socket
/// open, or forgetting to attach the reconnect delay.
#[test]
fn given_no_token_when_socket_opens_then_disconnects_with_missing_token_and_retry() {
    // GIVEN: A bridge with no token available
    let mut machine = machine(None);
    let now = Instant::now();

    // WHEN: Connecting and the socket opens
    let mut effects = machine.handle(Input::Connect, now);
    effects.extend(machine.handle(Input::Opened { epoch: 1 }, now));

    // THEN: connecting -> connected -> disconnected(missing_token)
    assert_eq!(
        states(&effects),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
    let last = state_changes(&effects).pop().unwrap();
    assert_eq!(last.reason.as_deref(), Some(REASON_MISSING_TOKEN));
    let delay = last.reconnect_in_ms.unwrap();
    assert!((1000..1250).contains(&delay), "first delay was {delay}");
    assert_eq!(last.reconnect_count, 1);

    // THEN: No auth frame was written and the socket was closed
    assert!(writes(&effects).is_empty());
    assert_eq!(closes(&effects), 1);
}

/// **VALUE**: Verifies a successful auth publishes the connect id and resets the backoff.
///
/// **WHY THIS MATTERS**: After a flaky period the next outage must start again from the
/// base delay rather than the capped one.
///
/// **BUG THIS CATCHES**: Would catch resetting the attempt counter on socket open instead
/// of on auth, or dropping the gateway-assigned connect id.
#[test]
fn given_prior_failure_when_auth_succeeds_then_attempt_resets_and_connect_id_is_set() {
    // GIVEN: A connection that dropped once and was retried
    let mut machine = machine(Some(TOKEN));
    let t0 = Instant::now();
    machine.handle(Input::Connect, t0);
    machine.handle(
        Input::Closed {
            epoch: 1,
            reason: "ws_close_1006".to_string(),
        },
        t0,
    );
    assert_eq!(machine.reconnect_attempt(), 1);

    let t1 = t0 + Duration::from_secs(2);
    let effects = machine.handle(Input::Tick, t1);
    assert_eq!(opens(&effects), vec![2]);

    // WHEN: The retried socket opens and auth succeeds
    let effects = machine.handle(Input::Opened { epoch: 2 }, t1);
    let auth = &writes(&effects)[0];
    assert_eq!(auth["method"], "auth");
    assert_eq!(auth["params"]["token"], TOKEN);
    let id = auth["id"].as_u64().unwrap();

    let response = json!({ "id": id, "result": { "authenticated": true, "connectId": "abc" } });
    let effects = machine.handle(
        Input::Frame {
            epoch: 2,
            text: response.to_string(),
        },
        t1,
    );

    // THEN: authenticated with connectId "abc" and attempt back to zero
    let change = state_changes(&effects).pop().unwrap();
    assert_eq!(change.state, ConnectionState::Authenticated);
    assert_eq!(change.connect_id.as_deref(), Some("abc"));
    assert_eq!(machine.reconnect_attempt(), 0);
    assert_eq!(machine.snapshot().connect_id.as_deref(), Some("abc"));
}

/// **VALUE**: Verifies a silent gateway is detected by the heartbeat and the socket closed once.
///
/// **WHY THIS MATTERS**: A half-open socket never produces a close event; without the
/// heartbeat the UI would show "authenticated" forever.
///
/// **BUG THIS CATCHES**: Would catch sending probes outside the authenticated phase,
/// sending a burst of probes, or closing the socket more than once.
#[test]
fn given_unanswered_ping_when_timeout_elapses_then_closes_once_with_heartbeat_timeout() {
    // GIVEN: An authenticated connection
    let mut machine = machine(Some(TOKEN));
    let t0 = Instant::now();
    authenticate(&mut machine, t0);

    // WHEN: The interval elapses, then the probe's timeout elapses
    let mut effects = machine.handle(Input::Tick, t0 + Duration::from_secs(10));
    effects.extend(machine.handle(Input::Tick, t0 + Duration::from_secs(15)));

    // THEN: Exactly one ping was written and exactly one close issued
    let pings: Vec<_> = writes(&effects)
        .into_iter()
        .filter(|w| w["method"] == "ping")
        .collect();
    assert_eq!(pings.len(), 1);
    assert!(pings[0].get("params").is_none());
    assert_eq!(closes(&effects), 1);

    let last = state_changes(&effects).pop().unwrap();
    assert_eq!(last.state, ConnectionState::Disconnected);
    assert_eq!(last.reason.as_deref(), Some(REASON_HEARTBEAT_TIMEOUT));
}

/// **VALUE**: Verifies a probe still outstanding at the next interval forces a close.
///
/// **WHY THIS MATTERS**: When the probe timeout is configured longer than the interval the
/// interval check is the only thing that notices a dead peer.
///
/// **BUG THIS CATCHES**: Would catch stacking a second probe on top of an unanswered one.
#[test]
fn given_probe_outstanding_when_next_interval_fires_then_closes_with_heartbeat_stalled() {
    // GIVEN: A probe timeout longer than the interval, and an authenticated connection
    let mut config = BridgeConfig::default();
    config.timing.heartbeat_timeout_ms = 60_000;
    let mut machine = machine_with(&config, Some(TOKEN));
    let t0 = Instant::now();
    authenticate(&mut machine, t0);

    // WHEN: Two intervals pass with no pong
    let mut effects = machine.handle(Input::Tick, t0 + Duration::from_secs(10));
    effects.extend(machine.handle(Input::Tick, t0 + Duration::from_secs(20)));

    // THEN: One ping, one close, reason heartbeat_stalled
    assert_eq!(writes(&effects).len(), 1);
    assert_eq!(closes(&effects), 1);
    let last = state_changes(&effects).pop().unwrap();
    assert_eq!(last.reason.as_deref(), Some(REASON_HEARTBEAT_STALLED));
}

/// **VALUE**: Verifies answered pings keep the connection up.
///
/// **WHY THIS MATTERS**: A healthy gateway must never be disconnected by the heartbeat.
///
/// **BUG THIS CATCHES**: Would catch treating every second tick as a stall.
#[test]
fn given_answered_pings_when_intervals_pass_then_stays_authenticated() {
    // GIVEN: An authenticated connection
    let mut machine = machine(Some(TOKEN));
    let t0 = Instant::now();
    let epoch = authenticate(&mut machine, t0);

    for round in 1..=3u64 {
        // WHEN: Each probe is answered promptly, one with an error
        let at = t0 + Duration::from_secs(10 * round);
        let effects = machine.handle(Input::Tick, at);
        let ping = &writes(&effects)[0];
        let id = ping["id"].as_u64().unwrap();
        let response = if round == 2 {
            json!({ "id": id, "error": "busy" })
        } else {
            json!({ "id": id, "result": "pong" })
        };
        let effects = machine.handle(
            Input::Frame {
                epoch,
                text: response.to_string(),
            },
            at,
        );

        // THEN: Nothing is emitted and the state holds
        assert!(effects.is_empty());
        assert_eq!(machine.state(), ConnectionState::Authenticated);
    }
}

/// **VALUE**: Verifies frames that answer no pending call reach the UI untouched.
///
/// **WHY THIS MATTERS**: The gateway pushes events that happen to carry ids; dropping
/// them would lose data.
///
/// **BUG THIS CATCHES**: Would catch swallowing every frame with an `id` field.
#[test]
fn given_response_for_unknown_id_when_frame_arrives_then_forwarded_as_push() {
    // GIVEN: An authenticated connection
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();
    let epoch = authenticate(&mut machine, now);

    // WHEN: A frame with an unknown id arrives
    let text = r#"{"id":7,"result":{}}"#.to_string();
    let effects = machine.handle(
        Input::Frame {
            epoch,
            text: text.clone(),
        },
        now,
    );

    // THEN: It is forwarded verbatim
    assert_eq!(effects, vec![Effect::Emit(BridgeEvent::Message(text))]);
}

/// **VALUE**: Verifies non-JSON frames are forwarded verbatim.
///
/// **BUG THIS CATCHES**: Would catch a parse failure being treated as fatal.
#[test]
fn given_non_json_frame_when_received_then_forwarded() {
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();
    let epoch = authenticate(&mut machine, now);

    let effects = machine.handle(
        Input::Frame {
            epoch,
            text: "not json".to_string(),
        },
        now,
    );

    assert_eq!(
        effects,
        vec![Effect::Emit(BridgeEvent::Message("not json".to_string()))]
    );
}

/// **VALUE**: Verifies a manual disconnect suppresses every automatic reconnect.
///
/// **WHY THIS MATTERS**: The user asked to go offline; a timer firing afterwards must not
/// bring the socket back.
///
/// **BUG THIS CATCHES**: Would catch a retry timer scheduled before the disconnect still
/// firing afterwards.
#[test]
fn given_retry_pending_when_disconnect_then_ticks_never_open() {
    // GIVEN: A dropped connection with a retry scheduled
    let mut machine = machine(Some(TOKEN));
    let t0 = Instant::now();
    machine.handle(Input::Connect, t0);
    machine.handle(
        Input::Closed {
            epoch: 1,
            reason: "ws_close_1006".to_string(),
        },
        t0,
    );
    assert!(machine.next_deadline().is_some());

    // WHEN: Disconnecting manually
    let effects = machine.handle(Input::Disconnect, t0);

    // THEN: disconnected(manual_disconnect), no deadline, and later ticks do nothing
    let change = state_changes(&effects).pop().unwrap();
    assert_eq!(change.reason.as_deref(), Some(REASON_MANUAL_DISCONNECT));
    assert!(change.reconnect_in_ms.is_none());
    assert!(machine.next_deadline().is_none());
    for secs in [1, 5, 30, 120] {
        let effects = machine.handle(Input::Tick, t0 + Duration::from_secs(secs));
        assert!(opens(&effects).is_empty());
    }
    assert_eq!(machine.state(), ConnectionState::Disconnected);
}

/// **VALUE**: Verifies manual disconnect closes the open socket and does not retry on its close.
///
/// **BUG THIS CATCHES**: Would catch the late close event of the torn-down socket
/// scheduling a reconnect.
#[test]
fn given_authenticated_when_disconnect_then_closes_socket_without_retry() {
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();
    let epoch = authenticate(&mut machine, now);

    let effects = machine.handle(Input::Disconnect, now);
    assert!(effects.contains(&Effect::Close { epoch }));
    assert!(machine.snapshot().connect_id.is_none());

    let effects = machine.handle(
        Input::Closed {
            epoch,
            reason: "closed_by_client".to_string(),
        },
        now,
    );
    assert!(effects.is_empty());
    assert!(machine.next_deadline().is_none());
}

/// **VALUE**: Verifies events from a superseded socket are ignored.
///
/// **WHY THIS MATTERS**: The old socket's close can arrive after its replacement has
/// opened; acting on it would tear down a healthy connection.
///
/// **BUG THIS CATCHES**: Would catch matching socket events without their epoch.
#[test]
fn given_replaced_socket_when_stale_events_arrive_then_ignored() {
    // GIVEN: Epoch 1 dropped and epoch 2 opened in its place
    let mut machine = machine(Some(TOKEN));
    let t0 = Instant::now();
    machine.handle(Input::Connect, t0);
    machine.handle(
        Input::Closed {
            epoch: 1,
            reason: "ws_close_1006".to_string(),
        },
        t0,
    );
    let later = t0 + Duration::from_secs(2);
    machine.handle(Input::Tick, later);
    assert_eq!(machine.current_epoch(), Some(2));

    // WHEN: Epoch 1 reports a frame, an open and a close
    let mut effects = machine.handle(
        Input::Frame {
            epoch: 1,
            text: "late".to_string(),
        },
        later,
    );
    effects.extend(machine.handle(Input::Opened { epoch: 1 }, later));
    effects.extend(machine.handle(
        Input::Closed {
            epoch: 1,
            reason: "late".to_string(),
        },
        later,
    ));

    // THEN: Nothing happens and epoch 2 is still connecting
    assert!(effects.is_empty());
    assert_eq!(machine.state(), ConnectionState::Connecting);
}

/// **VALUE**: Verifies calls fail fast while no socket is open.
///
/// **BUG THIS CATCHES**: Would catch queueing calls that will only ever time out.
#[test]
fn given_disconnected_when_call_then_not_connected() {
    // GIVEN: A bridge that was never connected
    let mut machine = machine(Some(TOKEN));
    let (reply, mut rx) = oneshot::channel();

    // WHEN: Issuing a call
    let effects = machine.handle(
        Input::Call {
            method: "sessions.list".to_string(),
            params: None,
            timeout: Duration::from_secs(1),
            reply,
        },
        Instant::now(),
    );

    // THEN: No write and the caller gets NotConnected
    assert!(effects.is_empty());
    assert!(matches!(rx.try_recv(), Ok(Err(RpcError::NotConnected { .. }))));
}

/// **VALUE**: Verifies a call round trip and id allocation after auth.
///
/// **BUG THIS CATCHES**: Would catch reusing the auth id for application calls.
#[test]
fn given_authenticated_when_call_answered_then_caller_receives_result() {
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();
    let epoch = authenticate(&mut machine, now);
    let (reply, mut rx) = oneshot::channel();

    let effects = machine.handle(
        Input::Call {
            method: "sessions.list".to_string(),
            params: Some(json!({ "limit": 5 })),
            timeout: Duration::from_secs(1),
            reply,
        },
        now,
    );
    let request = &writes(&effects)[0];
    assert_eq!(request["method"], "sessions.list");
    assert_eq!(request["params"]["limit"], 5);
    let id = request["id"].as_u64().unwrap();
    assert_eq!(id, 2, "auth used id 1");

    machine.handle(
        Input::Frame {
            epoch,
            text: json!({ "id": id, "result": [1, 2] }).to_string(),
        },
        now,
    );

    assert_eq!(rx.try_recv().unwrap().unwrap(), json!([1, 2]));
    assert_eq!(machine.pending_calls(), 0);
}

/// **VALUE**: Verifies pending calls are rejected when the socket closes.
///
/// **BUG THIS CATCHES**: Would catch callers hanging until their own timeout after the
/// connection is already gone.
#[test]
fn given_pending_call_when_socket_closes_then_call_fails_with_connection_closed() {
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();
    let epoch = authenticate(&mut machine, now);
    let (reply, mut rx) = oneshot::channel();
    machine.handle(
        Input::Call {
            method: "slow".to_string(),
            params: None,
            timeout: Duration::from_secs(30),
            reply,
        },
        now,
    );

    machine.handle(
        Input::Closed {
            epoch,
            reason: "ws_close_1001".to_string(),
        },
        now,
    );

    assert!(matches!(
        rx.try_recv(),
        Ok(Err(RpcError::ConnectionClosed { .. }))
    ));
    assert_eq!(machine.snapshot().last_reason.as_deref(), Some("ws_close_1001"));
}

/// **VALUE**: Verifies a call with no response times out on the tick after its deadline.
#[test]
fn given_unanswered_call_when_deadline_passes_then_times_out() {
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();
    authenticate(&mut machine, now);
    let (reply, mut rx) = oneshot::channel();
    machine.handle(
        Input::Call {
            method: "slow".to_string(),
            params: None,
            timeout: Duration::from_millis(500),
            reply,
        },
        now,
    );
    assert_eq!(machine.next_deadline(), Some(now + Duration::from_millis(500)));

    machine.handle(Input::Tick, now + Duration::from_millis(499));
    assert!(rx.try_recv().is_err());

    machine.handle(Input::Tick, now + Duration::from_millis(500));
    let error = rx.try_recv().unwrap().unwrap_err();
    assert_eq!(error.message(), "timeout");
    assert_eq!(machine.state(), ConnectionState::Authenticated);
}

/// **VALUE**: Verifies an unanswered auth is abandoned after the auth timeout.
///
/// **BUG THIS CATCHES**: Would catch a bridge stuck in "connected" forever when the
/// gateway accepts the socket but never answers.
#[test]
fn given_auth_sent_when_no_reply_within_timeout_then_disconnects_with_auth_timeout() {
    let mut machine = machine(Some(TOKEN));
    let t0 = Instant::now();
    machine.handle(Input::Connect, t0);
    machine.handle(Input::Opened { epoch: 1 }, t0);

    let effects = machine.handle(Input::Tick, t0 + Duration::from_secs(5));

    assert_eq!(closes(&effects), 1);
    let change = state_changes(&effects).pop().unwrap();
    assert_eq!(change.reason.as_deref(), Some(REASON_AUTH_TIMEOUT));
    assert!(change.reconnect_in_ms.is_some());
}

/// **VALUE**: Verifies `authenticated: false` and error responses both reject auth.
///
/// **BUG THIS CATCHES**: Would catch treating any `result` as success, or losing the
/// gateway's error text.
#[test]
fn given_auth_refused_when_response_arrives_then_disconnects_with_reason() {
    let cases = [
        (
            json!({ "id": 1, "result": { "authenticated": false } }),
            REASON_AUTH_REJECTED,
        ),
        (json!({ "id": 1, "error": "invalid token" }), "invalid token"),
    ];

    for (response, expected) in cases {
        // GIVEN: A socket waiting on auth
        let mut machine = machine(Some(TOKEN));
        let now = Instant::now();
        machine.handle(Input::Connect, now);
        machine.handle(Input::Opened { epoch: 1 }, now);

        // WHEN: The gateway refuses
        let effects = machine.handle(
            Input::Frame {
                epoch: 1,
                text: response.to_string(),
            },
            now,
        );

        // THEN: The socket is closed with the matching reason
        assert_eq!(closes(&effects), 1);
        let change = state_changes(&effects).pop().unwrap();
        assert_eq!(change.state, ConnectionState::Disconnected);
        assert_eq!(change.reason.as_deref(), Some(expected));
    }
}

/// **VALUE**: Verifies connect() is a no-op while a socket is opening or open.
///
/// **BUG THIS CATCHES**: Would catch a double click opening two sockets.
#[test]
fn given_socket_opening_when_connect_again_then_no_effects() {
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();
    machine.handle(Input::Connect, now);

    assert!(machine.handle(Input::Connect, now).is_empty());

    authenticate_existing(&mut machine, now);
    assert!(machine.handle(Input::Connect, now).is_empty());
}

fn authenticate_existing(machine: &mut BridgeMachine, now: Instant) {
    let effects = machine.handle(Input::Opened { epoch: 1 }, now);
    let id = writes(&effects)[0]["id"].as_u64().unwrap();
    machine.handle(
        Input::Frame {
            epoch: 1,
            text: json!({ "id": id, "result": {} }).to_string(),
        },
        now,
    );
    assert_eq!(machine.state(), ConnectionState::Authenticated);
}

/// **VALUE**: Verifies reconnect delays double up to the cap across consecutive failures.
///
/// **BUG THIS CATCHES**: Would catch an uncapped exponent or a counter that never advances.
#[test]
fn given_repeated_connect_failures_then_delays_grow_to_cap() {
    let mut machine = machine(Some(TOKEN));
    let mut now = Instant::now();
    machine.handle(Input::Connect, now);

    let expected_floors = [1000, 2000, 4000, 8000, 8000, 8000];
    for (n, floor) in expected_floors.into_iter().enumerate() {
        let epoch = machine.current_epoch().unwrap();
        let effects = machine.handle(
            Input::Closed {
                epoch,
                reason: "connect_failed".to_string(),
            },
            now,
        );
        let change = state_changes(&effects).pop().unwrap();
        let delay = change.reconnect_in_ms.unwrap();
        assert!(
            (floor..floor + 250).contains(&delay),
            "attempt {n}: delay {delay} outside [{floor}, {})",
            floor + 250
        );
        assert_eq!(change.reconnect_count, n as u64 + 1);

        now += Duration::from_millis(delay);
        let effects = machine.handle(Input::Tick, now);
        assert_eq!(opens(&effects).len(), 1);
    }
}

/// **VALUE**: Verifies sends are written only while the socket is open, verbatim.
#[test]
fn given_states_when_send_then_written_only_when_open() {
    let mut machine = machine(Some(TOKEN));
    let now = Instant::now();

    assert!(machine.handle(Input::Send("early".to_string()), now).is_empty());

    let epoch = authenticate(&mut machine, now);
    let effects = machine.handle(Input::Send("{\"raw\":true}".to_string()), now);
    assert_eq!(
        effects,
        vec![Effect::Write {
            epoch,
            frame: "{\"raw\":true}".to_string()
        }]
    );
}
