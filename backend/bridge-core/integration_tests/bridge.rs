use crate::helpers::{
    MockGateway, StalledListener, TEST_TOKEN, WAIT, fast_config, next_event, next_state,
    wait_until,
};

use bridge_core::diagnostics::DiagnosticsLog;
use bridge_core::error::RpcError;
use bridge_core::token::StaticTokenSource;
use bridge_core::{BridgeEvent, ConnectionState, GatewayBridge};

use common::RedactedToken;

use std::time::Duration;

use serde_json::json;

/// **VALUE**: Verifies the full happy path: socket open, auth, connect id published.
///
/// **WHY THIS MATTERS**: This is the sequence the UI renders on every launch. If any state
/// is skipped or reordered the status indicator lies.
///
/// **BUG THIS CATCHES**: Would catch:
/// - The WebSocket handshake failing over the Unix socket
/// - The token not being read from the token file
/// - The connect id not reaching the UI or the snapshot
#[tokio::test]
async fn given_running_gateway_when_connect_then_authenticates_with_connect_id() {
    // GIVEN: A gateway with a token on disk
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = gateway.spawn_bridge();

    // WHEN: Connecting
    bridge.connect();

    // THEN: connecting -> connected -> authenticated(conn-1)
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connecting);
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connected);
    let authenticated = next_state(&mut events).await;
    assert_eq!(authenticated.state, ConnectionState::Authenticated);
    assert_eq!(authenticated.connect_id.as_deref(), Some("conn-1"));

    // THEN: The snapshot catches up
    let mut watch = bridge.watch_state();
    let snapshot = tokio::time::timeout(
        WAIT,
        watch.wait_for(|s| s.state == ConnectionState::Authenticated),
    )
    .await
    .expect("Timed out waiting for snapshot")
    .expect("Bridge task stopped")
    .clone();
    assert_eq!(snapshot.connect_id.as_deref(), Some("conn-1"));

    // THEN: Transitions were written to the diagnostics log
    let log = std::fs::read_to_string(&gateway.log_path).expect("Diagnostics log missing");
    assert!(log.lines().all(|line| line.starts_with("[bridge] ")));
    assert!(log.contains("authenticated"));
    assert!(!log.contains(TEST_TOKEN), "token must never be logged");
}

/// **VALUE**: Verifies gateway pushes reach the UI verbatim and in order.
///
/// **BUG THIS CATCHES**: Would catch pushes being parsed and re-serialized, or dropped
/// because they are not responses.
#[tokio::test]
async fn given_authenticated_when_gateway_pushes_then_forwarded_verbatim() {
    // GIVEN: An authenticated bridge
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = gateway.spawn_bridge();
    bridge.connect();
    while next_state(&mut events).await.state != ConnectionState::Authenticated {}

    // WHEN: The gateway pushes two frames
    gateway.push(r#"{"event":"session.created", "id": "s-1"}"#);
    gateway.push("plain text");

    // THEN: Both arrive untouched, in order
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::Message(r#"{"event":"session.created", "id": "s-1"}"#.to_string())
    );
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::Message("plain text".to_string())
    );
}

/// **VALUE**: Verifies correlated calls succeed, fail remotely and time out.
///
/// **WHY THIS MATTERS**: Every UI feature built on the gateway goes through `call`.
///
/// **BUG THIS CATCHES**: Would catch:
/// - Responses not routed back to the caller
/// - Gateway error strings lost
/// - Calls hanging forever when the gateway never answers
#[tokio::test]
async fn given_authenticated_when_call_then_result_error_or_timeout() {
    // GIVEN: An authenticated bridge
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = gateway.spawn_bridge();
    bridge.connect();
    while next_state(&mut events).await.state != ConnectionState::Authenticated {}

    // WHEN/THEN: echo returns its params
    let result = bridge
        .call("echo", Some(json!({ "n": 1 })), Duration::from_secs(2))
        .await
        .expect("echo should succeed");
    assert_eq!(result, json!({ "n": 1 }));

    // WHEN/THEN: an unknown method returns the gateway's error text
    let error = bridge
        .call_default("bogus", None)
        .await
        .expect_err("bogus should fail");
    assert!(matches!(error, RpcError::Remote { .. }));
    assert_eq!(error.message(), "unknown method: bogus");

    // WHEN/THEN: a method the gateway never answers times out
    let error = bridge
        .call("silent", None, Duration::from_millis(200))
        .await
        .expect_err("silent should time out");
    assert!(matches!(error, RpcError::Timeout { .. }));

    // THEN: The connection survived all three
    assert_eq!(bridge.state().state, ConnectionState::Authenticated);
}

#[tokio::test]
async fn given_never_connected_when_call_then_not_connected() {
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, _events) = gateway.spawn_bridge();

    let error = bridge
        .call("echo", None, Duration::from_secs(1))
        .await
        .expect_err("call must fail while disconnected");

    assert!(matches!(error, RpcError::NotConnected { .. }));
}

/// **VALUE**: Verifies a missing token file produces `missing_token` and a scheduled retry.
///
/// **WHY THIS MATTERS**: On first launch the UI may start before the daemon writes its
/// token. The user must see why, and the bridge must keep trying.
#[tokio::test]
async fn given_no_token_file_when_connect_then_disconnected_with_missing_token() {
    // GIVEN: A gateway but no token on disk
    let gateway = MockGateway::start(None).await;
    let (bridge, mut events) = gateway.spawn_bridge();

    // WHEN: Connecting
    bridge.connect();

    // THEN: connecting -> connected -> disconnected(missing_token) with a delay
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connecting);
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connected);
    let disconnected = next_state(&mut events).await;
    assert_eq!(disconnected.state, ConnectionState::Disconnected);
    assert_eq!(disconnected.reason.as_deref(), Some("missing_token"));
    assert_eq!(disconnected.reconnect_in_ms, Some(50));

    // WHEN: The token appears
    std::fs::write(&gateway.token_path, TEST_TOKEN).expect("Failed to write token");

    // THEN: The next retry authenticates
    loop {
        let change = next_state(&mut events).await;
        if change.state == ConnectionState::Authenticated {
            break;
        }
    }
    bridge.disconnect();
}

/// **VALUE**: Verifies a rejected token surfaces the gateway's reason.
#[tokio::test]
async fn given_wrong_token_when_connect_then_disconnected_with_gateway_reason() {
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = GatewayBridge::spawn(
        fast_config(),
        gateway.socket_path.clone(),
        StaticTokenSource::new(Some(RedactedToken::new("wrong"))),
        DiagnosticsLog::disabled(),
    );

    bridge.connect();

    let disconnected = loop {
        let change = next_state(&mut events).await;
        if change.state == ConnectionState::Disconnected {
            break change;
        }
    };
    assert_eq!(disconnected.reason.as_deref(), Some("invalid token"));
    bridge.disconnect();
}

#[tokio::test]
async fn given_no_gateway_listening_when_connect_then_connect_failed() {
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = GatewayBridge::spawn(
        fast_config(),
        gateway.dir.path().join("nobody-home.sock"),
        StaticTokenSource::new(Some(RedactedToken::new(TEST_TOKEN))),
        DiagnosticsLog::disabled(),
    );

    bridge.connect();

    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connecting);
    let disconnected = next_state(&mut events).await;
    assert_eq!(disconnected.reason.as_deref(), Some("connect_failed"));
    assert_eq!(disconnected.reconnect_count, 1);
    bridge.disconnect();
}

/// **VALUE**: Verifies a peer that accepts but never answers the handshake cannot
/// pin the bridge in `connecting`.
///
/// **WHY THIS MATTERS**: A daemon that is hung or half-started still accepts on its
/// socket. Without a deadline the bridge would wait on it forever and never retry.
///
/// **BUG THIS CATCHES**: Would catch the socket connect or WebSocket handshake being
/// awaited without a timeout.
#[tokio::test]
async fn given_stalled_handshake_when_connect_then_times_out_and_schedules_retry() {
    // GIVEN: A listener that accepts and then says nothing
    let listener = StalledListener::start();
    let mut config = fast_config();
    config.timing.connect_timeout_ms = 200;
    let (bridge, mut events) = GatewayBridge::spawn(
        config,
        listener.socket_path.clone(),
        StaticTokenSource::new(Some(RedactedToken::new(TEST_TOKEN))),
        DiagnosticsLog::disabled(),
    );

    // WHEN: Connecting
    bridge.connect();

    // THEN: The attempt gives up and a retry is scheduled
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connecting);
    let disconnected = next_state(&mut events).await;
    assert_eq!(disconnected.state, ConnectionState::Disconnected);
    assert_eq!(disconnected.reason.as_deref(), Some("connect_timeout"));
    assert!(disconnected.reconnect_in_ms.is_some());
    assert_eq!(disconnected.reconnect_count, 1);
    assert!(listener.accepted() >= 1);

    // AND: The retry is actually attempted
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connecting);
    bridge.disconnect();
}

/// **VALUE**: Verifies a manual disconnect aborts a handshake that is still pending.
///
/// **BUG THIS CATCHES**: Would catch the socket task only honoring close requests once
/// the socket is open, leaking the task and its descriptor until the peer gives up.
#[tokio::test]
async fn given_stalled_handshake_when_disconnect_then_socket_released() {
    // GIVEN: A bridge stuck mid-handshake with a long connect timeout
    let listener = StalledListener::start();
    let mut config = fast_config();
    config.timing.connect_timeout_ms = 60_000;
    let (bridge, mut events) = GatewayBridge::spawn(
        config,
        listener.socket_path.clone(),
        StaticTokenSource::new(Some(RedactedToken::new(TEST_TOKEN))),
        DiagnosticsLog::disabled(),
    );
    bridge.connect();
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connecting);
    wait_until(|| listener.accepted() == 1).await;

    // WHEN: Disconnecting
    bridge.disconnect();

    // THEN: The bridge settles and the pending socket is closed
    let disconnected = next_state(&mut events).await;
    assert_eq!(disconnected.reason.as_deref(), Some("manual_disconnect"));
    wait_until(|| listener.released() == 1).await;
}

/// **VALUE**: Verifies the bridge recovers on its own when the gateway drops the socket.
///
/// **WHY THIS MATTERS**: Daemon restarts and sleep/wake cycles drop the socket without a
/// close frame. Recovery must need no user action.
///
/// **BUG THIS CATCHES**: Would catch:
/// - An abrupt drop not being detected
/// - No retry being scheduled
/// - The new connection reusing the old connect id
#[tokio::test]
async fn given_authenticated_when_gateway_drops_connection_then_reconnects() {
    // GIVEN: An authenticated bridge
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = gateway.spawn_bridge();
    bridge.connect();
    while next_state(&mut events).await.state != ConnectionState::Authenticated {}

    // WHEN: The gateway drops the connection
    gateway.drop_connections();

    // THEN: disconnected(ws_close_1006) with a retry, then a fresh authenticated session
    let disconnected = next_state(&mut events).await;
    assert_eq!(disconnected.state, ConnectionState::Disconnected);
    assert_eq!(disconnected.reason.as_deref(), Some("ws_close_1006"));
    assert!(disconnected.reconnect_in_ms.is_some());
    assert!(disconnected.connect_id.is_none());

    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connecting);
    assert_eq!(next_state(&mut events).await.state, ConnectionState::Connected);
    let authenticated = next_state(&mut events).await;
    assert_eq!(authenticated.state, ConnectionState::Authenticated);
    assert_eq!(authenticated.connect_id.as_deref(), Some("conn-2"));
    assert_eq!(gateway.accepted(), 2);
}

/// **VALUE**: Verifies a manual disconnect stays disconnected.
///
/// **BUG THIS CATCHES**: Would catch the close of the torn-down socket triggering a
/// reconnect behind the user's back.
#[tokio::test]
async fn given_authenticated_when_disconnect_then_no_reconnect() {
    // GIVEN: An authenticated bridge
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = gateway.spawn_bridge();
    bridge.connect();
    while next_state(&mut events).await.state != ConnectionState::Authenticated {}

    // WHEN: Disconnecting
    bridge.disconnect();

    // THEN: One disconnected(manual_disconnect), and nothing more after several retry periods
    let disconnected = next_state(&mut events).await;
    assert_eq!(disconnected.reason.as_deref(), Some("manual_disconnect"));
    assert!(disconnected.reconnect_in_ms.is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_none());
    assert_eq!(gateway.accepted(), 1);
}

/// **VALUE**: Verifies dropping every handle shuts the bridge down cleanly.
#[tokio::test]
async fn given_authenticated_when_last_handle_dropped_then_disconnects_and_feed_ends() {
    let gateway = MockGateway::start(Some(TEST_TOKEN)).await;
    let (bridge, mut events) = gateway.spawn_bridge();
    bridge.connect();
    while next_state(&mut events).await.state != ConnectionState::Authenticated {}

    drop(bridge);

    let disconnected = next_state(&mut events).await;
    assert_eq!(disconnected.reason.as_deref(), Some("manual_disconnect"));
    let end = tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("Timed out waiting for the feed to close");
    assert!(end.is_none());
}
