//! Line-oriented relay between stdio and a [`GatewayBridge`].
//!
//! Input, one per line:
//! - `:connect`, `:disconnect`, `:state`, `:quit`
//! - `:call <method> [json-params]`
//! - anything else is forwarded to the gateway verbatim
//!
//! Output is one JSON object per line, tagged by `type`.

use crate::error::BridgeHostError;

use bridge_core::machine::REASON_MANUAL_DISCONNECT;
use bridge_core::{BridgeEvent, BridgeEvents, BridgeSnapshot, ConnectionState, GatewayBridge, StateChange};

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;

const COMMAND_PREFIX: char = ':';
/// How long to wait for the final `disconnected` event on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Connect,
    Disconnect,
    State,
    Quit,
    Call { method: String, params: Option<Value> },
    Send(String),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostOutput {
    State(StateChange),
    Message { data: String },
    Snapshot(BridgeSnapshot),
    CallResult { method: String, result: Value },
    CallError { method: String, error: String },
    Error { error: BridgeHostError },
}

impl From<BridgeEvent> for HostOutput {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::State(change) => HostOutput::State(change),
            BridgeEvent::Message(data) => HostOutput::Message { data },
        }
    }
}

/// Parse one input line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns [`BridgeHostError::Input`] for unknown commands or unparsable params.
pub fn parse_line(line: &str) -> Result<Option<HostCommand>, BridgeHostError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let Some(command) = trimmed.strip_prefix(COMMAND_PREFIX) else {
        return Ok(Some(HostCommand::Send(line.to_string())));
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    let parsed = match name {
        "connect" => HostCommand::Connect,
        "disconnect" => HostCommand::Disconnect,
        "state" => HostCommand::State,
        "quit" => HostCommand::Quit,
        "call" => parse_call(rest)?,
        other => {
            return Err(BridgeHostError::input(format!(
                "Unknown command :{other}"
            )));
        }
    };
    Ok(Some(parsed))
}

fn parse_call(rest: &str) -> Result<HostCommand, BridgeHostError> {
    let (method, params) = match rest.split_once(char::is_whitespace) {
        Some((method, params)) => (method, Some(params.trim())),
        None => (rest, None),
    };
    if method.is_empty() {
        return Err(BridgeHostError::input("Usage: :call <method> [json-params]"));
    }

    let params = match params.filter(|p| !p.is_empty()) {
        Some(text) => Some(serde_json::from_str(text).map_err(|e| {
            BridgeHostError::input(format!("Invalid params for {method}: {e}"))
        })?),
        None => None,
    };

    Ok(HostCommand::Call {
        method: method.to_string(),
        params,
    })
}

/// Relay until input ends or `:quit`, then disconnect and flush what is left.
///
/// # Errors
///
/// Returns [`BridgeHostError::Io`] if reading input or writing output fails.
pub async fn run<R, W>(
    bridge: GatewayBridge,
    mut events: BridgeEvents,
    input: R,
    mut output: W,
) -> Result<(), BridgeHostError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut calls: JoinSet<HostOutput> = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Input closed");
                    break;
                };
                match parse_line(&line) {
                    Ok(Some(HostCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Some(out) = dispatch(&bridge, command, &mut calls) {
                            write_output(&mut output, &out).await?;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!("{error}");
                        write_output(&mut output, &HostOutput::Error { error }).await?;
                    }
                }
            }
            Some(event) = events.recv() => {
                write_output(&mut output, &HostOutput::from(event)).await?;
            }
            Some(joined) = calls.join_next(), if !calls.is_empty() => {
                match joined {
                    Ok(out) => write_output(&mut output, &out).await?,
                    Err(e) => warn!("Call task failed: {e}"),
                }
            }
        }
    }

    info!("Shutting down relay");
    bridge.disconnect();
    while let Some(joined) = calls.join_next().await {
        if let Ok(out) = joined {
            write_output(&mut output, &out).await?;
        }
    }
    drain_until_disconnected(&mut events, &mut output).await
}

fn dispatch(
    bridge: &GatewayBridge,
    command: HostCommand,
    calls: &mut JoinSet<HostOutput>,
) -> Option<HostOutput> {
    match command {
        HostCommand::Connect => bridge.connect(),
        HostCommand::Disconnect => bridge.disconnect(),
        HostCommand::State => return Some(HostOutput::Snapshot(bridge.state())),
        HostCommand::Send(frame) => bridge.send(frame),
        HostCommand::Call { method, params } => {
            let bridge = bridge.clone();
            calls.spawn(async move {
                let outcome = bridge.call_default(method.clone(), params).await;
                match outcome {
                    Ok(result) => HostOutput::CallResult { method, result },
                    Err(e) => HostOutput::CallError {
                        method,
                        error: e.message().to_string(),
                    },
                }
            });
        }
        HostCommand::Quit => {}
    }
    None
}

async fn drain_until_disconnected<W>(
    events: &mut BridgeEvents,
    output: &mut W,
) -> Result<(), BridgeHostError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match tokio::time::timeout(SHUTDOWN_GRACE, events.recv()).await {
            Ok(Some(event)) => {
                let done = is_manual_disconnect(&event);
                write_output(output, &HostOutput::from(event)).await?;
                if done {
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(_) => {
                warn!("No disconnect confirmation within {SHUTDOWN_GRACE:?}");
                return Ok(());
            }
        }
    }
}

/// Only the disconnect we asked for ends the drain; an earlier automatic
/// `disconnected` may still be queued ahead of it.
pub(crate) fn is_manual_disconnect(event: &BridgeEvent) -> bool {
    matches!(
        event,
        BridgeEvent::State(change)
            if change.state == ConnectionState::Disconnected
                && change.reason.as_deref() == Some(REASON_MANUAL_DISCONNECT)
    )
}

async fn write_output<W>(output: &mut W, out: &HostOutput) -> Result<(), BridgeHostError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(out).map_err(|e| BridgeHostError::Host {
        message: format!("Failed to encode output: {e}"),
        location: common::ErrorLocation::from(std::panic::Location::caller()),
    })?;
    line.push('\n');
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
