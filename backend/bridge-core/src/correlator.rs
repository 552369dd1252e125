//! Request/response correlation over a single gateway socket.
//!
//! Calls get strictly increasing identifiers that are never reused for the
//! lifetime of the bridge. Responses are matched by `id` alone, so out-of-order
//! replies are fine. Expiry is tracked in a min-heap keyed by deadline; entries
//! whose call already settled are skipped lazily.

use crate::error::RpcError;
use crate::protocol::{ResponseFrame, encode_request};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use log::{debug, trace};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub type CallResult = Result<Value, RpcError>;

/// Who is waiting on a call.
#[derive(Debug)]
pub enum Waiter {
    /// The authentication exchange run on every fresh socket.
    Auth,
    /// A liveness probe.
    Heartbeat,
    /// An application caller.
    Caller(oneshot::Sender<CallResult>),
}

/// Outcome of settling a call, for waiters the bridge itself has to react to.
#[derive(Debug)]
pub enum Settled {
    /// Delivered to an application caller; nothing left to do.
    Delivered,
    Auth { id: u64, outcome: CallResult },
    Heartbeat { id: u64, outcome: CallResult },
}

#[derive(Debug)]
struct PendingCall {
    method: String,
    timeout: Duration,
    deadline: Instant,
    waiter: Waiter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub id: u64,
    pub frame: String,
}

#[derive(Debug, Default)]
pub struct RpcCorrelator {
    last_id: u64,
    pending: HashMap<u64, PendingCall>,
    expiries: BinaryHeap<Reverse<(Instant, u64)>>,
}

impl RpcCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id, encode the request and start its expiry clock.
    ///
    /// On encode failure an application caller is notified immediately and the
    /// id is still consumed.
    pub fn register(
        &mut self,
        method: &str,
        params: Option<&Value>,
        timeout: Duration,
        now: Instant,
        waiter: Waiter,
    ) -> Result<Registered, RpcError> {
        self.last_id += 1;
        let id = self.last_id;

        let frame = match encode_request(method, params, Some(id)) {
            Ok(frame) => frame,
            Err(e) => {
                let error = RpcError::from(e);
                if let Waiter::Caller(reply) = waiter {
                    let _ = reply.send(Err(error.clone()));
                }
                return Err(error);
            }
        };

        let deadline = now + timeout;
        self.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                timeout,
                deadline,
                waiter,
            },
        );
        self.expiries.push(Reverse((deadline, id)));
        trace!("Registered call {id} ({method}), expires in {timeout:?}");

        Ok(Registered { id, frame })
    }

    /// Settle the call a response frame answers.
    ///
    /// Returns `None` when no call with that id is pending; the frame is then a push.
    pub fn resolve(&mut self, response: ResponseFrame) -> Option<Settled> {
        let call = self.pending.remove(&response.id)?;
        if let Err(message) = &response.outcome {
            debug!("RPC {} ({}) error: {message}", response.id, call.method);
        }
        let outcome = response.outcome.map_err(RpcError::remote);
        Some(settle(response.id, call.waiter, outcome))
    }

    /// Fail every call whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<Settled> {
        let mut settled = Vec::new();

        while let Some(Reverse((deadline, id))) = self.expiries.peek().copied() {
            if deadline > now {
                break;
            }
            self.expiries.pop();

            let is_current = self
                .pending
                .get(&id)
                .is_some_and(|call| call.deadline == deadline);
            if !is_current {
                continue;
            }

            if let Some(call) = self.pending.remove(&id) {
                debug!("RPC {id} ({}) timed out after {:?}", call.method, call.timeout);
                let error = RpcError::timeout(call.method, call.timeout);
                settled.push(settle(id, call.waiter, Err(error)));
            }
        }

        settled
    }

    /// Reject every pending call and clear the table. Returns how many were failed.
    ///
    /// Internal waiters are dropped; the owner tears their state down itself.
    pub fn fail_all(&mut self, error: impl Fn() -> RpcError) -> usize {
        let count = self.pending.len();
        for (_, call) in self.pending.drain() {
            if let Waiter::Caller(reply) = call.waiter {
                let _ = reply.send(Err(error()));
            }
        }
        self.expiries.clear();
        count
    }

    /// Earliest deadline still worth waking up for.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.expiries.peek().copied() {
            let is_current = self
                .pending
                .get(&id)
                .is_some_and(|call| call.deadline == deadline);
            if is_current {
                return Some(deadline);
            }
            self.expiries.pop();
        }
        None
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Most recently allocated id (0 before the first call).
    pub fn last_id(&self) -> u64 {
        self.last_id
    }
}

fn settle(id: u64, waiter: Waiter, outcome: CallResult) -> Settled {
    match waiter {
        Waiter::Auth => Settled::Auth { id, outcome },
        Waiter::Heartbeat => Settled::Heartbeat { id, outcome },
        Waiter::Caller(reply) => {
            // Receiver may be gone if the caller stopped waiting.
            let _ = reply.send(outcome);
            Settled::Delivered
        }
    }
}
