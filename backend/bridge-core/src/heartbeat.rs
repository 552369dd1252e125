//! Liveness probing while authenticated.
//!
//! The monitor only decides; the bridge sends the `ping` and closes the socket.
//! A `Heartbeat` value exists only inside the authenticated phase, so probes
//! cannot run in any other state.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a new probe.
    Probe,
    /// The previous probe is still outstanding at the next interval: force-close.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    next_tick: Instant,
    probe: Option<u64>,
}

impl Heartbeat {
    pub fn start(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_tick: now + interval,
            probe: None,
        }
    }

    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    pub fn outstanding(&self) -> Option<u64> {
        self.probe
    }

    /// Advance the interval if it has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<HeartbeatAction> {
        if now < self.next_tick {
            return None;
        }
        self.next_tick += self.interval;
        if self.next_tick <= now {
            // Skip missed ticks instead of bursting.
            self.next_tick = now + self.interval;
        }

        if self.probe.is_some() {
            Some(HeartbeatAction::Stalled)
        } else {
            Some(HeartbeatAction::Probe)
        }
    }

    pub fn probe_sent(&mut self, id: u64) {
        self.probe = Some(id);
    }

    /// Clear the outstanding probe if `id` is it.
    pub fn settle(&mut self, id: u64) -> bool {
        if self.probe == Some(id) {
            self.probe = None;
            true
        } else {
            false
        }
    }
}
