//! Status prober. Pings an endpoint and decides whether it is idle enough to
//! be worth a login attempt.

use std::time::Duration;

use log::debug;

use super::StatusVerdict;
use crate::config::{DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_STATUS_ATTEMPTS};
use crate::protocol::{GameClient, ServerAddress};

pub struct StatusProber<'a, C> {
    client: &'a C,
    timeout_ms: u64,
    attempts: u32,
}

impl<'a, C: GameClient> StatusProber<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            attempts: DEFAULT_STATUS_ATTEMPTS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Errors never escape; any failure reads as `Unreachable`.
    pub async fn probe(&self, address: &ServerAddress) -> StatusVerdict {
        match self
            .client
            .query_status(address, self.attempts, Duration::from_millis(self.timeout_ms))
            .await
        {
            Ok(status) if status.online_players < 1 => StatusVerdict::Idle,
            Ok(status) => StatusVerdict::Occupied {
                online: status.online_players,
            },
            Err(e) => {
                debug!("status {}: {}", address, e);
                StatusVerdict::Unreachable
            }
        }
    }
}
