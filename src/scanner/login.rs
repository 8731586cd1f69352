//! Login probers. The cracked prober joins with a bare username; the
//! whitelist prober joins with a signed-in credential.

use std::time::Duration;

use log::debug;

use super::{LoginProbe, ProbeKind};
use crate::auth::Credential;
use crate::config::DEFAULT_PROBE_TIMEOUT_MS;
use crate::protocol::{GameClient, LoginIdentity, LoginOutcome, ProtocolError, ServerAddress};

fn classify(
    kind: ProbeKind,
    address: &ServerAddress,
    result: Result<LoginOutcome, ProtocolError>,
) -> LoginProbe {
    match result {
        Ok(LoginOutcome::Joined(state)) => LoginProbe::Joined(state),
        Ok(LoginOutcome::Rejected(reason)) => {
            debug!("{} probe {}: rejected ({})", kind, address, reason);
            LoginProbe::Rejected(reason.to_string())
        }
        Err(e) => {
            debug!("{} probe {}: {}", kind, address, e);
            LoginProbe::TransientFailure(e.to_string())
        }
    }
}

/// Tests whether a server accepts unauthenticated identities.
pub struct CrackedProber<'a, C> {
    client: &'a C,
    timeout_ms: u64,
}

impl<'a, C: GameClient> CrackedProber<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub async fn probe(&self, address: &ServerAddress, username: &str) -> LoginProbe {
        let result = self
            .client
            .login(
                address,
                LoginIdentity::Offline(username),
                Duration::from_millis(self.timeout_ms),
            )
            .await;
        classify(ProbeKind::Cracked, address, result)
    }
}

/// Tests whether a server lets a real, presumably non-whitelisted account in.
pub struct WhitelistProber<'a, C> {
    client: &'a C,
    timeout_ms: u64,
}

impl<'a, C: GameClient> WhitelistProber<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub async fn probe(&self, address: &ServerAddress, credential: &Credential) -> LoginProbe {
        let result = self
            .client
            .login(
                address,
                LoginIdentity::Authenticated(credential),
                Duration::from_millis(self.timeout_ms),
            )
            .await;
        classify(ProbeKind::Whitelist, address, result)
    }
}
