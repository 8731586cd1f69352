pub mod login;
pub mod manager;
pub mod status;

use crate::protocol::GameState;

/// Types of probe run against an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Status,
    Cracked,
    Whitelist,
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeKind::Status => write!(f, "status"),
            ProbeKind::Cracked => write!(f, "cracked"),
            ProbeKind::Whitelist => write!(f, "whitelist"),
        }
    }
}

/// Result of the status ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusVerdict {
    /// Nobody online; safe to try logging in.
    Idle,
    /// Players online; left alone this cycle.
    Occupied { online: u32 },
    /// Timeout, refused, reset or any other socket failure.
    Unreachable,
}

impl StatusVerdict {
    pub fn should_proceed(&self) -> bool {
        matches!(self, StatusVerdict::Idle)
    }
}

/// Result of a login probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginProbe {
    Joined(GameState),
    Rejected(String),
    /// The network or protocol failed before the server gave an answer.
    TransientFailure(String),
}

impl LoginProbe {
    pub fn into_outcome(self) -> Option<GameState> {
        match self {
            LoginProbe::Joined(state) => Some(state),
            LoginProbe::Rejected(_) | LoginProbe::TransientFailure(_) => None,
        }
    }
}
