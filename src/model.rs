//! Domain types shared by the repository and the classifier: endpoint ids,
//! stored endpoint rows, classification results and the write policy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::protocol::{GameState, ServerAddress};

/// Primary key of a row in the `servers` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub i64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A known game server together with its last recorded classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub address: ServerAddress,
    pub last_checked: Option<DateTime<Utc>>,
    pub world_type: Option<String>,
    pub game_mode: Option<String>,
    pub cracked: Option<bool>,
    pub not_whitelisted: Option<bool>,
}

/// Value written back to an endpoint after a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub checked_at: DateTime<Utc>,
    pub level_type: String,
    pub game_mode: String,
    pub cracked: bool,
    pub not_whitelisted: bool,
}

impl Classification {
    /// Only a confirmed join can produce a classification.
    pub fn from_join(state: &GameState, cracked: bool, not_whitelisted: bool) -> Self {
        Self {
            checked_at: Utc::now(),
            level_type: state.level_type.clone(),
            game_mode: state.game_mode.to_string(),
            cracked,
            not_whitelisted,
        }
    }
}

/// How a successful join was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPath {
    /// Offline-mode join; `known_identity` is true when the username came from
    /// the endpoint's associated identities rather than the sentinel.
    Unauthenticated { known_identity: bool },
    Authenticated,
}

/// Decides the `not_whitelisted` column for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotWhitelistedPolicy {
    /// Every write marks the endpoint as not whitelisted, whichever probe succeeded.
    #[default]
    AlwaysTrue,
    /// Only joins that prove the whitelist was bypassed set the flag.
    Observed,
}

impl NotWhitelistedPolicy {
    pub fn not_whitelisted(self, path: JoinPath) -> bool {
        match self {
            NotWhitelistedPolicy::AlwaysTrue => true,
            NotWhitelistedPolicy::Observed => match path {
                JoinPath::Unauthenticated { known_identity } => !known_identity,
                JoinPath::Authenticated => true,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotWhitelistedPolicy::AlwaysTrue => "always",
            NotWhitelistedPolicy::Observed => "observed",
        }
    }
}

impl fmt::Display for NotWhitelistedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotWhitelistedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(NotWhitelistedPolicy::AlwaysTrue),
            "observed" => Ok(NotWhitelistedPolicy::Observed),
            other => Err(format!("unknown policy '{}'", other)),
        }
    }
}
