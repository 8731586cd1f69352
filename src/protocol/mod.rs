//! Game-protocol client. Speaks just enough of the Java Edition protocol
//! (1.8 through 1.15.2) to run a server list ping and to log in far enough to
//! see the join-game packet, in offline or online mode.

pub mod codec;
mod encryption;
mod login;
mod status;
mod version;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::time::timeout;

use crate::auth::{Credential, CredentialError};
use crate::config::DEFAULT_SESSION_SERVER_URL;

pub use login::{GameMode, GameState};
pub use status::ServerStatus;
pub use version::PlayLayout;

/// Protocol version used when a server does not report its own (1.12.2).
pub const PROTOCOL_VERSION: i32 = 340;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("unexpected packet 0x{id:02x} in {state} state")]
    UnexpectedPacket { state: &'static str, id: i32 },
    #[error("invalid status JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("server never sent a join-game packet")]
    NoJoinGame,
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("session join failed: {0}")]
    Session(#[from] CredentialError),
    #[error("server runs protocol {0}, which this client cannot log in with")]
    UnsupportedVersion(i32),
    #[error("server refused our protocol version: {0}")]
    VersionMismatch(String),
}

/// Host and port of a game server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Who we claim to be when logging in.
#[derive(Debug, Clone, Copy)]
pub enum LoginIdentity<'a> {
    Offline(&'a str),
    Authenticated(&'a Credential),
}

impl LoginIdentity<'_> {
    pub fn username(&self) -> &str {
        match self {
            LoginIdentity::Offline(name) => name,
            LoginIdentity::Authenticated(credential) => &credential.profile_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Server sent a disconnect with this (JSON chat) reason.
    Disconnected(String),
    /// Server asked an offline identity to start encryption, i.e. it runs in online mode.
    OnlineMode,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Disconnected(reason) => write!(f, "disconnected: {}", reason),
            RejectReason::OnlineMode => write!(f, "online mode"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Joined(GameState),
    Rejected(RejectReason),
}

/// The two calls the classifier needs from a protocol client.
#[allow(async_fn_in_trait)]
pub trait GameClient {
    /// Status ping, tried up to `attempts` times with `timeout` per attempt.
    async fn query_status(
        &self,
        address: &ServerAddress,
        attempts: u32,
        timeout: Duration,
    ) -> Result<ServerStatus, ProtocolError>;

    /// Log in and wait for the join-game packet, bounded by `timeout`.
    async fn login(
        &self,
        address: &ServerAddress,
        identity: LoginIdentity<'_>,
        timeout: Duration,
    ) -> Result<LoginOutcome, ProtocolError>;
}

/// `GameClient` over plain TCP. Remembers the protocol version each server
/// reported in its last status response and logs in with that version.
#[derive(Debug, Clone)]
pub struct TcpGameClient {
    default_protocol: i32,
    session_server_url: String,
    negotiated: RefCell<HashMap<ServerAddress, i32>>,
}

impl TcpGameClient {
    pub fn new() -> Self {
        Self {
            default_protocol: PROTOCOL_VERSION,
            session_server_url: DEFAULT_SESSION_SERVER_URL.to_string(),
            negotiated: RefCell::new(HashMap::new()),
        }
    }

    /// Session server receiving the join announcement of online-mode logins.
    pub fn with_session_server(mut self, url: impl Into<String>) -> Self {
        self.session_server_url = url.into();
        self
    }

    pub fn negotiated_protocol(&self, address: &ServerAddress) -> Option<i32> {
        self.negotiated.borrow().get(address).copied()
    }

    fn remember(&self, address: &ServerAddress, status: &ServerStatus) {
        if let Some(protocol) = status.protocol {
            self.negotiated
                .borrow_mut()
                .insert(address.clone(), protocol);
        }
    }

    /// Version to log in with: the one last reported by `address`, else a
    /// fresh status ping, else the default.
    async fn negotiate(&self, address: &ServerAddress) -> i32 {
        if let Some(protocol) = self.negotiated_protocol(address) {
            return protocol;
        }
        match status::query(address, self.default_protocol).await {
            Ok(status) => {
                self.remember(address, &status);
                status.protocol.unwrap_or(self.default_protocol)
            }
            Err(e) => {
                debug!("version ping {}: {}", address, e);
                self.default_protocol
            }
        }
    }
}

impl Default for TcpGameClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GameClient for TcpGameClient {
    async fn query_status(
        &self,
        address: &ServerAddress,
        attempts: u32,
        per_attempt: Duration,
    ) -> Result<ServerStatus, ProtocolError> {
        let mut last_error = ProtocolError::Timeout(per_attempt);
        for _ in 0..attempts.max(1) {
            match timeout(per_attempt, status::query(address, self.default_protocol)).await {
                Ok(Ok(status)) => {
                    self.remember(address, &status);
                    return Ok(status);
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = ProtocolError::Timeout(per_attempt),
            }
        }
        Err(last_error)
    }

    async fn login(
        &self,
        address: &ServerAddress,
        identity: LoginIdentity<'_>,
        limit: Duration,
    ) -> Result<LoginOutcome, ProtocolError> {
        let attempt = async {
            let protocol = self.negotiate(address).await;
            login::login(address, protocol, identity, &self.session_server_url).await
        };
        match timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeGameServer, ServerLogin, game_state};

    #[test]
    fn test_server_address_display() {
        let addr = ServerAddress::new("mc.example.com", 25565);
        assert_eq!(addr.to_string(), "mc.example.com:25565");
    }

    #[test]
    fn test_default_client() {
        let client = TcpGameClient::default();
        assert_eq!(client.default_protocol, PROTOCOL_VERSION);
        assert_eq!(client.session_server_url, DEFAULT_SESSION_SERVER_URL);
        assert_eq!(
            client.negotiated_protocol(&ServerAddress::new("mc.example.com", 25565)),
            None
        );
    }

    #[test]
    fn test_login_identity_username() {
        let credential = Credential::new("token", "client", "0123", "Notch");
        assert_eq!(LoginIdentity::Offline("GhostUser").username(), "GhostUser");
        assert_eq!(
            LoginIdentity::Authenticated(&credential).username(),
            "Notch"
        );
    }

    #[tokio::test]
    async fn test_status_against_closed_port_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = TcpGameClient::new();
        let result = client
            .query_status(
                &ServerAddress::new("127.0.0.1", port),
                2,
                Duration::from_millis(500),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_login_uses_version_reported_by_status() {
        let server = FakeGameServer::spawn(
            0,
            335,
            ServerLogin::Join(game_state(GameMode::Creative, "flat")),
        )
        .await;
        let client = TcpGameClient::new();

        client
            .query_status(&server.address, 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(client.negotiated_protocol(&server.address), Some(335));

        let outcome = client
            .login(
                &server.address,
                LoginIdentity::Offline("GhostUser"),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LoginOutcome::Joined(game_state(GameMode::Creative, "flat"))
        );
        assert_eq!(
            server.handshakes(),
            vec![(PROTOCOL_VERSION, 1), (335, 2)]
        );
    }

    #[tokio::test]
    async fn test_login_pings_first_when_version_unknown() {
        let server = FakeGameServer::spawn(
            0,
            340,
            ServerLogin::Disconnect("You are not white-listed on this server!".to_string()),
        )
        .await;
        let client = TcpGameClient::new();

        let outcome = client
            .login(
                &server.address,
                LoginIdentity::Offline("GhostUser"),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LoginOutcome::Rejected(RejectReason::Disconnected(
                "You are not white-listed on this server!".to_string()
            ))
        );
        assert_eq!(server.handshakes(), vec![(340, 1), (340, 2)]);
    }

    #[tokio::test]
    async fn test_unsupported_version_is_an_error_not_a_rejection() {
        let server = FakeGameServer::spawn(
            0,
            754,
            ServerLogin::Join(game_state(GameMode::Survival, "default")),
        )
        .await;
        let client = TcpGameClient::new();
        client
            .query_status(&server.address, 1, Duration::from_secs(2))
            .await
            .unwrap();

        let result = client
            .login(
                &server.address,
                LoginIdentity::Offline("GhostUser"),
                Duration::from_secs(2),
            )
            .await;
        assert!(matches!(result, Err(ProtocolError::UnsupportedVersion(754))));
        // No login connection was attempted.
        assert_eq!(server.handshakes(), vec![(PROTOCOL_VERSION, 1)]);
    }
}
