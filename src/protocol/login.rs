//! Login sequence up to the first join-game packet, including the online-mode
//! key exchange for authenticated identities.

use std::fmt;

use log::warn;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::codec::{PacketReader, PacketStream, write_string, write_varint};
use super::encryption::{EncryptionRequest, generate_shared_secret};
use super::status::{NEXT_STATE_LOGIN, handshake};
use super::version::PlayLayout;
use super::{LoginIdentity, LoginOutcome, ProtocolError, RejectReason, ServerAddress};
use crate::auth;

// Serverbound
const HANDSHAKE: i32 = 0x00;
const LOGIN_START: i32 = 0x00;
const LOGIN_ENCRYPTION_RESPONSE: i32 = 0x01;
const LOGIN_PLUGIN_RESPONSE: i32 = 0x02;

// Clientbound, login state
const LOGIN_DISCONNECT: i32 = 0x00;
const LOGIN_ENCRYPTION_REQUEST: i32 = 0x01;
const LOGIN_SUCCESS: i32 = 0x02;
const LOGIN_SET_COMPRESSION: i32 = 0x03;
const LOGIN_PLUGIN_REQUEST: i32 = 0x04;

/// Join-game usually comes first; anything past this is a server that will never send it.
const MAX_PLAY_PACKETS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
    Unknown(u8),
}

impl GameMode {
    /// Decode the join-game game mode byte. Bit 3 is the hardcore flag.
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x07 {
            0 => GameMode::Survival,
            1 => GameMode::Creative,
            2 => GameMode::Adventure,
            3 => GameMode::Spectator,
            other => GameMode::Unknown(other),
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameMode::Survival => write!(f, "survival"),
            GameMode::Creative => write!(f, "creative"),
            GameMode::Adventure => write!(f, "adventure"),
            GameMode::Spectator => write!(f, "spectator"),
            GameMode::Unknown(value) => write!(f, "unknown({})", value),
        }
    }
}

/// World information confirmed by the server once a login is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    pub game_mode: GameMode,
    pub hardcore: bool,
    pub dimension: i32,
    pub level_type: String,
}

impl GameState {
    pub fn parse_join_game(body: &[u8], layout: &PlayLayout) -> Result<Self, ProtocolError> {
        let mut reader = PacketReader::new(body);
        let _entity_id = reader.read_i32()?;
        let mode = reader.read_u8()?;
        let dimension = if layout.int_dimension {
            reader.read_i32()?
        } else {
            reader.read_u8()? as i8 as i32
        };
        if layout.hashed_seed {
            reader.read_bytes(8)?;
        }
        if layout.difficulty {
            reader.read_u8()?;
        }
        let _max_players = reader.read_u8()?;
        let level_type = reader.read_string()?;

        Ok(Self {
            game_mode: GameMode::from_byte(mode),
            hardcore: mode & 0x08 != 0,
            dimension,
            level_type,
        })
    }
}

/// Pull a readable message out of a JSON chat component, falling back to the raw text.
fn disconnect_reason(body: &[u8]) -> String {
    let raw = match PacketReader::new(body).read_string() {
        Ok(raw) => raw,
        Err(_) => return String::from("<unreadable>"),
    };

    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::String(text)) => text,
        Ok(value) => value
            .get("text")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .or_else(|| value.get("translate").and_then(|t| t.as_str()))
            .map(str::to_string)
            .unwrap_or(raw),
        Err(_) => raw,
    }
}

/// "Outdated client!", "Outdated server!" and their translation keys.
fn is_version_mismatch(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains("outdated")
}

pub(super) async fn login(
    address: &ServerAddress,
    protocol_version: i32,
    identity: LoginIdentity<'_>,
    session_url: &str,
) -> Result<LoginOutcome, ProtocolError> {
    let layout = PlayLayout::for_protocol(protocol_version)
        .ok_or(ProtocolError::UnsupportedVersion(protocol_version))?;
    let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
    run_login(
        PacketStream::new(stream),
        address,
        protocol_version,
        &layout,
        identity,
        session_url,
    )
    .await
}

async fn run_login<S: AsyncRead + AsyncWrite + Unpin>(
    mut conn: PacketStream<S>,
    address: &ServerAddress,
    protocol_version: i32,
    layout: &PlayLayout,
    identity: LoginIdentity<'_>,
    session_url: &str,
) -> Result<LoginOutcome, ProtocolError> {
    conn.send(
        HANDSHAKE,
        &handshake(protocol_version, address, NEXT_STATE_LOGIN),
    )
    .await?;
    let mut body = Vec::new();
    write_string(&mut body, identity.username());
    conn.send(LOGIN_START, &body).await?;

    loop {
        let packet = conn.receive().await?;
        match packet.id {
            LOGIN_DISCONNECT => {
                let reason = disconnect_reason(&packet.body);
                if is_version_mismatch(&reason) {
                    warn!(
                        "{} refused protocol {}: {}",
                        address, protocol_version, reason
                    );
                    return Err(ProtocolError::VersionMismatch(reason));
                }
                return Ok(LoginOutcome::Rejected(RejectReason::Disconnected(reason)));
            }
            LOGIN_ENCRYPTION_REQUEST => {
                let LoginIdentity::Authenticated(credential) = identity else {
                    return Ok(LoginOutcome::Rejected(RejectReason::OnlineMode));
                };
                if conn.is_encrypted() {
                    return Err(ProtocolError::Malformed("second encryption request"));
                }
                let request = EncryptionRequest::parse(&packet.body)?;
                let shared_secret = generate_shared_secret();
                let response = request.respond(&shared_secret)?;
                auth::join_server(session_url, credential, &request.server_hash(&shared_secret))
                    .await?;
                conn.send(LOGIN_ENCRYPTION_RESPONSE, &response).await?;
                conn.enable_encryption(&shared_secret);
            }
            LOGIN_SET_COMPRESSION => {
                let threshold = PacketReader::new(&packet.body).read_varint()?;
                conn.set_compression(threshold);
            }
            LOGIN_PLUGIN_REQUEST if layout.login_plugin => {
                let message_id = PacketReader::new(&packet.body).read_varint()?;
                let mut reply = Vec::new();
                write_varint(&mut reply, message_id);
                reply.push(0); // not understood
                conn.send(LOGIN_PLUGIN_RESPONSE, &reply).await?;
            }
            LOGIN_SUCCESS => break,
            other => {
                return Err(ProtocolError::UnexpectedPacket {
                    state: "login",
                    id: other,
                });
            }
        }
    }

    for _ in 0..MAX_PLAY_PACKETS {
        let packet = conn.receive().await?;
        if packet.id == layout.join_game {
            return Ok(LoginOutcome::Joined(GameState::parse_join_game(
                &packet.body,
                layout,
            )?));
        }
        if packet.id == layout.disconnect {
            return Ok(LoginOutcome::Rejected(RejectReason::Disconnected(
                disconnect_reason(&packet.body),
            )));
        }
    }

    Err(ProtocolError::NoJoinGame)
}
