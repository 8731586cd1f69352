//! Server list ping: handshake into the status state and read the JSON
//! status document.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::net::TcpStream;

use super::codec::{PacketReader, PacketStream, write_string, write_varint};
use super::{ProtocolError, ServerAddress};

const HANDSHAKE: i32 = 0x00;
const STATUS_REQUEST: i32 = 0x00;
const STATUS_RESPONSE: i32 = 0x00;

const NEXT_STATE_STATUS: i32 = 1;
pub(super) const NEXT_STATE_LOGIN: i32 = 2;

/// What the status ping tells us about a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub online_players: u32,
    pub max_players: u32,
    pub version_name: Option<String>,
    pub protocol: Option<i32>,
    pub latency: Duration,
}

#[derive(Debug, Deserialize)]
struct StatusDocument {
    version: Option<VersionInfo>,
    players: PlayersInfo,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    name: Option<String>,
    protocol: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct PlayersInfo {
    max: i64,
    online: i64,
}

pub(super) fn handshake(protocol_version: i32, address: &ServerAddress, next_state: i32) -> Vec<u8> {
    let mut body = Vec::new();
    write_varint(&mut body, protocol_version);
    write_string(&mut body, &address.host);
    body.extend_from_slice(&address.port.to_be_bytes());
    write_varint(&mut body, next_state);
    body
}

pub(super) fn parse_status(json: &str, latency: Duration) -> Result<ServerStatus, ProtocolError> {
    let doc: StatusDocument = serde_json::from_str(json)?;
    let version = doc.version.unwrap_or(VersionInfo {
        name: None,
        protocol: None,
    });
    Ok(ServerStatus {
        online_players: doc.players.online.clamp(0, u32::MAX as i64) as u32,
        max_players: doc.players.max.clamp(0, u32::MAX as i64) as u32,
        version_name: version.name,
        protocol: version.protocol,
        latency,
    })
}

/// One status attempt. The caller owns timeouts and retries.
pub(super) async fn query(
    address: &ServerAddress,
    protocol_version: i32,
) -> Result<ServerStatus, ProtocolError> {
    let started = Instant::now();
    let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
    let mut conn = PacketStream::new(stream);

    conn.send(
        HANDSHAKE,
        &handshake(protocol_version, address, NEXT_STATE_STATUS),
    )
    .await?;
    conn.send(STATUS_REQUEST, &[]).await?;

    let packet = conn.receive().await?;
    if packet.id != STATUS_RESPONSE {
        return Err(ProtocolError::UnexpectedPacket {
            state: "status",
            id: packet.id,
        });
    }
    let json = PacketReader::new(&packet.body).read_string()?;
    parse_status(&json, started.elapsed())
}
