use std::cell::{Cell, RefCell};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::db::{Repository, RepositoryError, ResultSink};
use crate::model::{Classification, EndpointId};
use crate::protocol::codec::{PacketReader, PacketStream, write_string};
use crate::protocol::{
    GameClient, GameMode, GameState, LoginIdentity, LoginOutcome, ProtocolError, RejectReason,
    ServerAddress, ServerStatus,
};

pub fn game_state(game_mode: GameMode, level_type: &str) -> GameState {
    GameState {
        game_mode,
        hardcore: false,
        dimension: 0,
        level_type: level_type.to_string(),
    }
}

/// Join-game body in the 1.9.1 - 1.12.2 layout, dimension 0.
pub fn join_game_body(mode: u8, level_type: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&7i32.to_be_bytes());
    body.push(mode);
    body.extend_from_slice(&0i32.to_be_bytes());
    body.push(2); // difficulty
    body.push(20); // max players
    write_string(&mut body, level_type);
    body.push(0); // reduced debug info
    body
}

fn mode_byte(state: &GameState) -> u8 {
    let mode = match state.game_mode {
        GameMode::Survival => 0,
        GameMode::Creative => 1,
        GameMode::Adventure => 2,
        GameMode::Spectator => 3,
        GameMode::Unknown(value) => value,
    };
    if state.hardcore { mode | 0x08 } else { mode }
}

/// How `FakeGameServer` answers a login.
#[derive(Debug, Clone)]
pub enum ServerLogin {
    Join(GameState),
    Disconnect(String),
}

/// Offline-mode game server on a loopback port. Answers status pings with
/// the configured player count and protocol, and every login the same way.
pub struct FakeGameServer {
    pub address: ServerAddress,
    handshakes: Arc<Mutex<Vec<(i32, i32)>>>,
}

impl FakeGameServer {
    pub async fn spawn(online: u32, protocol: i32, login: ServerLogin) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handshakes = Arc::new(Mutex::new(Vec::new()));

        let seen = handshakes.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let seen = seen.clone();
                let login = login.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, online, protocol, login, seen).await;
                });
            }
        });

        Self {
            address: ServerAddress::new("127.0.0.1", port),
            handshakes,
        }
    }

    /// `(protocol, next state)` of every handshake received, in order.
    pub fn handshakes(&self) -> Vec<(i32, i32)> {
        self.handshakes.lock().unwrap().clone()
    }
}

async fn serve_connection(
    socket: TcpStream,
    online: u32,
    protocol: i32,
    login: ServerLogin,
    seen: Arc<Mutex<Vec<(i32, i32)>>>,
) -> Result<(), ProtocolError> {
    let mut conn = PacketStream::new(socket);
    let handshake = conn.receive().await?;
    let mut reader = PacketReader::new(&handshake.body);
    let client_protocol = reader.read_varint()?;
    let _host = reader.read_string()?;
    let _port = reader.read_bytes(2)?;
    let next_state = reader.read_varint()?;
    seen.lock().unwrap().push((client_protocol, next_state));

    // Status request or login start.
    conn.receive().await?;
    if next_state == 1 {
        let json = format!(
            r#"{{"version":{{"name":"test","protocol":{}}},"players":{{"max":20,"online":{}}}}}"#,
            protocol, online
        );
        let mut body = Vec::new();
        write_string(&mut body, &json);
        conn.send(0x00, &body).await?;
    } else {
        match login {
            ServerLogin::Join(state) => {
                let mut success = Vec::new();
                write_string(&mut success, "00000000-0000-0000-0000-000000000000");
                write_string(&mut success, "GhostUser");
                conn.send(0x02, &success).await?;
                conn.send(0x23, &join_game_body(mode_byte(&state), &state.level_type))
                    .await?;
            }
            ServerLogin::Disconnect(reason) => {
                let mut body = Vec::new();
                write_string(&mut body, &serde_json::json!({ "text": reason }).to_string());
                conn.send(0x00, &body).await?;
            }
        }
    }

    // Hold the socket until the client hangs up.
    let _ = conn.receive().await;
    Ok(())
}

/// One-shot HTTP server on a loopback port. Answers the first request with
/// `status` and a JSON `body`; the handle resolves to the raw request text.
pub async fn spawn_http_stub(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request_complete(&request) {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8(request).unwrap()
    });
    (url, handle)
}

fn request_complete(request: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(request) else {
        return false;
    };
    let Some((head, body)) = text.split_once("\r\n\r\n") else {
        return false;
    };
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    body.len() >= content_length
}

/// Scripted answer to a status query
#[derive(Debug, Clone)]
pub enum StatusScript {
    Online(u32),
    Timeout,
    Refused,
    Reset,
}

/// Scripted answer to a login attempt
#[derive(Debug, Clone)]
pub enum LoginScript {
    Join(GameState),
    Reject(RejectReason),
    ConnectionReset,
    Timeout,
}

impl LoginScript {
    fn play(&self, limit: Duration) -> Result<LoginOutcome, ProtocolError> {
        match self {
            LoginScript::Join(state) => Ok(LoginOutcome::Joined(state.clone())),
            LoginScript::Reject(reason) => Ok(LoginOutcome::Rejected(reason.clone())),
            LoginScript::ConnectionReset => Err(ProtocolError::Io(io::Error::from(
                io::ErrorKind::ConnectionReset,
            ))),
            LoginScript::Timeout => Err(ProtocolError::Timeout(limit)),
        }
    }
}

/// `GameClient` that replays scripted answers and records every call.
pub struct FakeGameClient {
    status: StatusScript,
    offline: LoginScript,
    authenticated: LoginScript,
    status_calls: Cell<u32>,
    last_status_args: Cell<Option<(u32, Duration)>>,
    offline_usernames: RefCell<Vec<String>>,
    authenticated_tokens: RefCell<Vec<String>>,
}

impl FakeGameClient {
    /// Idle server that refuses both kinds of login.
    pub fn new() -> Self {
        Self {
            status: StatusScript::Online(0),
            offline: LoginScript::Reject(RejectReason::OnlineMode),
            authenticated: LoginScript::Reject(RejectReason::Disconnected(
                "You are not white-listed on this server!".to_string(),
            )),
            status_calls: Cell::new(0),
            last_status_args: Cell::new(None),
            offline_usernames: RefCell::new(Vec::new()),
            authenticated_tokens: RefCell::new(Vec::new()),
        }
    }

    pub fn with_online(mut self, online: u32) -> Self {
        self.status = StatusScript::Online(online);
        self
    }

    pub fn with_status_timeout(mut self) -> Self {
        self.status = StatusScript::Timeout;
        self
    }

    pub fn with_status_refused(mut self) -> Self {
        self.status = StatusScript::Refused;
        self
    }

    pub fn with_status_reset(mut self) -> Self {
        self.status = StatusScript::Reset;
        self
    }

    pub fn with_offline_login(mut self, script: LoginScript) -> Self {
        self.offline = script;
        self
    }

    pub fn with_authenticated_login(mut self, script: LoginScript) -> Self {
        self.authenticated = script;
        self
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.get()
    }

    pub fn last_status_args(&self) -> Option<(u32, Duration)> {
        self.last_status_args.get()
    }

    pub fn offline_usernames(&self) -> Vec<String> {
        self.offline_usernames.borrow().clone()
    }

    pub fn authenticated_tokens(&self) -> Vec<String> {
        self.authenticated_tokens.borrow().clone()
    }
}

impl GameClient for FakeGameClient {
    async fn query_status(
        &self,
        _address: &ServerAddress,
        attempts: u32,
        timeout: Duration,
    ) -> Result<ServerStatus, ProtocolError> {
        self.status_calls.set(self.status_calls.get() + 1);
        self.last_status_args.set(Some((attempts, timeout)));
        match self.status {
            StatusScript::Online(online) => Ok(ServerStatus {
                online_players: online,
                max_players: 20,
                version_name: Some("1.12.2".to_string()),
                protocol: Some(340),
                latency: Duration::ZERO,
            }),
            StatusScript::Timeout => Err(ProtocolError::Timeout(timeout)),
            StatusScript::Refused => Err(ProtocolError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))),
            StatusScript::Reset => Err(ProtocolError::Io(io::Error::from(
                io::ErrorKind::ConnectionReset,
            ))),
        }
    }

    async fn login(
        &self,
        _address: &ServerAddress,
        identity: LoginIdentity<'_>,
        timeout: Duration,
    ) -> Result<LoginOutcome, ProtocolError> {
        match identity {
            LoginIdentity::Offline(username) => {
                self.offline_usernames.borrow_mut().push(username.to_string());
                self.offline.play(timeout)
            }
            LoginIdentity::Authenticated(credential) => {
                self.authenticated_tokens
                    .borrow_mut()
                    .push(credential.access_token.clone());
                self.authenticated.play(timeout)
            }
        }
    }
}

/// In-memory repository. "Random" picks cycle through endpoints in insertion
/// order so tests stay deterministic.
pub struct FakeRepository {
    endpoints: Vec<(EndpointId, ServerAddress, Vec<String>)>,
    next_pick: Cell<usize>,
    records: RefCell<Vec<(EndpointId, Classification)>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            next_pick: Cell::new(0),
            records: RefCell::new(Vec::new()),
        }
    }

    pub fn with_endpoint(mut self, id: i64, host: &str, port: u16, identities: &[&str]) -> Self {
        self.endpoints.push((
            EndpointId(id),
            ServerAddress::new(host, port),
            identities.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub fn records(&self) -> Vec<(EndpointId, Classification)> {
        self.records.borrow().clone()
    }
}

impl Repository for FakeRepository {
    fn pick_random_endpoint(&self) -> Result<Option<EndpointId>, RepositoryError> {
        if self.endpoints.is_empty() {
            return Ok(None);
        }
        let index = self.next_pick.get() % self.endpoints.len();
        self.next_pick.set(index + 1);
        Ok(Some(self.endpoints[index].0))
    }

    fn pick_random_identity(&self, endpoint: EndpointId) -> Result<Option<String>, RepositoryError> {
        self.endpoints
            .iter()
            .find(|(id, _, _)| *id == endpoint)
            .map(|(_, _, identities)| identities.first().cloned())
            .ok_or(RepositoryError::UnknownEndpoint(endpoint))
    }

    fn get_address(&self, endpoint: EndpointId) -> Result<ServerAddress, RepositoryError> {
        self.endpoints
            .iter()
            .find(|(id, _, _)| *id == endpoint)
            .map(|(_, address, _)| address.clone())
            .ok_or(RepositoryError::UnknownEndpoint(endpoint))
    }
}

impl ResultSink for FakeRepository {
    fn record_classification(
        &self,
        endpoint: EndpointId,
        classification: &Classification,
    ) -> Result<(), RepositoryError> {
        self.records
            .borrow_mut()
            .push((endpoint, classification.clone()));
        Ok(())
    }
}

mod tests {
    use super::*;

    #[test]
    fn test_fake_repository_cycles_endpoints() {
        let repo = FakeRepository::new()
            .with_endpoint(1, "a.example.com", 25565, &[])
            .with_endpoint(2, "b.example.com", 25565, &["Alice"]);
        assert_eq!(repo.pick_random_endpoint().unwrap(), Some(EndpointId(1)));
        assert_eq!(repo.pick_random_endpoint().unwrap(), Some(EndpointId(2)));
        assert_eq!(repo.pick_random_endpoint().unwrap(), Some(EndpointId(1)));
        assert_eq!(repo.pick_random_identity(EndpointId(1)).unwrap(), None);
        assert_eq!(
            repo.pick_random_identity(EndpointId(2)).unwrap().as_deref(),
            Some("Alice")
        );
    }

    #[tokio::test]
    async fn test_fake_client_records_calls() {
        let client = FakeGameClient::new().with_status_refused();
        let addr = ServerAddress::new("mc.example.com", 25565);
        assert!(client
            .query_status(&addr, 2, Duration::from_millis(10))
            .await
            .is_err());
        assert_eq!(client.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_fake_server_answers_status() {
        let server = FakeGameServer::spawn(3, 340, ServerLogin::Disconnect("closed".to_string())).await;
        let mut conn = PacketStream::new(
            TcpStream::connect(("127.0.0.1", server.address.port)).await.unwrap(),
        );
        let mut handshake = Vec::new();
        crate::protocol::codec::write_varint(&mut handshake, 340);
        write_string(&mut handshake, "127.0.0.1");
        handshake.extend_from_slice(&server.address.port.to_be_bytes());
        crate::protocol::codec::write_varint(&mut handshake, 1);
        conn.send(0x00, &handshake).await.unwrap();
        conn.send(0x00, &[]).await.unwrap();

        let response = conn.receive().await.unwrap();
        let json = PacketReader::new(&response.body).read_string().unwrap();
        assert!(json.contains(r#""online":3"#), "{}", json);
        assert_eq!(server.handshakes(), vec![(340, 1)]);
    }
}
