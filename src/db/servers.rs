//! SQLite schema and queries for servers, known usernames and their association.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result, params};

use super::{Repository, RepositoryError, ResultSink};
use crate::model::{Classification, Endpoint, EndpointId};
use crate::protocol::ServerAddress;

pub fn create_tables_if_not_exist(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS servers (
            id INTEGER PRIMARY KEY,
            ip TEXT NOT NULL,
            port INTEGER NOT NULL DEFAULT 25565,
            last_checked INTEGER,
            world_type TEXT,
            gamemode TEXT,
            cracked INTEGER,
            not_whitelisted INTEGER,
            UNIQUE(ip, port)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_servers_last_checked ON servers (last_checked);",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS server_users (
            server_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            PRIMARY KEY (server_id, user_id),
            FOREIGN KEY (server_id) REFERENCES servers(id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )",
        [],
    )?;
    Ok(())
}

/// Insert a server if it is not known yet and return its id either way.
#[cfg(test)]
pub fn insert_server(conn: &Connection, host: &str, port: u16) -> Result<EndpointId> {
    conn.execute(
        "INSERT OR IGNORE INTO servers (ip, port) VALUES (?1, ?2)",
        params![host, port],
    )?;
    conn.query_row(
        "SELECT id FROM servers WHERE ip = ?1 AND port = ?2",
        params![host, port],
        |row| row.get(0).map(EndpointId),
    )
}

#[cfg(test)]
pub fn insert_user(conn: &Connection, username: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO users (username) VALUES (?1)",
        params![username],
    )?;
    conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        params![username],
        |row| row.get(0),
    )
}

/// Record that `username` has been seen on `server`.
#[cfg(test)]
pub fn link_user(conn: &Connection, server: EndpointId, username: &str) -> Result<()> {
    let user_id = insert_user(conn, username)?;
    conn.execute(
        "INSERT OR IGNORE INTO server_users (server_id, user_id) VALUES (?1, ?2)",
        params![server.0, user_id],
    )?;
    Ok(())
}

/// `Repository` and `ResultSink` over one SQLite connection. Every statement
/// auto-commits on its own.
pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn get_endpoint(&self, endpoint: EndpointId) -> Result<Endpoint, RepositoryError> {
        self.conn
            .query_row(
                "SELECT id, ip, port, last_checked, world_type, gamemode, cracked, not_whitelisted
                 FROM servers WHERE id = ?1",
                params![endpoint.0],
                |row| {
                    let last_checked: Option<i64> = row.get(3)?;
                    Ok(Endpoint {
                        id: EndpointId(row.get(0)?),
                        address: ServerAddress::new(row.get::<_, String>(1)?, row.get(2)?),
                        last_checked: last_checked
                            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
                        world_type: row.get(4)?,
                        game_mode: row.get(5)?,
                        cracked: row.get(6)?,
                        not_whitelisted: row.get(7)?,
                    })
                },
            )
            .optional()?
            .ok_or(RepositoryError::UnknownEndpoint(endpoint))
    }
}

impl Repository for SqliteRepository {
    fn pick_random_endpoint(&self) -> Result<Option<EndpointId>, RepositoryError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM servers ORDER BY RANDOM() LIMIT 1",
                [],
                |row| row.get(0).map(EndpointId),
            )
            .optional()?)
    }

    fn pick_random_identity(&self, endpoint: EndpointId) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .conn
            .query_row(
                "SELECT u.username FROM users u
                 INNER JOIN server_users su ON u.id = su.user_id
                 WHERE su.server_id = ?1
                 ORDER BY RANDOM() LIMIT 1",
                params![endpoint.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn get_address(&self, endpoint: EndpointId) -> Result<ServerAddress, RepositoryError> {
        self.conn
            .query_row(
                "SELECT ip, port FROM servers WHERE id = ?1",
                params![endpoint.0],
                |row| Ok(ServerAddress::new(row.get::<_, String>(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(RepositoryError::UnknownEndpoint(endpoint))
    }
}

impl ResultSink for SqliteRepository {
    fn record_classification(
        &self,
        endpoint: EndpointId,
        classification: &Classification,
    ) -> Result<(), RepositoryError> {
        let address = self.get_address(endpoint)?;
        self.conn.execute(
            "UPDATE servers
             SET last_checked = ?1, world_type = ?2, gamemode = ?3, cracked = ?4, not_whitelisted = ?5
             WHERE ip = ?6 AND port = ?7",
            params![
                classification.checked_at.timestamp(),
                classification.level_type,
                classification.game_mode,
                classification.cracked,
                classification.not_whitelisted,
                address.host,
                address.port,
            ],
        )?;
        Ok(())
    }
}
