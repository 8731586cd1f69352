mod servers;

use rusqlite::Connection;
use thiserror::Error;

use crate::model::{Classification, EndpointId};
use crate::protocol::ServerAddress;

pub use servers::{SqliteRepository, create_tables_if_not_exist};
#[cfg(test)]
pub use servers::{insert_server, insert_user, link_user};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("endpoint {0} does not exist")]
    UnknownEndpoint(EndpointId),
}

/// Target selection. Reads only.
pub trait Repository {
    /// Uniformly random endpoint, or `None` when the pool is empty.
    fn pick_random_endpoint(&self) -> Result<Option<EndpointId>, RepositoryError>;

    /// Uniformly random username associated with `endpoint`, if any.
    fn pick_random_identity(&self, endpoint: EndpointId) -> Result<Option<String>, RepositoryError>;

    fn get_address(&self, endpoint: EndpointId) -> Result<ServerAddress, RepositoryError>;
}

/// Write path for classification results.
pub trait ResultSink {
    fn record_classification(
        &self,
        endpoint: EndpointId,
        classification: &Classification,
    ) -> Result<(), RepositoryError>;
}

/// Accepts a bare path or a `sqlite://` URL.
pub fn database_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .unwrap_or(database_url)
}

/// Open the database and make sure the schema exists.
pub fn open(database_url: &str) -> Result<Connection, rusqlite::Error> {
    let db_path = database_path(database_url);
    let conn = if db_path == ":memory:" {
        Connection::open_in_memory()?
    } else {
        Connection::open(db_path)?
    };

    // Another process may be seeding servers concurrently.
    conn.execute_batch("PRAGMA busy_timeout = 30000;")?;
    // WAL may be refused while another connection holds a transaction; that is fine.
    let _ = conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()));
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    create_tables_if_not_exist(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn new_test_connection() -> Connection {
    open(":memory:").expect("Failed to create in-memory database")
}
