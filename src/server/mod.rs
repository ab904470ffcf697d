//! Server mode: talking to a running engine over the Postgres wire protocol.
//!
//! The connection is behind a trait so sessions can be driven by the sqlx
//! implementation in production and by a mock in tests.

mod mock;
mod postgres;

pub use mock::{FailingConnectionFactory, MockConnectionFactory, MockServerConnection};
pub use postgres::{PostgresConnection, PostgresConnectionFactory};

use crate::config::ExecutionConfig;
use crate::error::Result;
use crate::output::Record;
use async_trait::async_trait;
use std::fmt;

/// Database and user name the engine's server expects.
pub const SERVER_DATABASE: &str = "stackql";
pub const SERVER_USER: &str = "stackql";

/// Host and port of a running engine server.
#[derive(Debug, Clone, PartialEq, Eq)]
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

    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(config.server_address.clone(), config.server_port)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("127.0.0.1", 5466)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An open connection to the engine server.
///
/// A broken connection is reported as `ClientError::Connection` so the
/// session can reconnect; engine-side failures are `ClientError::Query`.
#[async_trait]
pub trait ServerConnection: Send + Sync {
    /// Runs a query and returns its rows as records.
    async fn execute_query(&self, sql: &str) -> Result<Vec<Record>>;

    /// Runs a statement and returns its status message.
    async fn execute_statement(&self, sql: &str) -> Result<String>;

    /// Closes the connection.
    async fn close(&self) -> Result<()>;
}

/// Opens connections to an engine server.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ServerConnection>>;
}
