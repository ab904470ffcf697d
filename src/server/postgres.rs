//! sqlx-backed server connection.
//!
//! Queries are sent with the simple query protocol (`raw_sql`), since the
//! engine's server does not support prepared statements.

use super::{ConnectionFactory, ServerAddress, ServerConnection, SERVER_DATABASE, SERVER_USER};
use crate::error::{ClientError, Result};
use crate::output::Record;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of connection attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay before the first retry (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Connects to the engine server with sqlx.
#[derive(Debug, Clone, Default)]
pub struct PostgresConnectionFactory;

impl PostgresConnectionFactory {
    pub fn new() -> Self {
        Self
    }

    fn options(address: &ServerAddress) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&address.host)
            .port(address.port)
            .username(SERVER_USER)
            .database(SERVER_DATABASE)
    }
}

#[async_trait]
impl ConnectionFactory for PostgresConnectionFactory {
    async fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ServerConnection>> {
        let connection = PostgresConnection::connect(address).await?;
        Ok(Box::new(connection))
    }
}

/// A pooled connection to the engine server.
#[derive(Debug)]
pub struct PostgresConnection {
    pool: PgPool,
}

impl PostgresConnection {
    /// Connects, retrying transient failures with exponential backoff.
    pub async fn connect(address: &ServerAddress) -> Result<Self> {
        let options = PostgresConnectionFactory::options(address);
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!(%address, attempt, "Connecting to engine server");

            let result = PgPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.clone())
                .await;

            match result {
                Ok(pool) => {
                    debug!(%address, "Connected to engine server");
                    return Ok(Self { pool });
                }
                Err(e) if attempt < MAX_RETRY_ATTEMPTS && is_transient_error(&e) => {
                    warn!(
                        "Connection attempt {} failed (transient error), retrying in {:?}",
                        attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(map_connection_error(e, address)),
            }
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerConnection for PostgresConnection {
    async fn execute_query(&self, sql: &str) -> Result<Vec<Record>> {
        let rows = sqlx::raw_sql(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_query_error)?;
        debug!(rows = rows.len(), "Server query returned");
        Ok(rows.iter().map(convert_row).collect())
    }

    async fn execute_statement(&self, sql: &str) -> Result<String> {
        let done = sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(map_query_error)?;
        Ok(format!("{} rows affected", done.rows_affected()))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Converts a row to a record, keyed by column name.
fn convert_row(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            (
                col.name().to_string(),
                convert_value(row, i, col.type_info().name()),
            )
        })
        .collect()
}

/// Decodes one cell by its Postgres type name.
///
/// The simple query protocol delivers every cell as text, so types without a
/// dedicated arm (NUMERIC, DATE, TIMESTAMP, UUID, ...) keep their text form.
fn convert_value(row: &PgRow, index: usize, type_name: &str) -> JsonValue {
    fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(index).ok().flatten()
    }

    fn text(row: &PgRow, index: usize) -> Option<String> {
        row.try_get_unchecked::<Option<String>, _>(index)
            .ok()
            .flatten()
    }

    let value = match type_name.to_uppercase().as_str() {
        "BOOL" | "BOOLEAN" => get::<bool>(row, index).map(JsonValue::Bool),
        "INT2" | "SMALLINT" => get::<i16>(row, index).map(|v| json!(v)),
        "INT4" | "INT" | "INTEGER" => get::<i32>(row, index).map(|v| json!(v)),
        "INT8" | "BIGINT" => get::<i64>(row, index).map(|v| json!(v)),
        "FLOAT4" | "REAL" => get::<f32>(row, index).map(|v| json!(v)),
        "FLOAT8" | "DOUBLE PRECISION" => get::<f64>(row, index).map(|v| json!(v)),
        "JSON" | "JSONB" => get::<JsonValue>(row, index),
        _ => text(row, index).map(JsonValue::String),
    };
    value.unwrap_or(JsonValue::Null)
}

/// Returns true for failures worth retrying (refused, reset, timed out).
fn is_transient_error(error: &sqlx::Error) -> bool {
    if matches!(error, sqlx::Error::PoolTimedOut) {
        return true;
    }
    let message = error.to_string().to_lowercase();
    let permanent = ["authentication failed", "does not exist", "ssl", "tls"];
    if permanent.iter().any(|p| message.contains(p)) {
        return false;
    }
    [
        "connection refused",
        "timed out",
        "timeout",
        "temporarily unavailable",
        "connection reset",
        "broken pipe",
    ]
    .iter()
    .any(|p| message.contains(p))
}

fn map_connection_error(error: sqlx::Error, address: &ServerAddress) -> ClientError {
    let message = error.to_string().to_lowercase();

    if message.contains("connection refused") || message.contains("could not connect") {
        ClientError::connection(format!(
            "Cannot connect to {address}. Check that the engine server is running."
        ))
    } else if message.contains("authentication failed") {
        ClientError::connection(format!(
            "Authentication failed for user '{SERVER_USER}' on {address}."
        ))
    } else if message.contains("timed out") || message.contains("timeout") {
        ClientError::connection(format!("Connection to {address} timed out."))
    } else {
        ClientError::connection(error.to_string())
    }
}

/// Maps a query failure; dropped connections stay connection errors.
fn map_query_error(error: sqlx::Error) -> ClientError {
    match &error {
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            ClientError::connection(error.to_string())
        }
        _ => match error.as_database_error() {
            Some(db_error) => {
                let mut message = db_error.message().to_string();
                if let Some(pg_error) =
                    db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                {
                    if let Some(detail) = pg_error.detail() {
                        message.push_str("\n  DETAIL: ");
                        message.push_str(detail);
                    }
                    if let Some(hint) = pg_error.hint() {
                        message.push_str("\n  HINT: ");
                        message.push_str(hint);
                    }
                }
                ClientError::query(message)
            }
            None => ClientError::query(error.to_string()),
        },
    }
}
