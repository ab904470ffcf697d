//! Client facade.
//!
//! [`StackQl`] wires the local pipeline together: command building, process
//! execution and output formatting, plus concurrent batches. [`ServerSession`]
//! does the same for a running engine server.

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::detector::ErrorDetector;
use crate::dispatch::{BatchResult, Dispatcher, QueryFn};
use crate::engine::{CallOverrides, ProcessExecutor};
use crate::error::{ClientError, Result};
use crate::output::{NormalizedResult, OutputFormatter, Record};
use crate::server::{ConnectionFactory, ServerAddress, ServerConnection};

const TEST_QUERY: &str = "SELECT 'test' as test_value";

/// Runs queries against a local engine executable.
///
/// Cheap to share: the executor is behind an `Arc` and the formatter shares
/// its detector.
#[derive(Debug, Clone)]
pub struct StackQl {
    config: Arc<ExecutionConfig>,
    executor: Arc<ProcessExecutor>,
    formatter: OutputFormatter,
}

impl StackQl {
    /// Validates `config` and prepares the pipeline.
    ///
    /// Fails only on configuration problems; nothing is spawned here.
    pub fn new(config: ExecutionConfig) -> Result<Self> {
        config.validate()?;

        let detector = match &config.error_patterns {
            Some(path) => ErrorDetector::from_path(path),
            None => ErrorDetector::new(),
        };
        let formatter = OutputFormatter::new(config.output, Arc::new(detector));
        let executor = ProcessExecutor::new(&config)?;

        info!(
            engine = %config.engine_path.display(),
            output = %config.output,
            server_mode = config.server_mode,
            "Client initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            executor: Arc::new(executor),
            formatter,
        })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn formatter(&self) -> &OutputFormatter {
        &self.formatter
    }

    /// Returns the effective settings and the base engine arguments.
    pub fn properties(&self) -> JsonValue {
        let mut props = match serde_json::to_value(self.config.as_ref()) {
            Ok(JsonValue::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        props.insert(
            "params".to_string(),
            json!(self.executor.builder().base_args()),
        );
        props.insert(
            "platform".to_string(),
            json!(format!(
                "{} {}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
        );
        props.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
        JsonValue::Object(props)
    }

    /// Runs a query and returns its rows.
    ///
    /// Failures are returned as error renderings, never as `Err`. When
    /// `suppress_errors` is set, a result consisting only of an engine
    /// message is returned as empty; `http_debug` turns suppression off.
    pub fn execute(
        &self,
        query: &str,
        suppress_errors: bool,
        overrides: &CallOverrides,
    ) -> NormalizedResult {
        let formatter = self.formatter_for(overrides);
        if self.config.server_mode {
            return formatter.format_error("Server mode is enabled; use a server session");
        }

        let suppress = suppress_errors && !self.config.http_debug;
        let raw = self.executor.execute(query, overrides);
        formatter.format_query_result(&raw, suppress)
    }

    /// Runs a statement and returns its status message.
    pub fn execute_stmt(&self, query: &str, overrides: &CallOverrides) -> NormalizedResult {
        let formatter = self.formatter_for(overrides);
        if self.config.server_mode {
            return formatter.format_error("Server mode is enabled; use a server session");
        }

        let raw = self.executor.execute(query, overrides);
        formatter.format_statement_result(&raw)
    }

    /// Runs `queries` concurrently and merges their rows.
    ///
    /// The merged order follows completion, not input order.
    pub async fn execute_queries_async(&self, queries: Vec<String>) -> Result<BatchResult> {
        if self.config.server_mode {
            return Err(ClientError::config(
                "Concurrent batches are not supported in server mode",
            ));
        }

        let dispatcher = Dispatcher::with_default_workers(self.config.output)?;
        let executor = Arc::clone(&self.executor);
        let formatter = self.formatter.clone();
        let run: QueryFn = Arc::new(move |query: &str| {
            let raw = executor.execute(query, &CallOverrides::default());
            formatter.format_query_result(&raw, true)
        });

        Ok(dispatcher.execute_batch(queries, run).await)
    }

    /// Opens a session against the configured engine server.
    pub async fn server_session(&self, factory: Arc<dyn ConnectionFactory>) -> Result<ServerSession> {
        if !self.config.server_mode {
            return Err(ClientError::config(
                "Server sessions require server_mode to be enabled",
            ));
        }
        ServerSession::connect(
            factory,
            ServerAddress::from_config(&self.config),
            self.formatter.clone(),
        )
        .await
    }

    fn formatter_for(&self, overrides: &CallOverrides) -> Cow<'_, OutputFormatter> {
        match overrides.output {
            Some(format) if format != self.formatter.format() => {
                Cow::Owned(self.formatter.with_format(format))
            }
            _ => Cow::Borrowed(&self.formatter),
        }
    }
}

enum Request<'a> {
    Query(&'a str),
    Statement(&'a str),
}

enum Response {
    Rows(Vec<Record>),
    Message(String),
}

/// A connection to an engine server plus the formatter for its results.
///
/// A dropped connection is reopened once per call before giving up.
pub struct ServerSession {
    factory: Arc<dyn ConnectionFactory>,
    address: ServerAddress,
    connection: Mutex<Option<Box<dyn ServerConnection>>>,
    formatter: OutputFormatter,
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("address", &self.address)
            .field("format", &self.formatter.format())
            .finish_non_exhaustive()
    }
}

impl ServerSession {
    /// Connects eagerly; a failure here is returned as `Err`.
    pub async fn connect(
        factory: Arc<dyn ConnectionFactory>,
        address: ServerAddress,
        formatter: OutputFormatter,
    ) -> Result<Self> {
        let connection = factory.connect(&address).await?;
        info!(%address, "Server session opened");
        Ok(Self {
            factory,
            address,
            connection: Mutex::new(Some(connection)),
            formatter,
        })
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Runs a query; failures come back as error renderings.
    pub async fn execute(&self, sql: &str) -> NormalizedResult {
        match self.send(Request::Query(sql)).await {
            Ok(Response::Rows(rows)) => self.formatter.format_rows(rows),
            Ok(Response::Message(message)) => self.formatter.format_statement_message(&message),
            Err(e) => self.formatter.format_error(&error_text(&e)),
        }
    }

    /// Runs a statement; failures come back as error renderings.
    pub async fn execute_stmt(&self, sql: &str) -> NormalizedResult {
        match self.send(Request::Statement(sql)).await {
            Ok(Response::Message(message)) => self.formatter.format_statement_message(&message),
            Ok(Response::Rows(rows)) => self.formatter.format_rows(rows),
            Err(e) => self.formatter.format_error(&error_text(&e)),
        }
    }

    /// Returns true if the server answers the test query correctly.
    pub async fn test_connection(&self) -> bool {
        match self.send(Request::Query(TEST_QUERY)).await {
            Ok(Response::Rows(rows)) => {
                matches!(rows.as_slice(), [row] if row.get("test_value") == Some(&json!("test")))
            }
            Ok(Response::Message(_)) => false,
            Err(e) => {
                debug!(error = %e, "Connection test failed");
                false
            }
        }
    }

    /// Closes the underlying connection, if open.
    pub async fn close(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        match guard.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }

    async fn send(&self, request: Request<'_>) -> Result<Response> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.factory.connect(&self.address).await?);
        }

        let first = match guard.as_deref() {
            Some(connection) => run(connection, &request).await,
            None => return Err(ClientError::internal("Server connection missing")),
        };

        match first {
            Err(ClientError::Connection(reason)) => {
                warn!(address = %self.address, %reason, "Server connection lost, reconnecting");
                *guard = None;
                let connection = self.factory.connect(&self.address).await?;
                let retried = run(connection.as_ref(), &request).await;
                *guard = Some(connection);
                retried
            }
            other => other,
        }
    }
}

async fn run(connection: &dyn ServerConnection, request: &Request<'_>) -> Result<Response> {
    match request {
        Request::Query(sql) => connection.execute_query(sql).await.map(Response::Rows),
        Request::Statement(sql) => connection
            .execute_statement(sql)
            .await
            .map(Response::Message),
    }
}

/// Query errors carry the server's own text; other errors keep their prefix.
fn error_text(error: &ClientError) -> String {
    match error {
        ClientError::Query(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use crate::server::{FailingConnectionFactory, MockConnectionFactory, MockServerConnection};

    fn session_formatter(format: OutputFormat) -> OutputFormatter {
        OutputFormatter::new(format, Arc::new(ErrorDetector::new()))
    }

    async fn open_session(conn: MockServerConnection) -> (ServerSession, MockConnectionFactory) {
        let factory = MockConnectionFactory::new(conn);
        let session = ServerSession::connect(
            Arc::new(factory.clone()),
            ServerAddress::default(),
            session_formatter(OutputFormat::Records),
        )
        .await
        .unwrap();
        (session, factory)
    }

    fn test_row() -> Record {
        let mut row = Record::new();
        row.insert("test_value".to_string(), json!("test"));
        row
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ExecutionConfig {
            server_mode: true,
            output: OutputFormat::Delimited,
            ..Default::default()
        };
        assert!(StackQl::new(config).unwrap_err().is_config());
    }

    #[test]
    fn test_properties_include_params() {
        let client = StackQl::new(ExecutionConfig::default()).unwrap();
        let props = client.properties();
        assert_eq!(props["engine_path"], "stackql");
        assert_eq!(props["params"][0], "exec");
        assert!(props["version"].is_string());
    }

    #[test]
    fn test_execute_in_server_mode_is_error_rendering() {
        let config = ExecutionConfig {
            server_mode: true,
            ..Default::default()
        };
        let client = StackQl::new(config).unwrap();
        let result = client.execute("SELECT 1", true, &CallOverrides::default());
        assert!(result.error_message().unwrap().contains("server session"));
    }

    #[tokio::test]
    async fn test_batch_rejected_in_server_mode() {
        let config = ExecutionConfig {
            server_mode: true,
            ..Default::default()
        };
        let client = StackQl::new(config).unwrap();
        let err = client
            .execute_queries_async(vec!["SELECT 1".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_batch_rejected_for_text_formats() {
        let config = ExecutionConfig {
            output: OutputFormat::KeyValue,
            ..Default::default()
        };
        let client = StackQl::new(config).unwrap();
        assert!(client
            .execute_queries_async(Vec::new())
            .await
            .unwrap_err()
            .is_config());
    }

    #[tokio::test]
    async fn test_server_session_requires_server_mode() {
        let client = StackQl::new(ExecutionConfig::default()).unwrap();
        let factory = Arc::new(MockConnectionFactory::new(MockServerConnection::new()));
        assert!(client.server_session(factory).await.unwrap_err().is_config());
    }

    #[tokio::test]
    async fn test_session_execute_formats_rows() {
        let conn = MockServerConnection::new().with_rows(TEST_QUERY, vec![test_row()]);
        let (session, _) = open_session(conn).await;

        let result = session.execute(TEST_QUERY).await;
        assert_eq!(result, NormalizedResult::Records(vec![test_row()]));
    }

    #[tokio::test]
    async fn test_session_query_error_is_data() {
        let conn = MockServerConnection::new().with_error("SELECT bad", "relation does not exist");
        let (session, _) = open_session(conn).await;

        let result = session.execute("SELECT bad").await;
        assert_eq!(
            result.error_message().as_deref(),
            Some("relation does not exist")
        );
    }

    #[tokio::test]
    async fn test_session_statement_message() {
        let conn = MockServerConnection::new().with_message("REGISTRY PULL aws", "aws provider installed");
        let (session, _) = open_session(conn).await;

        match session.execute_stmt("REGISTRY PULL aws").await {
            NormalizedResult::Statement(stmt) => assert_eq!(stmt.message, "aws provider installed"),
            other => panic!("Expected statement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_reconnects_once() {
        let conn = MockServerConnection::new().drop_next(1);
        let (session, factory) = open_session(conn).await;

        let result = session.execute("SELECT 1").await;
        assert_eq!(result.record_count(), 1);
        assert!(result.error_message().is_none());
        assert_eq!(factory.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_connection_check() {
        let good = MockServerConnection::new().with_rows(TEST_QUERY, vec![test_row()]);
        let (session, _) = open_session(good).await;
        assert!(session.test_connection().await);

        let (wrong, _) = open_session(MockServerConnection::new()).await;
        assert!(!wrong.test_connection().await);

        let (broken, _) = open_session(MockServerConnection::new().with_error(TEST_QUERY, "boom")).await;
        assert!(!broken.test_connection().await);
    }

    #[tokio::test]
    async fn test_close_marks_connection_closed() {
        let conn = MockServerConnection::new();
        let (session, _) = open_session(conn.clone()).await;
        session.close().await.unwrap();
        assert!(conn.is_closed());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_err() {
        let err = ServerSession::connect(
            Arc::new(FailingConnectionFactory),
            ServerAddress::default(),
            session_formatter(OutputFormat::Records),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::Connection(_)));
    }
}
