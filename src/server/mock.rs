//! In-memory server connections for testing.

use super::{ConnectionFactory, ServerAddress, ServerConnection};
use crate::error::{ClientError, Result};
use crate::output::Record;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A mock connection that returns predefined results.
///
/// Unregistered SELECT queries return one `result` row echoing the SQL.
/// Other statements succeed with an `OK` message.
#[derive(Debug, Clone, Default)]
pub struct MockServerConnection {
    rows: HashMap<String, Vec<Record>>,
    messages: HashMap<String, String>,
    errors: HashMap<String, String>,
    drops: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MockServerConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `rows` for exactly `sql`.
    pub fn with_rows(mut self, sql: impl Into<String>, rows: Vec<Record>) -> Self {
        self.rows.insert(sql.into(), rows);
        self
    }

    /// Returns `message` when `sql` is run as a statement.
    pub fn with_message(mut self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.messages.insert(sql.into(), message.into());
        self
    }

    /// Fails `sql` with a query error.
    pub fn with_error(mut self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.errors.insert(sql.into(), message.into());
        self
    }

    /// Makes the next `count` calls fail as if the connection dropped.
    pub fn drop_next(self, count: usize) -> Self {
        self.drops.store(count, Ordering::SeqCst);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check(&self, sql: &str) -> Result<()> {
        let dropped = self
            .drops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Err(ClientError::connection("server closed the connection unexpectedly"));
        }
        if let Some(message) = self.errors.get(sql) {
            return Err(ClientError::query(message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerConnection for MockServerConnection {
    async fn execute_query(&self, sql: &str) -> Result<Vec<Record>> {
        self.check(sql)?;
        if let Some(rows) = self.rows.get(sql) {
            return Ok(rows.clone());
        }
        if sql.trim_start().to_uppercase().starts_with("SELECT") {
            let mut row = Record::new();
            row.insert("result".to_string(), json!(format!("Mock result for: {sql}")));
            Ok(vec![row])
        } else {
            Ok(Vec::new())
        }
    }

    async fn execute_statement(&self, sql: &str) -> Result<String> {
        self.check(sql)?;
        Ok(self
            .messages
            .get(sql)
            .cloned()
            .unwrap_or_else(|| "OK".to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out clones of a template connection and counts connects.
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    template: MockServerConnection,
    connects: Arc<AtomicUsize>,
}

impl MockConnectionFactory {
    pub fn new(template: MockServerConnection) -> Self {
        Self {
            template,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, _address: &ServerAddress) -> Result<Box<dyn ServerConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.template.clone()))
    }
}

/// A factory whose every connection attempt fails.
#[derive(Debug, Clone, Default)]
pub struct FailingConnectionFactory;

#[async_trait]
impl ConnectionFactory for FailingConnectionFactory {
    async fn connect(&self, address: &ServerAddress) -> Result<Box<dyn ServerConnection>> {
        Err(ClientError::connection(format!(
            "Cannot connect to {address}. Check that the engine server is running."
        )))
    }
}
