//! Server mode sessions.
//!
//! The mock factory runs everywhere. The live test needs an engine server
//! reachable at STACKQL_SERVER_HOST (port STACKQL_SERVER_PORT, default 5466).

use serde_json::json;
use stackql_client::config::ExecutionConfig;
use stackql_client::output::{NormalizedResult, OutputFormat, Record};
use stackql_client::server::{
    FailingConnectionFactory, MockConnectionFactory, MockServerConnection,
    PostgresConnectionFactory,
};
use stackql_client::StackQl;
use std::sync::Arc;

fn server_client(output: OutputFormat) -> StackQl {
    let config = ExecutionConfig {
        server_mode: true,
        output,
        ..Default::default()
    };
    StackQl::new(config).unwrap()
}

fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_server_rows_are_unwrapped_and_framed() {
    let conn = MockServerConnection::new().with_rows(
        "SELECT region, total FROM summary",
        vec![
            record(json!({"region": "us-east-1", "total": {"Int64": 4, "Valid": true}})),
            record(json!({"region": "eu-west-1", "total": {"Int64": 0, "Valid": false}})),
        ],
    );
    let client = server_client(OutputFormat::Frame);
    let session = client
        .server_session(Arc::new(MockConnectionFactory::new(conn)))
        .await
        .unwrap();

    let NormalizedResult::Frame(frame) = session.execute("SELECT region, total FROM summary").await
    else {
        panic!("Expected frame");
    };
    assert_eq!(frame.height(), 2);
    assert_eq!(frame.get(0, "total").unwrap().to_json(), json!(4));
    assert!(frame.get(1, "total").unwrap().is_null());
}

#[tokio::test]
async fn test_server_statement_in_keyvalue() {
    let conn = MockServerConnection::new().with_message("REGISTRY PULL okta", "okta provider installed");
    let client = server_client(OutputFormat::KeyValue);
    let session = client
        .server_session(Arc::new(MockConnectionFactory::new(conn)))
        .await
        .unwrap();

    let NormalizedResult::KeyValue(text) = session.execute_stmt("REGISTRY PULL okta").await else {
        panic!("Expected key-value text");
    };
    assert!(text.starts_with("# Statement Result"));
    assert!(text.contains("message: okta provider installed"));
}

#[tokio::test]
async fn test_server_error_row_is_detected() {
    let conn = MockServerConnection::new().with_rows(
        "SELECT * FROM aws.ec2.instances",
        vec![record(json!({"error": "http response status code: 401"}))],
    );
    let client = server_client(OutputFormat::Records);
    let session = client
        .server_session(Arc::new(MockConnectionFactory::new(conn)))
        .await
        .unwrap();

    let result = session.execute("SELECT * FROM aws.ec2.instances").await;
    assert_eq!(
        result.error_message().as_deref(),
        Some("http response status code: 401")
    );
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    let client = server_client(OutputFormat::Records);
    let err = client
        .server_session(Arc::new(FailingConnectionFactory))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "Connection Error");
}

#[tokio::test]
async fn test_live_server_connection_check() {
    let Ok(host) = std::env::var("STACKQL_SERVER_HOST") else {
        eprintln!("Skipping test: STACKQL_SERVER_HOST not set");
        return;
    };
    let port = std::env::var("STACKQL_SERVER_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5466);

    let config = ExecutionConfig {
        server_mode: true,
        server_address: host,
        server_port: port,
        ..Default::default()
    };
    let client = StackQl::new(config).unwrap();
    let session = client
        .server_session(Arc::new(PostgresConnectionFactory::new()))
        .await
        .unwrap();

    assert!(session.test_connection().await);
    session.close().await.unwrap();
}
