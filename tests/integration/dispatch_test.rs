//! Concurrent batch execution against a fake engine.

use stackql_client::config::ExecutionConfig;
use stackql_client::dispatch::BatchResult;
use stackql_client::output::OutputFormat;
use stackql_client::StackQl;

#[tokio::test]
async fn test_delimited_batch_rejected_before_work() {
    let config = ExecutionConfig {
        engine_path: "/nonexistent/stackql".into(),
        output: OutputFormat::Delimited,
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
async fn test_missing_engine_yields_error_rows() {
    let config = ExecutionConfig {
        engine_path: "/nonexistent/stackql".into(),
        ..Default::default()
    };
    let client = StackQl::new(config).unwrap();
    let result = client
        .execute_queries_async(vec!["SELECT 1".to_string(), "SELECT 2".to_string()])
        .await
        .unwrap();

    let records = result.into_records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["error"]
        .as_str()
        .is_some_and(|e| e.ends_with("not found"))));
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::integration::support::FakeEngine;
    use std::collections::BTreeSet;

    /// Echoes the query back as a one-row result; queries containing
    /// `fail` produce an error row instead.
    fn engine() -> FakeEngine {
        FakeEngine::new(
            r#"case "$2" in
  *fail*) echo '[{"error": "an error occurred"}]' ;;
  *) printf '[{"query": "%s"}]\n' "$2" ;;
esac"#,
        )
    }

    fn queries(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("SELECT {i}")).collect()
    }

    #[tokio::test]
    async fn test_records_batch_contains_every_query() {
        let engine = engine();
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let result = client.execute_queries_async(queries(8)).await.unwrap();
        let seen: BTreeSet<String> = result
            .into_records()
            .iter()
            .map(|r| r["query"].as_str().unwrap().to_string())
            .collect();
        let expected: BTreeSet<String> = queries(8).into_iter().collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_failing_query_does_not_abort_batch() {
        let engine = engine();
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let batch = vec![
            "SELECT ok1".to_string(),
            "SELECT fail".to_string(),
            "SELECT ok2".to_string(),
        ];
        let records = client.execute_queries_async(batch).await.unwrap().into_records();

        assert_eq!(records.len(), 3);
        let errors = records.iter().filter(|r| r.contains_key("error")).count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn test_frame_batch_stacks_rows() {
        let engine = engine();
        let client = StackQl::new(engine.config(OutputFormat::Frame)).unwrap();

        let result = client.execute_queries_async(queries(5)).await.unwrap();
        let BatchResult::Frame(frame) = result else {
            panic!("Expected frame batch");
        };
        assert_eq!(frame.height(), 5);
        assert_eq!(frame.column_names(), vec!["query"]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let engine = engine();
        let client = StackQl::new(engine.config(OutputFormat::Frame)).unwrap();
        let result = client.execute_queries_async(Vec::new()).await.unwrap();
        assert!(result.is_empty());
    }
}
