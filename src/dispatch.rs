//! Concurrent batch execution.
//!
//! Each query runs on the blocking pool, and a semaphore caps how many
//! engine processes are alive at once. Results are merged in completion
//! order, so callers must not rely on the input order being preserved.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::output::{Frame, NormalizedResult, OutputFormat, Record};

/// Runs one query and returns its normalized result.
pub type QueryFn = Arc<dyn Fn(&str) -> NormalizedResult + Send + Sync>;

/// Merged outcome of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
    Records(Vec<Record>),
    Frame(Frame),
}

impl BatchResult {
    pub fn len(&self) -> usize {
        match self {
            Self::Records(records) => records.len(),
            Self::Frame(frame) => frame.height(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the merged rows as records.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Self::Records(records) => records,
            Self::Frame(frame) => frame.to_records(),
        }
    }
}

/// Fans a batch of queries out to a bounded set of workers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    format: OutputFormat,
    max_workers: usize,
}

impl Dispatcher {
    /// Creates a dispatcher; only record and frame formats can be merged.
    pub fn new(format: OutputFormat, max_workers: usize) -> Result<Self> {
        if !format.supports_batch() {
            return Err(ClientError::config(format!(
                "Batch execution supports 'records' and 'frame' output, not '{format}'"
            )));
        }
        Ok(Self {
            format,
            max_workers: max_workers.max(1),
        })
    }

    /// Creates a dispatcher sized from the available CPUs.
    pub fn with_default_workers(format: OutputFormat) -> Result<Self> {
        Self::new(format, Self::default_workers())
    }

    /// `min(32, cpus + 4)`.
    pub fn default_workers() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus + 4).min(32)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every query through `run` and merges the results.
    ///
    /// A failing or panicking query contributes an error row; it never
    /// aborts the rest of the batch.
    pub async fn execute_batch(&self, queries: Vec<String>, run: QueryFn) -> BatchResult {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut pending = FuturesUnordered::new();

        debug!(
            queries = queries.len(),
            workers = self.max_workers,
            "Dispatching batch"
        );

        for query in queries {
            let semaphore = Arc::clone(&semaphore);
            let run = Arc::clone(&run);
            pending.push(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return NormalizedResult::Records(vec![error_record("Dispatcher closed")]),
                };
                match tokio::task::spawn_blocking(move || run(&query)).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(error = %e, "Batch query task failed");
                        NormalizedResult::Records(vec![error_record(&format!(
                            "Query task failed: {e}"
                        ))])
                    }
                }
            });
        }

        match self.format {
            OutputFormat::Frame => {
                let mut merged = Frame::new();
                while let Some(result) = pending.next().await {
                    merged.append(into_frame(result));
                }
                BatchResult::Frame(merged)
            }
            _ => {
                let mut merged = Vec::new();
                while let Some(result) = pending.next().await {
                    merged.extend(into_records(result));
                }
                BatchResult::Records(merged)
            }
        }
    }
}

fn error_record(message: &str) -> Record {
    let mut record = Record::new();
    record.insert("error".to_string(), json!(message));
    record
}

fn into_records(result: NormalizedResult) -> Vec<Record> {
    match result {
        NormalizedResult::Records(records) => records,
        NormalizedResult::Frame(frame) => frame.to_records(),
        NormalizedResult::Statement(stmt) => match serde_json::to_value(stmt) {
            Ok(serde_json::Value::Object(record)) => vec![record],
            _ => Vec::new(),
        },
        NormalizedResult::Delimited(text) | NormalizedResult::KeyValue(text) => {
            let mut record = Record::new();
            record.insert("value".to_string(), json!(text));
            vec![record]
        }
    }
}

fn into_frame(result: NormalizedResult) -> Frame {
    match result {
        NormalizedResult::Frame(frame) => frame,
        other => Frame::from_records(&into_records(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn rows(n: usize, tag: &str) -> NormalizedResult {
        NormalizedResult::Records(
            (0..n)
                .map(|i| {
                    let mut r = Record::new();
                    r.insert("query".to_string(), json!(tag));
                    r.insert("i".to_string(), json!(i));
                    r
                })
                .collect(),
        )
    }

    fn queries(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rejects_unbatchable_formats() {
        assert!(Dispatcher::new(OutputFormat::Delimited, 4).unwrap_err().is_config());
        assert!(Dispatcher::new(OutputFormat::KeyValue, 4).is_err());
        assert!(Dispatcher::new(OutputFormat::Records, 4).is_ok());
        assert!(Dispatcher::new(OutputFormat::Frame, 4).is_ok());
    }

    #[test]
    fn test_default_workers_bounds() {
        let n = Dispatcher::default_workers();
        assert!((5..=32).contains(&n));
        assert_eq!(Dispatcher::new(OutputFormat::Records, 0).unwrap().max_workers(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dispatcher = Dispatcher::new(OutputFormat::Records, 4).unwrap();
        let run: QueryFn = Arc::new(|_: &str| rows(1, "never"));
        let result = dispatcher.execute_batch(Vec::new(), run).await;
        assert_eq!(result, BatchResult::Records(Vec::new()));
    }

    #[tokio::test]
    async fn test_record_counts_are_summed() {
        let dispatcher = Dispatcher::new(OutputFormat::Records, 2).unwrap();
        let run: QueryFn = Arc::new(|q: &str| match q {
            "a" => rows(2, "a"),
            "b" => rows(0, "b"),
            _ => rows(3, q),
        });
        let result = dispatcher.execute_batch(queries(&["a", "b", "c"]), run).await;

        let records = result.into_records();
        assert_eq!(records.len(), 5);
        let from_a = records.iter().filter(|r| r["query"] == "a").count();
        assert_eq!(from_a, 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let dispatcher = Dispatcher::new(OutputFormat::Records, 4).unwrap();
        let run: QueryFn = Arc::new(|q: &str| {
            if q == "bad" {
                panic!("engine blew up");
            }
            rows(1, q)
        });
        let result = dispatcher
            .execute_batch(queries(&["ok1", "bad", "ok2"]), run)
            .await;

        let records = result.into_records();
        assert_eq!(records.len(), 3);
        let errors: Vec<_> = records.iter().filter(|r| r.contains_key("error")).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0]["error"].as_str().unwrap().starts_with("Query task failed"));
    }

    #[tokio::test]
    async fn test_frame_batch_unions_columns() {
        let dispatcher = Dispatcher::new(OutputFormat::Frame, 4).unwrap();
        let run: QueryFn = Arc::new(|q: &str| {
            let mut r = Record::new();
            r.insert(q.to_string(), json!(1));
            NormalizedResult::Frame(Frame::from_records([&r]))
        });
        let result = dispatcher.execute_batch(queries(&["x", "y"]), run).await;

        let BatchResult::Frame(frame) = result else {
            panic!("Expected frame");
        };
        assert_eq!(frame.height(), 2);
        let mut names = frame.column_names();
        names.sort_unstable();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dispatcher = Dispatcher::new(OutputFormat::Records, 2).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let run: QueryFn = {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            Arc::new(move |q: &str| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                rows(1, q)
            })
        };

        let batch = queries(&["1", "2", "3", "4", "5", "6"]);
        let result = dispatcher.execute_batch(batch, run).await;

        assert_eq!(result.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
