//! stackql-client - run StackQL queries and get normalized, typed results.
//!
//! Queries run either through a local engine executable or against an engine
//! server over the Postgres wire protocol. Engine output is captured,
//! classified and normalized into one of several result formats.

pub mod client;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod server;

pub use client::{ServerSession, StackQl};
pub use config::{Config, ExecutionConfig};
pub use detector::ErrorDetector;
pub use dispatch::{BatchResult, Dispatcher};
pub use engine::{CallOverrides, RawResult};
pub use error::{ClientError, Result};
pub use output::{Frame, NormalizedResult, OutputFormat, OutputFormatter, Record};
