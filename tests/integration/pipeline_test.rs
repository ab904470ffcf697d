//! End-to-end tests of a single query: build, spawn, capture, format.

use pretty_assertions::assert_eq;
use serde_json::json;
use stackql_client::config::ExecutionConfig;
use stackql_client::engine::CallOverrides;
use stackql_client::output::{NormalizedResult, OutputFormat};
use stackql_client::StackQl;
use std::path::PathBuf;

#[test]
fn test_missing_engine_reports_not_found() {
    let config = ExecutionConfig {
        engine_path: PathBuf::from("/nonexistent/bin/stackql"),
        ..Default::default()
    };
    let client = StackQl::new(config).unwrap();

    let result = client.execute("SELECT 1", true, &CallOverrides::default());
    assert_eq!(
        result.error_message().as_deref(),
        Some("ERROR: /nonexistent/bin/stackql not found")
    );
}

#[test]
fn test_unknown_output_override_is_config_error() {
    assert!("xml".parse::<OutputFormat>().unwrap_err().is_config());
}

#[cfg(unix)]
mod unix {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::integration::support::FakeEngine;

    fn lines(result: &NormalizedResult) -> Vec<String> {
        match result {
            NormalizedResult::Delimited(text) => text.lines().map(str::to_string).collect(),
            other => panic!("Expected delimited text, got {other:?}"),
        }
    }

    #[test]
    fn test_rows_are_unwrapped() {
        let engine = FakeEngine::new(
            r#"echo '[{"name": "stackql", "stars": {"Int64": 42, "Valid": true}, "topic": {"String": "", "Valid": false}}]'"#,
        );
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let result = client.execute("SELECT * FROM github.repos.repos", true, &CallOverrides::default());
        assert_eq!(
            result.to_json(),
            json!([{"name": "stackql", "stars": 42, "topic": null}])
        );
    }

    #[test]
    fn test_error_value_in_rows_becomes_error() {
        let engine = FakeEngine::new(
            r#"echo '[{"error": "http response status code: 403, response body: forbidden"}]'"#,
        );
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let result = client.execute("SELECT 1", true, &CallOverrides::default());
        assert_eq!(
            result.error_message().as_deref(),
            Some("http response status code: 403, response body: forbidden")
        );
    }

    #[test]
    fn test_stderr_only_respects_suppression() {
        let engine = FakeEngine::new("echo 'no matching operation found' >&2");
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let suppressed = client.execute("SELECT 1", true, &CallOverrides::default());
        assert_eq!(suppressed, NormalizedResult::Records(Vec::new()));

        let shown = client.execute("SELECT 1", false, &CallOverrides::default());
        assert_eq!(
            shown.error_message().as_deref(),
            Some("no matching operation found\n")
        );
    }

    #[test]
    fn test_http_debug_disables_suppression() {
        let engine = FakeEngine::new("echo 'status 500' >&2");
        let config = ExecutionConfig {
            http_debug: true,
            ..engine.config(OutputFormat::Records)
        };
        let client = StackQl::new(config).unwrap();

        let result = client.execute("SELECT 1", true, &CallOverrides::default());
        assert!(result.error_message().is_some());
    }

    #[test]
    fn test_invalid_json_becomes_parse_error() {
        let engine = FakeEngine::new("echo 'not json at all'");
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let result = client.execute("SELECT 1", true, &CallOverrides::default());
        let NormalizedResult::Records(records) = result else {
            panic!("Expected records");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["error"], "Invalid JSON output");
        assert_eq!(records[0]["data"], "not json at all\n");
    }

    #[test]
    fn test_statement_message() {
        let engine = FakeEngine::new(
            "printf 'github provider, version v24.04.00229 successfully installed\\n' >&2",
        );
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let result = client.execute_stmt("REGISTRY PULL github", &CallOverrides::default());
        let NormalizedResult::Statement(stmt) = result else {
            panic!("Expected statement result");
        };
        assert_eq!(
            stmt.message,
            "github provider, version v24.04.00229 successfully installed\n"
        );
        assert_eq!(stmt.rows_affected, 1);
    }

    #[test]
    fn test_statement_error_is_detected() {
        let engine = FakeEngine::new("echo 'disparity in fields to insert and supplied data' >&2");
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let result = client.execute_stmt("INSERT INTO x SELECT 1", &CallOverrides::default());
        assert!(result
            .error_message()
            .unwrap()
            .contains("disparity in fields"));
    }

    #[test]
    fn test_keyvalue_rendering() {
        let engine = FakeEngine::new(r#"echo '[{"id": 1, "name": "Alice"}]'"#);
        let client = StackQl::new(engine.config(OutputFormat::KeyValue)).unwrap();

        let NormalizedResult::KeyValue(text) =
            client.execute("SELECT 1", true, &CallOverrides::default())
        else {
            panic!("Expected key-value text");
        };
        assert!(text.starts_with("# Query Results"));
        assert!(text.contains("## Record 1"));
        assert!(text.contains("id: 1\nname: Alice\n"));
    }

    #[test]
    fn test_frame_rendering() {
        let engine = FakeEngine::new(r#"echo '[{"region": "us-east-1", "n": 3}, {"region": "eu-west-1"}]'"#);
        let client = StackQl::new(engine.config(OutputFormat::Frame)).unwrap();

        let NormalizedResult::Frame(frame) =
            client.execute("SELECT 1", true, &CallOverrides::default())
        else {
            panic!("Expected frame");
        };
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column_names(), vec!["region", "n"]);
        assert!(frame.get(1, "n").unwrap().is_null());
    }

    #[test]
    fn test_engine_receives_query_and_flags() {
        let engine = FakeEngine::echo_args();
        let config = ExecutionConfig {
            auth: Some(json!({"x": 1})),
            ..engine.config(OutputFormat::Delimited)
        };
        let client = StackQl::new(config).unwrap();
        let query = "SELECT 'a b' FROM t WHERE c = \"$HOME\"";

        let result = client.execute(query, true, &CallOverrides::default());
        let args = lines(&result);
        assert_eq!(args[0], "exec");
        assert_eq!(args[1], query);
        assert!(args.windows(2).any(|w| w == ["--output", "csv"]));
        assert!(args.windows(2).any(|w| w == ["--auth", r#"{"x":1}"#]));
    }

    #[test]
    fn test_auth_override_replaces_configured_auth() {
        let engine = FakeEngine::echo_args();
        let config = ExecutionConfig {
            auth: Some(json!({"x": 1})),
            ..engine.config(OutputFormat::Delimited)
        };
        let client = StackQl::new(config).unwrap();

        let overrides = CallOverrides::new().with_auth(json!({"y": 2}));
        let args = lines(&client.execute("SELECT 1", true, &overrides));
        let auth_flags: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "--auth")
            .map(|(i, _)| i)
            .collect();
        assert_eq!(auth_flags.len(), 1);
        assert_eq!(args[auth_flags[0] + 1], r#"{"y":2}"#);

        let again = lines(&client.execute("SELECT 1", true, &CallOverrides::default()));
        assert!(again.windows(2).any(|w| w == ["--auth", r#"{"x":1}"#]));
    }

    #[test]
    fn test_output_override_changes_flag_and_formatter() {
        let engine = FakeEngine::new(
            r#"case " $* " in *" csv "*) printf 'a,b\n1,2\n';; *) echo '[{"a": 1}]';; esac"#,
        );
        let client = StackQl::new(engine.config(OutputFormat::Records)).unwrap();

        let overrides = CallOverrides::new().with_output(OutputFormat::Delimited);
        assert_eq!(
            client.execute("SELECT 1", true, &overrides),
            NormalizedResult::Delimited("a,b\n1,2\n".to_string())
        );
        assert_eq!(
            client.execute("SELECT 1", true, &CallOverrides::default()).to_json(),
            json!([{"a": 1}])
        );
    }

    #[test]
    fn test_env_vars_are_scoped_to_the_call() {
        let engine = FakeEngine::new(r#"printf '%s' "${STACKQL_IT_REGION:-unset}""#);
        let client = StackQl::new(engine.config(OutputFormat::Delimited)).unwrap();

        let overrides = CallOverrides::new().with_env("STACKQL_IT_REGION", "ap-southeast-2");
        assert_eq!(
            client.execute("SELECT 1", true, &overrides),
            NormalizedResult::Delimited("ap-southeast-2".to_string())
        );
        assert_eq!(
            client.execute("SELECT 1", true, &CallOverrides::default()),
            NormalizedResult::Delimited("unset".to_string())
        );
        assert!(std::env::var("STACKQL_IT_REGION").is_err());
    }

    #[test]
    fn test_custom_error_patterns_file() {
        let engine = FakeEngine::new(r#"echo '[{"status": "quota exhausted for project"}]'"#);
        let patterns = engine.dir().join("patterns.toml");
        std::fs::write(&patterns, "[errors]\nfuzzy_matches = [\"quota exhausted\"]\n").unwrap();

        let config = ExecutionConfig {
            error_patterns: Some(patterns),
            ..engine.config(OutputFormat::Records)
        };
        let client = StackQl::new(config).unwrap();

        let result = client.execute("SELECT 1", true, &CallOverrides::default());
        assert_eq!(
            result.error_message().as_deref(),
            Some("quota exhausted for project")
        );
    }

    #[test]
    fn test_debug_log_written() {
        let engine = FakeEngine::new(r#"echo '[]'"#);
        let log = engine.dir().join("logs").join("debug.log");
        let config = ExecutionConfig {
            debug: true,
            debug_log_file: Some(log.clone()),
            ..engine.config(OutputFormat::Records)
        };
        let client = StackQl::new(config).unwrap();
        client.execute("SELECT 42", true, &CallOverrides::default());

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("query: SELECT 42\n"));
        assert!(content.contains("stdout: []\\n\n"));
    }
}
