//! stackql-client - run StackQL queries from the command line.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cli::{Cli, Command, QueryArgs};
use stackql_client::config::Config;
use stackql_client::dispatch::BatchResult;
use stackql_client::output::{NormalizedResult, OutputFormat};
use stackql_client::server::PostgresConnectionFactory;
use stackql_client::{logging, StackQl};
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    if !(cli.log_file && logging::init_file_logging(cli.verbose)) {
        logging::init_stderr_logging(cli.verbose);
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the selected command. Returns false if the result was an error.
async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;

    config.engine.apply_env_defaults();
    if let Some(engine) = &cli.engine {
        config.engine.engine_path = engine.clone();
    }

    match cli.command {
        Command::Exec(args) => {
            let (client, query) = local_client(config, &args)?;
            let result = client.execute(&query, !args.show_errors, &args.overrides()?);
            Ok(print_result(&result))
        }
        Command::Stmt(args) => {
            let (client, query) = local_client(config, &args)?;
            let result = client.execute_stmt(&query, &args.overrides()?);
            Ok(print_result(&result))
        }
        Command::Batch { file, output } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read batch file {}", file.display()))?;
            let queries = cli::split_batch(&text);
            if queries.is_empty() {
                bail!("No queries found in {}", file.display());
            }
            if let Some(output) = output {
                config.engine.output = output.parse()?;
            }

            let client = StackQl::new(config.engine)?;
            info!(queries = queries.len(), "Running batch");
            let result = client.execute_queries_async(queries).await?;
            print_batch(result)?;
            Ok(true)
        }
        Command::Server {
            query,
            stmt,
            test,
            host,
            port,
        } => {
            config.engine.server_mode = true;
            if config.engine.output == OutputFormat::Delimited {
                config.engine.output = OutputFormat::Records;
            }
            if let Some(host) = host {
                config.engine.server_address = host;
            }
            if let Some(port) = port {
                config.engine.server_port = port;
            }

            let query = match (&query, test) {
                (_, true) => None,
                (Some(q), false) => Some(cli::resolve_query(q, &config)?),
                (None, false) => bail!("A query is required unless --test is given"),
            };

            let client = StackQl::new(config.engine)?;
            let session = client
                .server_session(Arc::new(PostgresConnectionFactory::new()))
                .await?;

            let ok = match query {
                None => {
                    let ok = session.test_connection().await;
                    println!("{}", if ok { "ok" } else { "failed" });
                    ok
                }
                Some(q) if stmt => print_result(&session.execute_stmt(&q).await),
                Some(q) => print_result(&session.execute(&q).await),
            };
            session.close().await?;
            Ok(ok)
        }
    }
}

fn local_client(config: Config, args: &QueryArgs) -> Result<(StackQl, String)> {
    let query = cli::resolve_query(&args.query, &config)?;
    let client = StackQl::new(config.engine)?;
    Ok((client, query))
}

/// Prints a result to stdout. Returns false if it describes an error.
fn print_result(result: &NormalizedResult) -> bool {
    match result {
        NormalizedResult::Delimited(text) | NormalizedResult::KeyValue(text) => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
        other => match serde_json::to_string_pretty(&other.to_json()) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error: failed to render result: {e}"),
        },
    }
    result.error_message().is_none()
}

fn print_batch(result: BatchResult) -> Result<()> {
    let records = result.into_records();
    let json = serde_json::to_string_pretty(&records).context("Failed to render batch result")?;
    println!("{json}");
    Ok(())
}
