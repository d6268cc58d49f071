//! jobsys — run built-in jobs through a pool from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Ten multiplications on the thread backend
//! jobsys run --handler multiply --payload '{"a":3,"b":20}' --count 10
//!
//! # Same through worker processes
//! JOBSYS_WORKER_BINARY=target/debug/jobsys-worker jobsys run --handler pid --count 4
//!
//! # Show the resolved configuration
//! jobsys config --config jobsys.toml
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};

use jobsys_pool::{builtin, JobHandle, JobSpec, Pool, PoolConfig};

/// Job pool command line.
#[derive(Parser, Debug)]
#[command(name = "jobsys", version, about)]
struct Cli {
    /// Path to a jobsys.toml config file. Defaults plus env overrides when
    /// absent.
    #[arg(long, global = true, env = "JOBSYS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Schedule jobs and print their results as JSON.
    Run {
        /// Handler id from the built-in registry.
        #[arg(long)]
        handler: String,

        /// JSON payload passed to every job.
        #[arg(long, default_value = "null")]
        payload: String,

        /// Number of jobs to schedule.
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Print the resolved configuration.
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PoolConfig> {
    match path {
        Some(path) => PoolConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => PoolConfig::from_env().context("invalid environment overrides"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to read .env file");
        }
    }

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Config => {
            let settings = config.resolve(
                jobsys_pool::default_worker_count,
                std::thread::available_parallelism().map_or(1, |n| n.get()),
            );
            println!("{}", toml::to_string_pretty(&config)?);
            eprintln!("# resolved: {settings:?}");
        }
        Command::Run {
            handler,
            payload,
            count,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            let pool = Pool::new(config, builtin::registry())?;

            let handles = (0..count)
                .map(|_| {
                    pool.schedule::<Value>(
                        JobSpec::new(handler.as_str()).payload_value(payload.clone()),
                    )
                })
                .collect::<Result<Vec<JobHandle<Value>>, _>>()?;
            info!(count, handler = %handler, "jobs scheduled");

            let mut results = Vec::with_capacity(handles.len());
            for handle in &handles {
                let outcome = match handle.complete().await {
                    Ok(value) => json!({ "result": value }),
                    Err(e) => json!({ "error": e.to_string() }),
                };
                results.push(json!({
                    "state": handle.state(),
                    "placement": handle.placement(),
                    "timings": handle.timings(),
                    "outcome": outcome,
                }));
            }

            let stats = pool.stats().await;
            pool.shutdown(true).await;

            let report = json!({ "jobs": results, "stats": stats });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
