//! jobsys-worker — worker process for the process backend.
//!
//! Reads one JSON dispatch per stdin line, runs it against the built-in
//! registry and writes exactly one JSON response line per dispatch on
//! stdout. Exits when stdin closes. Logs go to stderr.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use jobsys_core::{builtin, serve_stdio};

/// Worker process serving built-in job handlers over stdio.
#[derive(Parser, Debug)]
#[command(name = "jobsys-worker", version, about)]
struct Cli {
    /// Default log filter when RUST_LOG is unset.
    #[arg(long, env = "JOBSYS_WORKER_LOG", default_value = "warn")]
    log: String,

    /// Print the registered handler ids and exit.
    #[arg(long)]
    list_handlers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout is the protocol channel
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let registry = builtin::registry();
    if cli.list_handlers {
        for name in registry.names() {
            eprintln!("{name}");
        }
        return Ok(());
    }

    serve_stdio(Arc::new(registry)).await?;
    info!("worker stopped");
    Ok(())
}
