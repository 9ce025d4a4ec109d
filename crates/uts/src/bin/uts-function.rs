use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use spillway_core::load_dotenv;
use spillway_uts::register_functions;
use spillway_wire::{Endpoint, FunctionHost, FunctionRegistry};

/// Hosts the UTS remote functions behind a ROUTER socket.
#[derive(Parser, Debug)]
#[command(name = "uts-function", about = "Serve UTS bag jobs for remote schedulers")]
struct Args {
    /// Endpoint to bind: tcp://host:port or ipc://name
    #[arg(long, env = "SPILLWAY_REMOTE_ENDPOINT", default_value = "tcp://127.0.0.1:5700")]
    endpoint: String,

    /// Memory size reported in each REPORT line
    #[arg(long, default_value = "1769")]
    memory_size_mb: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let endpoint = Endpoint::parse(&args.endpoint).context("invalid endpoint")?;
    if endpoint == Endpoint::InProcess {
        bail!("uts-function needs a socket endpoint, got '{}'", args.endpoint);
    }

    let mut registry = FunctionRegistry::new();
    register_functions(&mut registry)?;
    let host = FunctionHost::bind(&endpoint, registry, args.memory_size_mb)
        .await
        .with_context(|| format!("failed to bind {endpoint}"))?;

    info!(%endpoint, memory_size_mb = args.memory_size_mb, "serving until Ctrl-C");
    host.serve_until(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    info!("function host stopped");
    Ok(())
}
