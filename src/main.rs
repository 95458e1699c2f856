use anyhow::{Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kpi_engine::cli;
use kpi_engine::generator::workflow::launch;

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_tracing(args.verbose);
    let config = args.into_config()?;

    let output = launch(&config).await?;
    println!("{}", output.to_json()?);

    if output.is_completed() {
        Ok(())
    } else {
        Err(anyhow!("KPI diagnosis pipeline failed"))
    }
}
