//! Command-line front end for the consensus pipeline
//!
//! ```bash
//! export ALPHA_VANTAGE_API_KEY="..."
//! consensus AAPL --alpha-vantage
//! consensus 7203 --json
//! ```

mod output;

use agent_consensus::{Pipeline, PipelineConfig};
use anyhow::Context as _;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "consensus")]
#[command(about = "Reconcile market data from several sources and vote on it", long_about = None)]
struct Args {
    /// Instrument code: four digits or one to five letters
    identifier: String,

    /// Caller key used for rate limiting
    #[arg(long, default_value = "cli")]
    caller: String,

    /// Print the full response as JSON instead of tables
    #[arg(long)]
    json: bool,

    /// Skip the Yahoo Finance collector
    #[arg(long)]
    no_yahoo: bool,

    /// Add the Alpha Vantage collector (needs ALPHA_VANTAGE_API_KEY)
    #[arg(long)]
    alpha_vantage: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = agent_utils::Config::from_env()?;
    agent_utils::init_tracing_with(settings.log_format);

    let args = Args::parse();
    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;

    let mut builder = Pipeline::builder().config(config).default_analysts();
    if !args.no_yahoo {
        builder = builder.yahoo();
    }
    if args.alpha_vantage {
        builder = builder.alpha_vantage();
    }
    let pipeline = builder.build().context("failed to assemble pipeline")?;

    info!(
        app = %settings.app_name,
        collectors = ?pipeline.collector_names(),
        "running consensus"
    );

    match pipeline.run(&args.caller, &args.identifier).await {
        Ok(response) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", output::render_response(&response));
            }
            Ok(())
        }
        Err(failure) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&failure.to_json())?);
            } else {
                eprintln!("{}", output::render_failure(&failure));
            }
            std::process::exit(1);
        }
    }
}
