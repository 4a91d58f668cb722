//! cctally - aggregate Claude Code usage and cost data from local transcripts

use cctally::{
    cli::{Cli, Command},
    service::{BlockOptions, UsageService},
};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cctally=info"))
    } else {
        tracing_subscriber::EnvFilter::new("warn")
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let usage_filter = cli.build_filter()?;
    let service = UsageService::new(cli.offline).await?;

    match cli.command {
        Command::Summary => {
            info!("Running usage summary");
            let summary = service.get_summary(&usage_filter, cli.mode).await?;
            print_json(&summary)?;
        }
        Command::Daily => {
            info!("Running daily usage report");
            let report = service.get_daily(&usage_filter, cli.mode).await?;
            print_json(&report)?;
        }
        Command::Monthly => {
            info!("Running monthly usage report");
            let report = service.get_monthly(&usage_filter, cli.mode).await?;
            print_json(&report)?;
        }
        Command::Sessions(args) => {
            info!("Running session report");
            let report = service
                .get_sessions(&usage_filter, cli.mode, args.limit)
                .await?;
            print_json(&report)?;
        }
        Command::Blocks(args) => {
            info!("Running billing blocks report");
            let options = BlockOptions {
                active: args.active,
                recent: args.recent,
            };
            let report = service.get_blocks(&usage_filter, cli.mode, options).await?;
            print_json(&report)?;
        }
    }

    Ok(())
}
