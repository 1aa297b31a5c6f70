// Insight Cascade - command line entry point

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use insight_cascade::{ConfigService, DrilldownRunner, SettingsUpdate};

/// Log filter used when RUST_LOG is unset; one directive per workspace crate.
const DEFAULT_LOG_FILTER: &str = "insight_cascade=info,insight_cascade_core=info,insight_cascade_llm=info,insight_cascade_tools=info,insight_cascade_quality_gates=info";

/// Answer a question about the performance dataset with a multi-level
/// drill-down report.
#[derive(Debug, Parser)]
#[command(name = "insight-cascade", version, about)]
struct Cli {
    /// The question to investigate
    question: String,

    /// Config file (.json or .toml); defaults to ~/.insight-cascade/config.json
    #[arg(long, env = "INSIGHT_CASCADE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the repair ceiling for this run
    #[arg(long)]
    max_repair_cycles: Option<u32>,

    /// Print the full run report as JSON instead of the report text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let service = match &cli.config {
        Some(path) => ConfigService::open(path),
        None => ConfigService::new(),
    }
    .context("failed to load configuration")?;

    let mut config = service.get_config_clone();
    if cli.max_repair_cycles.is_some() {
        config.apply_update(SettingsUpdate {
            max_repair_cycles: cli.max_repair_cycles,
            ..Default::default()
        });
    }

    let runner = DrilldownRunner::from_config(&config).context("failed to build the pipeline")?;
    let report = runner.answer(&cli.question).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.report);
    }

    tracing::info!(
        status = %report.status,
        iterations = report.iterations,
        "[Main] done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_covers_every_crate() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        let targets: Vec<&str> = DEFAULT_LOG_FILTER
            .split(',')
            .filter_map(|d| d.split_once('=').map(|(t, _)| t))
            .collect();
        for target in [
            "insight_cascade",
            "insight_cascade_core",
            "insight_cascade_llm",
            "insight_cascade_tools",
            "insight_cascade_quality_gates",
        ] {
            assert!(targets.contains(&target), "missing {}", target);
        }
    }
}
