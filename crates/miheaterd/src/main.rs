use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use miheaterd::Config;
use miheaterd::Engine;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(version, about = "Xiaomi Wi-Fi heater climate daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "miheaterd.toml")]
    config: PathBuf,
}

fn log_filter(config: &Config) -> Targets {
    config.logging.overrides.iter().fold(
        Targets::new().with_default(LevelFilter::from(config.logging.level)),
        |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(log_filter(&config))
        .init();

    tracing::info!("miheaterd starting");
    tracing::info!("Loaded config from: {}", args.config.display());

    let mut engine = Engine::new();
    engine.register_integrations_from_config(&config);
    let engine = Arc::new(engine);

    let runner = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run().await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    engine.shutdown().await;
    runner.await.context("Engine task panicked")?;

    Ok(())
}
