use anyhow::{Context, Result};
use clap::Parser;
use lubw_forwarder::cli::{Args, Command};
use lubw_forwarder::config::Config;
use lubw_forwarder::lubw::LubwClient;
use lubw_forwarder::mqtt::MqttPublisher;
use lubw_forwarder::pipeline::{Pipeline, PipelineSettings, StationSource, TableSink};
use lubw_forwarder::stations::StationConfig;
use lubw_forwarder::window::TimeWindow;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,lubw_forwarder=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::from_env()?;
    init_tracing()?;

    let stations = StationConfig::load(&config.stations_file)?;
    tracing::info!(
        file = %config.stations_file.display(),
        stations = stations.len(),
        "loaded station config"
    );

    let client = LubwClient::new(&config)?;
    let publisher = MqttPublisher::new(&config);
    let pipeline = Pipeline::new(
        client,
        publisher,
        stations,
        PipelineSettings::from_config(&config),
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_scheduled(&pipeline, config.poll_interval).await,
        Command::Once => {
            pipeline.run_incremental(chrono::Utc::now()).await;
        }
        Command::Backfill {
            start,
            end,
            chunk_size,
            step_hours,
        } => {
            let range = TimeWindow::new(start, end).context("invalid backfill range")?;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                }
                _ = pipeline.run_backfill(&range, step_hours.max(1), chunk_size.max(1)) => {}
            }
        }
    }

    Ok(())
}

async fn run_scheduled<S: StationSource, P: TableSink>(
    pipeline: &Pipeline<S, P>,
    poll_interval: Duration,
) {
    tracing::info!(interval_secs = poll_interval.as_secs(), "lubw-forwarder scheduler started");
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                pipeline.run_incremental(chrono::Utc::now()).await;
            }
        }
    }
}
