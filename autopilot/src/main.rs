//! Main entry point for the autopilot binary
//!
//! Wires the orchestrator with the simulated channel collaborators and a
//! couple of seed tenants, then runs the scheduling loop until Ctrl+C.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use autopilot::{
    config::{AutopilotConfig, SchedulerConfig, StrategyBook},
    services::{
        RealFileSystem, SimulatedAdvertising, SimulatedCommerce, SimulatedContent, SimulatedSocial,
    },
    AutopilotError, AutopilotResult, DecisionEngine, Orchestrator,
};
use shared::{AdPlatform, Channel, Tenant};

/// Autonomous business cycle orchestrator
#[derive(Parser)]
#[command(name = "autopilot")]
#[command(about = "Drives tenant businesses through automated profit cycles")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Niches to seed one tenant each for
    #[arg(long, value_delimiter = ',', default_value = "fitness")]
    pub niches: Vec<String>,

    /// Seconds between scheduler ticks
    #[arg(long, default_value = "30")]
    pub tick_secs: u64,

    /// Seconds between cycles for each seeded tenant
    #[arg(long, default_value = "1800")]
    pub cycle_secs: u64,

    /// Channels to enable (content, commerce, ads, social)
    #[arg(long, value_delimiter = ',', default_value = "content,commerce,ads,social")]
    pub channels: Vec<String>,

    /// Ad platform for the advertising channel
    #[arg(long, default_value = "meta")]
    pub ad_platform: String,

    /// Directory for ledger snapshots
    #[arg(long, default_value = "./output")]
    pub snapshot_dir: String,
}

fn parse_platform(name: &str) -> AutopilotResult<AdPlatform> {
    match name {
        "meta" => Ok(AdPlatform::Meta),
        "google" => Ok(AdPlatform::Google),
        "tiktok" => Ok(AdPlatform::Tiktok),
        other => Err(AutopilotError::DataIntegrity {
            message: format!("unknown ad platform: {other}"),
        }),
    }
}

fn enabled_channels(names: &[String], platform: AdPlatform) -> Vec<Channel> {
    names
        .iter()
        .filter_map(|name| match name.as_str() {
            "content" => Some(Channel::Content),
            "commerce" => Some(Channel::Commerce),
            "ads" => Some(Channel::Advertising(platform)),
            "social" => Some(Channel::Social),
            _ => None,
        })
        .collect()
}

#[tokio::main]
async fn main() -> AutopilotResult<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    shared::logging::init_tracing_with_level(Some(&args.log_level));
    shared::logging::log_startup("autopilot orchestrator");

    let platform = parse_platform(&args.ad_platform)?;
    let channels = enabled_channels(&args.channels, platform);

    let mut config = AutopilotConfig {
        scheduler: SchedulerConfig {
            tick_interval: Duration::from_secs(args.tick_secs),
            ..SchedulerConfig::default()
        },
        ..AutopilotConfig::default()
    };
    config.dispatch.cycle_deadline = config.dispatch.cycle_deadline.min(
        Duration::from_secs(args.cycle_secs.max(1)),
    );

    let engine = DecisionEngine::new(config.decision.clone(), StrategyBook::standard());
    let mut orchestrator = Orchestrator::new(
        Arc::new(SimulatedContent),
        Arc::new(SimulatedCommerce),
        Arc::new(SimulatedAdvertising::new(platform)),
        Arc::new(SimulatedSocial),
        engine,
        config,
        channels,
    )?
    .with_snapshot_exporter(Arc::new(RealFileSystem::with_base_dir(
        args.snapshot_dir.clone().into(),
    )));

    for niche in &args.niches {
        let mut tenant = Tenant::new(format!("{niche} venture"), niche.clone());
        tenant.cycle_interval = Duration::from_secs(args.cycle_secs);
        orchestrator.register_tenant(tenant).await;
    }

    // Graceful shutdown on Ctrl+C
    let shutdown = orchestrator.shutdown_sender();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                shared::logging::log_shutdown("received Ctrl+C");
                let _ = shutdown.send(()).await;
            }
            Err(err) => {
                shared::logging::log_error("signal handling", &err);
            }
        }
    });

    orchestrator.run().await?;

    shared::logging::log_success("Autopilot stopped gracefully");
    Ok(())
}
