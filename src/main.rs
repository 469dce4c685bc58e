use anyhow::Result;
use clap::Parser;
use sentinel_audio::config::SettingsStore;
use sentinel_audio::events::EventBus;
use sentinel_audio::supervisor::Supervisor;
use sentinel_audio::vban::SourceRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Multi-source real-time audio event detector (VBAN, RTSP, microphone)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding settings.json (created if missing)
    #[arg(short, long, default_value = ".")]
    settings: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("sentinel_audio=debug")
    } else {
        EnvFilter::new("sentinel_audio=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("sentinel-audio starting...");

    let settings_store = Arc::new(SettingsStore::new(&args.settings));
    let vban_registry = Arc::new(SourceRegistry::new());
    let event_bus = EventBus::new();

    let mut debug_rx = event_bus.subscribe();
    tokio::spawn(async move {
        use sentinel_audio::events::Event;
        while let Ok(event) = debug_rx.recv().await {
            match event {
                Event::Clap {
                    source_id,
                    timestamp,
                    score,
                } => tracing::info!(source_id, timestamp, score, "clap detected"),
                Event::Labels { source, detected } => {
                    tracing::debug!(source, ?detected, "labels")
                }
                Event::DetectionStatus { status } => {
                    tracing::info!(?status, "detection status changed")
                }
                Event::Debug { message } => tracing::debug!(message),
            }
        }
    });

    let supervisor = Arc::new(Supervisor::new(
        settings_store,
        vban_registry,
        event_bus,
        tokio::runtime::Handle::current(),
    ));

    supervisor.start()?;
    tracing::info!("detection started. Press Ctrl+C to stop.");

    signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    supervisor.stop();

    tracing::info!("sentinel-audio stopped");
    Ok(())
}
