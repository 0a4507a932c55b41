//! Process entry point.
//!
//! Loads configuration, initializes tracing, builds and connects the configured
//! [`DataSource`], then starts the [`SiteInfoRegistry`] and (when the resolved site supports
//! it) a [`SignalInferenceEngine`] wired into a [`SpecialSiteAdapter`]. Runs until `Ctrl+C`,
//! then shuts everything down in reverse order.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use signal_node::config::NodeConfig;
use signal_node::datasource::{manual::ManualDataSource, remote::RemoteDataSource, DataSource};
use signal_node::engine::{SignalInferenceEngine, TransitionEvent, TransitionKind};
use signal_node::error::NodeResult;
use signal_node::logging;
use signal_node::registry::SiteInfoRegistry;
use signal_node::special_site::SpecialSiteAdapter;

/// Signal-inference and Special Site direction-decision node.
#[derive(Parser, Debug)]
#[command(name = "signal_node", about = "Intersection-edge signal inference node")]
struct Cli {
    /// Path to the TOML config file. Overrides `SIGNAL_NODE_CONFIG` and the built-in default.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> NodeResult<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => NodeConfig::load_from(path)?,
        None => NodeConfig::load()?,
    };

    if let Err(e) = logging::init_tracing(&config.logging) {
        eprintln!("warning: failed to initialize tracing: {e}");
    }

    info!(operation_mode = %config.operation_mode, "starting signal node");

    let data_source: Arc<dyn DataSource> = match config.operation_mode.as_str() {
        "manual" => Arc::new(ManualDataSource::new()),
        _ => Arc::new(RemoteDataSource::new(
            config.cam_db.clone(),
            config.signal_db.clone(),
            Arc::new(signal_node::datasource::transport::HttpQueryTransport::default()),
        )),
    };

    data_source.connect().await?;

    let registry = Arc::new(SiteInfoRegistry::new(Arc::clone(&data_source), config.camera_ip.clone()).await?);
    registry.on_recovery(Arc::new(|descriptor| {
        info!(camera_id = %descriptor.camera_id, target_phase = descriptor.target_phase, "site descriptor recovered");
    }));

    let site = registry.current().await;
    let engine: Option<Arc<SignalInferenceEngine>> = if site.supports_signal_inference {
        let engine = Arc::new(SignalInferenceEngine::new(
            Arc::clone(&data_source),
            site.intersection_id.clone(),
            site.target_phase,
        ));
        engine
            .set_callback(Arc::new(|event: TransitionEvent| {
                let kind = match event.kind {
                    TransitionKind::GreenOn => "green_on",
                    TransitionKind::GreenOff => "green_off",
                };
                info!(kind, phase_code = event.phase_code, duration_seconds = event.duration_seconds, "signal transition");
            }))
            .await;

        match engine.start().await {
            Ok(()) => Some(engine),
            Err(e) => {
                warn!(error = %e, "failed to start signal inference engine, continuing without it");
                None
            }
        }
    } else {
        info!("site does not support signal inference, running without the inference engine");
        None
    };

    let mut adapter = SpecialSiteAdapter::new(config.special_site.clone(), &config.vehicle);
    if let Some(engine) = &engine {
        adapter.set_signal_source(Arc::clone(engine) as Arc<dyn signal_node::special_site::SignalDirectionSource>);
    }
    info!(active = adapter.is_active(), "special site adapter ready");

    tokio::signal::ctrl_c().await.map_err(signal_node::error::NodeError::Io)?;
    info!("shutdown signal received");

    if let Some(engine) = engine {
        engine.stop().await;
    }
    data_source.disconnect().await;

    info!("signal node stopped");
    Ok(())
}
