//! # SkyParam Simulator
//!
//! Runs the parameter engine against a simulated vehicle on a lossy link.
//! Used to soak the retry and timeout paths by hand.
//!
//! ## Session
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Simulator Session                                │
//! │                                                                         │
//! │  1. Bulk load over the lossy link (cache empty)                        │
//! │  2. Reconnect: hash matches, parameters come from the cache            │
//! │  3. Write through a Fact, one write the vehicle clamps                 │
//! │  4. Export the parameter file                                          │
//! │  5. Refresh-all every 30 s until Ctrl+C                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```text
//! skyparam-sim [loss-percent] [param-count]
//! RUST_LOG=skyparam=trace skyparam-sim 30 500
//! ```

mod vehicle;

use anyhow::Context;
use skyparam_core::{ComponentId, ComponentTarget, ParamValue};
use skyparam_sync::metadata;
use skyparam_sync::transport;
use skyparam_sync::{
    MemoryCacheStore, MetadataProvider, ParamEventEmitter, ParameterEngine, ReadyState, SyncConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::vehicle::SimVehicle;

/// Interval between soak refreshes.
const SOAK_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Logs every engine event.
struct LoggingEmitter;

impl ParamEventEmitter for LoggingEmitter {
    fn on_ready(&self, state: &ReadyState) {
        info!(
            epoch = state.epoch,
            missing_parameters = state.missing_parameters,
            "Parameters ready"
        );
    }

    fn on_progress(&self, _progress: f32) {}

    fn on_read_failed(&self, component: ComponentId, index: Option<u16>, name: Option<&str>) {
        warn!(component = %component, ?index, ?name, "Read failed");
    }

    fn on_write_failed(&self, component: ComponentId, name: &str, value: ParamValue) {
        warn!(component = %component, name, %value, "Write failed");
    }

    fn on_write_adjusted(&self, component: ComponentId, name: &str, requested: ParamValue, actual: ParamValue) {
        warn!(component = %component, name, %requested, %actual, "Vehicle adjusted write");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let loss_percent = args
        .next()
        .map(|s| s.parse::<f64>())
        .transpose()
        .context("loss-percent must be a number")?
        .unwrap_or(20.0);
    let param_count = args
        .next()
        .map(|s| s.parse::<usize>())
        .transpose()
        .context("param-count must be a number")?
        .unwrap_or(250);
    let loss = (loss_percent / 100.0).clamp(0.0, 0.95);

    let mut config = SyncConfig::load_or_default(None);
    // The simulated autopilot only persists writes when asked to
    config.vehicle.save_to_storage = true;
    info!(
        vehicle_id = config.vehicle.id,
        loss_percent,
        param_count,
        "Starting parameter simulator"
    );

    let provider = match &config.metadata.path {
        Some(path) => Arc::new(MetadataProvider::from_path(path.clone())),
        None => Arc::new(MetadataProvider::empty()),
    };
    metadata::install_global(provider);

    let (link, inbound_rx, endpoint) = transport::channel(transport::DEFAULT_CHANNEL_CAPACITY);
    tokio::spawn(SimVehicle::new(config.vehicle.id, endpoint, param_count, loss, 7).run());

    let cache = Arc::new(MemoryCacheStore::new());
    let (engine, handle) = ParameterEngine::new(
        config,
        metadata::global(),
        cache,
        link,
        inbound_rx,
        Arc::new(LoggingEmitter),
    )?;
    tokio::spawn(engine.run());

    // Bulk load
    handle.start().await?;
    let state = handle.wait_ready().await?;
    let status = handle.status().await?;
    info!(
        epoch = state.epoch,
        missing_parameters = state.missing_parameters,
        components = status.components.len(),
        default_component = ?status.default_component,
        "Initial load finished"
    );

    // Reconnect through the cache
    handle.stop().await?;
    handle.start().await?;
    let state = handle.wait_ready().await?;
    info!(epoch = state.epoch, "Reconnected");

    // Writes
    if handle
        .parameter_exists(ComponentTarget::Default, "CRUISE_SPEED")
        .await?
    {
        let fact = handle.get_fact(ComponentTarget::Default, "CRUISE_SPEED").await?;
        fact.set_raw_value_from_text("12.5")?;
    }
    if let Err(e) = handle
        .write_parameter_raw(ComponentTarget::Default, "MIS_TAKEOFF_ALT", ParamValue::Float(500.0))
        .await
    {
        warn!(error = %e, "Altitude write rejected");
    }
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Export
    let exported = handle.export_text().await?;
    info!(lines = exported.lines().count(), "Exported parameter file");
    println!("{}", exported.lines().take(12).collect::<Vec<_>>().join("\n"));

    // Soak until interrupted
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(SOAK_REFRESH_INTERVAL) => {
                handle.refresh_all_parameters(ComponentTarget::All).await?;
                let state = handle.wait_ready().await?;
                info!(epoch = state.epoch, missing_parameters = state.missing_parameters, "Soak refresh finished");
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=skyparam=trace` - Trace for skyparam crates only
/// - Default: INFO, DEBUG for skyparam crates
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,skyparam=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
