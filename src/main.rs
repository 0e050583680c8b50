use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use thermal_mqtt::config::Configuration;
use thermal_mqtt::connection::{ConnectionManager, ConnectionSettings, ReconnectPolicy};
use thermal_mqtt::device::{spawn_rpc_worker, ThingsBoardDevice};
use thermal_mqtt::rpc::{RpcHandler, SpotIdPolicy};
use thermal_mqtt::thermal::{CoordinateSource, SpotRegistry, SpotStore};
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(Configuration::default_path);
    let config = Configuration::load(&config_path).await?;

    info!(
        "Starting thermal device {} -> {}:{}",
        config.thingsboard.device_id, config.thingsboard.host, config.thingsboard.port
    );

    let policy = if config.storage.relaxed_spot_ids {
        SpotIdPolicy::Relaxed
    } else {
        SpotIdPolicy::Restricted
    };

    let store = SpotStore::new(config.spots_file());
    let registry = Arc::new(
        SpotRegistry::load(
            Box::new(CoordinateSource::new()),
            store,
            config.storage.relaxed_spot_ids,
        )
        .await,
    );
    seed_static_spots(&config, &registry).await;

    let (event_tx, event_rx) = mpsc::channel(100);
    let manager = Arc::new(ConnectionManager::new(
        ConnectionSettings {
            host: config.thingsboard.host.clone(),
            port: config.thingsboard.port,
            client_id: client_id(&config.thingsboard.device_id),
        },
        ReconnectPolicy {
            enabled: config.reconnect.enabled,
            initial_delay_ms: config.reconnect.initial_delay_ms,
            max_delay_ms: config.reconnect.max_delay_ms,
            max_attempts: config.reconnect.max_attempts,
        },
        event_tx,
    ));

    // ThingsBoard authenticates with the access token as username.
    manager
        .connect(
            &config.thingsboard.access_token,
            "",
            config.thingsboard.keep_alive_seconds,
            true,
        )
        .await;

    let device = Arc::new(ThingsBoardDevice::new(
        manager.clone(),
        config.thingsboard.qos,
    ));
    let handler = RpcHandler::new(registry.clone(), policy);
    let _rpc_worker = spawn_rpc_worker(device.clone(), handler, event_rx);

    run_telemetry_loop(&config, &registry, &device).await;

    info!("Shutting down");
    registry.save().await;
    manager.disconnect(5000).await;

    Ok(())
}

/// Publishes one reading per ready spot every telemetry interval until
/// ctrl-c is received.
async fn run_telemetry_loop(
    config: &Configuration,
    registry: &Arc<SpotRegistry>,
    device: &Arc<ThingsBoardDevice>,
) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_secs(config.telemetry.interval_seconds));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                if !device.connection().is_connected().await {
                    warn!("Device not connected, skipping telemetry cycle");
                    continue;
                }
                send_telemetry_batch(registry, device).await;
            }
        }
    }
}

async fn send_telemetry_batch(registry: &Arc<SpotRegistry>, device: &Arc<ThingsBoardDevice>) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut successes = 0u32;
    let mut failures = 0u32;

    for spot in registry.list_spots().await {
        if !spot.is_ready() {
            continue;
        }

        let temperature = match spot.generate_temperature() {
            Ok(temperature) => temperature,
            Err(e) => {
                warn!("Skipping spot {}: {}", spot.id, e);
                continue;
            }
        };

        if device.send_telemetry_at(spot.id, temperature, now_ms).await {
            registry.record_reading(&spot.id.to_string()).await;
            successes += 1;
        } else {
            failures += 1;
        }
    }

    if successes + failures > 0 {
        info!(
            "Telemetry batch complete: {} sent, {} failed",
            successes, failures
        );
    }
}

async fn seed_static_spots(config: &Configuration, registry: &Arc<SpotRegistry>) {
    for spot in &config.telemetry.spots {
        if registry.spot_exists(&spot.id).await {
            continue;
        }
        match registry.create_spot(&spot.id, spot.x, spot.y).await {
            Ok(_) => info!(
                "Created configured spot {} at ({}, {})",
                spot.id, spot.x, spot.y
            ),
            Err(e) => error!("Failed to create configured spot {}: {}", spot.id, e),
        }
    }
}

fn client_id(device_id: &str) -> String {
    format!("{}_{}", device_id, chrono::Utc::now().timestamp_millis())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
