/**
 * OMS KERNEL - Entry point of the occupancy monitoring backend
 *
 * ROLE: Wires config, stores, alert log, rooms, health sweep, MQTT device
 * channel and the HTTP/WebSocket server, then runs until Ctrl-C.
 *
 * SHUTDOWN: stop accepting HTTP, stop the sweep and the MQTT task, close every
 * client queue, flush alerts to disk.
 */

mod alerts;
mod config;
mod error;
mod events;
mod health;
mod http;
mod ingest;
mod models;
mod mqtt;
mod pipeline;
mod realtime;
mod rooms;
mod state;
mod store;
mod sweep;

use crate::config::load_config;
use crate::state::KernelState;
use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(std::env::var("OMS_LOG_LEVEL").unwrap_or_else(|_| "info".into())))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = load_config().await;
    cfg.log_config();
    if cfg.http.api_key.is_none() {
        tracing::warn!("OMS_API_KEY not set - /api is open");
    }

    let state = KernelState::bootstrap(cfg.clone()).await;

    let sweep = state.health_sweep().spawn();
    let mqtt_task = match cfg.mqtt.clone() {
        Some(mqtt_cfg) => Some(mqtt::spawn_mqtt_listener(
            mqtt_cfg,
            state.pipeline.clone(),
            state.health_tracker.clone(),
        )),
        None => {
            tracing::info!("no mqtt section, device channel disabled (HTTP ingestion only)");
            None
        }
    };

    let app = http::build_router(state.clone());
    let listener = TcpListener::bind(cfg.http.bind.as_str())
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    tracing::info!("listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("shutting down");
    sweep.stop().await;
    if let Some(task) = mqtt_task {
        task.abort();
    }
    state.shutdown().await;
    tracing::info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
