use crate::alerts::{AlertLog, CapacityThresholds};
use crate::config::KernelConfig;
use crate::health::{HealthTracker, KernelHealth};
use crate::pipeline::OccupancyPipeline;
use crate::rooms::RoomBroadcaster;
use crate::store::{DeviceRegistry, OccupancyStore};
use crate::sweep::HealthSweep;
use std::sync::Arc;
use std::time::Duration;

/// Everything the HTTP, realtime and MQTT surfaces share.
pub struct KernelState {
    pub config: KernelConfig,
    pub store: Arc<OccupancyStore>,
    pub devices: Arc<DeviceRegistry>,
    pub alerts: Arc<AlertLog>,
    pub rooms: Arc<RoomBroadcaster>,
    pub pipeline: Arc<OccupancyPipeline>,
    pub health_tracker: HealthTracker,
}

pub type SharedState = Arc<KernelState>;

impl KernelState {
    /// Wires empty components from `config`. Nothing is read from disk.
    pub fn new(config: KernelConfig) -> SharedState {
        let store = Arc::new(OccupancyStore::new());
        let devices = Arc::new(DeviceRegistry::new());
        let alerts = Arc::new(AlertLog::new(config.alerts.data_file.clone()));
        let rooms = Arc::new(RoomBroadcaster::new(config.rooms.client_buffer));
        let thresholds = CapacityThresholds {
            high_pct: config.alerts.capacity_high_pct,
            critical_pct: config.alerts.capacity_critical_pct,
        };
        let pipeline = Arc::new(OccupancyPipeline::new(
            store.clone(),
            devices.clone(),
            alerts.clone(),
            rooms.clone(),
            thresholds,
            config.occupancy.default_capacity,
        ));
        Arc::new(Self {
            config,
            store,
            devices,
            alerts,
            rooms,
            pipeline,
            health_tracker: HealthTracker::new(),
        })
    }

    /// `new` plus the persisted alert log. An unreadable file is logged and
    /// the kernel starts with no alerts.
    pub async fn bootstrap(config: KernelConfig) -> SharedState {
        let state = Self::new(config);
        if let Err(e) = state.alerts.load().await {
            tracing::error!("failed to load alerts: {}", e);
        }
        state
    }

    pub fn health_sweep(&self) -> HealthSweep {
        HealthSweep::new(
            self.devices.clone(),
            self.alerts.clone(),
            self.rooms.clone(),
            self.health_tracker.clone(),
            Duration::from_secs(self.config.health.sweep_interval_secs.max(1)),
            time::Duration::seconds(self.config.health.stale_after_secs as i64),
        )
    }

    pub async fn health(&self) -> KernelHealth {
        self.health_tracker
            .get_health(&self.store, &self.devices, &self.alerts, &self.rooms)
            .await
    }

    /// Flushes alerts and closes every client queue.
    pub async fn shutdown(&self) {
        if let Err(e) = self.alerts.persist().await {
            tracing::error!("failed to save alerts on shutdown: {}", e);
        }
        self.rooms.shutdown();
    }
}
