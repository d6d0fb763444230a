use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    /// MQTT device ingestion is disabled when this section is absent.
    pub mqtt: Option<MqttConf>,
    pub occupancy: OccupancyConf,
    pub alerts: AlertsConf,
    pub health: HealthConf,
    pub rooms: RoomsConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    /// Required in `x-api-key` on /api routes when set.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct OccupancyConf {
    /// Capacity assumed when a device does not report one.
    pub default_capacity: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConf {
    pub capacity_high_pct: u32,
    pub capacity_critical_pct: u32,
    /// JSON mirror of the alert collection; in-memory only when unset.
    pub data_file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConf {
    pub sweep_interval_secs: u64,
    pub stale_after_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RoomsConf {
    /// Outbound events buffered per connection before new ones are dropped.
    pub client_buffer: usize,
}

fn default_client_id() -> String {
    "oms-kernel".into()
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into(), api_key: None }
    }
}

impl Default for OccupancyConf {
    fn default() -> Self {
        Self { default_capacity: 40 }
    }
}

impl Default for AlertsConf {
    fn default() -> Self {
        Self {
            capacity_high_pct: 90,
            capacity_critical_pct: 95,
            data_file: None,
        }
    }
}

impl Default for HealthConf {
    fn default() -> Self {
        Self { sweep_interval_secs: 60, stale_after_secs: 300 }
    }
}

impl Default for RoomsConf {
    fn default() -> Self {
        Self { client_buffer: 64 }
    }
}

impl KernelConfig {
    pub fn from_yaml_str(txt: &str) -> Result<Self, serde_yaml::Error> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt)
    }

    /// Applies `OMS_HTTP_ADDR` and `OMS_API_KEY` on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var("OMS_HTTP_ADDR").ok(),
            std::env::var("OMS_API_KEY").ok(),
        );
    }

    fn apply_overrides(&mut self, bind: Option<String>, api_key: Option<String>) {
        if let Some(bind) = bind.filter(|b| !b.trim().is_empty()) {
            self.http.bind = bind;
        }
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            self.http.api_key = Some(key);
        }
    }

    pub fn log_config(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  http.bind              : {}", self.http.bind);
        tracing::info!(
            "  http.api_key           : {}",
            if self.http.api_key.is_some() { "****" } else { "(open)" }
        );
        match &self.mqtt {
            Some(m) => tracing::info!("  mqtt                   : {}:{} as {}", m.host, m.port, m.client_id),
            None => tracing::info!("  mqtt                   : disabled"),
        }
        tracing::info!("  occupancy.default_cap  : {}", self.occupancy.default_capacity);
        tracing::info!(
            "  alerts.capacity        : HIGH >= {}%, CRITICAL >= {}%",
            self.alerts.capacity_high_pct,
            self.alerts.capacity_critical_pct
        );
        tracing::info!("  alerts.data_file       : {:?}", self.alerts.data_file);
        tracing::info!(
            "  health.sweep           : every {}s, stale after {}s",
            self.health.sweep_interval_secs,
            self.health.stale_after_secs
        );
        tracing::info!("  rooms.client_buffer    : {}", self.rooms.client_buffer);
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("OMS_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        KernelConfig::from_yaml_str(&txt).unwrap_or_else(|e| {
            tracing::warn!("invalid config {path}: {e}, using defaults");
            KernelConfig::default()
        })
    } else {
        tracing::warn!("no {path} found, using default config");
        KernelConfig::default()
    };
    cfg.apply_env_overrides();
    cfg
}
