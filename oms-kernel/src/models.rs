use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const UNKNOWN: &str = "Unknown";
pub const UNKNOWN_ETA: &str = "-- mnt";

/// Provenance of an occupancy reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancySource {
    Camera,
    Manual,
    Estimated,
}

/// Latest known occupancy for one bus. Overwritten on every write, never appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancySnapshot {
    pub bus_id: String,
    pub occupancy_count: u32,
    pub capacity: u32,
    pub source: OccupancySource,
    pub route_id: String,
    pub route_name: String,
    pub direction: String,
    pub platform: String,
    pub estimasi: String,
    pub device_id: Option<String>,
    /// Device clock at capture time. Informational only: ordering and staleness use `updated_at`.
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub reported_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl OccupancySnapshot {
    /// round(count / capacity * 100); 0 when capacity is 0.
    pub fn percentage(&self) -> u32 {
        occupancy_percentage(self.occupancy_count, self.capacity)
    }

    /// Route shown to riders: the name when known, else the id.
    pub fn route_label(&self) -> &str {
        if self.route_name != UNKNOWN {
            &self.route_name
        } else {
            &self.route_id
        }
    }

    /// One-line display used by the bus-stop board.
    pub fn formatted(&self) -> String {
        format!(
            "Rute: {} | Arah: {} | Peron: {} | Kapasitas: {} / {} | No Bus: {} | Estimasi: {}",
            self.route_label(),
            self.direction,
            self.platform,
            self.occupancy_count,
            self.capacity,
            self.bus_id,
            self.estimasi
        )
    }
}

pub fn occupancy_percentage(count: u32, capacity: u32) -> u32 {
    if capacity == 0 {
        return 0;
    }
    (f64::from(count) / f64::from(capacity) * 100.0).round() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Last-seen record of an edge device. `status` is advisory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLiveness {
    pub device_id: String,
    pub bus_id: String,
    pub status: DeviceStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_ping: OffsetDateTime,
}

impl DeviceLiveness {
    pub fn is_stale(&self, now: OffsetDateTime, stale_after: time::Duration) -> bool {
        now - self.last_ping > stale_after
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    CapacityLimit,
    CameraOffline,
    Maintenance,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub bus_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub resolved_at: Option<OffsetDateTime>,
}
