/**
 * REALTIME EVENTS - Wire catalog of the client <-> kernel channel
 *
 * Every frame is a JSON object `{"event": "<name>", "data": <payload>}` in
 * both directions. Server events are fire-and-forget (at most once); a client
 * that reconnects re-fetches current state over HTTP.
 */

use crate::models::{DeviceStatus, OccupancySnapshot, OccupancySource};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "bus:occupancy:update")]
    BusOccupancyUpdate(OccupancyUpdate),
    #[serde(rename = "bus:location:update")]
    BusLocationUpdate(LocationUpdate),
    #[serde(rename = "alert:capacity:reached")]
    CapacityReached(CapacityReached),
    #[serde(rename = "alert:camera:offline")]
    CameraOffline(CameraOffline),
    #[serde(rename = "system:health:update")]
    SystemHealth(HealthSummary),
    #[serde(rename = "arrival:update")]
    ArrivalUpdate(ArrivalReport),
    #[serde(rename = "camera:status:update")]
    CameraStatus(CameraStatusReport),
    #[serde(rename = "system:status:update")]
    SystemStatus(SystemStatusUpdate),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::BusOccupancyUpdate(_) => "bus:occupancy:update",
            ServerEvent::BusLocationUpdate(_) => "bus:location:update",
            ServerEvent::CapacityReached(_) => "alert:capacity:reached",
            ServerEvent::CameraOffline(_) => "alert:camera:offline",
            ServerEvent::SystemHealth(_) => "system:health:update",
            ServerEvent::ArrivalUpdate(_) => "arrival:update",
            ServerEvent::CameraStatus(_) => "camera:status:update",
            ServerEvent::SystemStatus(_) => "system:status:update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyUpdate {
    pub bus_id: String,
    pub route_id: String,
    pub direction: String,
    pub platform: String,
    pub occupancy_count: u32,
    pub capacity: u32,
    pub occupancy_percentage: u32,
    pub source: OccupancySource,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<&OccupancySnapshot> for OccupancyUpdate {
    fn from(s: &OccupancySnapshot) -> Self {
        Self {
            bus_id: s.bus_id.clone(),
            route_id: s.route_id.clone(),
            direction: s.direction.clone(),
            platform: s.platform.clone(),
            occupancy_count: s.occupancy_count,
            capacity: s.capacity,
            occupancy_percentage: s.percentage(),
            source: s.source,
            timestamp: s.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityReached {
    pub alert_id: String,
    pub bus_id: String,
    pub route_id: String,
    pub occupancy_percentage: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraOffline {
    pub alert_id: String,
    pub device_id: String,
    pub bus_id: String,
}

/// Aggregate camera health computed by each sweep tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total_cameras: usize,
    pub online_cameras: usize,
    pub offline_cameras: usize,
    pub health_percentage: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl HealthSummary {
    pub fn compute(total: usize, offline: usize, timestamp: OffsetDateTime) -> Self {
        let online = total.saturating_sub(offline);
        let health_percentage = if total == 0 {
            0
        } else {
            (online as f64 / total as f64 * 100.0).round() as u32
        };
        Self {
            total_cameras: total,
            online_cameras: online,
            offline_cameras: offline,
            health_percentage,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

// ---- client -> kernel ----

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "join:bus")]
    JoinBus(String),
    #[serde(rename = "join:route")]
    JoinRoute(String),
    #[serde(rename = "join:station")]
    JoinStation(String),
    #[serde(rename = "join:admin")]
    JoinAdmin,
    #[serde(rename = "join:guard")]
    JoinGuard,
    #[serde(rename = "leave:bus")]
    LeaveBus(String),
    #[serde(rename = "leave:route")]
    LeaveRoute(String),
    #[serde(rename = "leave:station")]
    LeaveStation(String),
    #[serde(rename = "leave:admin")]
    LeaveAdmin,
    #[serde(rename = "leave:guard")]
    LeaveGuard,
    #[serde(rename = "occupancy:manual")]
    ManualOccupancy(ManualOverride),
    #[serde(rename = "camera:status")]
    CameraStatus(CameraStatusReport),
    #[serde(rename = "bus:location")]
    BusLocation(LocationReport),
    #[serde(rename = "arrival:update")]
    ArrivalUpdate(ArrivalReport),
    #[serde(rename = "system:status")]
    SystemStatus(SystemStatusReport),
}

/// A guard-submitted correction. Accepts the legacy `count`/`userId` names too.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverride {
    pub bus_id: String,
    #[serde(alias = "count")]
    pub occupancy_count: i64,
    #[serde(alias = "userId")]
    pub submitted_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraStatusReport {
    pub device_id: String,
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalReport {
    pub bus_id: String,
    pub station_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub eta: OffsetDateTime,
}

/// Operator or service status note for the admin dashboards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemStatusReport {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatusUpdate {
    pub status: String,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_server_frame_shape() {
        let summary = HealthSummary::compute(10, 2, datetime!(2024-01-01 00:00 UTC));
        let event = ServerEvent::SystemHealth(summary);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "system:health:update");
        assert_eq!(json["event"], event.name());
        assert_eq!(json["data"]["healthPercentage"], 80);
        assert_eq!(json["data"]["onlineCameras"], 8);
        assert_eq!(json["data"]["timestamp"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_health_summary_empty_fleet() {
        let summary = HealthSummary::compute(0, 0, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(summary.health_percentage, 0);
        assert_eq!(summary.online_cameras, 0);
    }

    #[test]
    fn test_parse_join_messages() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"join:bus","data":"TJ001"}"#).unwrap();
        assert_eq!(msg, ClientMessage::JoinBus("TJ001".into()));

        let msg: ClientMessage = serde_json::from_str(r#"{"event":"join:admin"}"#).unwrap();
        assert_eq!(msg, ClientMessage::JoinAdmin);
    }

    #[test]
    fn test_parse_manual_override_aliases() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"event":"occupancy:manual","data":{"busId":"TJ001","count":10,"userId":"guard-1"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::ManualOccupancy(m) => {
                assert_eq!(m.bus_id, "TJ001");
                assert_eq!(m.occupancy_count, 10);
                assert_eq!(m.submitted_by, "guard-1");
                assert!(m.reason.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_system_status() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"event":"system:status","data":{"status":"degraded","message":"broker lag"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::SystemStatus(SystemStatusReport {
                status: "degraded".into(),
                message: "broker lag".into(),
            })
        );
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"join:depot","data":"x"}"#).is_err());
    }
}
