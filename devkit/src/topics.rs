//! Device-side MQTT topic layout.

pub const OCCUPANCY: &str = "/oms/v1/occupancy";
pub const DEVICE_STATUS_FILTER: &str = "/oms/v1/device/+/status";
pub const DEVICE_HEARTBEAT_FILTER: &str = "/oms/v1/device/+/heartbeat";

pub fn device_status(device_id: &str) -> String {
    format!("/oms/v1/device/{device_id}/status")
}

pub fn device_heartbeat(device_id: &str) -> String {
    format!("/oms/v1/device/{device_id}/heartbeat")
}
