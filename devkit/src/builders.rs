/*!
Payload builders for the OMS device and realtime contracts.

Each builder returns the JSON exactly as an edge device or a dashboard client
would send it, so tests exercise the real deserialization path.
*/

use serde_json::{json, Map, Value};

pub struct OmsMessageBuilder;

impl OmsMessageBuilder {
    /// Minimal occupancy reading. `capacity: None` leaves the field out.
    pub fn occupancy_v1(
        bus_id: &str,
        device_id: &str,
        occupancy: u32,
        capacity: Option<u32>,
        ts_device: &str,
    ) -> Value {
        let mut msg = json!({
            "bus_id": bus_id,
            "device_id": device_id,
            "occupancy": occupancy,
            "ts_device": ts_device,
        });
        if let Some(cap) = capacity {
            msg["capacity"] = json!(cap);
        }
        msg
    }

    /// Occupancy reading stamped now, with route metadata.
    pub fn occupancy_with_route(
        bus_id: &str,
        device_id: &str,
        occupancy: u32,
        capacity: u32,
        route_id: &str,
        direction: &str,
    ) -> Value {
        let mut msg = Self::occupancy_v1(
            bus_id,
            device_id,
            occupancy,
            Some(capacity),
            &chrono::Utc::now().to_rfc3339(),
        );
        msg["route_id"] = json!(route_id);
        msg["direction"] = json!(direction);
        msg
    }

    pub fn device_status_v1(bus_id: Option<&str>, status: &str) -> Value {
        let mut msg = json!({ "status": status });
        if let Some(bus) = bus_id {
            msg["bus_id"] = json!(bus);
        }
        msg
    }

    pub fn device_heartbeat_v1(bus_id: Option<&str>) -> Value {
        let mut msg = json!({ "ts": chrono::Utc::now().to_rfc3339() });
        if let Some(bus) = bus_id {
            msg["bus_id"] = json!(bus);
        }
        msg
    }

    pub fn manual_override_v1(bus_id: &str, occupancy_count: i64, submitted_by: &str) -> Value {
        json!({
            "busId": bus_id,
            "occupancyCount": occupancy_count,
            "submittedBy": submitted_by,
        })
    }

    /// Realtime frame `{"event", "data"}`; a null `data` is omitted.
    pub fn client_frame(event: &str, data: Value) -> Value {
        let mut frame = Map::new();
        frame.insert("event".into(), Value::String(event.into()));
        if !data.is_null() {
            frame.insert("data".into(), data);
        }
        Value::Object(frame)
    }
}
