/**
 * OCCUPANCY STORE - Current state per bus and per device
 *
 * ROLE:
 * Two flat key -> record caches: the latest OccupancySnapshot per bus and the
 * DeviceLiveness per edge device. No history is kept; every upsert replaces the
 * previous record whole (last write wins, concurrent writers are never merged).
 *
 * OWNERSHIP:
 * Written only by the ingestion pipeline and the health sweep. Readers get
 * clones so no lock is ever held across an await point.
 */

use crate::models::{DeviceLiveness, DeviceStatus, OccupancySnapshot};
use parking_lot::Mutex;
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Default)]
pub struct OccupancyStore {
    snapshots: Mutex<HashMap<String, OccupancySnapshot>>,
}

impl OccupancyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot for `snapshot.bus_id` and returns what was stored.
    pub fn upsert(&self, snapshot: OccupancySnapshot) -> OccupancySnapshot {
        let stored = snapshot.clone();
        let previous = self.snapshots.lock().insert(snapshot.bus_id.clone(), snapshot);
        tracing::debug!(
            bus_id = %stored.bus_id,
            occupancy = stored.occupancy_count,
            capacity = stored.capacity,
            source = ?stored.source,
            replaced = previous.is_some(),
            "snapshot stored"
        );
        stored
    }

    pub fn get(&self, bus_id: &str) -> Option<OccupancySnapshot> {
        self.snapshots.lock().get(bus_id).cloned()
    }

    /// All snapshots ordered by bus id.
    pub fn list(&self) -> Vec<OccupancySnapshot> {
        let mut all: Vec<OccupancySnapshot> = self.snapshots.lock().values().cloned().collect();
        all.sort_by(|a, b| a.bus_id.cmp(&b.bus_id));
        all
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceLiveness>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a sign of life: status online, last ping `at`.
    pub fn touch(&self, device_id: &str, bus_id: &str, at: OffsetDateTime) -> DeviceLiveness {
        self.record(device_id, Some(bus_id), DeviceStatus::Online, at)
    }

    /// Upserts a device record. An unknown bus keeps the previously known one
    /// (or "unknown" for a first contact).
    pub fn record(
        &self,
        device_id: &str,
        bus_id: Option<&str>,
        status: DeviceStatus,
        at: OffsetDateTime,
    ) -> DeviceLiveness {
        let mut devices = self.devices.lock();
        let bus_id = match bus_id {
            Some(b) => b.to_string(),
            None => devices
                .get(device_id)
                .map(|d| d.bus_id.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        };
        let entry = DeviceLiveness {
            device_id: device_id.to_string(),
            bus_id,
            status,
            last_ping: at,
        };
        devices.insert(device_id.to_string(), entry.clone());
        entry
    }

    /// Flags devices offline without touching their last ping.
    pub fn mark_offline(&self, device_ids: &[String]) -> usize {
        let mut devices = self.devices.lock();
        let mut changed = 0;
        for id in device_ids {
            if let Some(dev) = devices.get_mut(id) {
                if dev.status != DeviceStatus::Offline {
                    dev.status = DeviceStatus::Offline;
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceLiveness> {
        self.devices.lock().get(device_id).cloned()
    }

    pub fn list(&self) -> Vec<DeviceLiveness> {
        let mut all: Vec<DeviceLiveness> = self.devices.lock().values().cloned().collect();
        all.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        all
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OccupancySource;
    use time::macros::datetime;

    fn snapshot(bus: &str, count: u32) -> OccupancySnapshot {
        OccupancySnapshot {
            bus_id: bus.into(),
            occupancy_count: count,
            capacity: 40,
            source: OccupancySource::Camera,
            route_id: "Unknown".into(),
            route_name: "Unknown".into(),
            direction: "Unknown".into(),
            platform: "Unknown".into(),
            estimasi: "-- mnt".into(),
            device_id: Some("CAM001".into()),
            reported_at: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = OccupancyStore::new();
        store.upsert(snapshot("TJ001", 10));
        store.upsert(snapshot("TJ001", 25));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("TJ001").unwrap().occupancy_count, 25);
        assert!(store.get("TJ404").is_none());
    }

    #[test]
    fn test_list_sorted_by_bus() {
        let store = OccupancyStore::new();
        store.upsert(snapshot("TJ003", 1));
        store.upsert(snapshot("TJ001", 1));
        store.upsert(snapshot("TJ002", 1));
        let ids: Vec<String> = store.list().into_iter().map(|s| s.bus_id).collect();
        assert_eq!(ids, vec!["TJ001", "TJ002", "TJ003"]);
    }

    #[test]
    fn test_touch_and_mark_offline() {
        let devices = DeviceRegistry::new();
        let at = datetime!(2024-01-01 00:00 UTC);
        devices.touch("CAM001", "TJ001", at);
        devices.touch("CAM002", "TJ002", at);

        assert_eq!(devices.mark_offline(&["CAM002".into(), "CAM404".into()]), 1);
        assert_eq!(devices.mark_offline(&["CAM002".into()]), 0);

        let cam2 = devices.get("CAM002").unwrap();
        assert_eq!(cam2.status, DeviceStatus::Offline);
        assert_eq!(cam2.last_ping, at);
        assert_eq!(devices.get("CAM001").unwrap().status, DeviceStatus::Online);
    }

    #[test]
    fn test_record_keeps_known_bus() {
        let devices = DeviceRegistry::new();
        let at = datetime!(2024-01-01 00:00 UTC);
        devices.touch("CAM001", "TJ001", at);
        let rec = devices.record("CAM001", None, DeviceStatus::Offline, at);
        assert_eq!(rec.bus_id, "TJ001");

        let fresh = devices.record("CAM009", None, DeviceStatus::Online, at);
        assert_eq!(fresh.bus_id, "unknown");
    }
}
