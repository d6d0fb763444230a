/**
 * OCCUPANCY PIPELINE - ingest -> store -> evaluate -> fan-out
 *
 * ROLE:
 * Single write path shared by camera readings (HTTP + MQTT) and guard
 * overrides, so both provenances produce the same observable side effects:
 *   1. upsert the bus snapshot (server receipt time is authoritative)
 *   2. refresh device liveness (camera readings only)
 *   3. evaluate capacity thresholds, maybe create + announce an alert
 *   4. publish `bus:occupancy:update` to the bus, route and admin rooms
 *
 * Steps 3 and 4 never fail the write: persistence problems are logged and
 * fan-out is best effort.
 */

use crate::alerts::{capacity_message, AlertLog, CapacityThresholds};
use crate::error::KernelError;
use crate::events::{
    ArrivalReport, CameraStatusReport, CapacityReached, LocationReport, LocationUpdate,
    ManualOverride, OccupancyUpdate, ServerEvent, SystemStatusReport, SystemStatusUpdate,
};
use crate::ingest::ReadingIn;
use crate::models::{
    Alert, AlertType, DeviceLiveness, DeviceStatus, OccupancySnapshot, OccupancySource, UNKNOWN,
    UNKNOWN_ETA,
};
use crate::rooms::{Room, RoomBroadcaster};
use crate::store::{DeviceRegistry, OccupancyStore};
use std::sync::Arc;
use time::OffsetDateTime;

pub struct OccupancyPipeline {
    store: Arc<OccupancyStore>,
    devices: Arc<DeviceRegistry>,
    alerts: Arc<AlertLog>,
    rooms: Arc<RoomBroadcaster>,
    thresholds: CapacityThresholds,
    default_capacity: u32,
}

impl OccupancyPipeline {
    pub fn new(
        store: Arc<OccupancyStore>,
        devices: Arc<DeviceRegistry>,
        alerts: Arc<AlertLog>,
        rooms: Arc<RoomBroadcaster>,
        thresholds: CapacityThresholds,
        default_capacity: u32,
    ) -> Self {
        Self {
            store,
            devices,
            alerts,
            rooms,
            thresholds,
            default_capacity,
        }
    }

    /// Camera reading path. Returns the stored snapshot.
    pub async fn ingest(&self, reading: ReadingIn) -> Result<OccupancySnapshot, KernelError> {
        let valid = reading.validate(self.default_capacity)?;
        let now = OffsetDateTime::now_utc();

        let snapshot = OccupancySnapshot {
            bus_id: valid.bus_id,
            occupancy_count: valid.occupancy,
            capacity: valid.capacity,
            source: OccupancySource::Camera,
            route_id: valid.route_id,
            route_name: valid.route_name,
            direction: valid.direction,
            platform: valid.platform,
            estimasi: valid.estimasi,
            device_id: Some(valid.device_id.clone()),
            reported_at: Some(valid.reported_at),
            updated_at: now,
        };
        let stored = self.store.upsert(snapshot);
        self.devices.touch(&valid.device_id, &stored.bus_id, now);

        self.after_write(&stored).await;
        Ok(stored)
    }

    /// Guard correction path. Keeps the bus metadata already known, tags the
    /// snapshot `manual` and leaves device liveness alone.
    pub async fn manual_override(
        &self,
        request: ManualOverride,
    ) -> Result<OccupancySnapshot, KernelError> {
        let valid = request.validate()?;
        let now = OffsetDateTime::now_utc();
        let previous = self.store.get(&valid.bus_id);

        let snapshot = match previous {
            Some(prev) => OccupancySnapshot {
                occupancy_count: valid.occupancy,
                source: OccupancySource::Manual,
                device_id: None,
                reported_at: None,
                updated_at: now,
                ..prev
            },
            None => OccupancySnapshot {
                bus_id: valid.bus_id.clone(),
                occupancy_count: valid.occupancy,
                capacity: self.default_capacity,
                source: OccupancySource::Manual,
                route_id: UNKNOWN.into(),
                route_name: UNKNOWN.into(),
                direction: UNKNOWN.into(),
                platform: UNKNOWN.into(),
                estimasi: UNKNOWN_ETA.into(),
                device_id: None,
                reported_at: None,
                updated_at: now,
            },
        };
        tracing::info!(
            bus_id = %valid.bus_id,
            occupancy = valid.occupancy,
            submitted_by = %valid.submitted_by,
            reason = valid.reason.as_deref().unwrap_or("-"),
            "manual occupancy override"
        );
        let stored = self.store.upsert(snapshot);

        self.after_write(&stored).await;
        Ok(stored)
    }

    /// Explicit status push from a device (best effort; the sweep stays the
    /// authority on staleness). Relayed to the admin room.
    pub fn camera_status(&self, report: CameraStatusReport) -> Result<DeviceLiveness, KernelError> {
        if report.device_id.trim().is_empty() {
            let mut errors = crate::error::ValidationErrors::new();
            errors.push("deviceId", "must not be empty");
            return Err(KernelError::Validation(errors));
        }
        let record = self.devices.record(
            &report.device_id,
            report.bus_id.as_deref(),
            report.status,
            OffsetDateTime::now_utc(),
        );
        self.rooms.publish(&Room::Admin, ServerEvent::CameraStatus(report));
        Ok(record)
    }

    /// Heartbeat / status from the MQTT device channel.
    pub fn device_heartbeat(
        &self,
        device_id: &str,
        bus_id: Option<&str>,
        status: Option<DeviceStatus>,
    ) -> DeviceLiveness {
        self.devices.record(
            device_id,
            bus_id,
            status.unwrap_or(DeviceStatus::Online),
            OffsetDateTime::now_utc(),
        )
    }

    /// Relays a GPS fix to every connected client.
    pub fn bus_location(&self, report: LocationReport) -> usize {
        self.rooms.broadcast(ServerEvent::BusLocationUpdate(LocationUpdate {
            bus_id: report.bus_id,
            latitude: report.latitude,
            longitude: report.longitude,
            timestamp: OffsetDateTime::now_utc(),
        }))
    }

    /// Relays an ETA to the station's room.
    pub fn arrival_update(&self, report: ArrivalReport) -> usize {
        let room = Room::Station(report.station_id.clone());
        self.rooms.publish(&room, ServerEvent::ArrivalUpdate(report))
    }

    /// Relays a status note to the admin room, stamped with server time.
    pub fn system_status(&self, report: SystemStatusReport) -> usize {
        tracing::info!(status = %report.status, "system status: {}", report.message);
        self.rooms.publish(
            &Room::Admin,
            ServerEvent::SystemStatus(SystemStatusUpdate {
                status: report.status,
                message: report.message,
                timestamp: OffsetDateTime::now_utc(),
            }),
        )
    }

    async fn after_write(&self, snapshot: &OccupancySnapshot) {
        if let Some(alert) = self.evaluate_capacity(snapshot).await {
            if let Err(e) = self.alerts.persist().await {
                tracing::error!(alert_id = %alert.id, "failed to save alerts: {}", e);
            }
        }
        self.publish_update(snapshot);
    }

    async fn evaluate_capacity(&self, snapshot: &OccupancySnapshot) -> Option<Alert> {
        let breach = self.thresholds.evaluate(snapshot)?;
        let message = capacity_message(snapshot, breach.percentage);
        let alert = self
            .alerts
            .create(
                AlertType::CapacityLimit,
                Some(&snapshot.bus_id),
                breach.severity,
                message.clone(),
            )
            .await;
        self.rooms.broadcast(ServerEvent::CapacityReached(CapacityReached {
            alert_id: alert.id.clone(),
            bus_id: snapshot.bus_id.clone(),
            route_id: snapshot.route_id.clone(),
            occupancy_percentage: breach.percentage,
            message,
        }));
        Some(alert)
    }

    fn publish_update(&self, snapshot: &OccupancySnapshot) {
        let update = OccupancyUpdate::from(snapshot);
        let mut targets = vec![Room::Bus(snapshot.bus_id.clone()), Room::Admin];
        if snapshot.route_id != UNKNOWN {
            targets.push(Room::Route(snapshot.route_id.clone()));
        }
        for room in &targets {
            self.rooms
                .publish(room, ServerEvent::BusOccupancyUpdate(update.clone()));
        }
    }
}
