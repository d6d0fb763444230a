/**
 * HEALTH SWEEP - Periodic camera liveness check
 *
 * ROLE:
 * Every `sweep_interval_secs` the sweep looks at every known device:
 *   - a device whose last ping is older than `stale_after_secs` is stale;
 *     it is flagged offline and, unless its bus already has an active
 *     CAMERA_OFFLINE alert, a new alert is raised and sent to `admin`
 *   - offline = stale OR last reported status offline
 *   - the fleet summary goes to `admin` as `system:health:update`
 *
 * Alert de-duplication is keyed by bus, not device: two dead cameras on one
 * bus produce a single alert until it is resolved.
 *
 * A failed alert save is logged; the tick still records and publishes its
 * summary, and the next save rewrites the whole file.
 */

use crate::alerts::AlertLog;
use crate::events::{CameraOffline, HealthSummary, ServerEvent};
use crate::health::HealthTracker;
use crate::models::{AlertType, DeviceStatus, Severity};
use crate::rooms::{Room, RoomBroadcaster};
use crate::store::DeviceRegistry;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct HealthSweep {
    devices: Arc<DeviceRegistry>,
    alerts: Arc<AlertLog>,
    rooms: Arc<RoomBroadcaster>,
    tracker: HealthTracker,
    interval: Duration,
    stale_after: time::Duration,
}

impl HealthSweep {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        alerts: Arc<AlertLog>,
        rooms: Arc<RoomBroadcaster>,
        tracker: HealthTracker,
        interval: Duration,
        stale_after: time::Duration,
    ) -> Self {
        Self {
            devices,
            alerts,
            rooms,
            tracker,
            interval,
            stale_after,
        }
    }

    /// One sweep evaluated at `now`.
    pub async fn run_tick(&self, now: OffsetDateTime) -> HealthSummary {
        let devices = self.devices.list();
        let mut stale = Vec::new();
        let mut offline = 0;
        for dev in &devices {
            let is_stale = dev.is_stale(now, self.stale_after);
            if is_stale || dev.status == DeviceStatus::Offline {
                offline += 1;
            }
            if is_stale {
                stale.push(dev);
            }
        }

        let mut raised = 0;
        for dev in &stale {
            if self.alerts.has_active(AlertType::CameraOffline, &dev.bus_id).await {
                continue;
            }
            let alert = self
                .alerts
                .create(
                    AlertType::CameraOffline,
                    Some(dev.bus_id.as_str()),
                    Severity::Medium,
                    format!("Camera {} on bus {} is offline", dev.device_id, dev.bus_id),
                )
                .await;
            self.rooms.publish(
                &Room::Admin,
                ServerEvent::CameraOffline(CameraOffline {
                    alert_id: alert.id,
                    device_id: dev.device_id.clone(),
                    bus_id: dev.bus_id.clone(),
                }),
            );
            raised += 1;
        }

        let stale_ids: Vec<String> = stale.iter().map(|d| d.device_id.clone()).collect();
        let flipped = self.devices.mark_offline(&stale_ids);
        if raised > 0 {
            if let Err(e) = self.alerts.persist().await {
                tracing::error!(alerts_raised = raised, "failed to save camera alerts: {}", e);
            }
        }

        let summary = HealthSummary::compute(devices.len(), offline, now);
        self.tracker.record_sweep(&summary);
        self.rooms
            .publish(&Room::Admin, ServerEvent::SystemHealth(summary.clone()));
        tracing::debug!(
            total = summary.total_cameras,
            offline = summary.offline_cameras,
            newly_offline = flipped,
            alerts_raised = raised,
            "health sweep"
        );
        summary
    }

    /// Runs the sweep on its interval until the handle is stopped.
    pub fn spawn(self) -> SweepHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        tracing::info!(
            "starting health sweep (every {:?}, stale after {}s)",
            self.interval,
            self.stale_after.whole_seconds()
        );
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        self.run_tick(OffsetDateTime::now_utc()).await;
                    }
                }
            }
            tracing::info!("health sweep stopped");
        });
        SweepHandle { stop_tx, task }
    }
}

pub struct SweepHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Cancels future ticks and waits for an in-flight one to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            tracing::warn!("health sweep task ended abnormally: {}", e);
        }
    }
}
