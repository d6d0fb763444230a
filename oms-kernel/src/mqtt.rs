/**
 * MQTT DEVICE CHANNEL - Edge camera ingestion over the broker
 *
 * TOPICS:
 *   /oms/v1/occupancy               reading, same payload as POST /api/occupancy/ingest
 *   /oms/v1/device/{id}/status      {"status": "online"|"offline", "bus_id"?}
 *   /oms/v1/device/{id}/heartbeat   {"bus_id"?, "status"?}
 *
 * Subscriptions are (re)issued on every ConnAck so a broker restart does not
 * leave the kernel deaf. Bad messages are logged and skipped.
 */

use crate::config::MqttConf;
use crate::error::KernelError;
use crate::health::HealthTracker;
use crate::ingest::ReadingIn;
use crate::models::DeviceStatus;
use crate::pipeline::OccupancyPipeline;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const OCCUPANCY_TOPIC: &str = "/oms/v1/occupancy";
pub const DEVICE_STATUS_FILTER: &str = "/oms/v1/device/+/status";
pub const DEVICE_HEARTBEAT_FILTER: &str = "/oms/v1/device/+/heartbeat";

const DEVICE_PREFIX: &str = "/oms/v1/device/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTopic<'a> {
    Occupancy,
    Status(&'a str),
    Heartbeat(&'a str),
}

pub fn parse_topic(topic: &str) -> Option<DeviceTopic<'_>> {
    if topic == OCCUPANCY_TOPIC {
        return Some(DeviceTopic::Occupancy);
    }
    let rest = topic.strip_prefix(DEVICE_PREFIX)?;
    let (device_id, kind) = rest.split_once('/')?;
    if device_id.is_empty() {
        return None;
    }
    match kind {
        "status" => Some(DeviceTopic::Status(device_id)),
        "heartbeat" => Some(DeviceTopic::Heartbeat(device_id)),
        _ => None,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeviceMessageIn {
    #[serde(alias = "busId")]
    bus_id: Option<String>,
    status: Option<DeviceStatus>,
}

/// Routes one broker message into the pipeline. Unknown topics are ignored.
pub async fn handle_publish(
    pipeline: &OccupancyPipeline,
    topic: &str,
    payload: &[u8],
) -> Result<(), KernelError> {
    match parse_topic(topic) {
        Some(DeviceTopic::Occupancy) => {
            let reading: ReadingIn = serde_json::from_slice(payload)?;
            pipeline.ingest(reading).await?;
        }
        Some(DeviceTopic::Status(device_id)) | Some(DeviceTopic::Heartbeat(device_id)) => {
            let msg: DeviceMessageIn = if payload.is_empty() {
                DeviceMessageIn::default()
            } else {
                serde_json::from_slice(payload)?
            };
            let rec = pipeline.device_heartbeat(device_id, msg.bus_id.as_deref(), msg.status);
            tracing::debug!(device_id, bus_id = %rec.bus_id, status = ?rec.status, "device ping");
        }
        None => tracing::debug!(topic, "ignoring message on unknown topic"),
    }
    Ok(())
}

pub fn spawn_mqtt_listener(
    conf: MqttConf,
    pipeline: Arc<OccupancyPipeline>,
    tracker: HealthTracker,
) -> JoinHandle<()> {
    let mut opts = MqttOptions::new(conf.client_id.clone(), conf.host.clone(), conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 10);
    tracker.mark_mqtt_connecting();
    tracing::info!("connecting to MQTT broker {}:{}", conf.host, conf.port);

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    tracker.mark_mqtt_connected();
                    tracing::info!("MQTT connected, subscribing to device topics");
                    for filter in [OCCUPANCY_TOPIC, DEVICE_STATUS_FILTER, DEVICE_HEARTBEAT_FILTER] {
                        if let Err(e) = client.subscribe(filter, QoS::AtLeastOnce).await {
                            tracing::error!("MQTT subscribe {} failed: {:?}", filter, e);
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    if let Err(e) = handle_publish(&pipeline, &p.topic, &p.payload).await {
                        tracing::warn!(topic = %p.topic, "rejected device message: {}", e);
                    }
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => tracker.mark_mqtt_disconnected(),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("MQTT error: {:?}", e);
                    tracker.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
