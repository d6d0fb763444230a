//! OMS Camera Simulator - fake edge occupancy counters
//!
//! Publishes, for every simulated bus, an occupancy reading and a device
//! heartbeat on each tick so the kernel can be exercised without hardware:
//! - readings on `/oms/v1/occupancy` (bounded random walk within capacity)
//! - heartbeats on `/oms/v1/device/<id>/heartbeat`

use anyhow::{Context, Result};
use oms_devkit::{topics, MockMqttClient, OmsMessageBuilder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
struct SimConfig {
    broker: String,
    port: u16,
    buses: Vec<String>,
    interval_secs: u64,
    capacity: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            buses: vec!["TJ001".into(), "TJ002".into(), "TJ003".into()],
            interval_secs: 5,
            capacity: 40,
        }
    }
}

impl SimConfig {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(broker) = lookup("OMS_SIM_BROKER").filter(|b| !b.is_empty()) {
            cfg.broker = broker;
        }
        if let Some(port) = lookup("OMS_SIM_PORT").and_then(|p| p.parse().ok()) {
            cfg.port = port;
        }
        if let Some(buses) = lookup("OMS_SIM_BUSES") {
            let parsed: Vec<String> = buses
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect();
            if !parsed.is_empty() {
                cfg.buses = parsed;
            }
        }
        if let Some(secs) = lookup("OMS_SIM_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
            cfg.interval_secs = secs;
        }
        cfg.interval_secs = cfg.interval_secs.max(1);
        cfg
    }
}

/// Where simulated device traffic goes.
trait ReadingSink {
    async fn send(&self, topic: String, payload: Vec<u8>) -> Result<()>;
}

impl ReadingSink for AsyncClient {
    async fn send(&self, topic: String, payload: Vec<u8>) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .context("mqtt publish failed")
    }
}

impl ReadingSink for MockMqttClient {
    async fn send(&self, topic: String, payload: Vec<u8>) -> Result<()> {
        self.publish(topic, QoS::AtLeastOnce, false, payload).await
    }
}

#[derive(Debug, Clone)]
struct SimulatedCounter {
    bus_id: String,
    device_id: String,
    route_id: String,
    capacity: u32,
    occupancy: u32,
}

impl SimulatedCounter {
    fn new(index: usize, bus_id: &str, capacity: u32) -> Self {
        Self {
            bus_id: bus_id.to_string(),
            device_id: format!("CAM-{bus_id}"),
            route_id: format!("{}", index + 1),
            capacity,
            occupancy: capacity / 2,
        }
    }

    /// Moves the count by up to 5 riders, clamped to `[0, capacity]`.
    fn step<R: Rng>(&mut self, rng: &mut R) -> u32 {
        let delta: i64 = rng.gen_range(-5..=5);
        let next = (i64::from(self.occupancy) + delta).clamp(0, i64::from(self.capacity));
        self.occupancy = next as u32;
        self.occupancy
    }
}

/// Publishes one reading and one heartbeat per counter. Returns messages sent.
async fn publish_round<S: ReadingSink, R: Rng>(
    sink: &S,
    counters: &mut [SimulatedCounter],
    rng: &mut R,
) -> Result<usize> {
    let mut sent = 0;
    for counter in counters.iter_mut() {
        let occupancy = counter.step(rng);
        let reading = OmsMessageBuilder::occupancy_with_route(
            &counter.bus_id,
            &counter.device_id,
            occupancy,
            counter.capacity,
            &counter.route_id,
            "Terminal",
        );
        sink.send(topics::OCCUPANCY.to_string(), serde_json::to_vec(&reading)?)
            .await?;
        let heartbeat = OmsMessageBuilder::device_heartbeat_v1(Some(&counter.bus_id));
        sink.send(
            topics::device_heartbeat(&counter.device_id),
            serde_json::to_vec(&heartbeat)?,
        )
        .await?;
        debug!(bus = %counter.bus_id, occupancy, "reading published");
        sent += 2;
    }
    Ok(sent)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cfg = SimConfig::from_env();
    info!(
        "camera simulator: {} buses -> {}:{} every {}s",
        cfg.buses.len(),
        cfg.broker,
        cfg.port,
        cfg.interval_secs
    );

    let mut opts = MqttOptions::new("oms-camera-sim", cfg.broker.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(15));
    let (client, mut eventloop) = AsyncClient::new(opts, 64);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!("MQTT error: {:?}", e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });

    let mut counters: Vec<SimulatedCounter> = cfg
        .buses
        .iter()
        .enumerate()
        .map(|(i, bus)| SimulatedCounter::new(i, bus, cfg.capacity))
        .collect();
    let mut rng = StdRng::from_entropy();
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match publish_round(&client, &mut counters, &mut rng).await {
                    Ok(sent) => info!("published {} messages", sent),
                    Err(e) => error!("publish round failed: {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping simulator");
                break;
            }
        }
    }
    client.disconnect().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_from_env_values() {
        let env: HashMap<&str, &str> = [
            ("OMS_SIM_BROKER", "broker.local"),
            ("OMS_SIM_PORT", "1884"),
            ("OMS_SIM_BUSES", " TJ010, ,TJ011 "),
            ("OMS_SIM_INTERVAL_SECS", "0"),
        ]
        .into_iter()
        .collect();
        let cfg = SimConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.broker, "broker.local");
        assert_eq!(cfg.port, 1884);
        assert_eq!(cfg.buses, vec!["TJ010", "TJ011"]);
        assert_eq!(cfg.interval_secs, 1);
    }

    #[test]
    fn test_config_defaults() {
        let cfg = SimConfig::from_lookup(|_| None);
        assert_eq!(cfg, SimConfig::default());
    }

    #[test]
    fn test_random_walk_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut counter = SimulatedCounter::new(0, "TJ001", 10);
        for _ in 0..500 {
            let n = counter.step(&mut rng);
            assert!(n <= 10);
        }
    }

    #[tokio::test]
    async fn test_round_publishes_reading_and_heartbeat() {
        let sink = MockMqttClient::new();
        let mut counters = vec![
            SimulatedCounter::new(0, "TJ001", 40),
            SimulatedCounter::new(1, "TJ002", 40),
        ];
        let mut rng = StdRng::seed_from_u64(1);

        let sent = publish_round(&sink, &mut counters, &mut rng).await.unwrap();
        assert_eq!(sent, 4);
        assert_eq!(sink.find_messages_by_topic(topics::OCCUPANCY).len(), 2);

        let last: serde_json::Value = sink.get_last_json_message(topics::OCCUPANCY).unwrap().unwrap();
        assert_eq!(last["bus_id"], "TJ002");
        assert_eq!(last["device_id"], "CAM-TJ002");
        assert_eq!(last["route_id"], "2");
        assert_eq!(last["occupancy"], counters[1].occupancy);

        let hb: serde_json::Value = sink
            .get_last_json_message(&topics::device_heartbeat("CAM-TJ001"))
            .unwrap()
            .unwrap();
        assert_eq!(hb["bus_id"], "TJ001");
    }
}
