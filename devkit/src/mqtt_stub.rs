/*!
In-memory MQTT client for running the device channel without a broker.

Mirrors the `rumqttc::AsyncClient` calls the simulator makes, records every
publish for assertions and can push simulated incoming messages to a receiver.
*/

use anyhow::Result;
use rumqttc::QoS;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Clone, Default)]
pub struct MockMqttClient {
    published: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    incoming: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

// a panicking test must not poison the mock for the others
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that receives messages passed to `simulate_incoming`.
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.incoming) = Some(tx);
        rx
    }

    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };
        log::debug!("[mock-mqtt] publish {} ({} bytes)", message.topic, message.payload.len());
        lock(&self.published).push(message);
        Ok(())
    }

    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        log::debug!("[mock-mqtt] subscribe {}", topic);
        lock(&self.subscriptions).push(topic);
        Ok(())
    }

    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        if let Some(tx) = lock(&self.incoming).as_ref() {
            tx.send(message)
                .map_err(|e| anyhow::anyhow!("mock receiver dropped: {}", e))?;
        }
        Ok(())
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        lock(&self.published).clone()
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        lock(&self.published)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Last publish on `topic` decoded as JSON.
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        match self.find_messages_by_topic(topic).last() {
            Some(msg) => Ok(Some(serde_json::from_slice(&msg.payload)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) {
        lock(&self.published).clear();
        lock(&self.subscriptions).clear();
    }
}
