/*!
# OMS DevKit - Test doubles and payload builders

Shared by the kernel tests and the camera simulator:
- an in-memory MQTT client that records publishes and replays incoming messages
- builders for device payloads and realtime client frames
- the device topic layout
*/

pub mod builders;
pub mod mqtt_stub;
pub mod topics;

pub use builders::OmsMessageBuilder;
pub use mqtt_stub::{MockMessage, MockMqttClient};

/// Routes `log` output to stderr for tests. Safe to call more than once.
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}
