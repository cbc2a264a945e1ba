//! Reads the voltage a Lancol battery monitor advertises in its Bluetooth name and
//! forwards it, with the signal strength, to an MQTT broker.
//!
//! [`scanner::ScanSession`] drives one bounded scan; everything it talks to
//! (radio, broker) sits behind a trait so sessions can run without hardware.

pub mod config;
pub mod decoder;
pub mod filter;
pub mod gate;
pub mod messages;
pub mod mqtt;
pub mod radio;
pub mod scanner;

#[cfg(test)]
mod test_utils;

pub use config::{AppConfig, ConfigError};
pub use decoder::{DecodeError, decode_voltage};
pub use filter::{DeviceFilter, MatchPolicy};
pub use gate::CompletionGate;
pub use messages::{BroadcastEvent, DecodedReading, SessionEvent};
pub use mqtt::{Broker, MqttBroker, PublishError, PublishOutcome, TelemetryPublisher};
pub use radio::{BtleRadio, Radio, ScanError};
pub use scanner::{ScanSession, ScanState, SessionConfig, SessionError, SessionOutcome};
