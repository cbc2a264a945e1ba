use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use serde_derive::Serialize;
use thiserror::Error;

use crate::config;
use crate::messages::DecodedReading;

pub const DEFAULT_TOPIC: &str = "sensor/boat/battery/1";
pub const DEFAULT_PUBLISHER_ID: &str = "lancol-monitor";
pub const DEFAULT_PORT: u16 = 1883;

/// Result of a delivery the broker answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    pub acknowledged: bool,
    /// CONNACK return code, 0 on success.
    pub result_code: u8,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Broker connection failed: {0}")]
    Connection(#[source] ConnectionError),
    #[error("Broker refused connection, return code {0}")]
    Rejected(u8),
    #[error("Broker did not acknowledge within {0:?}")]
    Timeout(Duration),
    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Message broker boundary: one synchronous publish per call.
pub trait Broker: Send {
    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: String,
    ) -> BoxFuture<'a, Result<PublishOutcome, PublishError>>;
}

/// Values are rendered as strings, which is what existing consumers of the topic parse.
#[derive(Debug, Serialize)]
struct TelemetryMessage {
    voltage: String,
    signal: String,
}

impl From<&DecodedReading> for TelemetryMessage {
    fn from(reading: &DecodedReading) -> Self {
        TelemetryMessage {
            voltage: render_float(reading.voltage),
            signal: reading.signal.to_string(),
        }
    }
}

/// Whole numbers keep a trailing `.0`, so 13 V is sent as `"13.0"`.
fn render_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

pub fn telemetry_payload(reading: &DecodedReading) -> Result<String, serde_json::Error> {
    serde_json::to_string(&TelemetryMessage::from(reading))
}

pub struct TelemetryPublisher<B> {
    broker: B,
    topic: String,
}

impl<B: Broker> TelemetryPublisher<B> {
    pub fn new(broker: B, topic: impl Into<String>) -> Self {
        TelemetryPublisher {
            broker,
            topic: topic.into(),
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub async fn publish(
        &mut self,
        reading: &DecodedReading,
    ) -> Result<PublishOutcome, PublishError> {
        let payload = telemetry_payload(reading)?;
        info!("Writing {} to MQTT topic {}", payload, self.topic);
        self.broker.publish(&self.topic, payload).await
    }
}

/// Connects, publishes with QoS 1 and disconnects on every call.
#[derive(Debug, Clone)]
pub struct MqttBroker {
    options: MqttOptions,
    timeout: Duration,
}

impl MqttBroker {
    pub fn new(config: &config::MqttConfig) -> Self {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or_else(|| DEFAULT_PUBLISHER_ID.to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(DEFAULT_PORT),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(60)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        MqttBroker {
            options: mqttoptions,
            timeout: Duration::from_secs(config.timeout_seconds.unwrap_or(10)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn deliver(
        client: &AsyncClient,
        eventloop: &mut EventLoop,
        topic: &str,
        payload: String,
    ) -> Result<PublishOutcome, PublishError> {
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        await_puback(eventloop).await
    }
}

impl Broker for MqttBroker {
    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: String,
    ) -> BoxFuture<'a, Result<PublishOutcome, PublishError>> {
        Box::pin(async move {
            let (host, port) = self.options.broker_address();
            info!("Connecting to {}:{}", host, port);

            let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 10);
            let delivery = Self::deliver(&client, &mut eventloop, topic, payload);
            let outcome = tokio::time::timeout(self.timeout, delivery)
                .await
                .map_err(|_| PublishError::Timeout(self.timeout))??;

            // Delivered. Disconnect trouble from here on is only logged.
            flush_disconnect(&client, &mut eventloop, self.timeout).await;
            Ok(outcome)
        })
    }
}

async fn await_puback(
    eventloop: &mut EventLoop,
) -> Result<PublishOutcome, PublishError> {
    let mut result_code = 0;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("Connection acknowledged");
                result_code = return_code(ack.code);
                if result_code != 0 {
                    return Err(PublishError::Rejected(result_code));
                }
            }
            Ok(Event::Incoming(Packet::PubAck(_))) => {
                debug!("Publish acknowledged");
                return Ok(PublishOutcome {
                    acknowledged: true,
                    result_code,
                });
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(PublishError::Rejected(return_code(code)));
            }
            Err(err) => return Err(PublishError::Connection(err)),
        }
    }
}

async fn flush_disconnect(client: &AsyncClient, eventloop: &mut EventLoop, timeout: Duration) {
    debug!("Disconnecting MQTT client");
    if let Err(err) = client.disconnect().await {
        warn!("Error disconnecting from MQTT broker: {:?}", err);
        return;
    }

    let flushed = tokio::time::timeout(timeout, async {
        while let Ok(event) = eventloop.poll().await {
            if let Event::Outgoing(Outgoing::Disconnect) = event {
                break;
            }
        }
    })
    .await;
    if flushed.is_err() {
        warn!("MQTT disconnect not flushed within {:?}", timeout);
    }
}

/// `ConnectReturnCode` is `#[repr(u8)]` with the MQTT 3.1.1 CONNACK values.
fn return_code(code: ConnectReturnCode) -> u8 {
    code as u8
}

/// Stands in for the broker when nothing should leave the machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunBroker;

impl Broker for DryRunBroker {
    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: String,
    ) -> BoxFuture<'a, Result<PublishOutcome, PublishError>> {
        Box::pin(async move {
            info!("Dry run, not publishing {} to {}", payload, topic);
            Ok(PublishOutcome {
                acknowledged: false,
                result_code: 0,
            })
        })
    }
}
