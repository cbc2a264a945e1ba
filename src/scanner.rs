//! Bounded scan session: waits for the sensor's advertisement, decodes it, publishes the
//! reading once and stops the radio, or gives up when the budget runs out.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::decoder::{DecodeError, decode_voltage};
use crate::filter::DeviceFilter;
use crate::gate::CompletionGate;
use crate::messages::{BroadcastEvent, DecodedReading, SessionEvent};
use crate::mqtt::{Broker, PublishError, PublishOutcome, TelemetryPublisher};
use crate::radio::{Radio, ScanError};

const SESSION_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub budget: Duration,
    pub progress_interval: Duration,
}

impl SessionConfig {
    /// Progress ticks need a non-zero period.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.progress_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "progress interval must be non-zero",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Completed,
    TimedOut,
    Stopped,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    Completed {
        reading: DecodedReading,
        publish: PublishOutcome,
    },
    TimedOut {
        elapsed: Duration,
    },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Failed to publish {:.2} V from {}: {source}", .reading.voltage, .reading.address)]
    Publish {
        reading: DecodedReading,
        #[source]
        source: PublishError,
    },
}

/// Elapsed/remaining view of the session budget.
#[derive(Clone, Copy, Debug)]
pub struct Countdown {
    started: Instant,
    budget: Duration,
}

impl Countdown {
    pub fn start(budget: Duration) -> Self {
        Countdown {
            started: Instant::now(),
            budget,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }
}

/// Filter, decode and claim. Safe to share between whatever contexts deliver events.
#[derive(Clone, Debug)]
pub struct ReadingPipeline {
    filter: DeviceFilter,
    gate: Arc<CompletionGate>,
}

impl ReadingPipeline {
    pub fn new(filter: DeviceFilter) -> Self {
        ReadingPipeline {
            filter,
            gate: Arc::new(CompletionGate::new()),
        }
    }

    pub fn gate(&self) -> &CompletionGate {
        &self.gate
    }

    /// `Ok(Some(_))` is returned at most once per pipeline, to whoever wins the gate.
    pub fn accept(&self, event: &BroadcastEvent) -> Result<Option<DecodedReading>, DecodeError> {
        if !self.gate.is_pending() || !self.filter.matches(event) {
            return Ok(None);
        }

        let voltage = decode_voltage(event.name.as_deref())?;

        if !self.gate.try_signal() {
            return Ok(None);
        }

        Ok(Some(DecodedReading {
            name: event.name.clone().unwrap_or_default(),
            address: event.address,
            voltage,
            signal: event.rssi,
            timestamp: SystemTime::now(),
        }))
    }
}

pub struct ScanSession<R, B> {
    config: SessionConfig,
    pipeline: ReadingPipeline,
    radio: R,
    publisher: TelemetryPublisher<B>,
    state: ScanState,
    events: broadcast::Sender<SessionEvent>,
}

impl<R: Radio, B: Broker> ScanSession<R, B> {
    pub fn new(
        config: SessionConfig,
        filter: DeviceFilter,
        radio: R,
        publisher: TelemetryPublisher<B>,
    ) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        ScanSession {
            config,
            pipeline: ReadingPipeline::new(filter),
            radio,
            publisher,
            state: ScanState::Idle,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn pipeline(&self) -> &ReadingPipeline {
        &self.pipeline
    }

    /// Runs the session to its end. The radio is stopped whatever the outcome, once it started.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        if self.state != ScanState::Idle {
            return Err(SessionError::AlreadyStarted);
        }
        self.config.validate()?;

        let mut rx = self.radio.start().await?;
        self.transition(ScanState::Scanning);
        info!("Scanning for up to {:?}", self.config.budget);

        let result = self.drive(&mut rx).await;

        rx.close();
        if let Err(err) = self.radio.stop().await {
            warn!("Error stopping radio: {}", err);
        }
        self.transition(ScanState::Stopped);

        result
    }

    async fn drive(
        &mut self,
        rx: &mut mpsc::Receiver<BroadcastEvent>,
    ) -> Result<SessionOutcome, SessionError> {
        let countdown = Countdown::start(self.config.budget);
        self.emit(SessionEvent::Started {
            budget: self.config.budget,
        });

        let deadline = tokio::time::sleep_until(countdown.deadline());
        tokio::pin!(deadline);

        let interval = self.config.progress_interval;
        let mut progress = tokio::time::interval_at(Instant::now() + interval, interval);
        progress.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut radio_open = true;

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    // Any event still in flight now loses the race for the gate.
                    if !self.pipeline.gate().try_expire() {
                        debug!("Gate already closed at deadline");
                    }
                    let elapsed = countdown.elapsed();
                    info!("Timeout after {:?} without finding device", elapsed);
                    self.transition(ScanState::TimedOut);
                    self.emit(SessionEvent::TimedOut { elapsed });
                    return Ok(SessionOutcome::TimedOut { elapsed });
                }
                _ = progress.tick() => {
                    self.emit(SessionEvent::Progress {
                        elapsed: countdown.elapsed(),
                        remaining: countdown.remaining(),
                    });
                }
                event = rx.recv(), if radio_open => {
                    let Some(event) = event else {
                        debug!("Radio event stream closed");
                        radio_open = false;
                        continue;
                    };
                    if let Some(reading) = self.inspect(&event) {
                        return self.complete(reading).await;
                    }
                }
            }
        }
    }

    fn inspect(&self, event: &BroadcastEvent) -> Option<DecodedReading> {
        match self.pipeline.accept(event) {
            Ok(reading) => reading,
            Err(error) => {
                debug!("Dropping event from {}: {}", event.address, error);
                self.emit(SessionEvent::DecodeFailed {
                    address: event.address,
                    error,
                });
                None
            }
        }
    }

    async fn complete(&mut self, reading: DecodedReading) -> Result<SessionOutcome, SessionError> {
        info!(
            "Found {} ({}): {:.2} V, {} dBm",
            reading.name, reading.address, reading.voltage, reading.signal
        );
        self.emit(SessionEvent::Matched(reading.clone()));

        let published = self.publisher.publish(&reading).await;
        self.transition(ScanState::Completed);

        match published {
            Ok(outcome) => {
                info!("MQTT publish result -> {}", outcome.result_code);
                self.emit(SessionEvent::Published(outcome));
                Ok(SessionOutcome::Completed {
                    reading,
                    publish: outcome,
                })
            }
            Err(source) => Err(SessionError::Publish { reading, source }),
        }
    }

    fn transition(&mut self, to: ScanState) {
        debug!("Scan state {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; presentation is optional.
        let _ = self.events.send(event);
    }
}
