use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use mac_address::MacAddress;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::messages::{BroadcastEvent, DecodedReading};
use crate::mqtt::{Broker, PublishError, PublishOutcome};
use crate::radio::{Radio, ScanError};

/// Lancol's manufacturer id as seen in its advertisements.
pub const LANCOL_ID: u16 = 58428;

/// The battery monitor the tests look for.
pub fn sensor_mac() -> MacAddress {
    MacAddress::new([0x3C, 0xE4, 0xB0, 0xA4, 0xDF, 0x89])
}

/// Some other advertiser in range.
pub fn other_mac() -> MacAddress {
    MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
}

pub fn lancol_event(address: MacAddress, name: &str, rssi: i16) -> BroadcastEvent {
    BroadcastEvent::new(address, Some(name), rssi)
        .with_manufacturer_data(LANCOL_ID, vec![0x00, 0x01])
}

pub fn reading(voltage: f64, signal: i16) -> DecodedReading {
    DecodedReading {
        name: format!("Lancol {voltage}V"),
        address: sensor_mac(),
        voltage,
        signal,
        timestamp: SystemTime::UNIX_EPOCH,
    }
}

/// Replays a script of `(delay, event)` pairs once started, counting start/stop calls.
#[derive(Clone, Default)]
pub struct FakeRadio {
    script: Vec<(Duration, BroadcastEvent)>,
    fail_start: bool,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    replay: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FakeRadio {
    pub fn new(script: Vec<(Duration, BroadcastEvent)>) -> Self {
        FakeRadio {
            script,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        FakeRadio {
            fail_start: true,
            ..Default::default()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Radio for FakeRadio {
    fn start(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<BroadcastEvent>, ScanError>> {
        Box::pin(async move {
            if self.fail_start {
                return Err(ScanError::NoAdapter(0));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);

            let (tx, rx) = mpsc::channel(8);
            let script = self.script.clone();
            let replay = tokio::spawn(async move {
                for (delay, event) in script {
                    tokio::time::sleep(delay).await;
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                // Keep the channel open like a real radio would.
                std::future::pending::<()>().await;
            });
            *self.replay.lock().unwrap() = Some(replay);
            Ok(rx)
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(replay) = self.replay.lock().unwrap().take() {
                replay.abort();
            }
            Ok(())
        })
    }
}

/// Records every publish; answers with an acknowledgement or a refusal code.
#[derive(Clone, Default)]
pub struct FakeBroker {
    reject_with: Option<u8>,
    published: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeBroker {
    pub fn acknowledging() -> Self {
        FakeBroker::default()
    }

    pub fn rejecting(code: u8) -> Self {
        FakeBroker {
            reject_with: Some(code),
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

impl Broker for FakeBroker {
    fn publish<'a>(
        &'a mut self,
        topic: &'a str,
        payload: String,
    ) -> BoxFuture<'a, Result<PublishOutcome, PublishError>> {
        Box::pin(async move {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            match self.reject_with {
                Some(code) => Err(PublishError::Rejected(code)),
                None => Ok(PublishOutcome {
                    acknowledged: true,
                    result_code: 0,
                }),
            }
        })
    }
}
