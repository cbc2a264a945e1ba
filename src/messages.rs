use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use mac_address::MacAddress;

use crate::decoder::DecodeError;
use crate::mqtt::PublishOutcome;

/// A single advertisement observed by the radio.
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastEvent {
    pub address: MacAddress,
    pub name: Option<String>,
    /// dBm
    pub rssi: i16,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl BroadcastEvent {
    pub fn new(address: MacAddress, name: Option<&str>, rssi: i16) -> Self {
        BroadcastEvent {
            address,
            name: name.map(str::to_string),
            rssi,
            manufacturer_data: HashMap::new(),
        }
    }

    pub fn with_manufacturer_data(mut self, id: u16, data: Vec<u8>) -> Self {
        self.manufacturer_data.insert(id, data);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedReading {
    pub name: String,
    pub address: MacAddress,
    /// Volts
    pub voltage: f64,
    /// dBm
    pub signal: i16,
    pub timestamp: SystemTime,
}

/// Announcements emitted by a running scan session for whoever renders progress.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Started {
        budget: Duration,
    },
    Progress {
        elapsed: Duration,
        remaining: Duration,
    },
    Matched(DecodedReading),
    DecodeFailed {
        address: MacAddress,
        error: DecodeError,
    },
    Published(PublishOutcome),
    TimedOut {
        elapsed: Duration,
    },
}
