//! Radio listener boundary and its btleplug implementation.

use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt as _;
use futures::future::BoxFuture;
use log::{debug, info};
use mac_address::MacAddress;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::messages::BroadcastEvent;

/// Advertisements buffered between the adapter and the scan controller.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("No Bluetooth adapter at index {0}")]
    NoAdapter(usize),
}

/// Something that can listen for advertisements and hand them over as a stream of events.
pub trait Radio: Send {
    fn start(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<BroadcastEvent>, ScanError>>;
    fn stop(&mut self) -> BoxFuture<'_, Result<(), ScanError>>;
}

pub async fn adapter(index: usize) -> Result<Adapter, ScanError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .nth(index)
        .ok_or(ScanError::NoAdapter(index))
}

pub struct BtleRadio {
    adapter: Adapter,
    forwarder: Option<JoinHandle<()>>,
}

impl BtleRadio {
    pub fn new(adapter: Adapter) -> Self {
        BtleRadio {
            adapter,
            forwarder: None,
        }
    }
}

impl Radio for BtleRadio {
    fn start(&mut self) -> BoxFuture<'_, Result<mpsc::Receiver<BroadcastEvent>, ScanError>> {
        Box::pin(async move {
            let events = self.adapter.events().await?;
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

            self.adapter.start_scan(ScanFilter::default()).await?;
            info!("Bluetooth scan started");

            let adapter = self.adapter.clone();
            self.forwarder = Some(tokio::spawn(forward_events(adapter, events, tx)));
            Ok(rx)
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), ScanError>> {
        Box::pin(async move {
            let Some(forwarder) = self.forwarder.take() else {
                return Ok(());
            };
            forwarder.abort();
            self.adapter.stop_scan().await?;
            info!("Bluetooth scan stopped");
            Ok(())
        })
    }
}

async fn forward_events(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    tx: mpsc::Sender<BroadcastEvent>,
) {
    while let Some(event) = events.next().await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
            _ => continue,
        };

        let broadcast = match broadcast_event(&adapter, &id).await {
            Ok(Some(broadcast)) => broadcast,
            Ok(None) => continue,
            Err(err) => {
                debug!("Failed to read properties of {:?}: {}", id, err);
                continue;
            }
        };

        // Never stall the adapter's event stream on a slow consumer.
        match tx.try_send(broadcast) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!("Event channel full, dropping event from {}", dropped.address);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event receiver closed");
                break;
            }
        }
    }
    debug!("No more Bluetooth events");
}

async fn broadcast_event(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<Option<BroadcastEvent>, btleplug::Error> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    let Some(rssi) = properties.rssi else {
        return Ok(None);
    };

    Ok(Some(BroadcastEvent {
        address: MacAddress::new(properties.address.into_inner()),
        name: properties.local_name,
        rssi,
        manufacturer_data: properties.manufacturer_data,
    }))
}
