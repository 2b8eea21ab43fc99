//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! Discovery runs with duplicate reporting enabled so that every
//! advertisement updates the device properties, which are then read back and
//! forwarded as a [`RawAdvertisement`].

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::advertisement::{RawAdvertisement, ServiceData};
use bluer::{
    Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session, UuidExt,
};
use futures::StreamExt;
use log::{debug, info};
use std::collections::HashMap;
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start LE discovery on the default adapter.
pub async fn start_scan() -> Result<mpsc::Receiver<RawAdvertisement>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;
    info!("scanning on adapter {} via BlueZ", adapter.name());

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        let _session = session;
        let mut events = Box::pin(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            match read_advertisement(&adapter, address).await {
                Ok(Some(advertisement)) => {
                    if tx.send(advertisement).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("failed to read properties of {address}: {e}"),
            }
        }
        debug!("BlueZ discovery stopped");
    });

    Ok(rx)
}

/// Read the advertised payloads of a device. `None` when it advertises neither.
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<RawAdvertisement>, ScanError> {
    let device = adapter.device(address)?;

    let manufacturer_data = device
        .manufacturer_data()
        .await?
        .map(manufacturer_payload)
        .unwrap_or_default();
    let service_data = device
        .service_data()
        .await?
        .map(service_payloads)
        .unwrap_or_default();
    if manufacturer_data.is_empty() && service_data.is_empty() {
        return Ok(None);
    }

    Ok(Some(RawAdvertisement {
        address: address.into(),
        rssi: device.rssi().await?.unwrap_or_default(),
        manufacturer_data,
        service_data,
    }))
}

/// BlueZ strips the company identifier into the map key; put it back in
/// front of the payload. The lowest identifier wins if there are several.
fn manufacturer_payload(data: HashMap<u16, Vec<u8>>) -> Vec<u8> {
    data.into_iter()
        .min_by_key(|(id, _)| *id)
        .map(|(id, payload)| {
            let mut out = Vec::with_capacity(payload.len() + 2);
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&payload);
            out
        })
        .unwrap_or_default()
}

/// Keep entries keyed by 16-bit UUIDs, ordered by UUID.
fn service_payloads(data: HashMap<bluer::Uuid, Vec<u8>>) -> Vec<ServiceData> {
    let mut entries: Vec<_> = data
        .into_iter()
        .filter_map(|(uuid, payload)| Some(ServiceData::new(uuid.as_u16()?, payload)))
        .collect();
    entries.sort_by_key(|entry| entry.uuid);
    entries
}
