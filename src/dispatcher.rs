//! Turns raw advertisements from configured devices into messages.

use crate::advertisement::RawAdvertisement;
use crate::decoder::DecodeError;
use crate::device::DeviceTable;
use crate::message::Message;
use log::{debug, warn};
use std::sync::Arc;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::mpsc;

/// What happened to one advertisement.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The address is not configured.
    Ignored,
    /// The frame did not decode; the event is discarded.
    Discarded(DecodeError),
    /// A message was queued for the pipeline.
    Submitted,
    /// The pipeline has stopped and no longer accepts messages.
    Closed,
}

/// Producer side of the pipeline queue.
///
/// Never blocks: the queue is unbounded, and decoding is pure.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    devices: Arc<DeviceTable>,
    tx: mpsc::UnboundedSender<Message>,
    offset: UtcOffset,
}

impl Dispatcher {
    /// `offset` is applied to capture timestamps for the human-readable `time` field.
    pub fn new(
        devices: Arc<DeviceTable>,
        tx: mpsc::UnboundedSender<Message>,
        offset: UtcOffset,
    ) -> Self {
        Self {
            devices,
            tx,
            offset,
        }
    }

    /// Handle one advertisement captured now.
    pub fn dispatch(&self, advertisement: &RawAdvertisement) -> DispatchOutcome {
        if self.devices.get(&advertisement.address).is_none() {
            return DispatchOutcome::Ignored;
        }
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        self.dispatch_at(advertisement, now)
    }

    /// Handle one advertisement with an explicit capture time.
    pub fn dispatch_at(
        &self,
        advertisement: &RawAdvertisement,
        captured_at: OffsetDateTime,
    ) -> DispatchOutcome {
        let Some(profile) = self.devices.get(&advertisement.address) else {
            return DispatchOutcome::Ignored;
        };

        let reading = match profile
            .kind
            .decode(&advertisement.manufacturer_data, &advertisement.service_data)
        {
            Ok(reading) => reading,
            Err(e) => {
                match &e {
                    DecodeError::TruncatedFrame { .. } => {
                        warn!("{} ({}): {e}", profile.name, advertisement.address)
                    }
                    _ => debug!("{} ({}): {e}", profile.name, advertisement.address),
                }
                return DispatchOutcome::Discarded(e);
            }
        };

        let message = Message::new(
            reading,
            &profile.name,
            advertisement.address,
            advertisement.rssi,
            captured_at,
        );
        debug!(
            "{}: T={} H={} RSSI={}",
            profile.name, reading.temperature, reading.humidity, advertisement.rssi
        );

        match self.tx.send(message) {
            Ok(()) => DispatchOutcome::Submitted,
            Err(_) => DispatchOutcome::Closed,
        }
    }
}
