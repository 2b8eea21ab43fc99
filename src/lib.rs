//! `ble-sensor-mqtt` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signals and
//! process exit codes. The scanner → dispatcher → pipeline → sink chain lives
//! in [`crate::app`] where it can be tested deterministically with an
//! injected scanner and sink.

pub mod advertisement;
pub mod app;
pub mod config;
pub mod decoder;
pub mod device;
pub mod dispatcher;
pub mod hass;
pub mod mac_address;
pub mod message;
pub mod pipeline;
pub mod scanner;
pub mod sink;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{RawAdvertisement, ServiceData};
pub use decoder::{DecodeError, DeviceKind, Reading, decode};
pub use device::{DeviceProfile, DeviceTable};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use mac_address::MacAddress;
pub use message::Message;
pub use pipeline::{AggregationBuffer, FlushMode, Pipeline, parse_duration};
pub use scanner::{Backend, ScanError};
pub use sink::Sink;
