//! Configured sensors: address to (vendor, display name).
//!
//! The table is built once from configuration and never mutated afterwards.
//! Entries arrive as text (YAML map, `--device` flags, `BLE_DEVICE_*`
//! variables) and are validated here, so an unknown type tag or a malformed
//! address stops the process before scanning starts.

use crate::decoder::{DecodeError, DeviceKind};
use crate::mac_address::{MacAddress, ParseMacError};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

/// Vendor and display name for one configured device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    /// Display name, also the last segment of the device's topic.
    pub name: String,
}

/// Unvalidated device entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

/// Errors from validating a single device entry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("device '{address}': {source}")]
    InvalidAddress {
        address: String,
        source: ParseMacError,
    },
    #[error("device '{address}': {source}")]
    UnsupportedType {
        address: String,
        source: DecodeError,
    },
    #[error("device '{address}': name must not be empty")]
    EmptyName { address: String },
    #[error("device '{address}': name '{name}' is already used by {other}")]
    DuplicateName {
        name: String,
        address: MacAddress,
        other: MacAddress,
    },
    #[error("invalid device '{0}': expected format ADDRESS=TYPE,NAME")]
    InvalidSpec(String),
}

/// A device as given on the command line or in a `BLE_DEVICE_*` variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub address: String,
    pub entry: DeviceEntry,
}

/// Parse `ADDRESS=TYPE,NAME`, e.g. `A4:C1:38:00:00:01=ATC,Kitchen`.
///
/// The name may itself contain commas.
pub fn parse_device(src: &str) -> Result<DeviceSpec, DeviceError> {
    let invalid = || DeviceError::InvalidSpec(src.to_string());
    let (address, rest) = src.split_once('=').ok_or_else(invalid)?;
    let (kind, name) = rest.split_once(',').ok_or_else(invalid)?;

    Ok(DeviceSpec {
        address: address.trim().to_string(),
        entry: DeviceEntry {
            kind: kind.trim().to_string(),
            name: name.trim().to_string(),
        },
    })
}

/// Parse the container-style `address,type,name` value of a `BLE_DEVICE_*` variable.
pub fn parse_env_device(src: &str) -> Result<DeviceSpec, DeviceError> {
    let mut parts = src.splitn(3, ',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(address), Some(kind), Some(name)) => Ok(DeviceSpec {
            address: address.trim().to_string(),
            entry: DeviceEntry {
                kind: kind.trim().to_string(),
                name: name.trim().to_string(),
            },
        }),
        _ => Err(DeviceError::InvalidSpec(src.to_string())),
    }
}

/// Validate one entry into an address and profile.
pub fn validate(
    address: &str,
    entry: &DeviceEntry,
) -> Result<(MacAddress, DeviceProfile), DeviceError> {
    let mac = address
        .parse::<MacAddress>()
        .map_err(|source| DeviceError::InvalidAddress {
            address: address.to_string(),
            source,
        })?;
    let kind = entry
        .kind
        .parse::<DeviceKind>()
        .map_err(|source| DeviceError::UnsupportedType {
            address: address.to_string(),
            source,
        })?;
    if entry.name.trim().is_empty() {
        return Err(DeviceError::EmptyName {
            address: address.to_string(),
        });
    }

    Ok((
        mac,
        DeviceProfile {
            kind,
            name: entry.name.clone(),
        },
    ))
}

/// Immutable lookup from address to profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTable {
    devices: HashMap<MacAddress, DeviceProfile>,
}

impl DeviceTable {
    /// Validate entries in order. A later entry for the same address replaces an earlier one.
    ///
    /// Names must be unique across the final table since each one is a topic.
    pub fn from_entries<'a, I>(entries: I) -> Result<Self, DeviceError>
    where
        I: IntoIterator<Item = (&'a str, &'a DeviceEntry)>,
    {
        let mut devices = HashMap::new();
        for (address, entry) in entries {
            let (mac, profile) = validate(address, entry)?;
            devices.insert(mac, profile);
        }

        let table = Self { devices };
        table.check_unique_names()?;
        Ok(table)
    }

    fn check_unique_names(&self) -> Result<(), DeviceError> {
        let mut names: HashMap<&str, MacAddress> = HashMap::new();
        for (address, profile) in self.iter() {
            if let Some(other) = names.insert(profile.name.as_str(), *address) {
                return Err(DeviceError::DuplicateName {
                    name: profile.name.clone(),
                    address: *address,
                    other,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, address: &MacAddress) -> Option<&DeviceProfile> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Iterate in address order, for stable startup logs and discovery publishing.
    pub fn iter(&self) -> impl Iterator<Item = (&MacAddress, &DeviceProfile)> {
        let mut sorted: Vec<_> = self.devices.iter().collect();
        sorted.sort_by_key(|(address, _)| **address);
        sorted.into_iter()
    }
}

impl FromIterator<(MacAddress, DeviceProfile)> for DeviceTable {
    fn from_iter<T: IntoIterator<Item = (MacAddress, DeviceProfile)>>(iter: T) -> Self {
        Self {
            devices: iter.into_iter().collect(),
        }
    }
}
