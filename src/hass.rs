//! Home Assistant MQTT discovery documents.
//!
//! One device-level discovery message per configured sensor lets Home
//! Assistant create the entities without manual YAML. Each component reads
//! its value from the JSON published on the device's state topic.

use crate::device::{DeviceProfile, DeviceTable};
use crate::mac_address::MacAddress;
use crate::pipeline::state_topic;
use crate::sink::mqtt::Announcement;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DISCOVERY_PREFIX: &str = "homeassistant/device/";

const ORIGIN_NAME: &str = "ble-sensor-mqtt";
const SUPPORT_URL: &str = "https://gitlab.com/mek_x/ble-sensor-mqtt";
const MANUFACTURER: &str = "Mek";
const HW_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
struct DiscoveryDevice<'a> {
    #[serde(rename = "ids")]
    identifiers: String,
    name: &'a str,
    #[serde(rename = "mf")]
    manufacturer: &'static str,
    #[serde(rename = "mdl")]
    model: &'static str,
    #[serde(rename = "sw")]
    sw_version: &'static str,
    #[serde(rename = "hw")]
    hw_version: &'static str,
    #[serde(rename = "sn")]
    serial_number: String,
}

#[derive(Debug, Serialize)]
struct DiscoveryOrigin {
    name: &'static str,
    #[serde(rename = "sw")]
    sw_version: &'static str,
    #[serde(rename = "url")]
    support_url: &'static str,
}

#[derive(Debug, Serialize)]
struct DiscoveryComponent {
    unique_id: String,
    #[serde(rename = "p")]
    platform: &'static str,
    device_class: &'static str,
    unit_of_measurement: &'static str,
    value_template: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_category: Option<&'static str>,
    #[serde(skip_serializing_if = "is_zero")]
    suggested_display_precision: u8,
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

#[derive(Debug, Serialize)]
struct DiscoveryPayload<'a> {
    #[serde(rename = "dev")]
    device: DiscoveryDevice<'a>,
    #[serde(rename = "o")]
    origin: DiscoveryOrigin,
    #[serde(rename = "cmps")]
    components: BTreeMap<&'static str, DiscoveryComponent>,
    state_topic: &'a str,
    qos: u8,
}

/// Sensor component description: key, device class, unit, template, category, precision.
type ComponentDef = (
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    Option<&'static str>,
    u8,
);

const COMMON_COMPONENTS: [ComponentDef; 4] = [
    ("temperature", "temperature", "°C", "{{ value_json.T }}", None, 2),
    ("humidity", "humidity", "%", "{{ value_json.H }}", None, 0),
    (
        "battery",
        "battery",
        "%",
        "{{ value_json.battLvl }}",
        Some("diagnostic"),
        0,
    ),
    (
        "rssi",
        "signal_strength",
        "dBm",
        "{{ value_json.RSSI }}",
        Some("diagnostic"),
        0,
    ),
];

const PRESSURE_COMPONENT: ComponentDef =
    ("pressure", "pressure", "hPa", "{{ value_json.P }}", None, 1);

/// Topic the discovery document for `name` is published on.
pub fn discovery_topic(name: &str) -> String {
    format!("{DISCOVERY_PREFIX}{name}/config")
}

/// Build the discovery document for one device.
pub fn discovery_message(
    address: &MacAddress,
    profile: &DeviceProfile,
    state_topic: &str,
) -> serde_json::Result<String> {
    let name = profile.name.as_str();
    let mut components: BTreeMap<_, _> = COMMON_COMPONENTS
        .iter()
        .map(|def| component(name, def))
        .collect();
    if profile.kind.reports_pressure() {
        let (key, value) = component(name, &PRESSURE_COMPONENT);
        components.insert(key, value);
    }

    let payload = DiscoveryPayload {
        device: DiscoveryDevice {
            identifiers: address.to_string(),
            name,
            manufacturer: MANUFACTURER,
            model: profile.kind.tag(),
            sw_version: env!("CARGO_PKG_VERSION"),
            hw_version: HW_VERSION,
            serial_number: address.to_string(),
        },
        origin: DiscoveryOrigin {
            name: ORIGIN_NAME,
            sw_version: env!("CARGO_PKG_VERSION"),
            support_url: SUPPORT_URL,
        },
        components,
        state_topic,
        qos: 0,
    };

    serde_json::to_string(&payload)
}

/// Discovery announcements for every configured device, in address order.
pub fn announcements(
    devices: &DeviceTable,
    topic_prefix: &str,
) -> serde_json::Result<Vec<Announcement>> {
    devices
        .iter()
        .map(|(address, profile)| {
            let state = state_topic(topic_prefix, &profile.name);
            Ok(Announcement {
                topic: discovery_topic(&profile.name),
                payload: discovery_message(address, profile, &state)?,
            })
        })
        .collect()
}

fn component(name: &str, def: &ComponentDef) -> (&'static str, DiscoveryComponent) {
    let (key, device_class, unit, template, category, precision) = *def;
    (
        key,
        DiscoveryComponent {
            unique_id: format!("{name}_{key}"),
            platform: "sensor",
            device_class,
            unit_of_measurement: unit,
            value_template: template,
            entity_category: category,
            suggested_display_precision: precision,
        },
    )
}
