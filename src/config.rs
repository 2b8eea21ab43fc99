//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! 1. a YAML/TOML file: `--config <path>`, else `ble-sensor-mqtt.*` in the
//!    working directory when present
//! 2. `BLE_SENSOR__<SECTION>__<KEY>` environment variables
//! 3. `BLE_DEVICE_<anything>=address,type,name` environment variables, and
//!    `BLE_MQTT_URL` / `BLE_MQTT_USER` / `BLE_MQTT_PASS` for the broker
//! 4. command-line flags
//!
//! Everything is validated into [`Settings`] before scanning starts.

use crate::app::Options;
use crate::device::{DeviceEntry, DeviceError, DeviceSpec, DeviceTable, parse_env_device};
use crate::pipeline::{FlushMode, parse_duration};
use crate::scanner::ScanOptions;
use crate::sink::SinkError;
use crate::sink::mqtt::{MqttConfig, parse_broker_url};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TOPIC_PREFIX: &str = "ble-sensor";

const CONFIG_FILE_NAME: &str = "ble-sensor-mqtt";
const ENV_PREFIX: &str = "BLE_SENSOR";
const ENV_SEPARATOR: &str = "__";
const DEVICE_ENV_PREFIX: &str = "BLE_DEVICE_";
const MQTT_URL_ENV: &str = "BLE_MQTT_URL";
const MQTT_USER_ENV: &str = "BLE_MQTT_USER";
const MQTT_PASS_ENV: &str = "BLE_MQTT_PASS";

/// Fatal configuration problems. The process exits before scanning.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("no devices configured")]
    NoDevices,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("invalid flush interval '{value}': {reason}")]
    InvalidFlushInterval { value: String, reason: String },
    #[error(transparent)]
    InvalidUrl(#[from] SinkError),
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub devices: DeviceTable,
    /// Broker connection; `None` writes payloads to stdout instead.
    pub mqtt: Option<MqttConfig>,
    pub topic_prefix: String,
    /// Publish Home Assistant discovery documents on connect.
    pub discovery: bool,
    pub flush_mode: FlushMode,
    pub scan: ScanOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    devices: BTreeMap<String, DeviceEntry>,
    mqtt: MqttSection,
    flush_interval: Option<IntervalValue>,
    scan: ScanOptions,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MqttSection {
    url: Option<String>,
    user: Option<String>,
    pass: Option<String>,
    client_id: Option<String>,
    topic_prefix: String,
    discovery: bool,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            url: None,
            user: None,
            pass: None,
            client_id: None,
            topic_prefix: DEFAULT_TOPIC_PREFIX.into(),
            discovery: true,
        }
    }
}

/// Plain seconds or a suffixed duration string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntervalValue {
    Seconds(u64),
    Text(String),
}

impl IntervalValue {
    fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            IntervalValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            IntervalValue::Text(text) => {
                parse_duration(text).map_err(|reason| ConfigError::InvalidFlushInterval {
                    value: text.clone(),
                    reason,
                })
            }
        }
    }
}

impl Settings {
    /// Load from the process environment and `options`.
    pub fn load(options: &Options) -> Result<Self, ConfigError> {
        Self::load_from(options, std::env::vars())
    }

    /// Load with an explicit set of environment variables.
    pub fn load_from<I>(options: &Options, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let file: FileConfig = build_config(options, &vars)?.try_deserialize()?;
        Self::resolve(file, options, &vars)
    }

    fn resolve(
        file: FileConfig,
        options: &Options,
        vars: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let env_devices = device_vars(vars)?;
        let entries = file
            .devices
            .iter()
            .map(|(address, entry)| (address.as_str(), entry))
            .chain(
                env_devices
                    .iter()
                    .chain(&options.devices)
                    .map(|spec| (spec.address.as_str(), &spec.entry)),
            );
        let devices = DeviceTable::from_entries(entries)?;
        if devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let interval = match options.flush_interval {
            Some(interval) => interval,
            None => match &file.flush_interval {
                Some(value) => value.to_duration()?,
                None => Duration::ZERO,
            },
        };

        let section = file.mqtt;
        let env = |name: &str| non_empty(vars.get(name).cloned());
        let url = non_empty(options.mqtt_url.clone())
            .or_else(|| env(MQTT_URL_ENV))
            .or(non_empty(section.url));
        let mqtt = match url {
            Some(url) => {
                parse_broker_url(&url)?;
                Some(MqttConfig {
                    url,
                    user: non_empty(options.mqtt_user.clone())
                        .or_else(|| env(MQTT_USER_ENV))
                        .or(non_empty(section.user)),
                    pass: options
                        .mqtt_pass
                        .clone()
                        .or_else(|| env(MQTT_PASS_ENV))
                        .or(section.pass),
                    client_id: non_empty(section.client_id),
                })
            }
            None => None,
        };

        let mut scan = file.scan;
        if let Some(backend) = options.backend {
            scan.backend = backend;
        }
        scan.active |= options.active_scan;

        Ok(Self {
            devices,
            mqtt,
            topic_prefix: options
                .topic_prefix
                .clone()
                .unwrap_or(section.topic_prefix),
            discovery: section.discovery && !options.no_discovery,
            flush_mode: FlushMode::from_interval(interval),
            scan,
        })
    }
}

fn build_config(
    options: &Options,
    vars: &HashMap<String, String>,
) -> Result<::config::Config, ConfigError> {
    use ::config::{Config, Environment, File};

    let file = match &options.config {
        Some(path) => File::from(path.as_path()),
        None => File::with_name(CONFIG_FILE_NAME).required(false),
    };
    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .source(Some(vars.clone())),
    );
    Ok(builder.build()?)
}

/// `BLE_DEVICE_*` entries in variable-name order.
fn device_vars(vars: &HashMap<String, String>) -> Result<Vec<DeviceSpec>, DeviceError> {
    let mut names: Vec<_> = vars
        .keys()
        .filter(|name| name.starts_with(DEVICE_ENV_PREFIX))
        .collect();
    names.sort();
    names
        .into_iter()
        .map(|name| parse_env_device(&vars[name]))
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
