//! Core application runner for `ble-sensor-mqtt`.
//!
//! This module is decoupled from process setup (logging, signals, exit
//! codes) so the scanner → dispatcher → pipeline → sink chain can be tested
//! deterministically with an injected scanner and sink.

use crate::advertisement::RawAdvertisement;
use crate::config::{ConfigError, Settings};
use crate::device::{DeviceSpec, parse_device};
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::pipeline::{Pipeline, parse_duration};
use crate::scanner::{Backend, ScanError, ScanOptions};
use crate::sink::{Sink, SinkError};
use clap::Parser;
use log::{info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::UtcOffset;
use tokio::sync::mpsc;
use tokio::task::JoinError;

/// Command-line options. Each one overrides the matching file or environment setting.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, about, version)]
pub struct Options {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Sensor to listen for, repeatable.
    /// Format: --device A4:C1:38:00:00:01=ATC,Kitchen
    #[arg(long = "device", value_parser = parse_device, value_name = "ADDR=TYPE,NAME")]
    pub devices: Vec<DeviceSpec>,

    /// MQTT broker URL, e.g. tcp://localhost:1883 or ssl://broker:8883.
    /// Without a broker, messages are printed to stdout.
    #[arg(long, value_name = "URL")]
    pub mqtt_url: Option<String>,

    /// MQTT username
    #[arg(long, value_name = "USER")]
    pub mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long, value_name = "PASS")]
    pub mqtt_pass: Option<String>,

    /// Topic prefix; messages go to <prefix>/<device name>
    #[arg(long, value_name = "PREFIX")]
    pub topic_prefix: Option<String>,

    /// Publish the latest message per device once per interval instead of
    /// every message. Accepts duration with suffix: 30s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds; 0 publishes immediately.
    #[arg(long, value_parser = parse_duration)]
    pub flush_interval: Option<Duration>,

    /// Bluetooth scanner backend to use
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Send scan requests (HCI backend only)
    #[arg(long)]
    pub active_scan: bool,

    /// Verbose output, log decode failures and every publish
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Do not publish Home Assistant discovery documents
    #[arg(long)]
    pub no_discovery: bool,
}

/// Errors returned by the application.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("pipeline task failed: {0}")]
    Pipeline(#[from] JoinError),
    #[error("scanner stopped unexpectedly")]
    ScannerStopped,
}

/// Future returned by [`Scanner::start_scan`].
pub type ScanFuture<'a> =
    Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RawAdvertisement>, ScanError>> + Send + 'a>>;

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(&self, options: ScanOptions) -> ScanFuture<'_>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(&self, options: ScanOptions) -> ScanFuture<'_> {
        Box::pin(crate::scanner::start_scan(options))
    }
}

/// Run until `shutdown` completes or the scanner stops.
///
/// Advertisements are dispatched as they arrive; the pipeline runs on its
/// own task and publishes to `sink`. On shutdown the pipeline queue is
/// closed and the pipeline task is awaited. Messages still buffered in
/// batched mode are not flushed.
pub async fn run<F>(
    settings: &Settings,
    scanner: &dyn Scanner,
    sink: Arc<dyn Sink>,
    offset: UtcOffset,
    shutdown: F,
) -> Result<(), RunError>
where
    F: Future<Output = ()>,
{
    let mut advertisements = scanner.start_scan(settings.scan).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(Arc::new(settings.devices.clone()), tx, offset);
    let pipeline = tokio::spawn(
        Pipeline::new(settings.flush_mode, settings.topic_prefix.as_str(), sink).run(rx),
    );

    tokio::pin!(shutdown);
    let result = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutting down");
                break Ok(());
            }
            received = advertisements.recv() => match received {
                Some(advertisement) => {
                    if dispatcher.dispatch(&advertisement) == DispatchOutcome::Closed {
                        warn!("pipeline stopped, no longer dispatching");
                        break Ok(());
                    }
                }
                None => break Err(RunError::ScannerStopped),
            },
        }
    };

    drop(dispatcher);
    pipeline.await?;
    result
}
