use ble_sensor_mqtt::app::{self, Options, RealScanner, RunError};
use ble_sensor_mqtt::config::Settings;
use ble_sensor_mqtt::hass;
use ble_sensor_mqtt::sink::SinkError;
use ble_sensor_mqtt::sink::mqtt::MqttSink;
use ble_sensor_mqtt::sink::writer::WriterSink;
use clap::Parser;
use log::{error, info, warn};
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use time::UtcOffset;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // RUST_LOG takes precedence over --verbose
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("cannot listen for SIGTERM: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("cannot listen for Ctrl-C: {e}");
                terminate.recv().await;
            }
        }
        _ = terminate.recv() => {}
    }
}

async fn run(options: Options, offset: UtcOffset) -> Result<(), RunError> {
    let settings = Settings::load(&options)?;
    for (address, profile) in settings.devices.iter() {
        info!("device {address}: {} ({})", profile.name, profile.kind);
    }

    let Some(mqtt) = &settings.mqtt else {
        info!("no MQTT broker configured, writing messages to stdout");
        let sink = Arc::new(WriterSink::stdout());
        return app::run(&settings, &RealScanner, sink, offset, shutdown_signal()).await;
    };

    let announcements = if settings.discovery {
        hass::announcements(&settings.devices, &settings.topic_prefix).map_err(SinkError::from)?
    } else {
        Vec::new()
    };
    let sink = Arc::new(MqttSink::connect(mqtt, announcements)?);
    let result = app::run(
        &settings,
        &RealScanner,
        sink.clone(),
        offset,
        shutdown_signal(),
    )
    .await;

    match Arc::try_unwrap(sink) {
        Ok(sink) => sink.disconnect().await,
        Err(_) => warn!("MQTT client still in use, skipping disconnect"),
    }
    result
}

fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    // Must be read while the process is still single-threaded
    let offset = UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!("cannot determine local UTC offset ({e}), using UTC");
        UtcOffset::UTC
    });

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(why) => {
            error!("failed to start runtime: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    };

    match runtime.block_on(run(options, offset)) {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
