//! MQTT broker sink.
//!
//! Wraps a `rumqttc` client whose event loop runs on its own task. The event
//! loop reconnects after failures, and on every (re)connection republishes
//! the discovery announcements. Publishes are QoS 0 and retained; while the
//! client is disconnected they are dropped.

use super::{Sink, SinkError};
use log::{debug, info, warn};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

const CLIENT_ID_PREFIX: &str = "ble-sensor-mqtt-";
const CLIENT_ID_SUFFIX_LEN: usize = 5;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_REQUEST_CAPACITY: usize = 64;

/// Connection parameters for [`MqttSink::connect`].
#[derive(Debug, Clone, Default)]
pub struct MqttConfig {
    /// Broker URL, e.g. `ssl://broker.example.com:8883` or `tcp://localhost`
    pub url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// Fixed client id; a random one is generated when absent
    pub client_id: Option<String>,
}

/// A retained message published after every successful connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub topic: String,
    pub payload: String,
}

/// Host, port and transport taken from a broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `scheme://host[:port]`.
///
/// `tcp` and `mqtt` select plain TCP, `ssl`, `tls` and `mqtts` select TLS.
pub fn parse_broker_url(src: &str) -> Result<Broker, SinkError> {
    let invalid = |reason: String| SinkError::InvalidUrl {
        url: src.to_string(),
        reason,
    };

    let url = Url::parse(src).map_err(|e| invalid(e.to_string()))?;
    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host".into()))?;
    let port = url
        .port()
        .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

    Ok(Broker {
        host: host.to_string(),
        port,
        tls,
    })
}

/// `ble-sensor-mqtt-` followed by five random alphanumerics.
pub fn random_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{CLIENT_ID_PREFIX}{suffix}")
}

/// Username and password to send. A password without a user is dropped.
fn credentials(config: &MqttConfig) -> Option<(String, String)> {
    match (&config.user, &config.pass) {
        (Some(user), pass) => Some((user.clone(), pass.clone().unwrap_or_default())),
        (None, Some(_)) => {
            warn!("MQTT password given without a user, ignoring it");
            None
        }
        (None, None) => None,
    }
}

/// Publish sink backed by an MQTT broker connection.
pub struct MqttSink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

impl MqttSink {
    /// Start the client and its event loop. Must be called inside a tokio runtime.
    ///
    /// Returns as soon as the client is configured; the connection is
    /// established in the background.
    pub fn connect(
        config: &MqttConfig,
        announcements: Vec<Announcement>,
    ) -> Result<Self, SinkError> {
        let broker = parse_broker_url(&config.url)?;
        let client_id = config.client_id.clone().unwrap_or_else(random_client_id);
        info!(
            "connecting to MQTT broker {}:{} as {client_id}{}",
            broker.host,
            broker.port,
            if broker.tls { " (TLS)" } else { "" }
        );

        let mut options = MqttOptions::new(client_id, broker.host, broker.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, pass)) = credentials(config) {
            options.set_credentials(user, pass);
        }
        if broker.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let capacity = MIN_REQUEST_CAPACITY.max(announcements.len() * 2);
        let (client, event_loop) = AsyncClient::new(options, capacity);
        let connected = Arc::new(AtomicBool::new(false));
        let event_loop = tokio::spawn(drive(
            event_loop,
            client.clone(),
            Arc::clone(&connected),
            announcements,
        ));

        Ok(Self {
            client,
            connected,
            event_loop,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Send DISCONNECT and stop the event loop.
    pub async fn disconnect(self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {e}");
        }
        let abort = self.event_loop.abort_handle();
        if tokio::time::timeout(DISCONNECT_TIMEOUT, self.event_loop)
            .await
            .is_err()
        {
            abort.abort();
        }
    }
}

impl Sink for MqttSink {
    fn publish(&self, topic: &str, payload: &str) {
        if topic.is_empty() {
            return;
        }
        if !self.is_connected() {
            debug!("not connected, dropping message for {topic}");
            return;
        }
        match self.client.try_publish(topic, QoS::AtMostOnce, true, payload) {
            Ok(()) => debug!("published to {topic}"),
            Err(e) => warn!("failed to publish to {topic}: {e}"),
        }
    }
}

async fn drive(
    mut event_loop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    announcements: Vec<Announcement>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected to broker");
                connected.store(true, Ordering::Relaxed);
                announce(&client, &announcements);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::Relaxed);
                info!("MQTT disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::Relaxed) {
                    warn!("MQTT connection lost: {e}");
                } else {
                    debug!("MQTT connection attempt failed: {e}");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

fn announce(client: &AsyncClient, announcements: &[Announcement]) {
    for a in announcements {
        let result = client.try_publish(a.topic.as_str(), QoS::AtMostOnce, true, a.payload.as_str());
        if let Err(e) = result {
            warn!("failed to publish discovery to {}: {e}", a.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tls_url() {
        let broker = parse_broker_url("ssl://host.com:8883").unwrap();
        assert_eq!(
            broker,
            Broker {
                host: "host.com".into(),
                port: 8883,
                tls: true,
            }
        );
        assert_eq!(parse_broker_url("mqtts://host.com").unwrap().port, 8883);
    }

    #[test]
    fn test_parse_plain_url_default_port() {
        let broker = parse_broker_url("tcp://192.168.1.10").unwrap();
        assert_eq!(broker.host, "192.168.1.10");
        assert_eq!(broker.port, DEFAULT_PORT);
        assert!(!broker.tls);
        assert_eq!(parse_broker_url("mqtt://broker:1884").unwrap().port, 1884);
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        assert!(matches!(
            parse_broker_url("http://host.com"),
            Err(SinkError::InvalidUrl { .. })
        ));
        assert!(parse_broker_url("not a url").is_err());
        assert!(parse_broker_url("tcp://").is_err());
    }

    #[test]
    fn test_random_client_id() {
        let id = random_client_id();
        let suffix = id.strip_prefix(CLIENT_ID_PREFIX).unwrap();
        assert_eq!(suffix.len(), CLIENT_ID_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_random_client_ids_differ() {
        let ids: std::collections::HashSet<_> = (0..8).map(|_| random_client_id()).collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn test_credentials() {
        let config = MqttConfig {
            user: Some("bridge".into()),
            ..Default::default()
        };
        assert_eq!(
            credentials(&config),
            Some(("bridge".to_string(), String::new()))
        );

        let config = MqttConfig {
            pass: Some("secret".into()),
            ..Default::default()
        };
        assert_eq!(credentials(&config), None);
        assert_eq!(credentials(&MqttConfig::default()), None);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_is_noop() {
        let config = MqttConfig {
            url: "tcp://127.0.0.1:1".into(),
            ..Default::default()
        };
        let sink = MqttSink::connect(&config, Vec::new()).unwrap();
        assert!(!sink.is_connected());

        sink.publish("sensors/porch", "{}");
        sink.publish("", "{}");

        sink.disconnect().await;
    }
}
