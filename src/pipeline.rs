//! Aggregation pipeline between the dispatcher and the publish sink.
//!
//! A single consumer task owns all pipeline state. In immediate mode every
//! message is published as it arrives. In batched mode the latest message per
//! device is kept in an [`AggregationBuffer`] and the whole buffer is
//! published on every tick of a fixed interval.
//!
//! Buffer entries are never evicted: a sensor that stops advertising keeps
//! being republished with its last message on every tick until a newer one
//! replaces it. The buffer is bounded by the set of configured devices.

use crate::mac_address::MacAddress;
use crate::message::Message;
use crate::sink::Sink;
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// How the pipeline turns incoming messages into publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Publish each message on arrival.
    Immediate,
    /// Publish the latest message per device once per interval.
    Batched(Duration),
}

impl FlushMode {
    /// A zero interval selects immediate mode.
    pub fn from_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            FlushMode::Immediate
        } else {
            FlushMode::Batched(interval)
        }
    }
}

/// Latest message per device address.
#[derive(Debug, Default)]
pub struct AggregationBuffer {
    latest: HashMap<MacAddress, Message>,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `message`, replacing any earlier message from the same address.
    pub fn insert(&mut self, message: Message) {
        self.latest.insert(message.address, message);
    }

    /// Messages to publish at a tick. Entries stay in the buffer.
    pub fn entries(&self) -> impl Iterator<Item = &Message> {
        self.latest.values()
    }

    pub fn get(&self, address: &MacAddress) -> Option<&Message> {
        self.latest.get(address)
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// The consumer side of the dispatcher channel.
pub struct Pipeline {
    mode: FlushMode,
    topic_prefix: String,
    sink: Arc<dyn Sink>,
}

impl Pipeline {
    pub fn new(mode: FlushMode, topic_prefix: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        Self {
            mode,
            topic_prefix: topic_prefix.into(),
            sink,
        }
    }

    pub fn topic(&self, name: &str) -> String {
        state_topic(&self.topic_prefix, name)
    }

    /// Consume messages until every sender is dropped.
    ///
    /// Nothing is flushed on shutdown; buffered messages that were not yet
    /// published at the last tick are discarded.
    pub async fn run(self, rx: mpsc::UnboundedReceiver<Message>) {
        match self.mode {
            FlushMode::Immediate => self.run_immediate(rx).await,
            FlushMode::Batched(interval) => self.run_batched(rx, interval).await,
        }
        info!("pipeline stopped");
    }

    async fn run_immediate(&self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            self.publish(&message);
        }
    }

    async fn run_batched(&self, mut rx: mpsc::UnboundedReceiver<Message>, interval: Duration) {
        let mut buffer = AggregationBuffer::new();
        // First tick one full interval after start
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                received = rx.recv() => match received {
                    Some(message) => buffer.insert(message),
                    None => break,
                },
                _ = ticker.tick() => self.flush(&buffer),
            }
        }
    }

    fn flush(&self, buffer: &AggregationBuffer) {
        debug!("flushing {} buffered message(s)", buffer.len());
        for message in buffer.entries() {
            self.publish(message);
        }
    }

    fn publish(&self, message: &Message) {
        match message.to_json() {
            Ok(payload) => self.sink.publish(&self.topic(&message.name), &payload),
            Err(e) => error!("failed to serialize message for {}: {e}", message.name),
        }
    }
}

/// Topic a device's messages are published on: `{prefix}/{name}`.
pub fn state_topic(prefix: &str, name: &str) -> String {
    format!("{prefix}/{name}")
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ble_sensor_mqtt::pipeline::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
/// assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, scale): (&str, fn(u64) -> Option<Duration>) =
        if let Some(num) = src.strip_suffix("ms") {
            (num, |n| Some(Duration::from_millis(n)))
        } else if let Some(num) = src.strip_suffix('h') {
            (num, |n| n.checked_mul(3600).map(Duration::from_secs))
        } else if let Some(num) = src.strip_suffix('m') {
            (num, |n| n.checked_mul(60).map(Duration::from_secs))
        } else if let Some(num) = src.strip_suffix('s') {
            (num, |n| Some(Duration::from_secs(n)))
        } else {
            (src, |n| Some(Duration::from_secs(n)))
        };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    scale(value).ok_or_else(|| format!("duration out of range: {src}"))
}
