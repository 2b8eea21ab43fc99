//! Publish sinks for finished messages.
//!
//! The pipeline hands each message to a [`Sink`] as a topic and a JSON
//! payload. Delivery is best effort: sinks absorb their own failures (not
//! connected, empty topic, write errors) and never report them back.

pub mod mqtt;
pub mod writer;

use thiserror::Error;

/// Fire-and-forget publish target.
pub trait Sink: Send + Sync {
    /// Publish `payload` on `topic`. Must not block on the network.
    fn publish(&self, topic: &str, payload: &str);
}

/// Errors raised while constructing a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid broker URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build discovery payload: {0}")]
    Discovery(#[from] serde_json::Error),
}
