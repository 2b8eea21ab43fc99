//! Line-oriented sink for running without a broker.

use super::Sink;
use log::{debug, error};
use std::io::Write;
use std::sync::Mutex;

/// Writes each payload as one line to the wrapped writer; the topic is only logged.
pub struct WriterSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer, e.g. to inspect captured output.
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WriterSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn publish(&self, topic: &str, payload: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match writeln!(out, "{payload}").and_then(|_| out.flush()) {
            Ok(()) => debug!("wrote message for {topic}"),
            Err(e) => error!("failed to write message for {topic}: {e}"),
        }
    }
}
