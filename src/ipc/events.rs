use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// The protocol channel. Responses from the request loop and events from
/// timer threads share one writer, so each line is written whole.
#[derive(Clone)]
pub struct Outbox {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Outbox {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    pub fn send(&self, line: &serde_json::Value) {
        let text = serde_json::to_string(line).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        let mut out = match self.out.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if writeln!(out, "{}", text).and_then(|_| out.flush()).is_err() {
            tracing::warn!("protocol channel closed, dropping line");
        }
    }

    /// Unsolicited line; never carries an `id`.
    pub fn push_event(&self, event: &str, payload: serde_json::Value) {
        tracing::debug!(event, "push");
        self.send(&json!({ "event": event, "payload": payload }));
    }
}
