use recall_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `type` field of an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    State,
    Trial,
    Session,
    Exit,
    Word,
    Math,
    Sync,
    Connected,
    Heartbeat,
}

/// One line of the event protocol:
/// `{"type": ..., <payload fields>, "timestamp": <local ms>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    pub timestamp: f64,
}

impl SyncEvent {
    pub fn new(kind: EventKind, timestamp: f64) -> Self {
        Self {
            kind,
            payload: Map::new(),
            timestamp,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_owned(), value.into());
        self
    }

    /// Phase name of a `STATE` event.
    pub fn state_name(&self) -> Option<&str> {
        match self.kind {
            EventKind::State => self.payload.get("state").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn probe_id(&self) -> Option<u64> {
        self.payload.get("id").and_then(Value::as_u64)
    }

    /// Newline-terminated JSON, the framing used on the wire.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Messages the control PC sends back.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Inbound {
    Connected,
    Sync { id: u64, timestamp: f64 },
    Start,
    Exit,
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl Inbound {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}
