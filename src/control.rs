//! JSON actions exchanged on the control channel.
//!
//! ```json
//! {"action": "handshake", "param": {"version": 1}}
//! {"action": "status", "param": {"message": "Running", "vars": {"jobs": 4}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Actions sent to the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", content = "param", rename_all = "snake_case")]
pub enum OutboundAction {
    Handshake { version: u8 },
    Ping {},
    Pong {},
    SimStart { params: Value },
    SimEstimate { params: Value },
    SimAbort {},
}

/// Actions received from the backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", content = "param", rename_all = "snake_case")]
pub enum InboundAction {
    Status {
        message: String,
        #[serde(default)]
        vars: Value,
    },
    Error { message: String },
    SimCompleted {},
    SimFailed { message: String },
    Ping {},
    Pong {},
}

impl OutboundAction {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl InboundAction {
    /// Parse an inbound message. Actions without arguments may omit `param`.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        if let Value::Object(map) = &mut value {
            map.entry("param").or_insert_with(|| Value::Object(Map::new()));
        }
        serde_json::from_value(value)
    }
}
