//! Inbound control messages.
//!
//! Accepted payloads, matched case-insensitively:
//!
//! ```text
//! {"WAKE"}                      force awake mode and republish info
//! {"INFO"}                      same as WAKE
//! {"STOP"} or STOP              stop the bridge
//! {"stayAwake": true}           suppress snoozing
//! {"wakePublishRate": 10000}    awake interval in milliseconds
//! ```

use serde_json::Value;

/// A parsed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Wake,
    Info,
    Stop,
    SetStayAwake(bool),
    /// Awake publish rate in milliseconds.
    SetWakeRate(u64),
    /// Anything not understood, with the payload as received.
    Unknown(String),
}

impl Command {
    /// Parses a raw MQTT payload.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let trimmed = text.trim();
        match trimmed.to_uppercase().as_str() {
            r#"{"WAKE"}"# => return Self::Wake,
            r#"{"INFO"}"# => return Self::Info,
            r#"{"STOP"}"# | "STOP" => return Self::Stop,
            _ => {}
        }

        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) else {
            return Self::Unknown(trimmed.to_string());
        };
        for (key, value) in &object {
            if key.eq_ignore_ascii_case("stayAwake") {
                if let Some(stay_awake) = value.as_bool() {
                    return Self::SetStayAwake(stay_awake);
                }
            } else if key.eq_ignore_ascii_case("wakePublishRate") {
                if let Some(rate) = value.as_u64() {
                    return Self::SetWakeRate(rate);
                }
            }
        }
        Self::Unknown(trimmed.to_string())
    }
}
