//! Hands readings and info payloads to an MQTT transport.

use crate::payload;
use crate::protocol::DecodedReading;
use log::{debug, error};
use std::fmt;

/// Outbound side of the broker connection.
pub trait Transport {
    type Error: fmt::Display;

    fn is_connected(&self) -> bool;

    fn publish(&self, topic: &str, payload: &str, retained: bool) -> Result<(), Self::Error>;
}

/// Topic names for one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub readings: String,
    pub info: String,
    pub lwt: String,
    pub command: String,
}

impl Topics {
    /// Builds `<root>/<name>/...` topics; a trailing slash on the root is ignored.
    pub fn new(root: &str, name: &str) -> Self {
        let base = format!("{}/{}", root.trim_end_matches('/'), name);
        Self {
            readings: format!("{base}/stat/readings"),
            info: format!("{base}/stat/info"),
            lwt: format!("{base}/tele/LWT"),
            command: format!("{base}/cmnd/#"),
        }
    }
}

/// What a publish attempt achieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub readings_sent: bool,
    pub info_sent: bool,
    /// Failed publish or serialization attempts.
    pub failures: u32,
}

pub struct Publisher<T> {
    transport: T,
    topics: Topics,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T, topics: Topics) -> Self {
        Self { transport, topics }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Publishes the info payload when requested, then the readings. Failures are not retried.
    pub fn publish(&self, reading: &DecodedReading, include_info: bool) -> PublishReport {
        let mut report = PublishReport::default();
        if include_info {
            report.info_sent = self.send(&self.topics.info, payload::info_json(reading));
            if !report.info_sent {
                report.failures += 1;
            }
        }
        report.readings_sent = self.send(&self.topics.readings, payload::readings_json(reading));
        if !report.readings_sent {
            report.failures += 1;
        }
        report
    }

    fn send(&self, topic: &str, json: serde_json::Result<String>) -> bool {
        let json = match json {
            Ok(json) => json,
            Err(err) => {
                error!("Cannot serialize payload for {topic}: {err}");
                return false;
            }
        };
        debug!("Publishing {} bytes to {topic}", json.len());
        match self.transport.publish(topic, &json, false) {
            Ok(()) => true,
            Err(err) => {
                error!("Cannot publish to {topic}: {err}");
                false
            }
        }
    }
}
