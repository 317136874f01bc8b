//! The wire envelope every event travels in.
//!
//! §3: "Every emitted event carries a payload... All payloads include
//! `timestamp` and `service_name` (origin)." The envelope is where those
//! two fields live, outside the payload itself, so that every topic's
//! schema only needs to describe its own data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::payload::Payload;
use crate::topic::Topic;

/// (topic, payload, emit-timestamp, origin service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
}

impl Envelope {
    /// Build an envelope, stamping the current time. The topic is derived
    /// from the payload itself so the two can never disagree.
    pub fn new(service_name: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: payload.topic(),
            timestamp: Utc::now(),
            service_name: service_name.into(),
            payload,
        }
    }

    /// The outbound broadcast shape the Web Bridge wraps every subscribed
    /// topic in: `{topic, data, timestamp, validated: true}` (§4.8, §6.1).
    pub fn to_broadcast_json(&self) -> serde_json::Value {
        serde_json::json!({
            "topic": self.topic.as_str(),
            "data": self.payload,
            "timestamp": self.timestamp.to_rfc3339(),
            "validated": true,
        })
    }
}
