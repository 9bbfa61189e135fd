//! Cluster sub/unsub wire messages and the envelope codec.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Channel carrying subscribe/unsubscribe gossip between peers.
pub const SUB_UNSUB_CHANNEL: &str = "sub/unsub";

/// Event type tag: subscribe.
pub const TYPE_SUB: u8 = 1;
/// Event type tag: unsubscribe.
pub const TYPE_UNSUB: u8 = 2;

/// One subscribe or unsubscribe event as it travels between brokers.
///
/// `topic` is set for SUB events and may carry a `$share/<group>/<filter>`
/// prefix; `topics` is set for UNSUB events, each entry possibly wrapped the
/// same way. `qos` is meaningful only for SUB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSubOrUnsubMsg {
    pub client_id: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub topic: Option<String>,
    pub clean_session: bool,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(rename = "type")]
    pub kind: u8,
}

impl ClientSubOrUnsubMsg {
    pub fn sub(client_id: impl Into<String>, qos: u8, topic: String, clean_session: bool) -> Self {
        Self {
            client_id: client_id.into(),
            qos,
            topic: Some(topic),
            clean_session,
            topics: Vec::new(),
            kind: TYPE_SUB,
        }
    }

    pub fn unsub(client_id: impl Into<String>, clean_session: bool, topics: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            qos: 0,
            topic: None,
            clean_session,
            topics,
            kind: TYPE_UNSUB,
        }
    }
}

/// Transport envelope: the event plus its origin and send time.
///
/// Receivers drop envelopes stamped with their own broker id; transports
/// that echo publishes back to the sender are therefore safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalMessage<T> {
    pub data: T,
    pub timestamp: u64,
    pub broker_id: String,
}

impl<T> InternalMessage<T> {
    pub fn new(data: T, broker_id: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self {
            data,
            timestamp,
            broker_id: broker_id.into(),
        }
    }
}

/// Injected serialization format for cluster envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    Json,
    Binary,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self::Json
    }
}

impl FromStr for WireFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "binary" => Ok(Self::Binary),
            other => Err(anyhow!("invalid wire format {}", other)),
        }
    }
}

impl WireFormat {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(value).context("json encode failed"),
            Self::Binary => bincode::serialize(value).context("binary encode failed"),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Self::Json => serde_json::from_slice(bytes).context("json decode failed"),
            Self::Binary => bincode::deserialize(bytes).context("binary decode failed"),
        }
    }
}
