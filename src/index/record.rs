use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// MQTT quality-of-service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }

    /// Parse the decimal-string form the durable store keeps as hash values.
    pub fn from_store_value(value: &str) -> Option<Self> {
        value.parse::<u8>().ok().and_then(Self::from_u8)
    }
}

/// Key identifying one subscriber within a filter bucket.
///
/// Two subscriptions collide exactly when client id and share group both
/// match; the bucket maps this key to the full record so a re-subscribe
/// replaces the previous entry in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubKey {
    pub client_id: String,
    pub share_group: Option<String>,
}

impl SubKey {
    pub fn new(client_id: impl Into<String>, share_group: Option<String>) -> Self {
        Self {
            client_id: client_id.into(),
            share_group,
        }
    }
}

/// One client subscription.
///
/// Identity is the `(client_id, filter, share_group)` triple; `qos` and
/// `clean_session` deliberately stay out of equality and hashing so a
/// re-subscribe with a different QoS replaces the prior record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSub {
    pub client_id: String,
    pub qos: Qos,
    /// Filter without any `$share` prefix; the group travels separately.
    pub filter: String,
    pub clean_session: bool,
    #[serde(default)]
    pub share_group: Option<String>,
}

impl ClientSub {
    pub fn new(
        client_id: impl Into<String>,
        qos: Qos,
        filter: impl Into<String>,
        clean_session: bool,
        share_group: Option<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            qos,
            filter: filter.into(),
            clean_session,
            share_group,
        }
    }

    pub fn key(&self) -> SubKey {
        SubKey {
            client_id: self.client_id.clone(),
            share_group: self.share_group.clone(),
        }
    }
}

impl PartialEq for ClientSub {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id
            && self.filter == other.filter
            && self.share_group == other.share_group
    }
}

impl Eq for ClientSub {}

impl Hash for ClientSub {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.client_id.hash(state);
        self.filter.hash(state);
        self.share_group.hash(state);
    }
}
