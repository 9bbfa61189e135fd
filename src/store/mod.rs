//! Durable-store contract and key schema.
//!
//! The external KV store is abstract: the service only needs hash and set
//! primitives with asynchronous completion. `MemoryStore` implements the
//! contract for tests and embedded single-node brokers; production backends
//! plug in behind the same trait.

pub mod memory;

pub use memory::MemoryStore;

use crate::core::config::StoreKeysConfig;
use anyhow::Result;
use async_trait::async_trait;

/// Separator joining client id and share group in hash fields.
///
/// Chosen to never occur in a valid client id; input validation rejects
/// client ids containing it. The constant is part of the store's observable
/// keying and must not change across versions.
pub const SHARE_KEY_SEPARATOR: &str = "<!>";

/// Hash field for a subscriber: the bare client id, or
/// `client_id<!>share_group` for shared subscriptions.
pub fn sub_key(client_id: &str, share_group: Option<&str>) -> String {
    match share_group {
        Some(group) => format!("{client_id}{SHARE_KEY_SEPARATOR}{group}"),
        None => client_id.to_string(),
    }
}

/// Split a hash field back into `(client_id, share_group)`.
pub fn parse_sub_key(field: &str) -> (&str, Option<&str>) {
    match field.split_once(SHARE_KEY_SEPARATOR) {
        Some((client_id, group)) => (client_id, Some(group)),
        None => (field, None),
    }
}

/// Assembles the store keys for the three subscription relations.
#[derive(Debug, Clone)]
pub struct KeySchema {
    topic_prefix: String,
    topic_set_key: String,
    client_filters_prefix: String,
}

impl KeySchema {
    pub fn new(keys: &StoreKeysConfig) -> Self {
        Self {
            topic_prefix: keys.topic_prefix.clone(),
            topic_set_key: keys.topic_set_key.clone(),
            client_filters_prefix: keys.client_filters_prefix.clone(),
        }
    }

    /// Hash holding `sub_key -> qos` for one filter.
    pub fn filter_hash(&self, filter: &str) -> String {
        format!("{}{}", self.topic_prefix, filter)
    }

    /// Set of every durable filter.
    pub fn filter_set(&self) -> &str {
        &self.topic_set_key
    }

    /// Set of filters one client holds.
    pub fn client_filters(&self, client_id: &str) -> String {
        format!("{}{}", self.client_filters_prefix, client_id)
    }
}

/// Async contract over the shared KV store.
///
/// All brokers in the cluster write the same keys; correctness relies on each
/// hash field being owned by at most one `(client_id, share_group)` pair, not
/// on locking.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    async fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<()>;

    async fn hash_remove(&self, key: &str, field: &str) -> Result<()>;

    async fn hash_entries(&self, key: &str) -> Result<Vec<(String, String)>>;

    async fn set_add(&self, key: &str, member: &str) -> Result<()>;

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<()>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    async fn delete(&self, key: &str) -> Result<()>;
}
