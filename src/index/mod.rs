//! In-memory subscription index.
//!
//! Two mirrored tiers back the fan-out query: the ephemeral tier holds
//! `cleanSession=true` subscribers outright, the durable-cache tier mirrors
//! the external store when the inner cache is enabled. A third, flat index
//! serves `$SYS` topics. All state is held in concurrent maps so the hot
//! publish path iterates without external locking; iteration is weakly
//! consistent by design.

pub mod record;

pub use record::{ClientSub, Qos, SubKey};

use crate::topic;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, HashSet};

/// One tier of the index: the wildcard/concrete filter split plus the
/// filter-to-subscribers buckets.
///
/// A filter lives in exactly one of the two class sets while its bucket is
/// non-empty; the split lets the fan-out query do an O(1) probe for the
/// concrete case and scan only genuine wildcards.
#[derive(Debug, Default)]
pub struct SubscriptionTier {
    wildcard_filters: DashSet<String>,
    concrete_filters: DashSet<String>,
    subs: DashMap<String, HashMap<SubKey, ClientSub>>,
}

impl SubscriptionTier {
    /// Insert or replace a subscription. A record with the same
    /// `(client_id, share_group)` key is overwritten, so the latest QoS wins.
    pub fn insert(&self, sub: ClientSub) {
        let filter = sub.filter.clone();
        self.subs
            .entry(filter.clone())
            .or_default()
            .insert(sub.key(), sub);
        self.insert_filter(&filter);
    }

    /// Classify a filter into the wildcard or concrete set without touching
    /// the buckets. Cold-start reload seeds the sets this way before the
    /// per-filter records arrive.
    pub fn insert_filter(&self, filter: &str) {
        if topic::is_wildcard(filter) {
            self.wildcard_filters.insert(filter.to_string());
        } else {
            self.concrete_filters.insert(filter.to_string());
        }
    }

    /// Remove one subscriber from a filter bucket. Returns true when the
    /// bucket emptied and the filter left the class sets.
    pub fn remove(&self, filter: &str, key: &SubKey) -> bool {
        let emptied = match self.subs.get_mut(filter) {
            Some(mut bucket) => {
                bucket.remove(key);
                bucket.is_empty()
            }
            None => false,
        };
        if emptied {
            self.subs.remove_if(filter, |_, bucket| bucket.is_empty());
            self.drop_filter(filter);
        }
        emptied
    }

    /// All records a client holds on a filter, across share groups.
    pub fn records_for_client(&self, filter: &str, client_id: &str) -> Vec<ClientSub> {
        match self.subs.get(filter) {
            Some(bucket) => bucket
                .values()
                .filter(|sub| sub.client_id == client_id)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Append every record whose filter matches the concrete topic.
    pub fn collect_matches(&self, topic_name: &str, out: &mut Vec<ClientSub>) {
        for filter in self.wildcard_filters.iter() {
            if topic::topic_matches(topic_name, filter.key()) {
                if let Some(bucket) = self.subs.get(filter.key()) {
                    out.extend(bucket.values().cloned());
                }
            }
        }
        if self.concrete_filters.contains(topic_name) {
            if let Some(bucket) = self.subs.get(topic_name) {
                out.extend(bucket.values().cloned());
            }
        }
    }

    /// Collect filters from both class sets that are absent from the
    /// authorized list.
    pub fn filters_not_in(&self, authorized: &[String], out: &mut Vec<String>) {
        for filter in self.concrete_filters.iter() {
            if !authorized.contains(filter.key()) {
                out.push(filter.key().clone());
            }
        }
        for filter in self.wildcard_filters.iter() {
            if !authorized.contains(filter.key()) {
                out.push(filter.key().clone());
            }
        }
    }

    /// True while the filter sits in either class set.
    pub fn contains_filter(&self, filter: &str) -> bool {
        self.wildcard_filters.contains(filter) || self.concrete_filters.contains(filter)
    }

    fn drop_filter(&self, filter: &str) {
        if topic::is_wildcard(filter) {
            self.wildcard_filters.remove(filter);
        } else {
            self.concrete_filters.remove(filter);
        }
    }
}

/// The two mirrored tiers plus the ephemeral client-to-filters relation.
///
/// The durable tier has no client relation here: the external store is
/// authoritative for it.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    pub ephemeral: SubscriptionTier,
    pub durable_cache: SubscriptionTier,
    client_filters: DashMap<String, HashSet<String>>,
}

impl MemoryIndex {
    pub fn track_client_filter(&self, client_id: &str, filter: &str) {
        self.client_filters
            .entry(client_id.to_string())
            .or_default()
            .insert(filter.to_string());
    }

    pub fn untrack_client_filters(&self, client_id: &str, filters: &[String]) {
        if let Some(mut tracked) = self.client_filters.get_mut(client_id) {
            for filter in filters {
                tracked.remove(filter);
            }
        }
        self.client_filters
            .remove_if(client_id, |_, tracked| tracked.is_empty());
    }

    /// Remove and return everything the client has subscribed ephemerally.
    pub fn take_client_filters(&self, client_id: &str) -> Vec<String> {
        match self.client_filters.remove(client_id) {
            Some((_, filters)) => filters.into_iter().collect(),
            None => Vec::new(),
        }
    }
}

/// `$SYS` subscriptions: a single map where every filter is treated as
/// potentially wildcard, so matching always scans. Not durable, not
/// clustered, not reloaded.
#[derive(Debug, Default)]
pub struct SystemTopicIndex {
    subs: DashMap<String, HashMap<SubKey, ClientSub>>,
}

impl SystemTopicIndex {
    pub fn insert(&self, sub: ClientSub) {
        self.subs
            .entry(sub.filter.clone())
            .or_default()
            .insert(sub.key(), sub);
    }

    pub fn remove(&self, client_id: &str, filter: &str) {
        let key = SubKey::new(client_id, None);
        if let Some(mut bucket) = self.subs.get_mut(filter) {
            bucket.remove(&key);
        }
        self.subs.remove_if(filter, |_, bucket| bucket.is_empty());
    }

    pub fn remove_client(&self, client_id: &str) {
        for mut entry in self.subs.iter_mut() {
            entry.value_mut().retain(|key, _| key.client_id != client_id);
        }
        self.subs.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn matches(&self, topic_name: &str) -> Vec<ClientSub> {
        let mut out = Vec::new();
        for entry in self.subs.iter() {
            if topic::topic_matches(topic_name, entry.key()) {
                out.extend(entry.value().values().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(client: &str, qos: Qos, filter: &str) -> ClientSub {
        ClientSub::new(client, qos, filter, true, None)
    }

    #[test]
    fn test_tier_classifies_filters() {
        let tier = SubscriptionTier::default();
        tier.insert(sub("c1", Qos::AtMostOnce, "a/b"));
        tier.insert(sub("c1", Qos::AtMostOnce, "a/+"));

        let mut out = Vec::new();
        tier.collect_matches("a/b", &mut out);
        assert_eq!(out.len(), 2);

        out.clear();
        tier.collect_matches("a/c", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].filter, "a/+");
    }

    #[test]
    fn test_tier_remove_drops_emptied_filter() {
        let tier = SubscriptionTier::default();
        tier.insert(sub("c1", Qos::AtMostOnce, "a/b"));
        tier.insert(sub("c2", Qos::AtMostOnce, "a/b"));

        assert!(!tier.remove("a/b", &SubKey::new("c1", None)));
        assert!(tier.contains_filter("a/b"));

        assert!(tier.remove("a/b", &SubKey::new("c2", None)));
        assert!(!tier.contains_filter("a/b"));

        // removal of an unknown subscriber is idempotent
        assert!(!tier.remove("a/b", &SubKey::new("c3", None)));
    }

    #[test]
    fn test_tier_resubscribe_replaces_qos() {
        let tier = SubscriptionTier::default();
        tier.insert(sub("c1", Qos::AtMostOnce, "a"));
        tier.insert(sub("c1", Qos::ExactlyOnce, "a"));

        let mut out = Vec::new();
        tier.collect_matches("a", &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].qos, Qos::ExactlyOnce);
    }

    #[test]
    fn test_tier_share_groups_are_distinct_subscribers() {
        let tier = SubscriptionTier::default();
        tier.insert(ClientSub::new("c1", Qos::AtLeastOnce, "x/y", false, None));
        tier.insert(ClientSub::new(
            "c1",
            Qos::AtLeastOnce,
            "x/y",
            false,
            Some("g".into()),
        ));

        let records = tier.records_for_client("x/y", "c1");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_client_filter_tracking() {
        let index = MemoryIndex::default();
        index.track_client_filter("c1", "a");
        index.track_client_filter("c1", "b/+");
        index.untrack_client_filters("c1", &["a".to_string()]);

        let mut remaining = index.take_client_filters("c1");
        remaining.sort();
        assert_eq!(remaining, vec!["b/+".to_string()]);
        assert!(index.take_client_filters("c1").is_empty());
    }

    #[test]
    fn test_sys_index_always_scans() {
        let sys = SystemTopicIndex::default();
        sys.insert(ClientSub::new(
            "c1",
            Qos::AtMostOnce,
            "$SYS/broker/#",
            true,
            None,
        ));

        assert_eq!(sys.matches("$SYS/broker/load").len(), 1);
        assert!(sys.matches("$SYS/other").is_empty());

        sys.remove_client("c1");
        assert!(sys.matches("$SYS/broker/load").is_empty());
    }
}
