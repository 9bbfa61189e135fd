//! In-memory `SubscriptionStore` for tests and embedded single-node brokers.

use super::SubscriptionStore;
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

/// Hash/set store backed by concurrent maps. Empty hashes and sets vanish,
/// matching the usual KV-store behavior of dropping empty containers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_remove(&self, key: &str, field: &str) -> Result<()> {
        if let Some(mut hash) = self.hashes.get_mut(key) {
            hash.remove(field);
        }
        self.hashes.remove_if(key, |_, hash| hash.is_empty());
        Ok(())
    }

    async fn hash_entries(&self, key: &str) -> Result<Vec<(String, String)>> {
        Ok(match self.hashes.get(key) {
            Some(hash) => hash
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
            None => Vec::new(),
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
        }
        self.sets.remove_if(key, |_, set| set.is_empty());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(match self.sets.get(key) {
            Some(set) => set.iter().cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.hashes.remove(key);
        self.sets.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        store.hash_put("h", "f1", "1").await.unwrap();
        store.hash_put("h", "f2", "2").await.unwrap();
        store.hash_put("h", "f1", "0").await.unwrap();

        let mut entries = store.hash_entries("h").await.unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("f1".to_string(), "0".to_string()),
                ("f2".to_string(), "2".to_string())
            ]
        );

        store.hash_remove("h", "f1").await.unwrap();
        store.hash_remove("h", "f2").await.unwrap();
        assert!(store.hash_entries("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "b").await.unwrap();
        store.set_add("s", "a").await.unwrap();

        let mut members = store.set_members("s").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);

        store
            .set_remove("s", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_clears_both_namespaces() {
        let store = MemoryStore::new();
        store.hash_put("k", "f", "v").await.unwrap();
        store.set_add("k", "m").await.unwrap();
        store.delete("k").await.unwrap();

        assert!(store.hash_entries("k").await.unwrap().is_empty());
        assert!(store.set_members("k").await.unwrap().is_empty());
    }
}
