//! Subscription orchestration.
//!
//! `SubscriptionService` sits on every SUBSCRIBE/UNSUBSCRIBE and PUBLISH hot
//! path: it routes `cleanSession=true` subscriptions into the ephemeral
//! in-memory tier, `cleanSession=false` subscriptions into the shared durable
//! store (optionally mirrored by a local cache), answers the per-publish
//! fan-out query, and gossips every change to peer brokers over the cluster
//! bus. Inbound peer events are applied to local state only, never to the
//! shared store, which the originating broker already updated.

use crate::cluster::{
    ChannelWatcher, ClientSubOrUnsubMsg, ClusterBus, InternalMessage, WireFormat,
    SUB_UNSUB_CHANNEL, TYPE_SUB, TYPE_UNSUB,
};
use crate::core::config::Config;
use crate::core::error::SubscriptionError;
use crate::index::{ClientSub, MemoryIndex, Qos, SubKey, SystemTopicIndex};
use crate::store::{self, KeySchema, SubscriptionStore};
use crate::topic;
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Buffered records per fan-out stream before the producer backs off.
const FANOUT_CHANNEL_CAPACITY: usize = 256;

/// Orchestrates the subscription index across its tiers, the durable store,
/// and the cluster bus.
///
/// Cheap to clone; every clone shares the same underlying state.
pub struct SubscriptionService<S> {
    store: Arc<S>,
    keys: KeySchema,
    index: Arc<MemoryIndex>,
    sys: Arc<SystemTopicIndex>,
    bus: Option<Arc<dyn ClusterBus>>,
    wire: WireFormat,
    broker_id: String,
    inner_cache: bool,
}

impl<S> Clone for SubscriptionService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            keys: self.keys.clone(),
            index: Arc::clone(&self.index),
            sys: Arc::clone(&self.sys),
            bus: self.bus.clone(),
            wire: self.wire,
            broker_id: self.broker_id.clone(),
            inner_cache: self.inner_cache,
        }
    }
}

impl<S: SubscriptionStore> SubscriptionService<S> {
    /// Build the service, loading the durable-cache tier when the inner
    /// cache is enabled. A reload failure is fatal: the broker must not
    /// accept traffic with an incoherent cache.
    pub async fn new(
        config: &Config,
        store: Arc<S>,
        bus: Option<Arc<dyn ClusterBus>>,
    ) -> Result<Self, SubscriptionError> {
        let service = Self {
            store,
            keys: KeySchema::new(&config.store_keys),
            index: Arc::new(MemoryIndex::default()),
            sys: Arc::new(SystemTopicIndex::default()),
            bus: if config.cluster.enable { bus } else { None },
            wire: config.wire_format,
            broker_id: config.broker_id.clone(),
            inner_cache: config.cache.enable_inner_cache,
        };
        if service.inner_cache {
            service.reload_cache().await?;
        }
        Ok(service)
    }

    /// Register one subscription.
    ///
    /// The filter must arrive unwrapped; `share_group` is set iff the
    /// original SUBSCRIBE carried a `$share` prefix. Ephemeral subscriptions
    /// touch only local memory; durable ones complete their three store
    /// writes before the cache mirror and the broadcast.
    pub async fn subscribe(&self, sub: ClientSub) -> Result<(), SubscriptionError> {
        validate_client_id(&sub.client_id)?;
        topic::validate_filter(&sub.filter)?;
        if let Some(group) = &sub.share_group {
            validate_share_group(group)?;
        }

        if sub.clean_session {
            self.index.ephemeral.insert(sub.clone());
            self.index.track_client_filter(&sub.client_id, &sub.filter);
            self.broadcast_sub(&sub).await;
            return Ok(());
        }

        let hash_key = self.keys.filter_hash(&sub.filter);
        let field = store::sub_key(&sub.client_id, sub.share_group.as_deref());
        let value = sub.qos.as_u8().to_string();
        let client_key = self.keys.client_filters(&sub.client_id);
        tokio::try_join!(
            self.store.hash_put(&hash_key, &field, &value),
            self.store.set_add(self.keys.filter_set(), &sub.filter),
            self.store.set_add(&client_key, &sub.filter),
        )
        .map_err(SubscriptionError::Store)?;

        if self.inner_cache {
            self.index.durable_cache.insert(sub.clone());
        }
        self.broadcast_sub(&sub).await;
        Ok(())
    }

    /// Drop subscriptions for the listed topics, each possibly carrying a
    /// `$share/<group>/` prefix.
    pub async fn unsubscribe(
        &self,
        client_id: &str,
        clean_session: bool,
        topics: Vec<String>,
    ) -> Result<(), SubscriptionError> {
        self.unsubscribe_inner(client_id, clean_session, topics, false)
            .await
    }

    async fn unsubscribe_inner(
        &self,
        client_id: &str,
        clean_session: bool,
        topics: Vec<String>,
        from_cluster: bool,
    ) -> Result<(), SubscriptionError> {
        if topics.is_empty() {
            return Ok(());
        }
        validate_client_id(client_id)?;
        let mut unwrapped = Vec::with_capacity(topics.len());
        for raw in &topics {
            let (group, filter) = topic::unwrap_shared(raw)?;
            topic::validate_filter(&filter)?;
            unwrapped.push((group, filter));
        }

        if clean_session {
            let mut released = Vec::with_capacity(unwrapped.len());
            for (group, filter) in &unwrapped {
                let key = SubKey::new(client_id, group.clone());
                self.index.ephemeral.remove(filter, &key);
                // the filter stays tracked while another share-group record
                // of the same client survives on it
                if self
                    .index
                    .ephemeral
                    .records_for_client(filter, client_id)
                    .is_empty()
                {
                    released.push(filter.clone());
                }
            }
            self.index.untrack_client_filters(client_id, &released);
            if !from_cluster {
                self.broadcast_unsub(client_id, true, topics).await;
            }
            return Ok(());
        }

        if from_cluster {
            // peer already updated the shared store; only the cache moves
            return self.unsubscribe_cache(client_id, &unwrapped, true).await;
        }

        let fields: Vec<(String, String)> = unwrapped
            .iter()
            .map(|(group, filter)| {
                (
                    self.keys.filter_hash(filter),
                    store::sub_key(client_id, group.as_deref()),
                )
            })
            .collect();
        let hash_removes = fields
            .iter()
            .map(|(key, field)| self.store.hash_remove(key, field));
        let filters: Vec<String> = unwrapped.iter().map(|(_, f)| f.clone()).collect();
        let client_key = self.keys.client_filters(client_id);
        tokio::try_join!(
            try_join_all(hash_removes),
            self.store.set_remove(&client_key, &filters),
        )
        .map_err(SubscriptionError::Store)?;

        self.unsubscribe_cache(client_id, &unwrapped, false).await?;
        self.broadcast_unsub(client_id, false, topics).await;
        Ok(())
    }

    /// Durable-tier cache removal. Filters whose bucket empties leave the
    /// cache's class sets; only a locally triggered removal also deletes
    /// them from the external filter set; the originator of a cluster
    /// event has already done so. The ephemeral tier is never touched here.
    async fn unsubscribe_cache(
        &self,
        client_id: &str,
        unwrapped: &[(Option<String>, String)],
        from_cluster: bool,
    ) -> Result<(), SubscriptionError> {
        if !self.inner_cache {
            return Ok(());
        }
        let mut emptied = Vec::new();
        for (group, filter) in unwrapped {
            let key = SubKey::new(client_id, group.clone());
            if self.index.durable_cache.remove(filter, &key) {
                emptied.push(filter.clone());
            }
        }
        if emptied.is_empty() || from_cluster {
            return Ok(());
        }
        self.store
            .set_remove(self.keys.filter_set(), &emptied)
            .await
            .map_err(SubscriptionError::Store)
    }

    /// Stream every record whose filter matches the published topic, across
    /// both session tiers. Dropping the receiver cancels production.
    ///
    /// With the inner cache enabled this never touches the store; without it
    /// the durable tier is read live and records are rebuilt from the hash
    /// fields.
    pub fn search_subscribers(&self, topic_name: &str) -> mpsc::Receiver<ClientSub> {
        let (tx, rx) = mpsc::channel(FANOUT_CHANNEL_CAPACITY);
        let service = self.clone();
        let topic_name = topic_name.to_string();
        tokio::spawn(async move {
            service.produce_subscribers(&topic_name, tx).await;
        });
        rx
    }

    async fn produce_subscribers(&self, topic_name: &str, tx: mpsc::Sender<ClientSub>) {
        let mut local = Vec::new();
        self.index.ephemeral.collect_matches(topic_name, &mut local);
        if self.inner_cache {
            self.index
                .durable_cache
                .collect_matches(topic_name, &mut local);
        }
        for sub in local {
            if tx.send(sub).await.is_err() {
                return;
            }
        }
        if self.inner_cache {
            return;
        }

        let filters = match self.store.set_members(self.keys.filter_set()).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!("filter set read failed during fan-out: {err:?}");
                return;
            }
        };
        for filter in filters {
            if !topic::topic_matches(topic_name, &filter) {
                continue;
            }
            let entries = match self.store.hash_entries(&self.keys.filter_hash(&filter)).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!("subscriber hash read failed for {filter:?}: {err:?}");
                    return;
                }
            };
            for (field, value) in entries {
                let (client_id, group) = store::parse_sub_key(&field);
                let Some(qos) = Qos::from_store_value(&value) else {
                    tracing::warn!("unparseable qos {value:?} under filter {filter:?}");
                    continue;
                };
                let sub = ClientSub::new(
                    client_id,
                    qos,
                    filter.clone(),
                    false,
                    group.map(str::to_string),
                );
                if tx.send(sub).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Remove everything one client holds in the given tier, share groups
    /// included: each record is re-wrapped to its `$share` wire form so the
    /// store fields and peer caches clear precisely.
    pub async fn clear_client_subscriptions(
        &self,
        client_id: &str,
        clean_session: bool,
    ) -> Result<(), SubscriptionError> {
        validate_client_id(client_id)?;

        if clean_session {
            let filters = self.index.take_client_filters(client_id);
            if filters.is_empty() {
                return Ok(());
            }
            let mut topics = Vec::with_capacity(filters.len());
            for filter in &filters {
                let records = self.index.ephemeral.records_for_client(filter, client_id);
                if records.is_empty() {
                    // tracked but already gone; unsubscribe stays idempotent
                    topics.push(filter.clone());
                    continue;
                }
                for record in records {
                    topics.push(wire_topic(&record.share_group, filter));
                }
            }
            return self.unsubscribe_inner(client_id, true, topics, false).await;
        }

        let client_key = self.keys.client_filters(client_id);
        let filters = self
            .store
            .set_members(&client_key)
            .await
            .map_err(SubscriptionError::Store)?;
        self.store
            .delete(&client_key)
            .await
            .map_err(SubscriptionError::Store)?;
        if filters.is_empty() {
            return Ok(());
        }
        let mut topics = Vec::with_capacity(filters.len());
        for filter in &filters {
            let entries = self
                .store
                .hash_entries(&self.keys.filter_hash(filter))
                .await
                .map_err(SubscriptionError::Store)?;
            let mut found = false;
            for (field, _) in entries {
                let (owner, group) = store::parse_sub_key(&field);
                if owner == client_id {
                    found = true;
                    topics.push(wire_topic(&group.map(str::to_string), filter));
                }
            }
            if !found {
                topics.push(filter.clone());
            }
        }
        self.unsubscribe_inner(client_id, false, topics, false).await
    }

    /// Drop every filter the client is no longer authorized for, across
    /// both tiers. Deliberately broad: the collected list is unsubscribed
    /// against each tier in turn, which may attempt removals that do not
    /// exist; removals are idempotent.
    pub async fn clear_unauthorized(
        &self,
        client_id: &str,
        authorized: &[String],
    ) -> Result<(), SubscriptionError> {
        validate_client_id(client_id)?;
        let mut collected = Vec::new();
        self.index
            .durable_cache
            .filters_not_in(authorized, &mut collected);
        self.index
            .ephemeral
            .filters_not_in(authorized, &mut collected);
        if collected.is_empty() {
            return Ok(());
        }
        self.unsubscribe_inner(client_id, false, collected.clone(), false)
            .await?;
        self.unsubscribe_inner(client_id, true, collected, false)
            .await
    }

    /// Register a `$SYS` subscription. System topics live in their own
    /// index: not durable, not clustered, not reloaded.
    pub fn subscribe_sys(&self, sub: ClientSub) -> Result<(), SubscriptionError> {
        validate_client_id(&sub.client_id)?;
        topic::validate_filter(&sub.filter)?;
        self.sys.insert(sub);
        Ok(())
    }

    pub fn unsubscribe_sys(&self, client_id: &str, topics: &[String]) {
        for filter in topics {
            self.sys.remove(client_id, filter);
        }
    }

    pub fn clear_client_sys(&self, client_id: &str) {
        self.sys.remove_client(client_id);
    }

    /// All `$SYS` subscribers matching the topic. Every stored filter is
    /// treated as potentially wildcard, so this always scans.
    pub fn search_sys_subscribers(&self, topic_name: &str) -> Vec<ClientSub> {
        self.sys.matches(topic_name)
    }

    /// Apply one peer sub/unsub event. Same-origin envelopes are dropped;
    /// the shared store is never written from here.
    pub async fn apply_cluster_event(&self, payload: &[u8]) -> Result<(), SubscriptionError> {
        let envelope: InternalMessage<ClientSubOrUnsubMsg> = self
            .wire
            .decode(payload)
            .map_err(SubscriptionError::Decode)?;
        if envelope.broker_id == self.broker_id {
            return Ok(());
        }
        let msg = envelope.data;
        match msg.kind {
            TYPE_SUB => {
                let raw_topic = msg.topic.as_deref().ok_or_else(|| {
                    SubscriptionError::Decode(anyhow!("SUB event without a topic"))
                })?;
                let (share_group, filter) = topic::unwrap_shared(raw_topic)?;
                let qos = Qos::from_u8(msg.qos).ok_or_else(|| {
                    SubscriptionError::Decode(anyhow!("SUB event with qos {}", msg.qos))
                })?;
                let sub = ClientSub::new(
                    msg.client_id.clone(),
                    qos,
                    filter.clone(),
                    msg.clean_session,
                    share_group,
                );
                if msg.clean_session {
                    self.index.ephemeral.insert(sub);
                    self.index.track_client_filter(&msg.client_id, &filter);
                } else if self.inner_cache {
                    self.index.durable_cache.insert(sub);
                }
                Ok(())
            }
            TYPE_UNSUB => {
                self.unsubscribe_inner(&msg.client_id, msg.clean_session, msg.topics, true)
                    .await
            }
            other => Err(SubscriptionError::Decode(anyhow!(
                "unknown sub/unsub event type {other}"
            ))),
        }
    }

    async fn broadcast_sub(&self, sub: &ClientSub) {
        let Some(bus) = self.bus.clone() else {
            return;
        };
        // shared filters travel re-wrapped so peers parse identically
        let topic_form = wire_topic(&sub.share_group, &sub.filter);
        let msg =
            ClientSubOrUnsubMsg::sub(&sub.client_id, sub.qos.as_u8(), topic_form, sub.clean_session);
        self.publish(&bus, msg).await;
    }

    async fn broadcast_unsub(&self, client_id: &str, clean_session: bool, topics: Vec<String>) {
        let Some(bus) = self.bus.clone() else {
            return;
        };
        let msg = ClientSubOrUnsubMsg::unsub(client_id, clean_session, topics);
        self.publish(&bus, msg).await;
    }

    /// Best-effort gossip: failures are logged, never surfaced; the local
    /// operation already completed.
    async fn publish(&self, bus: &Arc<dyn ClusterBus>, msg: ClientSubOrUnsubMsg) {
        let envelope = InternalMessage::new(msg, self.broker_id.clone());
        match self.wire.encode(&envelope) {
            Ok(bytes) => {
                if let Err(err) = bus.publish(SUB_UNSUB_CHANNEL, Bytes::from(bytes)).await {
                    tracing::warn!("sub/unsub broadcast failed: {err:?}");
                }
            }
            Err(err) => tracing::warn!("sub/unsub envelope encode failed: {err:?}"),
        }
    }

    /// Cold-start load of the durable-cache tier: classify every filter,
    /// then rebuild its subscriber records from the hash fields. Failures
    /// are logged and surfaced; the broker must refuse to serve.
    async fn reload_cache(&self) -> Result<(), SubscriptionError> {
        let filters = match self.store.set_members(self.keys.filter_set()).await {
            Ok(filters) => filters,
            Err(err) => {
                tracing::error!("cold-start cache reload failed reading the filter set: {err:?}");
                return Err(SubscriptionError::Store(err));
            }
        };
        for filter in &filters {
            self.index.durable_cache.insert_filter(filter);
        }
        let mut records = 0_usize;
        for filter in &filters {
            let entries = match self.store.hash_entries(&self.keys.filter_hash(filter)).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::error!(
                        "cold-start cache reload failed reading filter {filter:?}: {err:?}"
                    );
                    return Err(SubscriptionError::Store(err));
                }
            };
            for (field, value) in entries {
                let (client_id, group) = store::parse_sub_key(&field);
                let Some(qos) = Qos::from_store_value(&value) else {
                    tracing::error!(
                        "cold-start cache reload hit unparseable qos {value:?} under filter {filter:?}"
                    );
                    return Err(SubscriptionError::Store(anyhow!(
                        "unparseable qos {value:?} under filter {filter:?}"
                    )));
                };
                self.index.durable_cache.insert(ClientSub::new(
                    client_id,
                    qos,
                    filter.clone(),
                    false,
                    group.map(str::to_string),
                ));
                records += 1;
            }
        }
        tracing::info!(
            "durable subscription cache loaded: {} filters, {} records",
            filters.len(),
            records
        );
        Ok(())
    }
}

#[async_trait]
impl<S: SubscriptionStore> ChannelWatcher for SubscriptionService<S> {
    fn supports(&self, channel: &str) -> bool {
        channel == SUB_UNSUB_CHANNEL
    }

    async fn on_event(&self, payload: &[u8]) {
        if let Err(err) = self.apply_cluster_event(payload).await {
            tracing::warn!("dropping sub/unsub cluster event: {err}");
        }
    }
}

/// Wire form of a filter: wrapped back into `$share/<group>/<filter>` when a
/// group is present.
fn wire_topic(share_group: &Option<String>, filter: &str) -> String {
    match share_group {
        Some(group) => topic::shared_filter(group, filter),
        None => filter.to_string(),
    }
}

fn validate_client_id(client_id: &str) -> Result<(), SubscriptionError> {
    if client_id.is_empty() {
        return Err(SubscriptionError::invalid_client_id(client_id, "empty"));
    }
    if client_id.contains(store::SHARE_KEY_SEPARATOR) {
        return Err(SubscriptionError::invalid_client_id(
            client_id,
            "contains the share-key separator",
        ));
    }
    Ok(())
}

fn validate_share_group(group: &str) -> Result<(), SubscriptionError> {
    if group.is_empty() {
        return Err(SubscriptionError::invalid_share_group(group, "empty"));
    }
    if group.contains('/') || topic::is_wildcard(group) {
        return Err(SubscriptionError::invalid_share_group(
            group,
            "must be a single literal level",
        ));
    }
    if group.contains(store::SHARE_KEY_SEPARATOR) {
        return Err(SubscriptionError::invalid_share_group(
            group,
            "contains the share-key separator",
        ));
    }
    Ok(())
}
