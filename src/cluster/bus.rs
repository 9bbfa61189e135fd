//! Cluster bus transport seam.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

/// Opaque transport publishing sub/unsub gossip to peer brokers.
///
/// Delivery is best-effort and fire-and-forget: the service logs publish
/// failures but never fails the local operation over them.
#[async_trait]
pub trait ClusterBus: Send + Sync + 'static {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;
}

/// Broadcast-channel bus for tests and single-process clusters.
#[derive(Debug, Clone)]
pub struct LoopbackBus {
    tx: broadcast::Sender<(String, Bytes)>,
}

impl LoopbackBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, Bytes)> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ClusterBus for LoopbackBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        // no receivers is fine; gossip is best-effort
        let _ = self.tx.send((channel.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_delivers_to_subscribers() {
        let bus = LoopbackBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish("sub/unsub", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let (channel, payload) = rx.recv().await.unwrap();
        assert_eq!(channel, "sub/unsub");
        assert_eq!(payload.as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = LoopbackBus::new(8);
        assert!(bus
            .publish("sub/unsub", Bytes::from_static(b"x"))
            .await
            .is_ok());
    }
}
