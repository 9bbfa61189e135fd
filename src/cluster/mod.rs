//! Cluster coordination for the subscription index.
//!
//! - `bus` - transport seam and a loopback implementation
//! - `message` - wire messages, envelope, and the injected codec

pub mod bus;
pub mod message;

pub use bus::*;
pub use message::*;

use async_trait::async_trait;

/// Inbound side of the gossip contract: a watcher claims channels by name
/// and receives raw payloads from the transport. Malformed or same-origin
/// events are the watcher's problem to drop; the transport stays dumb.
#[async_trait]
pub trait ChannelWatcher: Send + Sync {
    fn supports(&self, channel: &str) -> bool;

    async fn on_event(&self, payload: &[u8]);
}
