#![deny(unused, dead_code)]
#![deny(clippy::all, clippy::pedantic)]
// Module naming: common pattern in domain-driven code
#![allow(clippy::module_name_repetitions)]
// Documentation style: many terms don't need backticks
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// API ergonomics: prefer simplicity over must_use annotations
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
// Format strings: allow non-inlined for readability
#![allow(clippy::uninlined_format_args)]
// Import style
#![allow(clippy::wildcard_imports)]
// Numeric casts: intentional in protocol code
#![allow(clippy::cast_possible_truncation)]
// Passing style
#![allow(clippy::needless_pass_by_value)]
// Option/Result patterns
#![allow(clippy::option_if_let_else)]
#![allow(clippy::map_unwrap_or)]
// Default trait access
#![allow(clippy::default_trait_access)]
// Async functions that may not await yet
#![allow(clippy::unused_async)]

//! Trellis - clustered MQTT subscription index.
//!
//! Maps every inbound PUBLISH topic to the set of clients that should
//! receive it, honoring MQTT wildcards (`+`, `#`), MQTT 5 shared
//! subscriptions, per-session durability, and cluster-wide coherence
//! between broker peers.
//!
//! # Module Organization
//!
//! ## Core
//! - `core::config` - Configuration parsing and validation
//! - `core::error` - Error taxonomy
//!
//! ## Topic
//! - `topic` - Filter validation, `$share` parsing, wildcard matching
//!
//! ## Index
//! - `index` - Concurrent in-memory tiers and the `$SYS` index
//! - `index::record` - Subscription records and bucket keys
//!
//! ## Store
//! - `store` - Durable-store contract, key schema, in-memory backend
//!
//! ## Cluster
//! - `cluster::bus` - Transport seam and loopback bus
//! - `cluster::message` - Sub/unsub wire messages and envelope codec
//!
//! ## Service
//! - `service` - Subscribe/unsubscribe orchestration, fan-out query,
//!   cache coherence, peer event application

// Core infrastructure
pub mod core;

// Topic utilities
pub mod topic;

// In-memory index
pub mod index;

// Durable store
pub mod store;

// Cluster coordination
pub mod cluster;

// Orchestration
pub mod service;

// Re-exports for convenience
pub use self::core::{config, error};
pub use self::core::{Config, SubscriptionError};
pub use cluster::{ChannelWatcher, ClientSubOrUnsubMsg, ClusterBus, InternalMessage, LoopbackBus};
pub use cluster::{WireFormat, SUB_UNSUB_CHANNEL};
pub use index::{ClientSub, Qos, SubKey};
pub use service::SubscriptionService;
pub use store::{MemoryStore, SubscriptionStore};
