use thiserror::Error;

/// Errors surfaced by the subscription index.
///
/// Invalid-input variants are raised before any state is mutated. Store
/// failures leave the ephemeral tier untouched and skip the cluster
/// broadcast; retrying is the caller's responsibility.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("invalid topic filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: &'static str },

    #[error("invalid client id {client_id:?}: {reason}")]
    InvalidClientId {
        client_id: String,
        reason: &'static str,
    },

    #[error("invalid share group {group:?}: {reason}")]
    InvalidShareGroup {
        group: String,
        reason: &'static str,
    },

    #[error("durable store operation failed")]
    Store(#[source] anyhow::Error),

    #[error("malformed cluster event")]
    Decode(#[source] anyhow::Error),
}

impl SubscriptionError {
    pub fn invalid_filter(filter: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            reason,
        }
    }

    pub fn invalid_client_id(client_id: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidClientId {
            client_id: client_id.into(),
            reason,
        }
    }

    pub fn invalid_share_group(group: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidShareGroup {
            group: group.into(),
            reason,
        }
    }
}
