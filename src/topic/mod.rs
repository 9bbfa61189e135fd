//! MQTT topic-filter utilities.
//!
//! Pure functions over topic strings: wildcard detection, shared-subscription
//! (`$share/<group>/<filter>`) parsing, filter validation, and level-wise
//! matching. No state lives here.

use crate::core::error::SubscriptionError;

/// Prefix marking an MQTT 5 shared subscription.
pub const SHARE_PREFIX: &str = "$share/";

/// True if the filter contains a `+` or `#` wildcard.
pub fn is_wildcard(filter: &str) -> bool {
    filter.contains('+') || filter.contains('#')
}

/// True if the topic carries the shared-subscription prefix.
pub fn is_shared(topic: &str) -> bool {
    topic.starts_with(SHARE_PREFIX)
}

/// A shared filter split into its group name and inner filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFilter {
    pub group: String,
    pub filter: String,
}

/// Split `$share/<group>/<filter>` into its parts.
pub fn parse_shared(topic: &str) -> Result<SharedFilter, SubscriptionError> {
    let rest = topic
        .strip_prefix(SHARE_PREFIX)
        .ok_or_else(|| SubscriptionError::invalid_filter(topic, "missing $share prefix"))?;
    let (group, filter) = rest
        .split_once('/')
        .ok_or_else(|| SubscriptionError::invalid_filter(topic, "missing share group or filter"))?;
    if group.is_empty() {
        return Err(SubscriptionError::invalid_filter(topic, "empty share group"));
    }
    if is_wildcard(group) {
        return Err(SubscriptionError::invalid_filter(
            topic,
            "share group must not contain wildcards",
        ));
    }
    if filter.is_empty() {
        return Err(SubscriptionError::invalid_filter(topic, "empty shared filter"));
    }
    Ok(SharedFilter {
        group: group.to_string(),
        filter: filter.to_string(),
    })
}

/// Re-wrap a filter into its `$share/<group>/<filter>` wire form.
pub fn shared_filter(group: &str, filter: &str) -> String {
    format!("{SHARE_PREFIX}{group}/{filter}")
}

/// Unwrap a possibly shared topic into `(share_group, filter)`.
pub fn unwrap_shared(topic: &str) -> Result<(Option<String>, String), SubscriptionError> {
    if is_shared(topic) {
        let shared = parse_shared(topic)?;
        Ok((Some(shared.group), shared.filter))
    } else {
        Ok((None, topic.to_string()))
    }
}

/// Validate a topic filter as it is stored in the index: non-empty, already
/// unwrapped, `+` alone in its level, `#` alone and terminal.
pub fn validate_filter(filter: &str) -> Result<(), SubscriptionError> {
    if filter.is_empty() {
        return Err(SubscriptionError::invalid_filter(filter, "empty filter"));
    }
    if is_shared(filter) {
        return Err(SubscriptionError::invalid_filter(
            filter,
            "shared filters must be unwrapped before indexing",
        ));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err(SubscriptionError::invalid_filter(
                    filter,
                    "# must occupy a whole level",
                ));
            }
            if i != last {
                return Err(SubscriptionError::invalid_filter(
                    filter,
                    "# is only valid as the final level",
                ));
            }
        } else if level.contains('+') && *level != "+" {
            return Err(SubscriptionError::invalid_filter(
                filter,
                "+ must occupy a whole level",
            ));
        }
    }
    Ok(())
}

/// Level-wise MQTT match of a concrete topic against a filter.
///
/// `+` matches exactly one non-empty level; `#` matches the remainder,
/// including the parent level (`a/#` matches `a`). Topics starting with `$`
/// are never matched by filters whose first level is a wildcard.
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    let filter_levels: Vec<&str> = filter.split('/').collect();
    if topic.starts_with('$') && matches!(filter_levels[0], "+" | "#") {
        return false;
    }
    let topic_levels: Vec<&str> = topic.split('/').collect();

    let mut fi = 0;
    let mut ti = 0;

    while fi < filter_levels.len() {
        let fl = filter_levels[fi];

        if fl == "#" {
            return true;
        }

        if ti >= topic_levels.len() {
            return false;
        }

        if fl == "+" {
            if topic_levels[ti].is_empty() {
                return false;
            }
            fi += 1;
            ti += 1;
            continue;
        }

        if fl != topic_levels[ti] {
            return false;
        }

        fi += 1;
        ti += 1;
    }

    ti == topic_levels.len()
}
