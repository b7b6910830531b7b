//! Producer identity resolution.
//!
//! Business subsystems name their identity and topic attributes
//! differently, so the producer identity is recovered by convention: among
//! all values of the properties bundle, the one starting with `GID-` that
//! contains the normalized topic.
//!
//! ```text
//! msg_notice_topic = SDHS_MSG_NOTICE_TOPIC_test2
//! msg_notice_pid   = GID-SDHS_MSG_NOTICE_test2
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Prefix every producer/group identifier value carries.
pub const IDENTIFIER_PREFIX: &str = "GID-";

const TOPIC_SUFFIX: &str = "_topic";

/// Key of the optional consumer identifier in a properties bundle.
pub const CONSUMER_ID_KEY: &str = "ConsumerId";

/// Key/value bundle attached to a producer or consumer descriptor.
///
/// Iteration is in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `ConsumerId` entry. Keys loaded through the config layer may be
    /// lower-cased, so the key is matched ignoring ASCII case.
    pub fn consumer_id(&self) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(CONSUMER_ID_KEY))
            .map(|(_, value)| value)
    }
}

impl From<BTreeMap<String, String>> for Properties {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        f.write_str("}")
    }
}

/// Resolves the producer identity for `topic` from `properties`.
///
/// Two normalized forms of the topic are matched: every `_topic` removed,
/// and the topic truncated at its first `_topic`. Matching is ASCII
/// case-insensitive. When several entries match, the first in key order
/// wins.
pub fn resolve_producer_id(properties: &Properties, topic: &str) -> Result<String> {
    let stripped = topic.replace(TOPIC_SUFFIX, "").to_ascii_lowercase();
    let truncated = match topic.find(TOPIC_SUFFIX) {
        Some(index) => &topic[..index],
        None => topic,
    }
    .to_ascii_lowercase();

    let candidates: Vec<(&str, &str)> = properties
        .iter()
        .filter(|(_, value)| value.starts_with(IDENTIFIER_PREFIX))
        .filter(|(_, value)| {
            let value = value.to_ascii_lowercase();
            value.contains(&stripped) || value.contains(&truncated)
        })
        .collect();

    match candidates.as_slice() {
        [] => Err(Error::IdentifierNotFound {
            topic: topic.to_string(),
            properties: properties.to_string(),
        }),
        [(key, value)] => {
            debug!(topic, key, producer_id = value, "Resolved producer identifier");
            Ok(value.to_string())
        }
        [(key, value), ..] => {
            warn!(
                topic,
                candidates = ?candidates,
                "Several producer identifiers match, using '{}' from '{}'",
                value,
                key
            );
            Ok(value.to_string())
        }
    }
}
