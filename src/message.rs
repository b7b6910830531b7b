//! Messages on both sides of the redirection.
//!
//! [`NormalizedMessage`] is what the interception layer hands to a backend,
//! one per call. [`Message`] is the caller-facing shape handed to local
//! transaction executors, checkers and consumer listeners.

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery delay of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delay {
    Minutes(i64),
    Seconds(i64),
    Millis(i64),
}

impl Delay {
    pub const NONE: Delay = Delay::Minutes(0);

    pub fn is_zero(&self) -> bool {
        self.as_millis() <= 0
    }

    pub fn as_millis(&self) -> i64 {
        match *self {
            Delay::Minutes(m) => m.saturating_mul(60_000),
            Delay::Seconds(s) => s.saturating_mul(1_000),
            Delay::Millis(ms) => ms,
        }
    }

    /// Absolute delivery time for a message sent at `now`, `None` when
    /// immediate. Delays past the representable range end at
    /// `DateTime::<Utc>::MAX_UTC`.
    pub fn deliver_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_zero() {
            return None;
        }
        let at = TimeDelta::try_milliseconds(self.as_millis())
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Some(at)
    }
}

impl Default for Delay {
    fn default() -> Self {
        Delay::NONE
    }
}

/// Broker-agnostic message built from one intercepted call.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub body: Bytes,
    pub tag: Option<String>,
    pub key: String,
    pub topic: String,
    pub delay: Delay,
}

impl NormalizedMessage {
    pub fn new(
        topic: impl Into<String>,
        body: impl Into<Bytes>,
        tag: Option<String>,
        key: Option<String>,
        delay: Delay,
    ) -> Self {
        Self {
            body: body.into(),
            tag,
            key: key.unwrap_or_else(generate_key),
            topic: topic.into(),
            delay,
        }
    }

    /// Delay in minutes when the message was built from a minutes-based call.
    pub fn delay_minutes(&self) -> Option<i64> {
        match self.delay {
            Delay::Minutes(m) => Some(m),
            _ => None,
        }
    }
}

/// Fresh unique message key: 32 upper-case hex characters.
pub fn generate_key() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

/// Caller-facing message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub topic: String,
    pub tag: Option<String>,
    pub key: Option<String>,
    pub msg_id: Option<String>,
    pub body: Bytes,
    pub deliver_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Backend acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub topic: String,
}

/// Result of dispatching one producer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Sent and acknowledged.
    Sent(SendReceipt),
    /// Handed to the backend without waiting for an acknowledgement.
    Enqueued,
    /// The call was not recognized and nothing was sent.
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_shape() {
        let key = generate_key();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_missing_key_is_generated() {
        let msg = NormalizedMessage::new("t", "hello", Some("TAG1".into()), None, Delay::Minutes(5));
        assert_eq!(msg.key.len(), 32);
        assert_eq!(msg.delay_minutes(), Some(5));

        let msg = NormalizedMessage::new("t", "hello", None, Some("K1".into()), Delay::Seconds(5));
        assert_eq!(msg.key, "K1");
        assert_eq!(msg.delay_minutes(), None);
    }

    #[test]
    fn test_delay_units() {
        assert_eq!(Delay::Minutes(2).as_millis(), 120_000);
        assert_eq!(Delay::Seconds(3).as_millis(), 3_000);
        assert_eq!(Delay::Millis(7).as_millis(), 7);
        assert!(Delay::NONE.is_zero());
        assert!(Delay::Millis(-5).is_zero());
    }

    #[test]
    fn test_deliver_at() {
        let now = Utc::now();
        assert_eq!(Delay::NONE.deliver_at(now), None);
        assert_eq!(
            Delay::Seconds(10).deliver_at(now),
            Some(now + chrono::Duration::seconds(10))
        );
    }

    #[test]
    fn test_huge_delays_end_at_max_time() {
        let now = Utc::now();
        assert_eq!(Delay::Millis(i64::MAX).deliver_at(now), Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(Delay::Minutes(i64::MAX / 1000).deliver_at(now), Some(DateTime::<Utc>::MAX_UTC));
        assert_eq!(Delay::Seconds(i64::MAX).deliver_at(now), Some(DateTime::<Utc>::MAX_UTC));

        let at = DateTime::<Utc>::MAX_UTC;
        assert!(at.timestamp_millis() > now.timestamp_millis());
    }
}
