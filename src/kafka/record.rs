//! Mapping between messages and Kafka records.
//!
//! The message key becomes the record key, the body the payload. The tag
//! and the delivery time of delayed messages travel as headers.

use crate::message::{Message, NormalizedMessage, SendReceipt};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::FutureRecord;
use rdkafka::Message as KafkaMessage;

pub const TAG_HEADER: &str = "tag";
pub const DELIVER_AT_HEADER: &str = "deliver-at";

pub fn message_id(topic: &str, partition: i32, offset: i64) -> String {
    format!("{}-{}@{}", topic, partition, offset)
}

pub fn receipt(topic: &str, partition: i32, offset: i64) -> SendReceipt {
    SendReceipt {
        message_id: message_id(topic, partition, offset),
        topic: topic.to_string(),
    }
}

pub fn headers(message: &NormalizedMessage, now: DateTime<Utc>) -> OwnedHeaders {
    let mut headers = OwnedHeaders::new();
    if let Some(tag) = &message.tag {
        headers = headers.insert(Header {
            key: TAG_HEADER,
            value: Some(tag.as_str()),
        });
    }
    if let Some(at) = message.delay.deliver_at(now) {
        let millis = at.timestamp_millis().to_string();
        headers = headers.insert(Header {
            key: DELIVER_AT_HEADER,
            value: Some(millis.as_str()),
        });
    }
    headers
}

pub fn future_record(message: &NormalizedMessage, now: DateTime<Utc>) -> FutureRecord<'_, str, [u8]> {
    FutureRecord::to(&message.topic)
        .key(message.key.as_str())
        .payload(message.body.as_ref())
        .headers(headers(message, now))
}

fn header_value<H: Headers + ?Sized>(headers: Option<&H>, name: &str) -> Option<String> {
    let headers = headers?;
    (0..headers.count())
        .map(|idx| headers.get(idx))
        .find(|header| header.key == name)
        .and_then(|header| header.value)
        .map(|value| String::from_utf8_lossy(value).into_owned())
}

/// Converts a consumed record into the caller-facing message.
pub fn to_message<M: KafkaMessage>(record: &M) -> Message {
    let headers = record.headers();
    let deliver_at = header_value(headers, DELIVER_AT_HEADER)
        .and_then(|millis| millis.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis);

    Message {
        topic: record.topic().to_string(),
        tag: header_value(headers, TAG_HEADER),
        key: record.key().map(|k| String::from_utf8_lossy(k).into_owned()),
        msg_id: Some(message_id(record.topic(), record.partition(), record.offset())),
        body: Bytes::copy_from_slice(record.payload().unwrap_or_default()),
        deliver_at,
    }
}
