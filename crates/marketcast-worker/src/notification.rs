//! Delivery notification parsing
//!
//! A queue message carries one object-storage event, either raw or wrapped in
//! an SNS envelope, and the event can hold many records. Each record becomes
//! one independent unit of work.

use marketcast_core::{Classify, Disposition};
use serde::Deserialize;
use serde_json::Value;

const OBJECT_CREATED_PREFIX: &str = "ObjectCreated:";
const TEST_EVENT: &str = "s3:TestEvent";

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Invalid notification JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unrecognized notification body")]
    Unrecognized,
}

impl Classify for NotificationError {
    /// A body that does not parse now will not parse on redelivery.
    fn disposition(&self) -> Disposition {
        Disposition::Terminal
    }
}

/// One landed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub bucket: String,
    /// Decoded object key.
    pub key: String,
    pub size: Option<u64>,
    pub event_name: String,
}

impl ObjectRecord {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size: None,
            event_name: "ObjectCreated:Put".to_string(),
        }
    }
}

/// Work extracted from one message body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub records: Vec<ObjectRecord>,
    /// Records that are not object creations, and test events.
    pub ignored: usize,
    /// Records that could not be parsed.
    pub malformed: usize,
}

#[derive(Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Deserialize)]
struct EventRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
    size: Option<u64>,
}

/// Parse a queue message body.
///
/// Fails only when the body as a whole is unusable. A bad record inside an
/// otherwise valid event is counted as malformed and the rest are kept.
pub fn parse(body: &str) -> Result<Envelope, NotificationError> {
    let value: Value = serde_json::from_str(body)?;
    parse_value(value, true)
}

fn parse_value(value: Value, allow_sns: bool) -> Result<Envelope, NotificationError> {
    if value.get("Event").and_then(Value::as_str) == Some(TEST_EVENT) {
        tracing::debug!("Ignoring S3 test event");
        return Ok(Envelope {
            ignored: 1,
            ..Envelope::default()
        });
    }

    if allow_sns && value.get("Type").is_some() && value.get("Message").is_some() {
        let sns: SnsEnvelope = serde_json::from_value(value)?;
        if sns.kind != "Notification" {
            tracing::debug!(kind = %sns.kind, "Ignoring SNS message");
            return Ok(Envelope {
                ignored: 1,
                ..Envelope::default()
            });
        }
        let inner: Value = serde_json::from_str(&sns.message)?;
        return parse_value(inner, false);
    }

    let Some(Value::Array(records)) = value.get("Records") else {
        return Err(NotificationError::Unrecognized);
    };

    let mut envelope = Envelope::default();
    for (index, raw) in records.iter().enumerate() {
        let record: EventRecord = match serde_json::from_value(raw.clone()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping malformed notification record");
                envelope.malformed += 1;
                continue;
            }
        };

        if !record.event_name.starts_with(OBJECT_CREATED_PREFIX) {
            tracing::debug!(event_name = %record.event_name, "Ignoring non-creation event");
            envelope.ignored += 1;
            continue;
        }

        let key = match decode_key(&record.s3.object.key) {
            Some(key) if !key.is_empty() => key,
            _ => {
                tracing::warn!(
                    index,
                    raw_key = %record.s3.object.key,
                    "Skipping record with undecodable key"
                );
                envelope.malformed += 1;
                continue;
            }
        };

        envelope.records.push(ObjectRecord {
            bucket: record.s3.bucket.name,
            key,
            size: record.s3.object.size,
            event_name: record.event_name,
        });
    }

    Ok(envelope)
}

/// Object keys arrive form-encoded: `+` is a space and the rest is
/// percent-encoded.
fn decode_key(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|key| key.into_owned())
}
