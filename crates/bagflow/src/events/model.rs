use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::MalformedEventError;

/// One storage-change notification record, as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub event_name: String,
    pub bucket: String,
    pub object_key: String,
    pub etag: Option<String>,
    pub version_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl EventRecord {
    /// Version id wins over the ETag when both are present.
    pub fn content_version(&self) -> Option<&str> {
        self.version_id.as_deref().or(self.etag.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageEvent {
    records: Vec<EventRecord>,
}

impl StorageEvent {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, MalformedEventError> {
        Self::from_slice_at(body, Utc::now())
    }

    pub fn from_slice_at(
        body: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<Self, MalformedEventError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| MalformedEventError::InvalidJson(e.to_string()))?;
        Self::from_value(&value, received_at)
    }

    pub fn from_value(
        value: &Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, MalformedEventError> {
        let records = value
            .get("Records")
            .ok_or(MalformedEventError::MissingRecords)?
            .as_array()
            .ok_or(MalformedEventError::RecordsNotArray)?;

        // A record we cannot read becomes an empty record, which no filter accepts.
        let records = records
            .iter()
            .map(|raw| {
                let wire: WireRecord = serde_json::from_value(raw.clone()).unwrap_or_default();
                EventRecord {
                    event_name: wire.event_name,
                    bucket: wire.s3.bucket.name,
                    object_key: decode_object_key(&wire.s3.object.key),
                    etag: wire.s3.object.e_tag.filter(|s| !s.is_empty()),
                    version_id: wire.s3.object.version_id.filter(|s| !s.is_empty()),
                    received_at,
                }
            })
            .collect();

        Ok(Self { records })
    }
}

/// A record the filter decided to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionableFile {
    pub bucket: String,
    pub object_key: String,
    pub content_version: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl ActionableFile {
    pub fn from_record(record: &EventRecord) -> Self {
        Self {
            bucket: record.bucket.clone(),
            object_key: record.object_key.clone(),
            content_version: record.content_version().map(str::to_string),
            detected_at: record.received_at,
        }
    }
}

/// Object keys arrive form-encoded (`+` for space, `%XX` escapes).
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Builds an `s3:ObjectCreated:Put` notification body for one object.
pub fn sample_notification(bucket: &str, key: &str) -> Value {
    json!({
        "Records": [{
            "eventName": "s3:ObjectCreated:Put",
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": urlencoding::encode(key).into_owned() }
            }
        }]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: WireS3,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireS3 {
    bucket: WireBucket,
    object: WireObject,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireBucket {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireObject {
    key: String,
    #[serde(rename = "eTag")]
    e_tag: Option<String>,
    #[serde(rename = "versionId")]
    version_id: Option<String>,
}
