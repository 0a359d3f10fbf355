mod common;

use bagflow::error::MalformedEventError;
use bagflow::events::{FilterConfig, NotificationFilter, StorageEvent};
use chrono::Utc;
use common::event;
use serde_json::json;

fn filter() -> NotificationFilter {
    NotificationFilter::new(FilterConfig::default())
}

#[test]
fn ignores_other_buckets() {
    let ev = event("other", "x.mcap");
    assert_eq!(filter().filter(&ev).count(), 0);
}

#[test]
fn accepts_raw_bag_files() {
    let ev = event("raw-data", "robot_log_1.mcap");
    let files: Vec<_> = filter().filter(&ev).collect();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].bucket, "raw-data");
    assert_eq!(files[0].object_key, "robot_log_1.mcap");
}

#[test]
fn ignores_other_extensions_and_bare_suffix() {
    for key in ["notes.txt", "robot_log_1.mcap.tmp", ".mcap"] {
        let ev = event("raw-data", key);
        assert_eq!(filter().filter(&ev).count(), 0, "{key}");
    }
}

#[test]
fn keeps_record_order_and_skips_incomplete_records() {
    let body = json!({
        "Records": [
            { "eventName": "s3:ObjectCreated:Put", "s3": { "bucket": { "name": "raw-data" }, "object": { "key": "b.mcap" } } },
            { "eventName": "s3:ObjectCreated:Put", "s3": { "bucket": { "name": "raw-data" } } },
            { "eventName": "s3:ObjectCreated:Put" },
            "not even an object",
            { "eventName": "s3:ObjectCreated:Put", "s3": { "bucket": { "name": "raw-data" }, "object": { "key": "a.mcap" } } }
        ]
    });
    let ev = StorageEvent::from_value(&body, Utc::now()).unwrap();
    assert_eq!(ev.records().len(), 5);

    let keys: Vec<_> = filter().filter(&ev).map(|f| f.object_key).collect();
    assert_eq!(keys, vec!["b.mcap", "a.mcap"]);
}

#[test]
fn empty_records_is_valid_and_yields_nothing() {
    let ev = StorageEvent::from_slice(br#"{"Records": []}"#).unwrap();
    assert!(ev.is_empty());
    assert_eq!(filter().filter(&ev).count(), 0);
}

#[test]
fn malformed_bodies_are_rejected() {
    assert!(matches!(
        StorageEvent::from_slice(b"not json"),
        Err(MalformedEventError::InvalidJson(_))
    ));
    assert!(matches!(
        StorageEvent::from_slice(b"{}"),
        Err(MalformedEventError::MissingRecords)
    ));
    assert!(matches!(
        StorageEvent::from_slice(br#"{"Records": {"a": 1}}"#),
        Err(MalformedEventError::RecordsNotArray)
    ));
}

#[test]
fn decodes_form_encoded_keys() {
    let body = json!({
        "Records": [{
            "eventName": "s3:ObjectCreated:Put",
            "s3": { "bucket": { "name": "raw-data" }, "object": { "key": "runs%2Fday+1%2Flog.mcap", "eTag": "abc" } }
        }]
    });
    let ev = StorageEvent::from_value(&body, Utc::now()).unwrap();
    let file = filter().filter(&ev).next().unwrap();

    assert_eq!(file.object_key, "runs/day 1/log.mcap");
    assert_eq!(file.content_version.as_deref(), Some("abc"));
}

#[test]
fn prefix_and_event_name_policies() {
    let f = NotificationFilter::new(FilterConfig {
        key_prefix: Some("fleet/".to_string()),
        event_prefixes: vec!["s3:ObjectCreated:".to_string()],
        ..FilterConfig::default()
    });

    assert_eq!(f.filter(&event("raw-data", "fleet/a.mcap")).count(), 1);
    assert_eq!(f.filter(&event("raw-data", "other/a.mcap")).count(), 0);

    let removed = json!({
        "Records": [{
            "eventName": "s3:ObjectRemoved:Delete",
            "s3": { "bucket": { "name": "raw-data" }, "object": { "key": "fleet/a.mcap" } }
        }]
    });
    let ev = StorageEvent::from_value(&removed, Utc::now()).unwrap();
    assert_eq!(f.filter(&ev).count(), 0);
}
