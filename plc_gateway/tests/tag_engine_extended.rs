use chrono::{TimeZone, Utc};
use plc_gateway::tags::engine::TagEngine;
use plc_gateway::tags::structures::{DataType, Quality, Tag, ValueVariant};
use std::sync::Arc;
use std::thread;
use tokio::time::{timeout, Duration};

fn sample_tag(name: &str, data_type: DataType) -> Tag {
    Tag::new(name, "test", "DB1.DBD0", data_type)
}

#[test]
fn test_get_value_defaults_unless_good() {
    let tag = sample_tag("Plant/Temperature", DataType::Float32);
    assert_eq!(tag.get_value(-1.0f64), -1.0);

    tag.update(ValueVariant::Float(25.5), Quality::Good);
    assert_eq!(tag.get_value(0.0f64), 25.5);
    assert_eq!(tag.get_value(0i32), 26);
    assert_eq!(tag.get_value(String::new()), "25.5");

    tag.update(ValueVariant::Float(30.0), Quality::Uncertain);
    assert_eq!(tag.get_value(-1.0f64), -1.0);
}

#[test]
fn test_get_value_conversions() {
    let flag = sample_tag("Flag", DataType::Bool);
    flag.update(ValueVariant::Int(1), Quality::Good);
    assert!(flag.get_value(false));

    let text = sample_tag("Text", DataType::String);
    text.update(ValueVariant::String("abc".into()), Quality::Good);
    assert_eq!(text.get_value(7i64), 7, "non-numeric text falls back");
    assert_eq!(text.get_value(String::new()), "abc");

    let small = sample_tag("Small", DataType::Int32);
    small.update(ValueVariant::Int(300), Quality::Good);
    assert_eq!(small.get_value(0u8), 0, "out of range falls back");
    assert_eq!(small.get_value(0u16), 300);

    let stamp = sample_tag("Stamp", DataType::DateTime);
    let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    stamp.update(ValueVariant::DateTime(when), Quality::Good);
    assert_eq!(stamp.get_value(Utc::now()), when);
}

#[test]
fn test_is_expired() {
    let tag = sample_tag("Fresh", DataType::Int16);
    tag.update(ValueVariant::Int(1), Quality::Good);
    assert!(!tag.is_expired(60));
    thread::sleep(std::time::Duration::from_millis(1100));
    assert!(tag.is_expired(0));
}

#[test]
fn test_coerce_to_data_types() {
    assert_eq!(
        ValueVariant::Float(3.6).coerce_to(DataType::Int16),
        Some(ValueVariant::Int(4))
    );
    assert_eq!(
        ValueVariant::Int(70000).coerce_to(DataType::Int16),
        None
    );
    assert_eq!(
        ValueVariant::Int(-1).coerce_to(DataType::UInt16),
        None
    );
    assert_eq!(
        ValueVariant::String("true".into()).coerce_to(DataType::Bool),
        Some(ValueVariant::Bool(true))
    );
    assert_eq!(
        ValueVariant::Int(12).coerce_to(DataType::String),
        Some(ValueVariant::String("12".into()))
    );
    assert_eq!(ValueVariant::Null.coerce_to(DataType::Int32), None);
}

#[test]
fn test_concurrent_access() {
    let engine = TagEngine::new();
    for i in 0..10 {
        engine.register_tag(sample_tag(&format!("Concurrent/Tag{}", i), DataType::Int64));
    }

    let mut handles = vec![];
    for i in 0..5 {
        let engine_clone = engine.clone();
        handles.push(thread::spawn(move || {
            for j in 0..100 {
                let name = format!("Concurrent/Tag{}", j % 10);
                engine_clone.update_tag_value(
                    &name,
                    ValueVariant::Int((i * 100 + j) as i64),
                    Quality::Good,
                );
                assert!(engine_clone.read_tag(&name).is_some());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..10 {
        let read = engine.read_tag(&format!("Concurrent/Tag{}", i)).unwrap();
        assert_eq!(read.quality, Quality::Good);
    }
}

#[test]
fn test_snapshot_is_never_torn() {
    let tag = Arc::new(sample_tag("Pair", DataType::Int64));
    let writer = {
        let tag = Arc::clone(&tag);
        thread::spawn(move || {
            for i in 0..2000i64 {
                let quality = if i % 2 == 0 { Quality::Good } else { Quality::Bad };
                tag.update(ValueVariant::Int(i), quality);
            }
        })
    };
    for _ in 0..2000 {
        let snapshot = tag.snapshot();
        if let ValueVariant::Int(i) = snapshot.value {
            let expected = if i % 2 == 0 { Quality::Good } else { Quality::Bad };
            assert_eq!(snapshot.quality, expected);
        }
    }
    writer.join().unwrap();
}

#[test]
fn test_concurrent_changes_chain_previous_to_current() {
    let engine = TagEngine::new();
    engine.register_tag(sample_tag("Shared", DataType::Int64));
    let mut changes = engine.subscribe();

    let handles: Vec<_> = (0..4i64)
        .map(|worker| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..200i64 {
                    engine.update_tag_value(
                        "Shared",
                        ValueVariant::Int(worker * 1000 + i),
                        Quality::Good,
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every write is distinct, so each one is a change. Each replaced value
    // is the initial one or a value another change stored.
    let mut previous = Vec::new();
    let mut current = Vec::new();
    while let Ok(change) = changes.try_recv() {
        assert_ne!(change.previous.value, change.current.value);
        previous.push(change.previous.value);
        current.push(change.current.value);
    }
    assert_eq!(current.len(), 800);

    let last = engine.read_tag("Shared").unwrap().value;
    let mut expected: Vec<ValueVariant> = current
        .iter()
        .filter(|value| **value != last)
        .cloned()
        .collect();
    expected.push(ValueVariant::Null);
    let key = |value: &ValueVariant| match value {
        ValueVariant::Int(i) => *i,
        _ => -1,
    };
    expected.sort_by_key(key);
    previous.sort_by_key(key);
    assert_eq!(previous, expected);
}

#[tokio::test]
async fn test_change_notifications() {
    let engine = TagEngine::new();
    engine.register_tag(sample_tag("Station1.Start", DataType::Bool));
    let mut changes = engine.subscribe();

    engine.update_tag_value("Station1.Start", ValueVariant::Bool(true), Quality::Good);
    // No change, no notification.
    engine.update_tag_value("Station1.Start", ValueVariant::Bool(true), Quality::Good);
    engine.update_tag_value("Station1.Start", ValueVariant::Bool(false), Quality::Good);

    let first = timeout(Duration::from_secs(1), changes.recv())
        .await
        .expect("first change")
        .unwrap();
    assert_eq!(first.tag_name, "Station1.Start");
    assert_eq!(first.previous.value, ValueVariant::Null);
    assert_eq!(first.previous.quality, Quality::Bad);
    assert_eq!(first.current.value, ValueVariant::Bool(true));

    let second = timeout(Duration::from_secs(1), changes.recv())
        .await
        .expect("second change")
        .unwrap();
    assert_eq!(second.previous.value, ValueVariant::Bool(true));
    assert_eq!(second.current.value, ValueVariant::Bool(false));
    assert!(changes.try_recv().is_err());
}

#[test]
fn test_notify_without_subscribers() {
    let engine = TagEngine::new();
    engine.register_tag(sample_tag("Lonely", DataType::Int16));
    assert_eq!(
        engine.update_tag_value("Lonely", ValueVariant::Int(3), Quality::Good),
        Some(true)
    );
}
