use std::collections::{BTreeMap, HashMap};
use std::io;

use keystate::engine::{Backend, Document, DocumentEngine, MemoryBackend, MemoryEngine, Query};
use keystate::{CancellationToken, Storage, StoreError, ETAG_WILDCARD};

use crate::models::{PlainItem, TestState, TrackedItem};
use crate::{setup_memory_storage, setup_temp_storage};

// =============================================================================
// Polymorphism
// =============================================================================

#[test]
fn test_write_two_types_get_same_types() {
    let (_temp, storage) = setup_temp_storage();

    let mut changes = HashMap::new();
    changes.insert("createPlain", TestState::plain("1", 0));
    changes.insert("createTracked", TestState::tracked("2", 0));

    storage.write(changes, None).unwrap();

    let result = storage.read(["createPlain", "createTracked"], None).unwrap();
    assert!(result["createPlain"].as_plain().is_some());
    assert!(result["createTracked"].as_tracked().is_some());
}

#[test]
fn test_write_two_types_get_same_values() {
    let (_temp, storage) = setup_temp_storage();

    storage
        .write(
            [
                ("createPlain", TestState::plain("1", 0)),
                ("createTracked", TestState::tracked("2", 0)),
            ],
            None,
        )
        .unwrap();

    let result = storage.read(["createPlain", "createTracked"], None).unwrap();

    let plain = result["createPlain"].as_plain().unwrap();
    assert_eq!(plain.id, "1");

    let tracked = result["createTracked"].as_tracked().unwrap();
    assert_eq!(tracked.id, "2");
    assert!(tracked.e_tag.is_some());
}

#[test]
fn test_write_handles_punctuation_keys() {
    let (_temp, storage) = setup_temp_storage();
    let key = "!@#$%^&*()~/\\><,.?';\"`~";

    storage
        .write([(key, TestState::tracked("1", 0))], None)
        .unwrap();

    let result = storage.read([key], None).unwrap();
    assert_eq!(result[key].as_tracked().unwrap().id, "1");
}

#[test]
fn test_write_handles_unicode_keys() {
    let storage = setup_memory_storage();
    let key = "ключ/ключ 🔑";

    storage.write([(key, TestState::plain("u", 3))], None).unwrap();

    let result = storage.read([key], None).unwrap();
    assert_eq!(result[key], TestState::plain("u", 3));
}

#[test]
fn test_write_large_value() {
    let (_temp, storage) = setup_temp_storage();
    let extra = vec!["X".repeat(64 * 1024); 4];
    let value = TestState::Plain(PlainItem {
        id: "big".to_string(),
        count: 1,
        extra,
    });

    storage.write([("big", &value)], None).unwrap();

    let result = storage.read(["big"], None).unwrap();
    assert_eq!(result["big"], value);
}

// =============================================================================
// Updates & ETags
// =============================================================================

#[test]
fn test_update_two_types_get_updated_values() {
    let (_temp, storage) = setup_temp_storage();

    storage
        .write(
            [
                ("plain", TestState::plain("1", 1)),
                ("tracked", TestState::tracked("1", 1)),
            ],
            None,
        )
        .unwrap();

    let mut loaded = storage.read(["plain", "tracked"], None).unwrap();
    let first_tag = loaded["tracked"].e_tag().unwrap().to_string();

    // Second write succeeds: the tracked item presents the current ETag
    for value in loaded.values_mut() {
        match value {
            TestState::Plain(item) => item.count += 1,
            TestState::Tracked(item) => item.count += 1,
        }
    }
    storage.write(&loaded, None).unwrap();

    let reloaded = storage.read(["plain", "tracked"], None).unwrap();
    assert_eq!(reloaded["plain"].as_plain().unwrap().count, 2);

    let tracked = reloaded["tracked"].as_tracked().unwrap();
    assert_eq!(tracked.count, 2);
    assert_ne!(tracked.e_tag.as_deref(), Some(first_tag.as_str()));
}

#[test]
fn test_write_does_not_modify_caller_value() {
    let storage = setup_memory_storage();
    let value = TestState::tracked("1", 1);

    storage.write([("k", &value)], None).unwrap();

    assert_eq!(value.e_tag(), None);
}

#[test]
fn test_every_write_mints_new_etag() {
    let storage = setup_memory_storage();
    storage.write([("k", TestState::tracked("1", 1))], None).unwrap();

    let mut seen = Vec::new();
    for _ in 0..5 {
        let current = storage.read(["k"], None).unwrap().remove("k").unwrap();
        let tag = current.e_tag().unwrap().to_string();
        assert!(!seen.contains(&tag));
        seen.push(tag);
        storage.write([("k", current)], None).unwrap();
    }
}

#[test]
fn test_plain_values_are_never_checked() {
    let storage = setup_memory_storage();

    storage.write([("k", TestState::plain("1", 1))], None).unwrap();
    storage.write([("k", TestState::plain("1", 2))], None).unwrap();

    let result = storage.read(["k"], None).unwrap();
    assert_eq!(result["k"], TestState::plain("1", 2));
    assert_eq!(result["k"].e_tag(), None);
}

#[test]
fn test_plain_value_replaces_tracked_value() {
    let storage = setup_memory_storage();

    storage.write([("k", TestState::tracked("1", 1))], None).unwrap();
    storage.write([("k", TestState::plain("1", 2))], None).unwrap();

    let result = storage.read(["k"], None).unwrap();
    assert!(result["k"].as_plain().is_some());
}

// =============================================================================
// Conflicts
// =============================================================================

#[test]
fn test_stale_etag_conflicts() {
    let (_temp, storage) = setup_temp_storage();
    storage.write([("k", TestState::tracked("1", 1))], None).unwrap();

    let stale = storage.read(["k"], None).unwrap().remove("k").unwrap();
    let stale_tag = stale.e_tag().unwrap().to_string();

    // Another writer gets in first
    storage.write([("k", &stale)], None).unwrap();

    let err = storage.write([("k", &stale)], None).unwrap_err();
    assert!(err.is_conflict());
    match err {
        StoreError::Conflict {
            key,
            presented,
            stored,
        } => {
            assert_eq!(key, "k");
            assert_eq!(presented, stale_tag);
            assert_ne!(stored, stale_tag);
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    // The rejected write changed nothing
    let current = storage.read(["k"], None).unwrap().remove("k").unwrap();
    assert_ne!(current.e_tag(), Some(stale_tag.as_str()));
}

#[test]
fn test_made_up_etag_conflicts() {
    let storage = setup_memory_storage();
    storage.write([("k", TestState::tracked("1", 1))], None).unwrap();

    let forged = TestState::Tracked(TrackedItem {
        e_tag: Some("not-a-real-tag".to_string()),
        id: "1".to_string(),
        count: 9,
    });

    let err = storage.write([("k", forged)], None).unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[test]
fn test_wildcard_etag_always_overwrites() {
    let (_temp, storage) = setup_temp_storage();
    storage.write([("k", TestState::tracked("1", 1))], None).unwrap();

    let mut value = storage.read(["k"], None).unwrap().remove("k").unwrap();
    storage.write([("k", &value)], None).unwrap();

    let item = value.as_tracked_mut().unwrap();
    item.e_tag = Some(ETAG_WILDCARD.to_string());
    item.count = 42;
    storage.write([("k", &value)], None).unwrap();

    let result = storage.read(["k"], None).unwrap();
    let stored = result["k"].as_tracked().unwrap();
    assert_eq!(stored.count, 42);
    assert_ne!(stored.e_tag.as_deref(), Some(ETAG_WILDCARD));
}

#[test]
fn test_missing_etag_overwrites() {
    let storage = setup_memory_storage();
    storage.write([("k", TestState::tracked("1", 1))], None).unwrap();

    storage.write([("k", TestState::tracked("1", 5))], None).unwrap();

    let result = storage.read(["k"], None).unwrap();
    assert_eq!(result["k"].as_tracked().unwrap().count, 5);
}

#[test]
fn test_etag_on_new_key_is_accepted() {
    let storage = setup_memory_storage();
    let value = TestState::Tracked(TrackedItem {
        e_tag: Some("from-elsewhere".to_string()),
        id: "1".to_string(),
        count: 1,
    });

    storage.write([("fresh", value)], None).unwrap();

    let result = storage.read(["fresh"], None).unwrap();
    assert_ne!(result["fresh"].e_tag(), Some("from-elsewhere"));
}

#[test]
fn test_etag_over_plain_record_is_accepted() {
    let storage = setup_memory_storage();
    storage.write([("k", TestState::plain("1", 1))], None).unwrap();

    let value = TestState::Tracked(TrackedItem {
        e_tag: Some("whatever".to_string()),
        id: "1".to_string(),
        count: 2,
    });

    storage.write([("k", value)], None).unwrap();
}

#[test]
fn test_conflict_aborts_rest_of_batch() {
    let storage = setup_memory_storage();
    storage.write([("b", TestState::tracked("b", 1))], None).unwrap();

    let stale = TestState::Tracked(TrackedItem {
        e_tag: Some("stale".to_string()),
        id: "b".to_string(),
        count: 2,
    });

    // BTreeMap iterates in key order: a, b, c
    let mut changes = BTreeMap::new();
    changes.insert("a", TestState::plain("a", 1));
    changes.insert("b", stale);
    changes.insert("c", TestState::plain("c", 1));

    let err = storage.write(changes, None).unwrap_err();
    assert!(matches!(err, StoreError::Conflict { ref key, .. } if key == "b"));

    let result = storage.read(["a", "b", "c"], None).unwrap();
    assert!(result.contains_key("a"));
    assert_eq!(result["b"].as_tracked().unwrap().count, 1);
    assert!(!result.contains_key("c"));
}

/// Memory backend whose handles fail to close
struct FailingCloseBackend(MemoryBackend);

struct FailingCloseEngine(MemoryEngine);

impl Backend for FailingCloseBackend {
    type Handle = FailingCloseEngine;

    fn open(&self) -> keystate::Result<FailingCloseEngine> {
        Ok(FailingCloseEngine(self.0.open()?))
    }
}

impl DocumentEngine for FailingCloseEngine {
    fn upsert(&mut self, collection: &str, doc: Document) -> keystate::Result<bool> {
        self.0.upsert(collection, doc)
    }

    fn delete(&mut self, collection: &str, query: &Query) -> keystate::Result<usize> {
        self.0.delete(collection, query)
    }

    fn find(&mut self, collection: &str, query: &Query) -> keystate::Result<Vec<Document>> {
        self.0.find(collection, query)
    }

    fn close(self) -> keystate::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "close failed").into())
    }
}

#[test]
fn test_conflict_reported_even_if_close_fails() {
    let shared = MemoryBackend::new();
    let healthy: Storage<TestState, _> = Storage::with_backend(shared.clone());
    healthy.write([("k", TestState::tracked("1", 1))], None).unwrap();

    let stale = TestState::Tracked(TrackedItem {
        e_tag: Some("stale".to_string()),
        id: "1".to_string(),
        count: 2,
    });

    let failing: Storage<TestState, _> = Storage::with_backend(FailingCloseBackend(shared));
    let err = failing.write([("k", stale)], None).unwrap_err();

    assert!(matches!(err, StoreError::Conflict { ref key, .. } if key == "k"));
}

// =============================================================================
// Argument Handling
// =============================================================================

#[test]
fn test_write_empty_batch_is_noop() {
    let storage = setup_memory_storage();

    storage
        .write(HashMap::<String, TestState>::new(), None)
        .unwrap();

    assert!(storage.backend().is_empty(keystate::storage::COLLECTION));
}

#[test]
fn test_write_rejects_empty_key_without_partial_effect() {
    let storage = setup_memory_storage();

    let err = storage
        .write(
            [("ok", TestState::plain("1", 1)), ("", TestState::plain("2", 2))],
            None,
        )
        .unwrap_err();

    assert!(matches!(err, StoreError::InvalidArgument(_)));
    assert!(storage.read(["ok"], None).unwrap().is_empty());
}

#[test]
fn test_write_cancelled_before_start() {
    let storage = setup_memory_storage();
    let token = CancellationToken::new();
    token.cancel();

    let err = storage
        .write([("k", TestState::plain("1", 1))], Some(&token))
        .unwrap_err();

    assert!(matches!(err, StoreError::Cancelled));
    assert!(storage.read(["k"], None).unwrap().is_empty());
}
