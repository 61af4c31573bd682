//! QA tests for persistence: write-through saves, rehydration, and the
//! export/import format.
//!
//! Run with: `cargo test -p ember-core --test qa_persistence`

use ember_core::testing::FailingStateStore;
use ember_core::{
    CharacterDraft, EntityStore, JsonFileStore, PersistError, Personality, StoreError,
};
use tempfile::TempDir;

fn draft(name: &str, personality: Personality) -> CharacterDraft {
    CharacterDraft::new(
        name,
        personality,
        format!("{name} has a backstory comfortably past the minimum length requirement."),
    )
}

// =============================================================================
// WRITE-THROUGH AND REHYDRATION
// =============================================================================

#[test]
fn test_state_survives_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("state.json");

    let nova = {
        let mut store = EntityStore::open(Box::new(JsonFileStore::new(&path))).unwrap();
        let nova = store
            .create_character(draft("Nova", Personality::Sarcastic))
            .unwrap();
        store.add_message(nova, "hi", true).unwrap();
        store.add_message(nova, "oh, it's you", false).unwrap();
        store.set_active_character(Some(nova)).unwrap();
        nova
    };

    // Every mutation wrote through, so a fresh store sees everything.
    let store = EntityStore::open(Box::new(JsonFileStore::new(&path))).unwrap();
    assert_eq!(store.characters().len(), 1);
    assert_eq!(store.character(nova).unwrap().name, "Nova");
    assert_eq!(store.active_character().unwrap().id, nova);

    let messages = store.get_messages(nova);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "hi");
    assert!(!messages[1].is_user);
}

#[test]
fn test_timestamps_stay_monotonic_across_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("state.json");

    let (nova, last_before) = {
        let mut store = EntityStore::open(Box::new(JsonFileStore::new(&path))).unwrap();
        let nova = store
            .create_character(draft("Nova", Personality::Sarcastic))
            .unwrap();
        let last = store.add_message(nova, "hi", true).unwrap();
        (nova, last.timestamp)
    };

    let mut store = EntityStore::open(Box::new(JsonFileStore::new(&path))).unwrap();
    let next = store.add_message(nova, "still there?", true).unwrap();
    assert!(next.timestamp > last_before);
}

#[test]
fn test_persistence_failure_surfaces() {
    // One save is allowed, then the backend reports quota exhaustion.
    let mut store = EntityStore::open(Box::new(FailingStateStore::after(1))).unwrap();

    store
        .create_character(draft("Nova", Personality::Sarcastic))
        .unwrap();

    let result = store.create_character(draft("Mira", Personality::Wise));
    assert!(matches!(
        result,
        Err(StoreError::Persistence(PersistError::QuotaExceeded))
    ));
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

#[test]
fn test_export_import_round_trip() {
    let mut source = EntityStore::in_memory();
    let nova = source
        .create_character(draft("Nova", Personality::Sarcastic))
        .unwrap();
    let mira = source
        .create_character(draft("Mira", Personality::Wise))
        .unwrap();
    source.add_message(nova, "hello", true).unwrap();
    source.add_message(nova, "oh, it's you", false).unwrap();
    source.add_message(mira, "a question", true).unwrap();

    let blob = serde_json::to_value(source.export_data()).unwrap();
    assert_eq!(blob["version"], "1.0");
    assert!(blob["exportedAt"].is_string());

    let mut target = EntityStore::in_memory();
    target.import_data(blob).unwrap();

    assert_eq!(target.characters().len(), 2);
    assert_eq!(target.character(nova).unwrap().name, "Nova");
    assert_eq!(
        target.character(nova).unwrap().personality,
        Personality::Sarcastic
    );

    let source_messages = source.get_messages(nova);
    let target_messages = target.get_messages(nova);
    assert_eq!(source_messages.len(), target_messages.len());
    for (a, b) in source_messages.iter().zip(target_messages.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.text, b.text);
        assert_eq!(a.timestamp, b.timestamp);
    }
}

#[test]
fn test_import_replaces_wholesale() {
    let mut store = EntityStore::in_memory();
    let old = store
        .create_character(draft("Forgotten", Personality::Serious))
        .unwrap();
    store.add_message(old, "goodbye", true).unwrap();

    let mut other = EntityStore::in_memory();
    other
        .create_character(draft("Imported", Personality::Cheerful))
        .unwrap();
    let blob = serde_json::to_value(other.export_data()).unwrap();

    store.import_data(blob).unwrap();

    assert_eq!(store.characters().len(), 1);
    assert_eq!(store.characters()[0].name, "Imported");
    assert!(store.character(old).is_none());
    assert!(store.get_messages(old).is_empty());
}

#[test]
fn test_import_rejects_bad_payload_without_mutation() {
    let mut store = EntityStore::in_memory();
    let nova = store
        .create_character(draft("Nova", Personality::Sarcastic))
        .unwrap();
    store.add_message(nova, "hello", true).unwrap();

    for bad in [
        serde_json::json!({ "bad": true }),
        serde_json::json!({ "characters": "not an array" }),
        serde_json::json!([1, 2, 3]),
        serde_json::json!({ "characters": [{ "name": 42 }] }),
    ] {
        let result = store.import_data(bad);
        assert!(matches!(result, Err(StoreError::ImportFormat(_))));

        // State untouched after every rejected import.
        assert_eq!(store.characters().len(), 1);
        assert_eq!(store.characters()[0].name, "Nova");
        assert_eq!(store.get_messages(nova).len(), 1);
    }
}

#[test]
fn test_import_is_forward_compatible() {
    let mut store = EntityStore::in_memory();

    // Any object with a `characters` array is accepted, unknown keys and
    // all; `conversations` is optional.
    let blob = serde_json::json!({
        "characters": [],
        "schemaRevision": 7,
        "somethingNew": { "nested": true }
    });

    store.import_data(blob).unwrap();
    assert!(store.characters().is_empty());
}

#[test]
fn test_import_clears_dangling_active_reference() {
    let mut store = EntityStore::in_memory();
    let nova = store
        .create_character(draft("Nova", Personality::Sarcastic))
        .unwrap();
    store.set_active_character(Some(nova)).unwrap();

    store
        .import_data(serde_json::json!({ "characters": [] }))
        .unwrap();

    assert!(store.active_character().is_none());
}
