//! JsonFileStore 与跨进程重启的持久化行为

use resilient_translator::storage::{get_or_default, set_json, CREDENTIALS_KEY};
use resilient_translator::{Credential, JsonFileStore, KeyValueStore, TranslationError};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn missing_file_is_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = assert_ok!(JsonFileStore::open(dir.path().join("nested/session.json")).await);
    assert_eq!(assert_ok!(store.get("anything").await), None);
}

#[tokio::test]
async fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.json");

    {
        let store = assert_ok!(JsonFileStore::open(&path).await);
        let pool = vec![Credential::new("k1", "s1", "First")];
        assert_ok!(set_json(&store, CREDENTIALS_KEY, &pool).await);
        assert_ok!(store.set("flag", json!(true)).await);
    }

    let reopened = assert_ok!(JsonFileStore::open(&path).await);
    let pool: Vec<Credential> = assert_ok!(get_or_default(&reopened, CREDENTIALS_KEY, Vec::new()).await);
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].display_name, "First");

    assert_ok!(reopened.remove("flag").await);
    let again = assert_ok!(JsonFileStore::open(&path).await);
    assert_eq!(assert_ok!(again.get("flag").await), None);
}

#[tokio::test]
async fn non_object_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "[1, 2, 3]").unwrap();

    let err = assert_err!(JsonFileStore::open(&path).await);
    assert!(matches!(err, TranslationError::Storage(_)));
}

#[tokio::test]
async fn truncated_session_file_starts_empty_and_is_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, r#"{"circuitBreakerState": {"k::m": 1"#).unwrap();

    let err = assert_err!(JsonFileStore::open(&path).await);
    assert!(matches!(err, TranslationError::Serialization(_)));

    let store = assert_ok!(JsonFileStore::open_or_reset(&path).await);
    assert_eq!(assert_ok!(store.get("circuitBreakerState").await), None);

    assert_ok!(store.set("errorLogs", json!([])).await);
    let reopened = assert_ok!(JsonFileStore::open(&path).await);
    assert_eq!(assert_ok!(reopened.get("errorLogs").await), Some(json!([])));
}

#[tokio::test]
async fn writes_replace_the_file_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.json");
    let store = assert_ok!(JsonFileStore::open(&path).await);

    for i in 0..5 {
        assert_ok!(store.set("counter", json!(i)).await);
    }

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["local.json"]);

    let content: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(content, json!({"counter": 4}));
}
