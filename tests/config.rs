use dedup_cache::cache::{CacheManager, CachePattern};
use dedup_cache::config::{EngineConfig, CONFIG_ENV_VAR};
use dedup_cache::detector::{DuplicateDetector, NearDuplicateMethod, NearDuplicateScope};
use dedup_cache::store::MemoryStore;
use dedup_cache::Error;
use std::path::PathBuf;
use tokio_test::{assert_err, assert_ok};
use std::sync::Arc;
use std::time::Duration;

const ENGINE_YAML: &str = r#"
namespaces:
  - name: profiles
    ttl_seconds: 300
    pattern: refresh-ahead
    refresh_ahead_fraction: 0.25
    early_expiration_beta: 1.0
    versioned: true
    fetch_timeout_ms: 2000
    lock:
      ttl_ms: 5000
      max_retries: 3
      backoff_ms: 10
  - name: sessions
    ttl_seconds: 60
    adaptive_ttl:
      min_seconds: 30
      max_seconds: 600
detectors:
  - name: comments
    window_seconds: 60
    max_occurrences_per_window: 5
    global_max_occurrences: 20
    similarity_method: minhash
    similarity_threshold: 0.7
    num_hashes: 64
    scope: global
"#;

fn temp_file(contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dedup-cache-{}.yaml", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_full_file_maps_onto_configs() {
    let config = assert_ok!(EngineConfig::from_yaml_str(ENGINE_YAML));

    let profiles = config.namespace("profiles").unwrap().unwrap();
    assert_eq!(profiles.pattern, CachePattern::RefreshAhead);
    assert_eq!(profiles.ttl, Duration::from_secs(300));
    assert_eq!(profiles.refresh_ahead_fraction, 0.25);
    assert_eq!(profiles.early_expiration, Some(1.0));
    assert!(profiles.versioned);
    assert_eq!(profiles.fetch_timeout, Some(Duration::from_secs(2)));
    assert_eq!(profiles.lock.ttl, Duration::from_secs(5));
    assert_eq!(profiles.lock.max_retries, 3);

    let sessions = config.namespace("sessions").unwrap().unwrap();
    assert_eq!(sessions.pattern, CachePattern::CacheAside);
    let adaptive = sessions.adaptive_ttl.unwrap();
    assert_eq!(adaptive.min_ttl, Duration::from_secs(30));
    assert_eq!(adaptive.max_ttl, Duration::from_secs(600));

    let comments = config.detector("comments").unwrap().unwrap();
    assert_eq!(comments.global_max_occurrences, 20);
    assert_eq!(
        comments.method,
        NearDuplicateMethod::MinHash {
            num_hashes: 64,
            min_similarity: 0.7
        }
    );
    assert_eq!(comments.near_duplicate_scope, NearDuplicateScope::Global);
}

#[test]
fn test_unknown_pattern_is_rejected_with_field_path() {
    let err = EngineConfig::from_yaml_str(
        "namespaces:\n  - name: users\n    ttl_seconds: 60\n    pattern: write-around\n",
    )
    .unwrap_err();
    match err {
        Error::InvalidConfiguration { context, .. } => {
            assert_eq!(context.field_path.as_deref(), Some("namespaces.users.pattern"));
        }
        other => panic!("expected invalid configuration, got {other:?}"),
    }
}

#[test]
fn test_negative_ttl_is_rejected() {
    let err = EngineConfig::from_yaml_str("namespaces:\n  - name: users\n    ttl_seconds: -5\n")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration { .. }));
    assert!(err.to_string().contains("namespaces.users.ttl_seconds"));

    let err = EngineConfig::from_yaml_str(
        "detectors:\n  - name: c\n    window_seconds: 0\n    max_occurrences_per_window: 5\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("detectors.c.window_seconds"));
}

#[test]
fn test_bad_similarity_settings_are_rejected() {
    for yaml in [
        "detectors:\n  - {name: c, window_seconds: 60, max_occurrences_per_window: 5, similarity_method: cosine}\n",
        "detectors:\n  - {name: c, window_seconds: 60, max_occurrences_per_window: 5, similarity_threshold: 2.5}\n",
        "detectors:\n  - {name: c, window_seconds: 60, max_occurrences_per_window: 5, scope: planet}\n",
    ] {
        let err = EngineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }), "{yaml}: {err}");
    }
}

#[tokio::test]
async fn test_loaded_config_builds_working_engines() {
    let path = temp_file(ENGINE_YAML);
    let config = assert_ok!(EngineConfig::from_path(&path).await);
    std::fs::remove_file(&path).ok();

    let store = Arc::new(MemoryStore::new());
    let sessions = CacheManager::builder(store.clone(), config.namespace("sessions").unwrap().unwrap())
        .build()
        .unwrap();
    sessions.set("s1", "token").await.unwrap();
    assert_eq!(sessions.get::<String>("s1").await.unwrap().as_deref(), Some("token"));

    let detector =
        DuplicateDetector::new(store, config.detector("comments").unwrap().unwrap()).unwrap();
    assert!(detector.check("u1", "first comment").await.is_allowed());
}

#[tokio::test]
async fn test_missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("dedup-cache-does-not-exist.yaml");
    let err = assert_err!(EngineConfig::from_path(&path).await);
    assert!(matches!(err, Error::Io(_)));
}

#[tokio::test]
async fn test_from_env() {
    std::env::remove_var(CONFIG_ENV_VAR);
    assert!(EngineConfig::from_env().await.unwrap().is_none());

    let path = temp_file("namespaces:\n  - {name: users, ttl_seconds: 60}\n");
    std::env::set_var(CONFIG_ENV_VAR, &path);
    let config = EngineConfig::from_env().await.unwrap().unwrap();
    std::env::remove_var(CONFIG_ENV_VAR);
    std::fs::remove_file(&path).ok();

    assert_eq!(config.namespaces.len(), 1);
    assert!(config.detectors.is_empty());
}
