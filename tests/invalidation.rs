use dedup_cache::cache::{CacheManager, NamespaceConfig};
use dedup_cache::metrics::{InMemoryMetrics, MetricEvent};
use dedup_cache::store::{BackingStore, MemoryStore};
use dedup_cache::Error;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn manager(store: Arc<MemoryStore>, config: NamespaceConfig) -> CacheManager {
    CacheManager::builder(store, config).build().unwrap()
}

fn app(store: Arc<MemoryStore>) -> CacheManager {
    manager(store, NamespaceConfig::new("app", Duration::from_secs(300)))
}

#[tokio::test]
async fn test_dependency_cascade_reaches_transitive_dependents() {
    let cache = app(Arc::new(MemoryStore::new()));
    cache.set("user:1", "ada").await.unwrap();
    cache
        .set_with_dependencies("profile:1", "ada's profile", ["user:1"])
        .await
        .unwrap();
    cache
        .set_with_dependencies("page:1", "<html>", ["profile:1"])
        .await
        .unwrap();
    cache.set("user:2", "bob").await.unwrap();

    let report = cache.invalidate("user:1").await.unwrap();
    assert_eq!(report.visited, vec!["user:1", "profile:1", "page:1"]);
    assert_eq!(report.deleted, 3);

    for key in ["user:1", "profile:1", "page:1"] {
        assert_eq!(cache.get::<String>(key).await.unwrap(), None, "{key}");
    }
    assert_eq!(cache.get::<String>("user:2").await.unwrap().as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_dependency_cycle_terminates() {
    let cache = app(Arc::new(MemoryStore::new()));
    cache.set_with_dependencies("a", &1, ["b"]).await.unwrap();
    cache.set_with_dependencies("b", &2, ["a"]).await.unwrap();

    let report = cache.invalidate("a").await.unwrap();
    assert_eq!(report.visited, vec!["a", "b"]);
    assert_eq!(report.deleted, 2);
}

#[tokio::test]
async fn test_cascade_runs_when_root_already_expired() {
    let store = Arc::new(MemoryStore::new());
    let cache = app(store.clone());
    cache.set("user:1", "ada").await.unwrap();
    cache
        .set_with_dependencies("profile:1", "ada's profile", ["user:1"])
        .await
        .unwrap();
    // the root entry expired on its own
    store.delete(&["app:user:1".to_string()]).await.unwrap();

    let report = cache.invalidate("user:1").await.unwrap();
    assert_eq!(report.visited, vec!["user:1", "profile:1"]);
    assert_eq!(report.deleted, 1);

    // edges survive invalidation: a rewritten dependent is still reached
    cache.set("profile:1", "rewritten").await.unwrap();
    let report = cache.invalidate("user:1").await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(cache.get::<String>("profile:1").await.unwrap(), None);
}

#[tokio::test]
async fn test_event_invalidates_exact_and_wildcard_keys() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let cache = CacheManager::builder(
        Arc::new(MemoryStore::new()),
        NamespaceConfig::new("app", Duration::from_secs(300)),
    )
    .metrics(metrics.clone())
    .build()
    .unwrap();
    cache.register_event("user.updated", ["user:{id}", "feed:{id}:*"]);

    cache.set("user:7", "ada").await.unwrap();
    cache.set("feed:7:page1", "p1").await.unwrap();
    cache.set("feed:7:page2", "p2").await.unwrap();
    cache.set("feed:8:page1", "other").await.unwrap();

    let report = cache
        .invalidate_event("user.updated", &json!({"id": 7}))
        .await
        .unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(
        report.visited,
        vec!["user:7", "app:feed:7:page1", "app:feed:7:page2"]
    );

    assert_eq!(cache.get::<String>("user:7").await.unwrap(), None);
    assert_eq!(cache.get::<String>("feed:7:page2").await.unwrap(), None);
    assert_eq!(
        cache.get::<String>("feed:8:page1").await.unwrap().as_deref(),
        Some("other")
    );
    assert!(metrics.count("app", MetricEvent::Invalidation) >= 2);
}

#[tokio::test]
async fn test_event_field_values_cannot_widen_a_wildcard() {
    let cache = app(Arc::new(MemoryStore::new()));
    cache.register_event("feed.reset", ["feed:{id}:*"]);

    cache.set("feed:*:page1", "literal").await.unwrap();
    cache.set("feed:7:page1", "p1").await.unwrap();
    cache.set("feed:8:page1", "p2").await.unwrap();

    let report = cache
        .invalidate_event("feed.reset", &json!({"id": "*"}))
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.visited, vec!["app:feed:*:page1"]);
    assert_eq!(cache.get::<String>("feed:*:page1").await.unwrap(), None);
    assert_eq!(
        cache.get::<String>("feed:7:page1").await.unwrap().as_deref(),
        Some("p1")
    );
    assert_eq!(
        cache.get::<String>("feed:8:page1").await.unwrap().as_deref(),
        Some("p2")
    );
}

#[tokio::test]
async fn test_event_with_missing_field_invalidates_nothing() {
    let cache = app(Arc::new(MemoryStore::new()));
    cache.register_event("order.paid", ["order:{order.id}"]);
    cache.set("order:9", "open").await.unwrap();

    let report = cache
        .invalidate_event("order.paid", &json!({"order": {"total": 10}}))
        .await
        .unwrap();
    assert!(report.visited.is_empty());
    assert_eq!(cache.get::<String>("order:9").await.unwrap().as_deref(), Some("open"));

    let report = cache
        .invalidate_event("order.paid", &json!({"order": {"id": 9}}))
        .await
        .unwrap();
    assert_eq!(report.deleted, 1);

    let report = cache.invalidate_event("never.registered", &json!({})).await.unwrap();
    assert_eq!(report.deleted, 0);
}

#[tokio::test]
async fn test_version_bump_hides_older_entries() {
    let cache = manager(
        Arc::new(MemoryStore::new()),
        NamespaceConfig::new("profiles", Duration::from_secs(300)).versioned(),
    );
    assert_eq!(cache.current_version("42").await.unwrap(), 0);
    cache.set("42", "v0 profile").await.unwrap();
    assert_eq!(
        cache.get::<String>("42").await.unwrap().as_deref(),
        Some("v0 profile")
    );

    let mut last = 0;
    for _ in 0..3 {
        let version = cache.bump_version("42").await.unwrap();
        assert!(version > last);
        last = version;
    }
    assert_eq!(cache.current_version("42").await.unwrap(), 3);
    assert_eq!(cache.get::<String>("42").await.unwrap(), None);

    cache.set("42", "v3 profile").await.unwrap();
    assert_eq!(
        cache.get::<String>("42").await.unwrap().as_deref(),
        Some("v3 profile")
    );
}

#[tokio::test]
async fn test_wildcard_never_removes_version_counters() {
    let store = Arc::new(MemoryStore::new());
    let cache = manager(
        store.clone(),
        NamespaceConfig::new("app", Duration::from_secs(300)).versioned(),
    );
    cache.register_event("feed.rebuilt", ["feed:{id}:*"]);

    cache.set("feed:7:a", "old").await.unwrap();
    cache.bump_version("feed:7:a").await.unwrap();
    cache.set("feed:7:a", "new").await.unwrap();

    let report = cache
        .invalidate_event("feed.rebuilt", &json!({"id": "7"}))
        .await
        .unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(cache.current_version("feed:7:a").await.unwrap(), 1);
    assert!(store.get("app:feed:7:a:version").await.unwrap().is_some());
}

#[tokio::test]
async fn test_bump_version_requires_versioned_namespace() {
    let cache = app(Arc::new(MemoryStore::new()));
    let err = cache.bump_version("42").await.unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration { .. }));
    assert_eq!(cache.current_version("42").await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalidation_is_counted_in_stats() {
    let cache = app(Arc::new(MemoryStore::new()));
    cache.set("a", &1).await.unwrap();
    cache.set_with_dependencies("b", &2, ["a"]).await.unwrap();
    cache.invalidate("a").await.unwrap();
    assert_eq!(cache.stats().invalidations, 2);
}
