use dedup_cache::cache::{CacheManager, NamespaceConfig};
use dedup_cache::guard::LockConfig;
use dedup_cache::store::MemoryStore;
use dedup_cache::Error;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn slow_fetch(
    calls: Arc<AtomicUsize>,
    value: &'static str,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<String, std::io::Error>> {
    use futures::FutureExt;
    move || {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(value.to_string())
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_fetch() {
    let cache = CacheManager::builder(
        Arc::new(MemoryStore::new()),
        NamespaceConfig::new("users", Duration::from_secs(60)),
    )
    .build()
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks = (0..100).map(|_| {
        let cache = cache.clone();
        let fetch = slow_fetch(calls.clone(), "ada");
        tokio::spawn(async move { cache.get_or_fetch::<String, _, _, _>("42", fetch).await })
    });
    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), "ada");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().lock_contentions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_managers_sharing_a_store_fetch_once() {
    // two processes: separate coalescing tables, one store
    let store = Arc::new(MemoryStore::new());
    let config = NamespaceConfig::new("users", Duration::from_secs(60))
        .with_lock(LockConfig::default().with_backoff(Duration::from_millis(20)));
    let first = CacheManager::builder(store.clone(), config.clone())
        .build()
        .unwrap();
    let second = CacheManager::builder(store, config).build().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        first.get_or_fetch::<String, _, _, _>("42", slow_fetch(calls.clone(), "from-first")),
        second.get_or_fetch::<String, _, _, _>("42", slow_fetch(calls.clone(), "from-second")),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), b.unwrap());
    assert!(first.stats().lock_contentions + second.stats().lock_contentions >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_does_not_poison_later_callers() {
    let cache = CacheManager::builder(
        Arc::new(MemoryStore::new()),
        NamespaceConfig::new("users", Duration::from_secs(60)),
    )
    .build()
    .unwrap();

    let failures = (0..10).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch::<String, _, _, _>("42", || async {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Err::<String, _>(std::io::Error::new(std::io::ErrorKind::Other, "db down"))
                })
                .await
        })
    });
    for result in join_all(failures).await {
        assert!(matches!(result.unwrap(), Err(Error::SourceFetchFailed { .. })));
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let name = cache
        .get_or_fetch::<String, _, _, _>("42", slow_fetch(calls.clone(), "ada"))
        .await
        .unwrap();
    assert_eq!(name, "ada");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_do_not_coalesce() {
    let cache = CacheManager::builder(
        Arc::new(MemoryStore::new()),
        NamespaceConfig::new("users", Duration::from_secs(60)),
    )
    .build()
    .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        cache.get_or_fetch::<String, _, _, _>("1", slow_fetch(calls.clone(), "one")),
        cache.get_or_fetch::<String, _, _, _>("2", slow_fetch(calls.clone(), "two")),
    );
    assert_eq!(a.unwrap(), "one");
    assert_eq!(b.unwrap(), "two");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
