use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type InFlight<T> = Shared<BoxFuture<'static, T>>;

struct Entry<T> {
    id: u64,
    future: WeakShared<BoxFuture<'static, T>>,
}

type Table<T> = Mutex<HashMap<String, Entry<T>>>;

/// In-process single flight: concurrent callers for one key share one execution.
///
/// The entry for a key is removed by the work itself once it resolves, whatever
/// the outcome, so a failure is handed to the callers already waiting and never
/// to later ones. Entries are held weakly: when every waiter is dropped the work
/// is cancelled and the next caller starts afresh.
pub struct RequestCoalescer<T> {
    table: Arc<Table<T>>,
    next_id: AtomicU64,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Await the in-flight work for `key`, or start it with `work` when there is none.
    ///
    /// `work` is only called by the caller that becomes the leader.
    pub async fn run<F>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let shared = {
            let mut table = lock(&self.table);
            match table.get(key).and_then(|e| e.future.upgrade()) {
                Some(existing) => existing,
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = self.start(key, id, work());
                    if let Some(weak) = shared.downgrade() {
                        table.insert(key.to_string(), Entry { id, future: weak });
                    }
                    shared
                }
            }
        };
        shared.await
    }

    /// Keys with a live in-flight execution.
    pub fn in_flight(&self) -> usize {
        lock(&self.table)
            .values()
            .filter(|e| e.future.upgrade().is_some())
            .count()
    }

    fn start(&self, key: &str, id: u64, work: BoxFuture<'static, T>) -> InFlight<T> {
        let table = Arc::clone(&self.table);
        let key = key.to_string();
        async move {
            let out = work.await;
            let mut table = lock(&table);
            if table.get(&key).is_some_and(|e| e.id == id) {
                table.remove(&key);
            }
            out
        }
        .boxed()
        .shared()
    }
}

impl<T> Default for RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(table: &Table<T>) -> MutexGuard<'_, HashMap<String, Entry<T>>> {
    // the map stays consistent even if a holder panicked
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
