use super::config::WriteBehindConfig;
use super::source::DataSource;
use crate::metrics::{MetricEvent, MetricsSink};
use crate::{Error, ErrorContext, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

struct PendingWrite {
    key: String,
    value: Value,
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

impl Pending {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Bounded queue of source writes drained by one background worker.
///
/// Writes still queued when the process dies are lost. The worker stops once
/// the owning manager is dropped and the queue is empty.
pub(crate) struct WriteBehindQueue {
    tx: mpsc::Sender<PendingWrite>,
    pending: Arc<Pending>,
}

impl WriteBehindQueue {
    pub fn spawn(
        handle: &Handle,
        namespace: String,
        source: Arc<dyn DataSource>,
        config: WriteBehindConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let pending = Arc::new(Pending::default());
        handle.spawn(worker(
            rx,
            namespace,
            source,
            config,
            metrics,
            Arc::clone(&pending),
        ));
        Self { tx, pending }
    }

    /// Queue a source write. Waits while the queue is full.
    pub async fn enqueue(&self, key: String, value: Value) -> Result<()> {
        self.pending.count.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(PendingWrite { key: key.clone(), value }).await.is_err() {
            self.pending.done();
            return Err(Error::SourceWriteFailed {
                key,
                source: Arc::new(Error::configuration_with_context(
                    "write-behind worker has stopped",
                    ErrorContext::new().with_source("write_behind"),
                )),
            });
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Wait until every queued write has completed or been given up on.
    pub async fn flush(&self) {
        loop {
            let drained = self.pending.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            drained.await;
        }
    }
}

async fn worker(
    mut rx: mpsc::Receiver<PendingWrite>,
    namespace: String,
    source: Arc<dyn DataSource>,
    config: WriteBehindConfig,
    metrics: Arc<dyn MetricsSink>,
    pending: Arc<Pending>,
) {
    while let Some(write) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            match source.store(&write.key, &write.value).await {
                Ok(()) => {
                    debug!(namespace = %namespace, key = %write.key, attempt, "write-behind stored");
                    break;
                }
                Err(e) if attempt < config.max_retries => {
                    let delay = config.backoff(attempt);
                    warn!(
                        namespace = %namespace,
                        key = %write.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write-behind failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        namespace = %namespace,
                        key = %write.key,
                        attempts = attempt + 1,
                        "write-behind gave up, write lost: {}",
                        e
                    );
                    metrics.record(&namespace, MetricEvent::WriteBehindFailed);
                    break;
                }
            }
        }
        pending.done();
    }
    debug!(namespace = %namespace, "write-behind worker stopped");
}
