use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use anyhow::anyhow;
use async_trait::async_trait;
use rustc_hash::FxHasher;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::content::backend::ContentBackend;
use crate::content::content_entry::ContentEntry;
use crate::content::content_id::ContentKey;

/// Where fetch workers report their results, i.e. the content cache
#[async_trait]
pub trait FetchReceiver: Send + Sync + 'static {
    async fn on_fetch_succeeded(&self, entry: ContentEntry);

    async fn on_fetch_failed(&self, key: ContentKey);
}

/// A fixed set of worker tasks, each processing its own queue of fetch requests in arrival
///  order. A given key always goes to the same worker.
///
/// Workers hold their receiver weakly: they stop once the receiver is gone, and the pool
///  aborts them when it is dropped.
pub struct FetchWorkerPool {
    queues: Vec<mpsc::UnboundedSender<ContentKey>>,
    handles: Vec<JoinHandle<()>>,
}

impl Drop for FetchWorkerPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl FetchWorkerPool {
    pub fn new(num_workers: usize, backend: Arc<dyn ContentBackend>, receiver: Weak<dyn FetchReceiver>) -> FetchWorkerPool {
        let mut queues = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers.max(1) {
            let (send, recv) = mpsc::unbounded_channel();
            queues.push(send);
            handles.push(tokio::spawn(Self::do_loop(worker_id, recv, backend.clone(), receiver.clone())));
        }

        FetchWorkerPool { queues, handles }
    }

    pub fn num_workers(&self) -> usize {
        self.queues.len()
    }

    fn worker_for(&self, key: &ContentKey) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() % self.queues.len() as u64) as usize
    }

    /// Queues a fetch; never blocks. Fails only if the responsible worker has stopped.
    pub fn enqueue(&self, key: ContentKey) -> anyhow::Result<()> {
        let worker_id = self.worker_for(&key);
        trace!("queueing fetch of {} on worker {}", key, worker_id);
        self.queues[worker_id].send(key)
            .map_err(|_| anyhow!("fetch worker {} is not running", worker_id))
    }

    async fn do_loop(worker_id: usize, mut queue: mpsc::UnboundedReceiver<ContentKey>, backend: Arc<dyn ContentBackend>, receiver: Weak<dyn FetchReceiver>) {
        debug!("fetch worker {} started", worker_id);

        while let Some(key) = queue.recv().await {
            trace!("fetching {}", key);
            let result = Self::lookup_isolated(&backend, key).await;

            let Some(receiver) = receiver.upgrade() else {
                debug!("fetch receiver is gone - stopping fetch worker {}", worker_id);
                return;
            };

            match result {
                Ok(Some(entry)) if entry.key == key => {
                    debug!("fetched {} ({} bytes)", key, entry.len());
                    receiver.on_fetch_succeeded(entry).await;
                }
                Ok(Some(entry)) => {
                    warn!("backend returned {} when asked for {} - treating as not found", entry.key, key);
                    receiver.on_fetch_failed(key).await;
                }
                Ok(None) => {
                    debug!("{} not found in backend", key);
                    receiver.on_fetch_failed(key).await;
                }
                Err(e) => {
                    error!("error fetching {}: {}", key, e);
                    receiver.on_fetch_failed(key).await;
                }
            }
        }
        debug!("fetch worker {} stopped", worker_id);
    }

    /// Runs the lookup in a task of its own, so a panicking backend fails this one fetch
    ///  instead of taking the worker down with it.
    async fn lookup_isolated(backend: &Arc<dyn ContentBackend>, key: ContentKey) -> anyhow::Result<Option<ContentEntry>> {
        let backend = backend.clone();
        match tokio::spawn(async move { backend.lookup(key).await }).await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("backend lookup of {} panicked: {}", key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use mockall::predicate::eq;
    use rstest::rstest;
    use uuid::Uuid;
    use crate::content::backend::MockContentBackend;
    use crate::content::content_entry::ContentMetadata;
    use crate::test_util::paused_runtime;

    #[derive(Debug, Clone, Eq, PartialEq)]
    enum Outcome {
        Succeeded(ContentEntry),
        Failed(ContentKey),
    }

    struct ChannelReceiver {
        outcomes: mpsc::UnboundedSender<Outcome>,
    }

    #[async_trait]
    impl FetchReceiver for ChannelReceiver {
        async fn on_fetch_succeeded(&self, entry: ContentEntry) {
            self.outcomes.send(Outcome::Succeeded(entry)).unwrap();
        }

        async fn on_fetch_failed(&self, key: ContentKey) {
            self.outcomes.send(Outcome::Failed(key)).unwrap();
        }
    }

    fn key(n: u128) -> ContentKey {
        ContentKey::asset(Uuid::from_u128(n))
    }

    #[rstest]
    #[case::found(Some(vec![1, 2, 3]), false, None, true)]
    #[case::not_found(None, false, None, false)]
    #[case::error(None, true, None, false)]
    #[case::wrong_key(Some(vec![1]), false, Some(99), false)]
    fn test_fetch_outcome(#[case] data: Option<Vec<u8>>, #[case] is_error: bool, #[case] returned_key: Option<u128>, #[case] expected_success: bool) {
        paused_runtime().block_on(async move {
            let mut backend = MockContentBackend::new();
            let returned_key = key(returned_key.unwrap_or(1));
            backend.expect_lookup()
                .with(eq(key(1)))
                .times(1)
                .returning(move |_| {
                    if is_error {
                        Err(anyhow!("backend unavailable"))
                    }
                    else {
                        Ok(data.clone().map(|d| ContentEntry::new(returned_key, d)))
                    }
                });

            let (send, mut recv) = mpsc::unbounded_channel();
            let receiver: Arc<dyn FetchReceiver> = Arc::new(ChannelReceiver { outcomes: send });
            let pool = FetchWorkerPool::new(1, Arc::new(backend), Arc::downgrade(&receiver));

            pool.enqueue(key(1)).unwrap();

            match recv.recv().await.unwrap() {
                Outcome::Succeeded(entry) => {
                    assert!(expected_success);
                    assert_eq!(entry.key, key(1));
                    assert_eq!(entry.data.as_ref(), &[1, 2, 3]);
                }
                Outcome::Failed(k) => {
                    assert!(!expected_success);
                    assert_eq!(k, key(1));
                }
            }
        });
    }

    #[test]
    fn test_worker_survives_failures_and_keeps_order() {
        paused_runtime().block_on(async {
            let mut backend = MockContentBackend::new();
            backend.expect_lookup()
                .returning(|k| {
                    if k == key(2) {
                        Err(anyhow!("boom"))
                    }
                    else {
                        Ok(Some(ContentEntry::new(k, vec![])))
                    }
                });

            let (send, mut recv) = mpsc::unbounded_channel();
            let receiver: Arc<dyn FetchReceiver> = Arc::new(ChannelReceiver { outcomes: send });
            let pool = FetchWorkerPool::new(1, Arc::new(backend), Arc::downgrade(&receiver));

            for n in 1..=3 {
                pool.enqueue(key(n)).unwrap();
            }

            assert_eq!(recv.recv().await.unwrap(), Outcome::Succeeded(ContentEntry::new(key(1), vec![])));
            assert_eq!(recv.recv().await.unwrap(), Outcome::Failed(key(2)));
            assert_eq!(recv.recv().await.unwrap(), Outcome::Succeeded(ContentEntry::new(key(3), vec![])));
        });
    }

    /// panics when asked for key 1, serves everything else
    struct PanickingBackend;

    #[async_trait]
    impl ContentBackend for PanickingBackend {
        async fn lookup(&self, key: ContentKey) -> anyhow::Result<Option<ContentEntry>> {
            if key == self::key(1) {
                panic!("corrupt content store");
            }
            Ok(Some(ContentEntry::new(key, vec![7])))
        }

        async fn store(&self, _entry: ContentEntry) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_panicking_lookup_fails_only_that_fetch() {
        paused_runtime().block_on(async {
            let (send, mut recv) = mpsc::unbounded_channel();
            let receiver: Arc<dyn FetchReceiver> = Arc::new(ChannelReceiver { outcomes: send });
            let pool = FetchWorkerPool::new(1, Arc::new(PanickingBackend), Arc::downgrade(&receiver));

            pool.enqueue(key(1)).unwrap();
            pool.enqueue(key(2)).unwrap();
            assert_eq!(recv.recv().await.unwrap(), Outcome::Failed(key(1)));
            assert_eq!(recv.recv().await.unwrap(), Outcome::Succeeded(ContentEntry::new(key(2), vec![7])));

            // the worker is still running
            pool.enqueue(key(1)).unwrap();
            assert_eq!(recv.recv().await.unwrap(), Outcome::Failed(key(1)));
        });
    }

    #[test]
    fn test_metadata_is_passed_on() {
        paused_runtime().block_on(async {
            let metadata = ContentMetadata {
                name: "door".to_string(),
                description: "a wooden door".to_string(),
                asset_type: 6,
                inv_type: 6,
            };
            let fetched = ContentEntry::new(key(1), vec![1]).with_metadata(metadata.clone());

            let mut backend = MockContentBackend::new();
            backend.expect_lookup()
                .returning(move |_| Ok(Some(fetched.clone())));

            let (send, mut recv) = mpsc::unbounded_channel();
            let receiver: Arc<dyn FetchReceiver> = Arc::new(ChannelReceiver { outcomes: send });
            let pool = FetchWorkerPool::new(1, Arc::new(backend), Arc::downgrade(&receiver));
            pool.enqueue(key(1)).unwrap();

            match recv.recv().await.unwrap() {
                Outcome::Succeeded(entry) => assert_eq!(entry.metadata, metadata),
                Outcome::Failed(k) => panic!("fetch of {} failed", k),
            }
        });
    }

    #[test]
    fn test_same_key_goes_to_same_worker() {
        paused_runtime().block_on(async {
            let receiver: Arc<dyn FetchReceiver> = Arc::new(ChannelReceiver { outcomes: mpsc::unbounded_channel().0 });
            let pool = FetchWorkerPool::new(4, Arc::new(MockContentBackend::new()), Arc::downgrade(&receiver));
            assert_eq!(pool.num_workers(), 4);

            for n in 0..50 {
                let worker = pool.worker_for(&key(n));
                assert!(worker < 4);
                assert_eq!(pool.worker_for(&key(n)), worker);
            }
        });
    }

    #[test]
    fn test_worker_stops_when_receiver_is_gone() {
        paused_runtime().block_on(async {
            let mut backend = MockContentBackend::new();
            backend.expect_lookup()
                .times(1)
                .returning(|k| Ok(Some(ContentEntry::new(k, vec![]))));

            let (send, _recv) = mpsc::unbounded_channel();
            let receiver: Arc<dyn FetchReceiver> = Arc::new(ChannelReceiver { outcomes: send });
            let pool = FetchWorkerPool::new(1, Arc::new(backend), Arc::downgrade(&receiver));
            drop(receiver);

            pool.enqueue(key(1)).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            assert!(pool.enqueue(key(2)).is_err());
        });
    }
}
