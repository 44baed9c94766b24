use std::collections::hash_map::Entry;
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::config::ContentConfig;
use crate::content::backend::ContentBackend;
use crate::content::chunking::ChunkLayout;
use crate::content::content_entry::ContentEntry;
use crate::content::content_id::{ContentKey, ContentKind};
use crate::content::content_pool::ContentPool;
use crate::content::content_requester::{ContentChunk, ContentRequester};
use crate::content::fetch_worker::{FetchReceiver, FetchWorkerPool};

struct ContentRequest {
    requester: Arc<dyn ContentRequester>,
    correlation_id: Uuid,
}

/// Streaming of one piece of content to one requester, one chunk per drain cycle
struct DeliveryTask {
    requester: Arc<dyn ContentRequester>,
    entry: Arc<ContentEntry>,
    correlation_id: Uuid,
    num_chunks: usize,
    next_chunk: usize,
}

/// A backend fetch that has not reported back yet, and the requests waiting for it
#[derive(Default)]
struct OutstandingFetch {
    waiters: Vec<ContentRequest>,
    /// Content for the key was stored while the fetch was running, so a 'not found' from this
    ///  fetch may be outdated
    superseded: bool,
}

struct ContentCacheInner {
    asset_pool: ContentPool,
    texture_pool: ContentPool,
    /// A key is present iff exactly one backend fetch for it is outstanding
    fetches: FxHashMap<ContentKey, OutstandingFetch>,
    asset_deliveries: VecDeque<DeliveryTask>,
    texture_deliveries: VecDeque<DeliveryTask>,
}

impl ContentCacheInner {
    fn pool_mut(&mut self, kind: ContentKind) -> &mut ContentPool {
        match kind {
            ContentKind::Asset => &mut self.asset_pool,
            ContentKind::Texture => &mut self.texture_pool,
        }
    }

    fn pool(&self, kind: ContentKind) -> &ContentPool {
        match kind {
            ContentKind::Asset => &self.asset_pool,
            ContentKind::Texture => &self.texture_pool,
        }
    }

    fn deliveries_mut(&mut self, kind: ContentKind) -> &mut VecDeque<DeliveryTask> {
        match kind {
            ContentKind::Asset => &mut self.asset_deliveries,
            ContentKind::Texture => &mut self.texture_deliveries,
        }
    }
}

/// The content cache sits between client sessions requesting assets and textures, and the
///  backend holding them.
///
/// Content is fetched from the backend at most once at a time per key: concurrent requests for
///  content that is not cached yet are recorded as waiters on a single fetch. Once content is
///  available, every request becomes a delivery task, and a periodic drain streams the content
///  in chunks, bounded per cycle so no single request can monopolize a session's bandwidth.
pub struct ContentCache {
    config: Arc<ContentConfig>,
    layout: ChunkLayout,
    backend: Arc<dyn ContentBackend>,
    fetch_workers: FetchWorkerPool,
    inner: Mutex<ContentCacheInner>,
}

impl ContentCache {
    pub fn new(config: Arc<ContentConfig>, backend: Arc<dyn ContentBackend>) -> Arc<ContentCache> {
        Arc::new_cyclic(|cache: &Weak<ContentCache>| {
            let receiver: Weak<dyn FetchReceiver> = cache.clone();

            ContentCache {
                layout: ChunkLayout::from_config(&config),
                fetch_workers: FetchWorkerPool::new(config.num_fetch_workers, backend.clone(), receiver),
                backend,
                inner: Mutex::new(ContentCacheInner {
                    asset_pool: ContentPool::new(config.pool_byte_budget),
                    texture_pool: ContentPool::new(config.pool_byte_budget),
                    fetches: FxHashMap::default(),
                    asset_deliveries: VecDeque::default(),
                    texture_deliveries: VecDeque::default(),
                }),
                config,
            }
        })
    }

    /// Requests content on behalf of a requester. Cached content is scheduled for delivery
    ///  right away; otherwise the request waits for a backend fetch, issuing one unless one is
    ///  already outstanding for the key.
    pub async fn request_content(&self, requester: Arc<dyn ContentRequester>, key: ContentKey, correlation_id: Uuid) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.pool_mut(key.kind).get(&key.id) {
            trace!("{} is cached - scheduling delivery", key);
            let task = self.new_delivery_task(requester, entry, correlation_id);
            inner.deliveries_mut(key.kind).push_back(task);
            return Ok(());
        }

        let request = ContentRequest { requester, correlation_id };
        match inner.fetches.entry(key) {
            Entry::Occupied(mut e) => {
                trace!("fetch for {} is already outstanding - adding waiter", key);
                e.get_mut().waiters.push(request);
            }
            Entry::Vacant(e) => {
                debug!("{} is not cached - fetching it from the backend", key);
                if let Err(err) = self.fetch_workers.enqueue(key) {
                    error!("could not fetch {}: {}", key, err);
                    request.requester.content_not_found(key, request.correlation_id);
                    return Err(err);
                }
                e.insert(OutstandingFetch {
                    waiters: vec![request],
                    superseded: false,
                });
            }
        }
        Ok(())
    }

    fn new_delivery_task(&self, requester: Arc<dyn ContentRequester>, entry: Arc<ContentEntry>, correlation_id: Uuid) -> DeliveryTask {
        DeliveryTask {
            requester,
            num_chunks: self.layout.num_chunks(entry.len()),
            entry,
            correlation_id,
            next_chunk: 0,
        }
    }

    fn schedule_waiters(&self, inner: &mut ContentCacheInner, entry: &Arc<ContentEntry>, waiters: Vec<ContentRequest>) {
        debug!("{} is available, {} request(s) waiting for it", entry.key, waiters.len());
        for waiter in waiters {
            let task = self.new_delivery_task(waiter.requester, entry.clone(), waiter.correlation_id);
            inner.deliveries_mut(entry.key.kind).push_back(task);
        }
    }

    /// Writes content through to the backend and makes it available in the cache, serving the
    ///  requests waiting for it. A fetch for the key that is still running stays registered
    ///  until it reports back, so no second fetch is issued in the meantime.
    pub async fn store_content(&self, entry: ContentEntry) -> anyhow::Result<()> {
        self.backend.store(entry.clone()).await?;

        let key = entry.key;
        let entry = Arc::new(entry);

        let mut inner = self.inner.lock().await;
        inner.pool_mut(key.kind).insert(entry.clone());

        let waiters = match inner.fetches.get_mut(&key) {
            Some(fetch) => {
                fetch.superseded = true;
                mem::take(&mut fetch.waiters)
            }
            None => Vec::new(),
        };
        self.schedule_waiters(&mut inner, &entry, waiters);
        Ok(())
    }

    /// Streams the next chunk of up to `max_deliveries_per_drain` delivery tasks of the given
    ///  kind, oldest first. Finished tasks and tasks whose requester went away are removed.
    ///  Tasks of congested requesters are skipped for this cycle.
    ///
    /// Returns the number of chunks delivered.
    pub async fn drain(&self, kind: ContentKind) -> usize {
        let mut inner = self.inner.lock().await;
        let deliveries = inner.deliveries_mut(kind);

        let num_processed = deliveries.len().min(self.config.max_deliveries_per_drain);
        let mut unfinished = Vec::with_capacity(num_processed);
        let mut num_delivered = 0;

        for mut task in deliveries.drain(..num_processed) {
            if task.requester.is_congested() {
                trace!("requester of {} is congested - holding back the next chunk", task.entry.key);
                unfinished.push(task);
                continue;
            }

            let range = self.layout.chunk_range(task.entry.len(), task.next_chunk);
            let chunk = ContentChunk {
                key: task.entry.key,
                correlation_id: task.correlation_id,
                index: task.next_chunk,
                num_chunks: task.num_chunks,
                total_len: task.entry.len(),
                data: task.entry.data.slice(range),
            };

            if let Err(e) = task.requester.deliver_chunk(chunk) {
                debug!("abandoning delivery of {}: {}", task.entry.key, e);
                continue;
            }
            num_delivered += 1;

            task.next_chunk += 1;
            if task.next_chunk < task.num_chunks {
                unfinished.push(task);
            }
            else {
                trace!("delivery of {} for {} complete", task.entry.key, task.correlation_id);
            }
        }

        // unfinished tasks keep their place at the head of the queue
        for task in unfinished.into_iter().rev() {
            deliveries.push_front(task);
        }
        num_delivered
    }

    /// Spawns the loop draining both pools every `delivery_interval`. The loop holds the cache
    ///  weakly and ends when the cache is dropped; the caller owns the returned handle.
    pub fn spawn_delivery_loop(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Self::do_delivery_loop(self.config.clone(), Arc::downgrade(self)))
    }

    async fn do_delivery_loop(config: Arc<ContentConfig>, cache: Weak<ContentCache>) {
        let mut ticks = interval(config.delivery_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticks.tick().await;

            let Some(cache) = cache.upgrade() else {
                debug!("content cache is gone - stopping delivery loop");
                return;
            };
            cache.drain(ContentKind::Texture).await;
            cache.drain(ContentKind::Asset).await;
        }
    }

    pub async fn is_cached(&self, key: ContentKey) -> bool {
        self.inner.lock().await
            .pool(key.kind).contains(&key.id)
    }

    /// number of delivery tasks with content still to send
    pub async fn num_ready(&self, kind: ContentKind) -> usize {
        self.inner.lock().await
            .deliveries_mut(kind).len()
    }

    /// number of requests waiting for an outstanding fetch of the key
    pub async fn num_waiting(&self, key: ContentKey) -> usize {
        self.inner.lock().await
            .fetches.get(&key)
            .map(|f| f.waiters.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl FetchReceiver for ContentCache {
    async fn on_fetch_succeeded(&self, entry: ContentEntry) {
        let key = entry.key;
        let entry = Arc::new(entry);

        let mut inner = self.inner.lock().await;
        let fetch = inner.fetches.remove(&key).unwrap_or_default();

        // content stored during the fetch is at least as recent as what the fetch returned
        if !(fetch.superseded && inner.pool(key.kind).contains(&key.id)) {
            inner.pool_mut(key.kind).insert(entry.clone());
        }
        self.schedule_waiters(&mut inner, &entry, fetch.waiters);
    }

    async fn on_fetch_failed(&self, key: ContentKey) {
        let mut inner = self.inner.lock().await;
        let fetch = inner.fetches.remove(&key).unwrap_or_default();

        if fetch.superseded && !fetch.waiters.is_empty() {
            debug!("fetch of {} failed, but the content was stored meanwhile - fetching again for {} request(s)", key, fetch.waiters.len());
            match self.fetch_workers.enqueue(key) {
                Ok(()) => {
                    inner.fetches.insert(key, OutstandingFetch {
                        waiters: fetch.waiters,
                        superseded: false,
                    });
                    return;
                }
                Err(e) => error!("could not fetch {}: {}", key, e),
            }
        }

        debug!("{} could not be fetched, notifying {} waiting request(s)", key, fetch.waiters.len());
        for waiter in fetch.waiters {
            waiter.requester.content_not_found(key, waiter.correlation_id);
        }
    }
}
