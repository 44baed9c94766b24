use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::content::content_entry::ContentEntry;
use crate::content::content_id::ContentKey;

/// The authoritative store for content, e.g. a remote asset server. Lookups may be slow; they
///  are only ever made from fetch workers, never from a session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContentBackend: Send + Sync + 'static {
    /// `Ok(None)` means the backend does not know the content
    async fn lookup(&self, key: ContentKey) -> anyhow::Result<Option<ContentEntry>>;

    async fn store(&self, entry: ContentEntry) -> anyhow::Result<()>;
}

/// A backend holding all content in memory
#[derive(Default)]
pub struct InMemoryContentBackend {
    entries: RwLock<FxHashMap<ContentKey, ContentEntry>>,
}

impl InMemoryContentBackend {
    pub fn new() -> InMemoryContentBackend {
        Default::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl ContentBackend for InMemoryContentBackend {
    async fn lookup(&self, key: ContentKey) -> anyhow::Result<Option<ContentEntry>> {
        Ok(self.entries.read().await
            .get(&key)
            .cloned())
    }

    async fn store(&self, entry: ContentEntry) -> anyhow::Result<()> {
        debug!("storing {} ({} bytes)", entry.key, entry.len());
        self.entries.write().await
            .insert(entry.key, entry);
        Ok(())
    }
}
