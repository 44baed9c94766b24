use bytes::Bytes;

use crate::content::content_id::ContentKey;

/// Descriptive data travelling with a piece of content. It is carried through the cache but
///  not interpreted by it.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ContentMetadata {
    pub name: String,
    pub description: String,
    pub asset_type: i8,
    pub inv_type: i8,
}

/// A fetched piece of content. Entries are immutable once fetched and shared between the pool
///  and in-progress deliveries, so evicting an entry from its pool does not affect deliveries
///  that already started.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ContentEntry {
    pub key: ContentKey,
    pub data: Bytes,
    pub metadata: ContentMetadata,
}

impl ContentEntry {
    pub fn new(key: ContentKey, data: impl Into<Bytes>) -> ContentEntry {
        ContentEntry {
            key,
            data: data.into(),
            metadata: ContentMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ContentMetadata) -> ContentEntry {
        self.metadata = metadata;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
