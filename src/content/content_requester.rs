use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use uuid::Uuid;

use crate::content::content_id::ContentKey;

/// One piece of content on its way to a requester, together with what the requester needs to
///  frame it for the wire.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ContentChunk {
    pub key: ContentKey,
    /// identifies the request on the requester's side (transfer id or image id)
    pub correlation_id: Uuid,
    pub index: usize,
    pub num_chunks: usize,
    /// length of the complete content, not of this chunk
    pub total_len: usize,
    pub data: Bytes,
}

impl ContentChunk {
    pub fn is_first(&self) -> bool {
        self.index == 0
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.num_chunks
    }
}

/// The receiving end of content delivery, typically a client session.
///
/// Calls happen while the cache holds its lock, so implementations must not call back into the
///  cache and should do no more than hand the data off.
#[cfg_attr(test, automock)]
pub trait ContentRequester: Send + Sync + 'static {
    /// Returns an error if the requester can not accept data any more, e.g. because its session
    ///  terminated. The delivery is abandoned in that case.
    fn deliver_chunk(&self, chunk: ContentChunk) -> anyhow::Result<()>;

    fn content_not_found(&self, key: ContentKey, correlation_id: Uuid);

    /// While this returns true, the requester gets no chunks and its deliveries keep their
    ///  place in the queue.
    fn is_congested(&self) -> bool;
}
