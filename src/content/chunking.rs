use std::ops::Range;

use crate::config::ContentConfig;

/// Splits content into the pieces that are streamed to a requester: the first chunk is
///  `first_chunk_len` bytes long, all following chunks `chunk_len` bytes, except for the last
///  which takes the remainder. Content that fits into the first chunk (including empty
///  content) is a single chunk.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ChunkLayout {
    first_chunk_len: usize,
    chunk_len: usize,
}

impl ChunkLayout {
    pub fn new(first_chunk_len: usize, chunk_len: usize) -> ChunkLayout {
        assert!(first_chunk_len > 0 && chunk_len > 0);
        ChunkLayout { first_chunk_len, chunk_len }
    }

    pub fn from_config(config: &ContentConfig) -> ChunkLayout {
        Self::new(config.first_chunk_len, config.chunk_len)
    }

    pub fn num_chunks(&self, content_len: usize) -> usize {
        if content_len <= self.first_chunk_len {
            1
        }
        else {
            1 + (content_len - self.first_chunk_len).div_ceil(self.chunk_len)
        }
    }

    /// byte range of chunk `index`; must be called with `index < num_chunks(content_len)`
    pub fn chunk_range(&self, content_len: usize, index: usize) -> Range<usize> {
        debug_assert!(index < self.num_chunks(content_len));

        if index == 0 {
            return 0..content_len.min(self.first_chunk_len);
        }
        let start = self.first_chunk_len + (index - 1) * self.chunk_len;
        start..content_len.min(start + self.chunk_len)
    }
}
