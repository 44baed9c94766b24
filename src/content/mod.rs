pub mod backend;
pub mod chunking;
pub mod content_cache;
pub mod content_entry;
pub mod content_id;
pub mod content_messages;
pub mod content_pool;
pub mod content_requester;
pub mod fetch_worker;
