//! Network front end of a virtual-world simulator: a reliable transport over UDP, per-client
//!  sessions that process their traffic in order, and a content cache that streams assets and
//!  textures to clients in chunks.

pub mod config;
pub mod content;
pub mod end_point;
pub mod safe_converter;
pub mod session;
pub mod transport;

#[cfg(test)]
pub mod test_util;
