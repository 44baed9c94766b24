//! Shared helpers for unit tests: collaborators that record what they are asked to do, so
//!  tests can assert on it afterwards.

use std::net::SocketAddr;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

use crate::content::content_id::ContentKey;
use crate::content::content_requester::{ContentChunk, ContentRequester};
use crate::transport::packet::{MessageKind, Packet};
use crate::transport::send_socket::SendSocket;

pub fn paused_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build().unwrap()
}

pub fn peer_addr() -> SocketAddr {
    SocketAddr::from(([1,2,3,4], 9))
}

#[derive(Default)]
pub struct RecordingSendSocket {
    sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    fail: Mutex<bool>,
}
impl RecordingSendSocket {
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn num_sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn take_sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn take_sent_packets(&self) -> Vec<Packet> {
        self.take_sent().into_iter()
            .map(|(_, buf)| Packet::deser(&buf).unwrap())
            .collect()
    }

    pub fn take_sent_kinds(&self) -> Vec<MessageKind> {
        self.take_sent_packets().into_iter()
            .map(|p| p.kind)
            .collect()
    }
}

#[async_trait]
impl SendSocket for RecordingSendSocket {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("simulated send failure"));
        }
        self.sent.lock().unwrap().push((to, datagram.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum RequesterEvent {
    Chunk(ContentChunk),
    NotFound(ContentKey, Uuid),
}

/// Records chunks and not-found notifications. Can be switched to report congestion.
#[derive(Default)]
pub struct RecordingRequester {
    events: Mutex<Vec<RequesterEvent>>,
    congested: Mutex<bool>,
}
impl RecordingRequester {
    pub fn set_congested(&self, congested: bool) {
        *self.congested.lock().unwrap() = congested;
    }

    pub fn events(&self) -> Vec<RequesterEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn chunks(&self) -> Vec<ContentChunk> {
        self.events().into_iter()
            .filter_map(|e| match e {
                RequesterEvent::Chunk(c) => Some(c),
                RequesterEvent::NotFound(_, _) => None,
            })
            .collect()
    }

    pub fn assembled(&self) -> Vec<u8> {
        self.chunks().iter()
            .flat_map(|c| c.data.to_vec())
            .collect()
    }
}

impl ContentRequester for RecordingRequester {
    fn deliver_chunk(&self, chunk: ContentChunk) -> anyhow::Result<()> {
        self.events.lock().unwrap().push(RequesterEvent::Chunk(chunk));
        Ok(())
    }

    fn content_not_found(&self, key: ContentKey, correlation_id: Uuid) {
        self.events.lock().unwrap().push(RequesterEvent::NotFound(key, correlation_id));
    }

    fn is_congested(&self) -> bool {
        *self.congested.lock().unwrap()
    }
}
