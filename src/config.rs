use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;

use crate::transport::control_messages::PacketAckMessage;
use crate::transport::packet::Packet;
use crate::transport::sequence_number::SequenceNumber;

pub struct SimConfig {
    /// the UDP address the simulator listens on for client circuits
    pub self_addr: SocketAddr,
    pub transport: TransportConfig,
    pub content: ContentConfig,
}

impl SimConfig {
    pub fn new(self_addr: SocketAddr) -> SimConfig {
        SimConfig {
            self_addr,
            transport: TransportConfig::default(),
            content: ContentConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.transport.validate()?;
        self.content.validate()
    }
}

/// What to do when more acks are owed to the peer than fit into one flush
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AckOverflowPolicy {
    /// skip the flush for this cycle, keeping all owed acks for the next one
    Defer,
    /// flush all owed acks, spread over as many ack messages as necessary
    Split,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Period of the session timer that flushes owed acks and resends overdue packets
    pub tick_interval: Duration,
    /// A reliable packet that was not acknowledged for this long is sent again
    pub resend_timeout: Duration,
    /// Sequence numbers wrap from this value back to 1
    pub max_sequence: u32,
    /// Owed acks are piggy-backed on an outgoing reliable packet only if there are fewer than
    ///  this many of them - otherwise they wait for the next flush
    pub max_appended_acks: usize,
    /// The maximum number of acks sent in a single ack message
    pub max_pending_acks: usize,
    pub ack_overflow_policy: AckOverflowPolicy,
    /// A packet that was resent this many times without being acknowledged is considered
    ///  undeliverable, and the session is terminated. `None` means retrying indefinitely.
    pub max_resends: Option<u32>,
    /// Datagrams above this size are dropped on receipt
    pub max_datagram_size: usize,
    /// Content chunks for a session are held back while it has this many reliable packets
    ///  waiting for acknowledgement
    pub max_unacked_for_content: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            tick_interval: Duration::from_millis(500),
            resend_timeout: Duration::from_millis(4000),
            max_sequence: SequenceNumber::MAX_ON_WIRE,
            max_appended_acks: 10,
            max_pending_acks: 250,
            ack_overflow_policy: AckOverflowPolicy::Defer,
            max_resends: Some(8),
            max_datagram_size: 4096,
            max_unacked_for_content: 64,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval.is_zero() {
            bail!("tick interval must be positive");
        }
        if self.max_sequence == 0 || self.max_sequence > SequenceNumber::MAX_ON_WIRE {
            bail!("max sequence number must be in 1..={}", SequenceNumber::MAX_ON_WIRE);
        }
        if self.max_appended_acks > u8::MAX as usize {
            bail!("at most {} acks can be appended to a packet", u8::MAX);
        }
        if self.max_pending_acks == 0 || self.max_pending_acks > PacketAckMessage::MAX_ACKS {
            bail!("max pending acks must be in 1..={}", PacketAckMessage::MAX_ACKS);
        }
        if self.max_datagram_size < Packet::HEADER_LEN {
            bail!("max datagram size is too small");
        }
        if self.max_unacked_for_content == 0 {
            bail!("content backpressure threshold must be positive");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ContentConfig {
    /// Period of the loop streaming chunks of ready content to requesters
    pub delivery_interval: Duration,
    /// Per pool and drain cycle, at most this many deliveries get a chunk
    pub max_deliveries_per_drain: usize,
    pub first_chunk_len: usize,
    pub chunk_len: usize,
    /// Upper bound for the payload bytes retained per content pool - least recently used
    ///  entries are evicted beyond this
    pub pool_byte_budget: usize,
    pub num_fetch_workers: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        ContentConfig {
            delivery_interval: Duration::from_millis(100),
            max_deliveries_per_drain: 5,
            first_chunk_len: 600,
            chunk_len: 1000,
            pool_byte_budget: 64*1024*1024,
            num_fetch_workers: 1,
        }
    }
}

impl ContentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.delivery_interval.is_zero() {
            bail!("delivery interval must be positive");
        }
        if self.max_deliveries_per_drain == 0 {
            bail!("at least one delivery per drain cycle is required");
        }
        if self.first_chunk_len == 0 || self.chunk_len == 0 {
            bail!("chunk lengths must be positive");
        }
        if self.num_fetch_workers == 0 {
            bail!("at least one fetch worker is required");
        }
        Ok(())
    }
}
