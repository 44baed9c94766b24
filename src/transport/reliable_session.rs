use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::bail;
use bytes::BytesMut;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{AckOverflowPolicy, TransportConfig};
use crate::transport::control_messages::{CompletePingCheckMessage, PacketAckMessage, StartPingCheckMessage};
use crate::transport::packet::{MessageKind, Packet, PacketFlags};
use crate::transport::send_socket::SendSocket;
use crate::transport::sequence_number::SequenceNumber;

/// What the caller should do with a packet after [ReliableSession::on_receive] processed it
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReceiveOutcome {
    /// the packet was transport-internal (ack, ping) and is fully handled
    Consumed,
    /// the packet carries application content and needs to be dispatched
    Dispatch,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct TickReport {
    pub num_acks_flushed: usize,
    pub num_resent: usize,
    /// true if owed acks were held back because they exceeded the per-message limit
    pub ack_backpressure: bool,
}

/// A reliable packet was resent the configured maximum number of times without being
///  acknowledged. The peer is considered unreachable.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResendLimitExceeded {
    pub sequence: SequenceNumber,
    pub num_resends: u32,
}
impl Display for ResendLimitExceeded {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "packet {} was resent {} times without being acknowledged", self.sequence, self.num_resends)
    }
}
impl std::error::Error for ResendLimitExceeded {}

struct UnackedPacket {
    packet: Packet,
    sent_at: Instant,
    num_resends: u32,
}

struct ReliableSessionInner {
    last_sequence: SequenceNumber,
    unacked: BTreeMap<SequenceNumber, UnackedPacket>,
    pending_acks: BTreeSet<SequenceNumber>,
}

/// The per-peer reliability layer: it numbers outgoing packets, keeps reliable packets until
///  the peer acknowledges them, resends them if that takes too long, and keeps track of the acks
///  owed to the peer.
///
/// All state is guarded by a single lock, but the lock is never held while a datagram goes out
///  on the socket.
pub struct ReliableSession {
    config: Arc<TransportConfig>,
    peer_addr: SocketAddr,
    send_socket: Arc<dyn SendSocket>,
    inner: Mutex<ReliableSessionInner>,
    /// mirrors `inner.unacked.len()` for lock-free reads
    num_unacked_snapshot: AtomicUsize,
}

impl ReliableSession {
    pub fn new(config: Arc<TransportConfig>, peer_addr: SocketAddr, send_socket: Arc<dyn SendSocket>) -> ReliableSession {
        ReliableSession {
            config,
            peer_addr,
            send_socket,
            inner: Mutex::new(ReliableSessionInner {
                last_sequence: SequenceNumber::UNASSIGNED,
                unacked: BTreeMap::default(),
                pending_acks: BTreeSet::default(),
            }),
            num_unacked_snapshot: AtomicUsize::new(0),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Assigns the next sequence number, piggy-backs owed acks if the packet qualifies, and
    ///  sends the packet. A reliable packet is retained for resending before it goes out.
    pub async fn send(&self, mut packet: Packet) -> anyhow::Result<SequenceNumber> {
        let (sequence, datagram) = {
            let mut inner = self.inner.lock().await;

            let sequence = inner.last_sequence.next(self.config.max_sequence);
            inner.last_sequence = sequence;

            packet.sequence = sequence;
            packet.flags.remove(PacketFlags::RESENT);
            packet.appended_acks.clear();

            if self.can_piggy_back_acks(&packet, inner.pending_acks.len()) {
                packet.appended_acks = mem::take(&mut inner.pending_acks).into_iter().collect();
            }

            let mut buf = BytesMut::with_capacity(Packet::HEADER_LEN + packet.payload.len() + 1 + 4*packet.appended_acks.len());
            packet.ser(&mut buf);

            if packet.is_reliable() {
                let unacked = UnackedPacket {
                    packet,
                    sent_at: Instant::now(),
                    num_resends: 0,
                };
                if inner.unacked.insert(sequence, unacked).is_some() {
                    warn!("sequence number {} wrapped onto a packet that is still unacknowledged by {:?} - dropping the old packet", sequence, self.peer_addr);
                }
                self.num_unacked_snapshot.store(inner.unacked.len(), Ordering::Relaxed);
            }
            (sequence, buf)
        };

        trace!("sending packet {} to {:?}", sequence, self.peer_addr);
        self.send_socket.send_datagram(self.peer_addr, &datagram).await?;
        Ok(sequence)
    }

    fn can_piggy_back_acks(&self, packet: &Packet, num_pending: usize) -> bool {
        packet.is_reliable()
            && !matches!(packet.kind, MessageKind::PacketAck | MessageKind::LogoutRequest)
            && num_pending > 0
            && num_pending < self.config.max_appended_acks
    }

    /// Applies the acks carried by an incoming packet and records the packet as owing an ack if
    ///  it is reliable. Pings are answered right away.
    ///
    /// Duplicates are not suppressed: a reliable packet that arrives twice is acked and
    ///  dispatched twice.
    pub async fn on_receive(&self, packet: &Packet) -> anyhow::Result<ReceiveOutcome> {
        let mut ping_reply = None;

        let outcome = {
            let mut inner = self.inner.lock().await;

            for ack in &packet.appended_acks {
                Self::apply_ack(&mut inner, *ack);
            }

            if packet.is_reliable() && packet.sequence.is_assigned() {
                inner.pending_acks.insert(packet.sequence);
            }

            let outcome = match packet.kind {
                MessageKind::PacketAck => {
                    match PacketAckMessage::deser(&mut packet.payload.as_ref()) {
                        Ok(msg) => {
                            for ack in msg.acks {
                                Self::apply_ack(&mut inner, ack);
                            }
                        }
                        Err(e) => warn!("malformed ack message from {:?}: {}", self.peer_addr, e),
                    }
                    ReceiveOutcome::Consumed
                }
                MessageKind::StartPingCheck => {
                    match StartPingCheckMessage::deser(&mut packet.payload.as_ref()) {
                        Ok(msg) => ping_reply = Some(CompletePingCheckMessage { ping_id: msg.ping_id }),
                        Err(e) => warn!("malformed ping from {:?}: {}", self.peer_addr, e),
                    }
                    ReceiveOutcome::Consumed
                }
                _ => ReceiveOutcome::Dispatch,
            };
            self.num_unacked_snapshot.store(inner.unacked.len(), Ordering::Relaxed);
            outcome
        };

        if let Some(reply) = ping_reply {
            trace!("answering ping {} from {:?}", reply.ping_id, self.peer_addr);
            let mut buf = BytesMut::new();
            reply.ser(&mut buf);
            self.send(Packet::unreliable(MessageKind::CompletePingCheck, buf)).await?;
        }
        Ok(outcome)
    }

    fn apply_ack(inner: &mut ReliableSessionInner, ack: SequenceNumber) {
        if inner.unacked.remove(&ack).is_some() {
            trace!("packet {} acknowledged", ack);
        }
    }

    /// Periodic housekeeping: flushes owed acks and resends reliable packets whose ack is
    ///  overdue.
    ///
    /// Returns [ResendLimitExceeded] (wrapped in the `anyhow::Error`) if a packet exhausted its
    ///  resends, and any socket error. Both are fatal for the session.
    pub async fn tick(&self) -> anyhow::Result<TickReport> {
        let mut report = TickReport::default();

        let ack_batches = self.take_ack_batches(&mut report).await;
        for acks in ack_batches {
            report.num_acks_flushed += acks.len();

            let mut buf = BytesMut::with_capacity(1 + 4*acks.len());
            PacketAckMessage { acks }.ser(&mut buf);
            self.send(Packet::unreliable(MessageKind::PacketAck, buf)).await?;
        }

        for datagram in self.collect_resends().await? {
            self.send_socket.send_datagram(self.peer_addr, &datagram).await?;
            report.num_resent += 1;
        }

        Ok(report)
    }

    async fn take_ack_batches(&self, report: &mut TickReport) -> Vec<Vec<SequenceNumber>> {
        let mut inner = self.inner.lock().await;

        let num_pending = inner.pending_acks.len();
        if num_pending == 0 {
            return Vec::new();
        }
        if num_pending <= self.config.max_pending_acks {
            return vec![mem::take(&mut inner.pending_acks).into_iter().collect()];
        }

        match self.config.ack_overflow_policy {
            AckOverflowPolicy::Defer => {
                warn!("{} acks owed to {:?}, more than fit into one message - deferring the flush", num_pending, self.peer_addr);
                report.ack_backpressure = true;
                Vec::new()
            }
            AckOverflowPolicy::Split => {
                let all: Vec<_> = mem::take(&mut inner.pending_acks).into_iter().collect();
                debug!("{} acks owed to {:?}, splitting them over several messages", num_pending, self.peer_addr);
                all.chunks(self.config.max_pending_acks)
                    .map(|c| c.to_vec())
                    .collect()
            }
        }
    }

    async fn collect_resends(&self) -> anyhow::Result<Vec<BytesMut>> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let mut result = Vec::new();
        for (sequence, unacked) in inner.unacked.iter_mut() {
            if now.saturating_duration_since(unacked.sent_at) <= self.config.resend_timeout {
                continue;
            }

            if let Some(max_resends) = self.config.max_resends {
                if unacked.num_resends >= max_resends {
                    warn!("giving up on packet {} to {:?} after {} resends", sequence, self.peer_addr, unacked.num_resends);
                    bail!(ResendLimitExceeded { sequence: *sequence, num_resends: unacked.num_resends });
                }
            }

            debug!("resending packet {} to {:?}", sequence, self.peer_addr);
            unacked.num_resends += 1;
            unacked.sent_at = now;
            unacked.packet.flags.insert(PacketFlags::RESENT);
            // acks went out with the first transmission and are not repeated
            unacked.packet.appended_acks.clear();

            let mut buf = BytesMut::with_capacity(Packet::HEADER_LEN + unacked.packet.payload.len());
            unacked.packet.ser(&mut buf);
            result.push(buf);
        }
        Ok(result)
    }

    pub async fn num_unacked(&self) -> usize {
        self.inner.lock().await.unacked.len()
    }

    /// True while so many reliable packets await their ack that bulk traffic (content chunks)
    ///  should hold back. Reads a snapshot, so it does not wait for the session lock.
    pub fn is_congested(&self) -> bool {
        self.num_unacked_snapshot.load(Ordering::Relaxed) >= self.config.max_unacked_for_content
    }

    pub async fn num_pending_acks(&self) -> usize {
        self.inner.lock().await.pending_acks.len()
    }

    /// The sequence number of the reliable packet that has been waiting for its ack the longest
    pub async fn oldest_unacked(&self) -> Option<SequenceNumber> {
        self.inner.lock().await.unacked.iter()
            .min_by_key(|(_, p)| p.sent_at)
            .map(|(s, _)| *s)
    }
}
