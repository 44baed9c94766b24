use anyhow::bail;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::safe_converter::PrecheckedCast;
use crate::transport::sequence_number::SequenceNumber;
use crate::transport::zerocode::{zero_decode, zero_encode};

bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct PacketFlags: u8 {
        const ZEROCODED = 0x80;
        const RELIABLE = 0x40;
        const RESENT = 0x20;
        const APPENDED_ACKS = 0x10;
    }
}

/// The kinds of message the network core needs to tell apart. Everything else is opaque to
///  this crate and passed on to the world as `Other`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum MessageKind {
    PacketAck = 0xFFFB,
    StartPingCheck = 0x0001,
    CompletePingCheck = 0x0002,
    UseCircuitCode = 0xFFF3,
    LogoutRequest = 0x00FC,
    TransferRequest = 0x0099,
    TransferInfo = 0x009A,
    TransferPacket = 0x0011,
    RequestImage = 0x0008,
    ImageData = 0x0009,
    ImagePacket = 0x000A,
    ImageNotInDatabase = 0x0056,
    #[num_enum(catch_all)]
    Other(u16),
}

/// A single datagram's worth of message: header fields, an opaque payload and optionally a
///  list of acks piggy-backed onto it.
///
/// Wire format - all numbers in network byte order:
/// ```ascii
///  flags (u8) | sequence number (u32, 24 bits used) | kind (u16) | payload ... | acks | #acks (u8)
/// ```
/// The ack trailer is present iff the APPENDED_ACKS flag is set. If ZEROCODED is set, kind
///  and payload are zero-run encoded on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub flags: PacketFlags,
    pub sequence: SequenceNumber,
    pub kind: MessageKind,
    pub payload: Bytes,
    pub appended_acks: Vec<SequenceNumber>,
}

impl Packet {
    pub const HEADER_LEN: usize = size_of::<u8>() + size_of::<u32>() + size_of::<u16>();

    pub fn new(kind: MessageKind, payload: impl Into<Bytes>, reliable: bool) -> Packet {
        let flags = if reliable { PacketFlags::RELIABLE } else { PacketFlags::empty() };
        Packet {
            flags,
            sequence: SequenceNumber::UNASSIGNED,
            kind,
            payload: payload.into(),
            appended_acks: Vec::new(),
        }
    }

    pub fn reliable(kind: MessageKind, payload: impl Into<Bytes>) -> Packet {
        Self::new(kind, payload, true)
    }

    pub fn unreliable(kind: MessageKind, payload: impl Into<Bytes>) -> Packet {
        Self::new(kind, payload, false)
    }

    pub fn zerocoded(mut self) -> Packet {
        self.flags.insert(PacketFlags::ZEROCODED);
        self
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(PacketFlags::RELIABLE)
    }

    pub fn is_resent(&self) -> bool {
        self.flags.contains(PacketFlags::RESENT)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let mut flags = self.flags;
        flags.set(PacketFlags::APPENDED_ACKS, !self.appended_acks.is_empty());

        buf.put_u8(flags.bits());
        buf.put_u32(self.sequence.to_raw());

        if flags.contains(PacketFlags::ZEROCODED) {
            let mut body = BytesMut::with_capacity(size_of::<u16>() + self.payload.len());
            body.put_u16(self.kind.into());
            body.put_slice(&self.payload);
            zero_encode(&body, buf);
        }
        else {
            buf.put_u16(self.kind.into());
            buf.put_slice(&self.payload);
        }

        if !self.appended_acks.is_empty() {
            for ack in &self.appended_acks {
                buf.put_u32(ack.to_raw());
            }
            buf.put_u8(self.appended_acks.len().prechecked_cast());
        }
    }

    pub fn deser(mut buf: &[u8]) -> anyhow::Result<Packet> {
        let flags = PacketFlags::from_bits_truncate(buf.try_get_u8()?);
        let sequence = SequenceNumber::from_raw(buf.try_get_u32()?);

        let mut appended_acks = Vec::new();
        if flags.contains(PacketFlags::APPENDED_ACKS) {
            let Some((&num_acks, rest)) = buf.split_last() else {
                bail!("packet flagged with appended acks has no ack trailer");
            };
            let acks_len = num_acks as usize * size_of::<u32>();
            if rest.len() < acks_len {
                bail!("ack trailer announces {} acks, but the packet is too short", num_acks);
            }
            let (body, mut acks_buf) = rest.split_at(rest.len() - acks_len);
            for _ in 0..num_acks {
                appended_acks.push(SequenceNumber::from_raw(acks_buf.try_get_u32()?));
            }
            buf = body;
        }

        let mut body = if flags.contains(PacketFlags::ZEROCODED) {
            let mut decoded = BytesMut::with_capacity(2 * buf.len());
            zero_decode(buf, &mut decoded)?;
            decoded.freeze()
        }
        else {
            Bytes::copy_from_slice(buf)
        };

        let kind = MessageKind::from(body.try_get_u16()?);

        Ok(Packet {
            flags: flags - PacketFlags::APPENDED_ACKS,
            sequence,
            kind,
            payload: body,
            appended_acks,
        })
    }
}
