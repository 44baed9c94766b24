use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::safe_converter::PrecheckedCast;
use crate::transport::sequence_number::SequenceNumber;

/// Standalone acknowledgement of a list of reliable packets received from the peer
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PacketAckMessage {
    pub acks: Vec<SequenceNumber>,
}
impl PacketAckMessage {
    /// the count is serialized as a single byte
    pub const MAX_ACKS: usize = u8::MAX as usize;

    pub fn ser(&self, buf: &mut BytesMut) {
        debug_assert!(self.acks.len() <= Self::MAX_ACKS);

        buf.put_u8(self.acks.len().prechecked_cast());
        for ack in &self.acks {
            buf.put_u32(ack.to_raw());
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketAckMessage> {
        let num_acks = buf.try_get_u8()?;
        let mut acks = Vec::with_capacity(num_acks as usize);
        for _ in 0..num_acks {
            acks.push(SequenceNumber::from_raw(buf.try_get_u32()?));
        }
        Ok(PacketAckMessage { acks })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StartPingCheckMessage {
    pub ping_id: u8,
    /// the oldest sequence number the sender is still waiting to have acknowledged
    pub oldest_unacked: SequenceNumber,
}
impl StartPingCheckMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ping_id);
        buf.put_u32(self.oldest_unacked.to_raw());
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<StartPingCheckMessage> {
        let ping_id = buf.try_get_u8()?;
        let oldest_unacked = SequenceNumber::from_raw(buf.try_get_u32()?);
        Ok(StartPingCheckMessage { ping_id, oldest_unacked })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CompletePingCheckMessage {
    pub ping_id: u8,
}
impl CompletePingCheckMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ping_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<CompletePingCheckMessage> {
        Ok(CompletePingCheckMessage { ping_id: buf.try_get_u8()? })
    }
}

/// First message of a new client connection, naming the circuit it wants to use
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct UseCircuitCodeMessage {
    pub circuit_code: u32,
    pub session_id: Uuid,
    pub agent_id: Uuid,
}
impl UseCircuitCodeMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u32(self.circuit_code);
        put_uuid(buf, self.session_id);
        put_uuid(buf, self.agent_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<UseCircuitCodeMessage> {
        let circuit_code = buf.try_get_u32()?;
        let session_id = try_get_uuid(buf)?;
        let agent_id = try_get_uuid(buf)?;
        Ok(UseCircuitCodeMessage { circuit_code, session_id, agent_id })
    }
}

pub fn put_uuid(buf: &mut impl BufMut, uuid: Uuid) {
    buf.put_slice(uuid.as_bytes());
}

pub fn try_get_uuid(buf: &mut impl Buf) -> anyhow::Result<Uuid> {
    if buf.remaining() < 16 {
        bail!("buffer underflow reading UUID");
    }
    Ok(Uuid::from_u128(buf.get_u128()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(vec![], vec![0])]
    #[case::single(vec![5], vec![1, 0,0,0,5])]
    #[case::two(vec![0x10203, 7], vec![2, 0,1,2,3, 0,0,0,7])]
    fn test_packet_ack(#[case] acks: Vec<u32>, #[case] expected: Vec<u8>) {
        let msg = PacketAckMessage {
            acks: acks.into_iter().map(SequenceNumber::from_raw).collect(),
        };
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        assert_eq!(buf.as_ref(), expected.as_slice());

        let deser = PacketAckMessage::deser(&mut buf.as_ref()).unwrap();
        assert_eq!(deser, msg);
    }

    #[test]
    fn test_packet_ack_truncated() {
        let buf = vec![2u8, 0,0,0,5, 0,0];
        assert!(PacketAckMessage::deser(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_start_ping_check() {
        let msg = StartPingCheckMessage { ping_id: 9, oldest_unacked: SequenceNumber::from_raw(3) };
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        assert_eq!(buf.as_ref(), &[9, 0,0,0,3]);
        assert_eq!(StartPingCheckMessage::deser(&mut buf.as_ref()).unwrap(), msg);
    }

    #[test]
    fn test_use_circuit_code() {
        let msg = UseCircuitCodeMessage {
            circuit_code: 0x01020304,
            session_id: Uuid::from_u128(0x1111),
            agent_id: Uuid::from_u128(0x2222),
        };
        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        assert_eq!(buf.len(), 4 + 16 + 16);
        assert_eq!(&buf[..4], &[1,2,3,4]);
        assert_eq!(UseCircuitCodeMessage::deser(&mut buf.as_ref()).unwrap(), msg);
    }

    #[test]
    fn test_try_get_uuid_underflow() {
        let buf = vec![0u8; 15];
        assert!(try_get_uuid(&mut buf.as_slice()).is_err());
    }
}
