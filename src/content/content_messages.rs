//! Payloads of the messages that request content and stream it back to the client. Ids are
//!  serialized as 16 raw bytes, numbers in network byte order. A trailing `data` field takes
//!  the rest of the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use uuid::Uuid;

use crate::transport::control_messages::{put_uuid, try_get_uuid};

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum TransferStatus {
    Ok = 0,
    Done = 1,
    UnknownSource = -2,
    #[num_enum(catch_all)]
    Other(i32),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TransferRequestMessage {
    pub transfer_id: Uuid,
    pub asset_id: Uuid,
}
impl TransferRequestMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_uuid(buf, self.transfer_id);
        put_uuid(buf, self.asset_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TransferRequestMessage> {
        let transfer_id = try_get_uuid(buf)?;
        let asset_id = try_get_uuid(buf)?;
        Ok(TransferRequestMessage { transfer_id, asset_id })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RequestImageMessage {
    pub image_id: Uuid,
}
impl RequestImageMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_uuid(buf, self.image_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<RequestImageMessage> {
        Ok(RequestImageMessage { image_id: try_get_uuid(buf)? })
    }
}

/// Announces an asset transfer (or its failure) ahead of the data packets
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TransferInfoMessage {
    pub transfer_id: Uuid,
    pub asset_id: Uuid,
    pub size: u32,
    pub status: TransferStatus,
}
impl TransferInfoMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_uuid(buf, self.transfer_id);
        put_uuid(buf, self.asset_id);
        buf.put_u32(self.size);
        buf.put_i32(self.status.into());
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TransferInfoMessage> {
        let transfer_id = try_get_uuid(buf)?;
        let asset_id = try_get_uuid(buf)?;
        let size = buf.try_get_u32()?;
        let status = TransferStatus::from(buf.try_get_i32()?);
        Ok(TransferInfoMessage { transfer_id, asset_id, size, status })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransferPacketMessage {
    pub transfer_id: Uuid,
    pub packet: u32,
    /// `Done` on the last packet of a transfer, `Ok` otherwise
    pub status: TransferStatus,
    pub data: Bytes,
}
impl TransferPacketMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_uuid(buf, self.transfer_id);
        buf.put_u32(self.packet);
        buf.put_i32(self.status.into());
        buf.put_slice(&self.data);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TransferPacketMessage> {
        let transfer_id = try_get_uuid(buf)?;
        let packet = buf.try_get_u32()?;
        let status = TransferStatus::from(buf.try_get_i32()?);
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(TransferPacketMessage { transfer_id, packet, status, data })
    }
}

/// First packet of a texture: carries the overall size and packet count besides the data
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImageDataMessage {
    pub image_id: Uuid,
    pub codec: u8,
    pub size: u32,
    pub packets: u16,
    pub data: Bytes,
}
impl ImageDataMessage {
    pub const CODEC_J2C: u8 = 2;

    pub fn ser(&self, buf: &mut BytesMut) {
        put_uuid(buf, self.image_id);
        buf.put_u8(self.codec);
        buf.put_u32(self.size);
        buf.put_u16(self.packets);
        buf.put_slice(&self.data);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ImageDataMessage> {
        let image_id = try_get_uuid(buf)?;
        let codec = buf.try_get_u8()?;
        let size = buf.try_get_u32()?;
        let packets = buf.try_get_u16()?;
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(ImageDataMessage { image_id, codec, size, packets, data })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImagePacketMessage {
    pub image_id: Uuid,
    pub packet: u16,
    pub data: Bytes,
}
impl ImagePacketMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_uuid(buf, self.image_id);
        buf.put_u16(self.packet);
        buf.put_slice(&self.data);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ImagePacketMessage> {
        let image_id = try_get_uuid(buf)?;
        let packet = buf.try_get_u16()?;
        let data = buf.copy_to_bytes(buf.remaining());
        Ok(ImagePacketMessage { image_id, packet, data })
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ImageNotInDatabaseMessage {
    pub image_id: Uuid,
}
impl ImageNotInDatabaseMessage {
    pub fn ser(&self, buf: &mut BytesMut) {
        put_uuid(buf, self.image_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ImageNotInDatabaseMessage> {
        Ok(ImageNotInDatabaseMessage { image_id: try_get_uuid(buf)? })
    }
}
