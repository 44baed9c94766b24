use std::sync::Weak;

use anyhow::{anyhow, bail};
use bytes::BytesMut;
use tracing::trace;
use uuid::Uuid;

use crate::content::content_id::{ContentKey, ContentKind};
use crate::content::content_messages::{ImageDataMessage, ImageNotInDatabaseMessage, ImagePacketMessage, TransferInfoMessage, TransferPacketMessage, TransferStatus};
use crate::content::content_requester::{ContentChunk, ContentRequester};
use crate::session::client_session::{SessionShared, WorkItem};
use crate::transport::packet::{MessageKind, Packet};

/// A session's endpoint for content delivery: turns chunks into wire messages and queues them
///  on the session like any other outbound message. Holds the session weakly, so pending
///  deliveries do not keep a session alive.
pub struct SessionOutbox {
    session: Weak<SessionShared>,
}

impl SessionOutbox {
    pub(crate) fn new(session: Weak<SessionShared>) -> SessionOutbox {
        SessionOutbox { session }
    }

    fn enqueue_all(&self, packets: Vec<Packet>) -> anyhow::Result<()> {
        let Some(session) = self.session.upgrade() else {
            bail!("session is gone");
        };
        for packet in packets {
            session.enqueue(WorkItem::Outbound(packet))?;
        }
        Ok(())
    }

    fn asset_packets(chunk: ContentChunk) -> anyhow::Result<Vec<Packet>> {
        let mut result = Vec::with_capacity(2);

        if chunk.is_first() {
            let mut buf = BytesMut::new();
            TransferInfoMessage {
                transfer_id: chunk.correlation_id,
                asset_id: chunk.key.id.0,
                size: u32::try_from(chunk.total_len)?,
                status: TransferStatus::Ok,
            }.ser(&mut buf);
            result.push(Packet::reliable(MessageKind::TransferInfo, buf));
        }

        let mut buf = BytesMut::with_capacity(chunk.data.len() + 24);
        TransferPacketMessage {
            transfer_id: chunk.correlation_id,
            packet: u32::try_from(chunk.index)?,
            status: if chunk.is_last() { TransferStatus::Done } else { TransferStatus::Ok },
            data: chunk.data,
        }.ser(&mut buf);
        result.push(Packet::reliable(MessageKind::TransferPacket, buf));

        Ok(result)
    }

    fn texture_packet(chunk: ContentChunk) -> anyhow::Result<Packet> {
        let mut buf = BytesMut::with_capacity(chunk.data.len() + 24);

        if chunk.is_first() {
            ImageDataMessage {
                image_id: chunk.key.id.0,
                codec: ImageDataMessage::CODEC_J2C,
                size: u32::try_from(chunk.total_len)?,
                packets: u16::try_from(chunk.num_chunks)
                    .map_err(|_| anyhow!("texture {} has too many packets: {}", chunk.key, chunk.num_chunks))?,
                data: chunk.data,
            }.ser(&mut buf);
            Ok(Packet::reliable(MessageKind::ImageData, buf))
        }
        else {
            ImagePacketMessage {
                image_id: chunk.key.id.0,
                packet: u16::try_from(chunk.index)?,
                data: chunk.data,
            }.ser(&mut buf);
            Ok(Packet::reliable(MessageKind::ImagePacket, buf))
        }
    }
}

impl ContentRequester for SessionOutbox {
    fn deliver_chunk(&self, chunk: ContentChunk) -> anyhow::Result<()> {
        trace!("delivering chunk {} of {} for {}", chunk.index, chunk.num_chunks, chunk.key);

        let packets = match chunk.key.kind {
            ContentKind::Asset => Self::asset_packets(chunk)?,
            ContentKind::Texture => vec![Self::texture_packet(chunk)?],
        };
        self.enqueue_all(packets)
    }

    fn content_not_found(&self, key: ContentKey, correlation_id: Uuid) {
        let mut buf = BytesMut::new();
        let packet = match key.kind {
            ContentKind::Asset => {
                TransferInfoMessage {
                    transfer_id: correlation_id,
                    asset_id: key.id.0,
                    size: 0,
                    status: TransferStatus::UnknownSource,
                }.ser(&mut buf);
                Packet::reliable(MessageKind::TransferInfo, buf)
            }
            ContentKind::Texture => {
                ImageNotInDatabaseMessage { image_id: key.id.0 }.ser(&mut buf);
                Packet::reliable(MessageKind::ImageNotInDatabase, buf)
            }
        };

        if let Err(e) = self.enqueue_all(vec![packet]) {
            trace!("not notifying about missing {}: {}", key, e);
        }
    }

    fn is_congested(&self) -> bool {
        // a gone session is not congested: the next chunk fails and ends the delivery
        self.session.upgrade()
            .map(|session| session.is_congested())
            .unwrap_or(false)
    }
}
