use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;

use crate::config::SimConfig;
use crate::content::backend::ContentBackend;
use crate::content::content_cache::ContentCache;
use crate::session::circuit::{Authenticator, CircuitInfo};
use crate::session::client_session::{ClientSession, SessionContext, SessionHandle, TerminationReason};
use crate::session::world_handler::WorldHandler;
use crate::transport::control_messages::UseCircuitCodeMessage;
use crate::transport::packet::{MessageKind, Packet};

/// The simulator's network front: it owns the UDP socket and the content cache, creates a
///  session for every client that opens a circuit, and routes incoming datagrams to their
///  session by peer address.
pub struct EndPoint {
    config: Arc<SimConfig>,
    receive_socket: Arc<UdpSocket>,
    context: SessionContext,
    sessions: RwLock<FxHashMap<SocketAddr, SessionHandle>>,
    delivery_loop: JoinHandle<()>,
}

impl Drop for EndPoint {
    fn drop(&mut self) {
        self.delivery_loop.abort();
    }
}

impl EndPoint {
    pub async fn new(
        config: Arc<SimConfig>,
        authenticator: Arc<dyn Authenticator>,
        world: Arc<dyn WorldHandler>,
        backend: Arc<dyn ContentBackend>,
    ) -> anyhow::Result<EndPoint> {
        config.validate()?;

        let receive_socket = Arc::new(UdpSocket::bind(config.self_addr).await?);
        info!("bound receive socket to {:?}", receive_socket.local_addr()?);

        let content_cache = ContentCache::new(Arc::new(config.content.clone()), backend);
        let delivery_loop = content_cache.spawn_delivery_loop();

        Ok(EndPoint {
            context: SessionContext {
                config: Arc::new(config.transport.clone()),
                send_socket: Arc::new(receive_socket.clone()),
                authenticator,
                world,
                content_cache,
            },
            config,
            receive_socket,
            sessions: Default::default(),
            delivery_loop,
        })
    }

    pub fn self_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.receive_socket.local_addr()?)
    }

    pub fn content_cache(&self) -> &Arc<ContentCache> {
        &self.context.content_cache
    }

    pub async fn session(&self, peer_addr: SocketAddr) -> Option<SessionHandle> {
        self.sessions.read().await
            .get(&peer_addr)
            .cloned()
    }

    pub async fn num_sessions(&self) -> usize {
        self.sessions.read().await
            .values()
            .filter(|s| !s.is_terminated())
            .count()
    }

    /// Terminates all sessions
    pub async fn shutdown(&self) {
        info!("shutting down all sessions");
        for session in self.sessions.write().await.drain().map(|(_, s)| s) {
            session.terminate(TerminationReason::Normal);
        }
    }

    pub async fn recv_loop(&self) {
        info!("starting receive loop");

        // one extra byte to detect datagrams exceeding the maximum size
        let mut buf = vec![0u8; self.config.transport.max_datagram_size + 1];
        loop {
            let (num_read, from) = match self.receive_socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "datagram_received", ?correlation_id);

            self.on_datagram(from, &buf[..num_read]).instrument(span).await;
        }
    }

    async fn on_datagram(&self, from: SocketAddr, datagram: &[u8]) {
        trace!("received {} bytes from {:?}", datagram.len(), from);

        if datagram.len() > self.config.transport.max_datagram_size {
            debug!("datagram from {:?} exceeds the maximum size of {} bytes - dropping", from, self.config.transport.max_datagram_size);
            return;
        }

        let packet = match Packet::deser(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("unparsable datagram from {:?}: {} - dropping", from, e);
                return;
            }
        };

        let Some(session) = self.get_or_create_session(from, &packet).await else {
            return;
        };

        if let Err(e) = session.on_datagram(packet).await {
            debug!("error processing datagram from {:?}: {}", from, e);
        }
    }

    async fn get_or_create_session(&self, from: SocketAddr, packet: &Packet) -> Option<SessionHandle> {
        if let Some(session) = self.sessions.read().await.get(&from) {
            if !session.is_terminated() {
                return Some(session.clone());
            }
        }

        if packet.kind != MessageKind::UseCircuitCode {
            debug!("{:?} packet from {:?} without an open circuit - dropping", packet.kind, from);
            return None;
        }
        let circuit: CircuitInfo = match UseCircuitCodeMessage::deser(&mut packet.payload.as_ref()) {
            Ok(msg) => msg.into(),
            Err(e) => {
                warn!("malformed circuit code message from {:?}: {} - dropping", from, e);
                return None;
            }
        };

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !s.is_terminated());

        match sessions.entry(from) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(e) => {
                info!("opening circuit {} for agent {} from {:?}", circuit.circuit_code, circuit.agent_id, from);
                let session = ClientSession::spawn(self.context.clone(), circuit, from);
                Some(e.insert(session).clone())
            }
        }
    }
}
