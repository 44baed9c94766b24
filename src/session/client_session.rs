use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, error, info, span, trace, warn, Instrument, Level};

use crate::config::TransportConfig;
use crate::content::content_cache::ContentCache;
use crate::content::content_id::ContentKey;
use crate::content::content_messages::{RequestImageMessage, TransferRequestMessage};
use crate::session::circuit::{Authenticator, CircuitInfo};
use crate::session::outbox::SessionOutbox;
use crate::session::world_handler::WorldHandler;
use crate::transport::packet::{MessageKind, Packet};
use crate::transport::reliable_session::{ReceiveOutcome, ReliableSession, ResendLimitExceeded};
use crate::transport::send_socket::SendSocket;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TerminationReason {
    /// the client logged out, or the server shut the session down
    Normal,
    AuthenticationRejected,
    /// the authenticator could not decide
    AuthenticationFailed,
    SendFailure,
    /// a reliable packet was never acknowledged despite all resends
    ResendLimitExceeded,
}

pub(crate) enum WorkItem {
    Inbound(Packet),
    Outbound(Packet),
}

/// The collaborators shared by all sessions of a simulator
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<TransportConfig>,
    pub send_socket: Arc<dyn SendSocket>,
    pub authenticator: Arc<dyn Authenticator>,
    pub world: Arc<dyn WorldHandler>,
    pub content_cache: Arc<ContentCache>,
}

pub(crate) struct SessionShared {
    circuit: CircuitInfo,
    reliable: ReliableSession,
    queue: mpsc::UnboundedSender<WorkItem>,
    termination: watch::Sender<Option<TerminationReason>>,
}

impl SessionShared {
    pub(crate) fn is_terminated(&self) -> bool {
        self.termination.borrow().is_some()
    }

    pub(crate) fn is_congested(&self) -> bool {
        self.reliable.is_congested()
    }

    pub(crate) fn enqueue(&self, item: WorkItem) -> anyhow::Result<()> {
        if self.is_terminated() {
            bail!("session for circuit {} is terminated", self.circuit.circuit_code);
        }
        self.queue.send(item)
            .map_err(|_| anyhow!("session worker for circuit {} is gone", self.circuit.circuit_code))
    }

    fn terminate(&self, reason: TerminationReason) {
        let changed = self.termination.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            }
            else {
                false
            }
        });
        if changed {
            match reason {
                TerminationReason::Normal => info!("session for circuit {} terminated", self.circuit.circuit_code),
                _ => warn!("session for circuit {} terminated: {:?}", self.circuit.circuit_code, reason),
            }
        }
    }
}

/// A client's session with the simulator. Everything that happens in the session - inbound
///  messages after transport bookkeeping, outbound messages from the world or the content cache
///  - goes through a single queue, processed strictly in order by the session's worker.
///
/// A separate timer task drives the transport's ack flushing and resending.
///
/// The session ends when it is terminated explicitly, when the client logs out, or on a fatal
///  transport error. Termination stops both tasks; messages still in the queue or waiting for
///  acknowledgement are abandoned.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl Debug for SessionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionHandle{{circuit:{}, peer:{:?}}}", self.shared.circuit.circuit_code, self.shared.reliable.peer_addr())
    }
}

impl SessionHandle {
    pub fn circuit(&self) -> &CircuitInfo {
        &self.shared.circuit
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.reliable.peer_addr()
    }

    /// Transport bookkeeping for an incoming packet (acks, pings) happens right away, on the
    ///  caller's task. Packets with content for the session are queued for its worker.
    pub async fn on_datagram(&self, packet: Packet) -> anyhow::Result<()> {
        if self.is_terminated() {
            trace!("session for circuit {} is terminated - dropping packet", self.shared.circuit.circuit_code);
            return Ok(());
        }

        let outcome = match self.shared.reliable.on_receive(&packet).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("error sending to {:?}: {}", self.peer_addr(), e);
                self.terminate(TerminationReason::SendFailure);
                return Err(e);
            }
        };

        match outcome {
            ReceiveOutcome::Consumed => Ok(()),
            ReceiveOutcome::Dispatch => self.shared.enqueue(WorkItem::Inbound(packet)),
        }
    }

    /// Queues a message for the client. It is sent after everything queued before it.
    pub fn send(&self, packet: Packet) -> anyhow::Result<()> {
        self.shared.enqueue(WorkItem::Outbound(packet))
    }

    /// Terminates the session. Only the first termination counts, later calls are ignored.
    pub fn terminate(&self, reason: TerminationReason) {
        self.shared.terminate(reason);
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        *self.shared.termination.borrow()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Waits for the session to terminate
    pub async fn closed(&self) -> TerminationReason {
        let mut termination = self.shared.termination.subscribe();
        wait_terminated(&mut termination).await;
        self.termination_reason().unwrap_or(TerminationReason::Normal)
    }

    pub(crate) fn outbox(&self) -> SessionOutbox {
        SessionOutbox::new(Arc::downgrade(&self.shared))
    }
}

/// Resolves once a termination reason is set. The watch guard is released before returning, so
///  the future can sit in a `select!` of a spawned task.
async fn wait_terminated(termination: &mut watch::Receiver<Option<TerminationReason>>) {
    let _ = termination.wait_for(Option::is_some).await;
}

pub struct ClientSession;

impl ClientSession {
    /// Creates the session and spawns its worker and timer tasks. The worker authenticates the
    ///  circuit before processing anything else; items submitted in the meantime are queued.
    pub fn spawn(context: SessionContext, circuit: CircuitInfo, peer_addr: SocketAddr) -> SessionHandle {
        let (queue_send, queue_recv) = mpsc::unbounded_channel();
        let (termination, _) = watch::channel(None);

        let handle = SessionHandle {
            shared: Arc::new(SessionShared {
                circuit,
                reliable: ReliableSession::new(context.config.clone(), peer_addr, context.send_socket.clone()),
                queue: queue_send,
                termination,
            }),
        };

        let span = span!(Level::DEBUG, "session", circuit_code = circuit.circuit_code, ?peer_addr);
        tokio::spawn(Self::do_tick_loop(handle.clone(), context.config.tick_interval).instrument(span.clone()));
        tokio::spawn(Self::do_work_loop(handle.clone(), queue_recv, context).instrument(span));

        handle
    }

    async fn do_work_loop(handle: SessionHandle, mut queue: mpsc::UnboundedReceiver<WorkItem>, context: SessionContext) {
        let mut termination = handle.shared.termination.subscribe();
        let circuit = handle.shared.circuit;

        let agent = select! {
            biased;
            _ = wait_terminated(&mut termination) => return,
            auth = context.authenticator.authenticate(circuit) => match auth {
                Ok(Some(agent)) => agent,
                Ok(None) => {
                    handle.terminate(TerminationReason::AuthenticationRejected);
                    return;
                }
                Err(e) => {
                    error!("error authenticating circuit {}: {}", circuit.circuit_code, e);
                    handle.terminate(TerminationReason::AuthenticationFailed);
                    return;
                }
            },
        };
        info!("circuit {} authenticated for {} {}", circuit.circuit_code, agent.first_name, agent.last_name);
        context.world.on_session_started(handle.clone(), agent).await;

        let outbox: Arc<SessionOutbox> = Arc::new(handle.outbox());
        loop {
            select! {
                biased;
                _ = wait_terminated(&mut termination) => break,
                item = queue.recv() => match item {
                    Some(WorkItem::Outbound(packet)) => Self::process_outbound(&handle, packet).await,
                    Some(WorkItem::Inbound(packet)) => Self::process_inbound(&handle, &context, &outbox, packet).await,
                    None => break,
                },
            }
        }

        let reason = handle.termination_reason().unwrap_or(TerminationReason::Normal);
        context.world.on_session_terminated(circuit.circuit_code, reason).await;
        debug!("session worker stopped");
    }

    async fn process_outbound(handle: &SessionHandle, packet: Packet) {
        if let Err(e) = handle.shared.reliable.send(packet).await {
            error!("error sending to {:?}: {}", handle.peer_addr(), e);
            handle.terminate(TerminationReason::SendFailure);
        }
    }

    async fn process_inbound(handle: &SessionHandle, context: &SessionContext, outbox: &Arc<SessionOutbox>, packet: Packet) {
        trace!("processing {:?} packet {}", packet.kind, packet.sequence);

        match packet.kind {
            MessageKind::TransferRequest => {
                let msg = match TransferRequestMessage::deser(&mut packet.payload.as_ref()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("malformed transfer request: {} - dropping", e);
                        return;
                    }
                };
                let key = ContentKey::asset(msg.asset_id);
                if let Err(e) = context.content_cache.request_content(outbox.clone(), key, msg.transfer_id).await {
                    warn!("request for {} failed: {}", key, e);
                }
            }
            MessageKind::RequestImage => {
                let msg = match RequestImageMessage::deser(&mut packet.payload.as_ref()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("malformed image request: {} - dropping", e);
                        return;
                    }
                };
                let key = ContentKey::texture(msg.image_id);
                if let Err(e) = context.content_cache.request_content(outbox.clone(), key, msg.image_id).await {
                    warn!("request for {} failed: {}", key, e);
                }
            }
            MessageKind::LogoutRequest => {
                handle.terminate(TerminationReason::Normal);
            }
            MessageKind::UseCircuitCode => {
                trace!("circuit {} is already in use - ignoring", handle.shared.circuit.circuit_code);
            }
            _ => {
                context.world.handle_message(handle.shared.circuit.circuit_code, packet).await;
            }
        }
    }

    async fn do_tick_loop(handle: SessionHandle, tick_interval: Duration) {
        let mut termination = handle.shared.termination.subscribe();
        let mut ticks = interval(tick_interval);

        loop {
            select! {
                biased;
                _ = wait_terminated(&mut termination) => break,
                _ = ticks.tick() => {}
            }

            match handle.shared.reliable.tick().await {
                Ok(report) => {
                    if report.num_resent > 0 || report.ack_backpressure {
                        debug!("session tick: {:?}", report);
                    }
                }
                Err(e) => {
                    if e.downcast_ref::<ResendLimitExceeded>().is_some() {
                        let oldest = handle.shared.reliable.oldest_unacked().await;
                        warn!("{} - giving up on {:?}, oldest unacknowledged packet is {:?}", e, handle.peer_addr(), oldest);
                        handle.terminate(TerminationReason::ResendLimitExceeded);
                    }
                    else {
                        error!("error sending to {:?}: {}", handle.peer_addr(), e);
                        handle.terminate(TerminationReason::SendFailure);
                    }
                    break;
                }
            }
        }
        debug!("session timer stopped");
    }
}
