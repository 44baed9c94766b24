use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

use crate::session::circuit::AgentInfo;
use crate::session::client_session::{SessionHandle, TerminationReason};
use crate::transport::packet::Packet;

/// Everything beyond transport and content delivery: the world simulation that client messages
///  are ultimately meant for.
///
/// All calls for a session are made from that session's worker, in the order the messages
///  arrived.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorldHandler: Send + Sync + 'static {
    /// Called once the session is authenticated. The handle is the world's way to send
    ///  messages to the client.
    async fn on_session_started(&self, session: SessionHandle, agent: AgentInfo);

    async fn handle_message(&self, circuit_code: u32, packet: Packet);

    async fn on_session_terminated(&self, circuit_code: u32, reason: TerminationReason);
}
