use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use uuid::Uuid;

use crate::transport::control_messages::UseCircuitCodeMessage;

/// The identity a client claims when opening a circuit
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CircuitInfo {
    pub circuit_code: u32,
    pub session_id: Uuid,
    pub agent_id: Uuid,
}

impl From<UseCircuitCodeMessage> for CircuitInfo {
    fn from(msg: UseCircuitCodeMessage) -> Self {
        CircuitInfo {
            circuit_code: msg.circuit_code,
            session_id: msg.session_id,
            agent_id: msg.agent_id,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AgentInfo {
    pub first_name: String,
    pub last_name: String,
}

/// Decides whether a circuit may be used, typically by checking it against what the login
///  service handed out.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// `Ok(None)` rejects the circuit, an error means the check itself failed
    async fn authenticate(&self, circuit: CircuitInfo) -> anyhow::Result<Option<AgentInfo>>;
}
