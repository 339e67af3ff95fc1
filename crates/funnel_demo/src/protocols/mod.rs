//! Protocols served by the demo chat server.

pub mod auth;
pub mod chat;

pub use auth::{AuthProtocol, User};
pub use chat::ChatProtocol;

use protocol_funnel::{Message, Peer, ProtocolError};
use serde_json::Value;

/// Sends a reply, turning a transport failure into a handler fault.
pub(crate) fn reply(peer: &dyn Peer, command: &str, args: Vec<Value>) -> Result<(), ProtocolError> {
    peer.send(Message::with_args(command, args))
        .map_err(|e| ProtocolError::Failed(format!("could not send {command}: {e}")))
}

/// `INVALID_FORMAT [command, explanation]`
pub(crate) fn invalid_format(peer: &dyn Peer, command: &str, explanation: &str) -> Result<(), ProtocolError> {
    reply(
        peer,
        "INVALID_FORMAT",
        vec![command.into(), explanation.into()],
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::User;
    use crate::transport::{LocalHub, PeerDirectory, Throttle};
    use protocol_funnel::{FunnelHooks, ProtocolFunnel, ProtocolRef};
    use std::sync::Arc;

    pub fn demo_users() -> Vec<User> {
        crate::config::AppConfig::default()
            .users
            .iter()
            .map(User::from)
            .collect()
    }

    pub fn hub_for(protocols: Vec<ProtocolRef>, directory: Arc<PeerDirectory>) -> LocalHub {
        let funnel = ProtocolFunnel::new(&protocols, FunnelHooks::new()).unwrap();
        LocalHub::new(
            Arc::new(funnel),
            directory,
            "127.0.0.1:3000".parse().unwrap(),
            Throttle::default(),
        )
    }

    /// Commands received by client `name` since the last call.
    pub fn replies(hub: &LocalHub, name: &str) -> Vec<String> {
        hub.client(name)
            .unwrap()
            .drain()
            .into_iter()
            .map(|m| m.command)
            .collect()
    }
}
