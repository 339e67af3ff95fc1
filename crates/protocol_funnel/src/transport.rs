//! The contract the surrounding transport implements.
//!
//! The funnel never accepts sockets or frames bytes. It only needs to know who
//! an instance is, how to ask the transport to tear it down, and, for peers, how
//! protocols can reply to them.

use crate::error::TransportError;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub Uuid);

impl ServerId {
    /// Creates a new random server ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Creates a new random peer ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a peer connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The server side closed the connection on purpose
    Local,
    /// The remote end hung up
    Remote,
    /// The server is shutting down
    ServerShutdown,
    /// A read or write failed
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::Local => "local",
            StopReason::Remote => "remote",
            StopReason::ServerShutdown => "server-shutdown",
            StopReason::Error => "error",
        };
        f.write_str(label)
    }
}

/// A running server instance as seen by protocols.
pub trait Server: Send + Sync {
    /// Stable identity used to key per-server progress
    fn id(&self) -> ServerId;

    /// Requests teardown. Called by the funnel when a protocol vetoes startup;
    /// the transport is then expected to call
    /// [`ProtocolFunnel::stopped`](crate::ProtocolFunnel::stopped).
    fn stop(&self);
}

/// A connected peer as seen by protocols.
pub trait Peer: Send + Sync {
    /// Stable identity used to key per-peer progress
    fn id(&self) -> PeerId;

    /// Queues a message to this peer.
    fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Requests teardown of the connection. The transport is then expected to
    /// call [`ProtocolFunnel::attendant_stopped`](crate::ProtocolFunnel::attendant_stopped).
    fn stop(&self);
}
