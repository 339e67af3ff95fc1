//! The protocol contract.
//!
//! A protocol knows its dependencies and its handlers when it is constructed and
//! must keep both strictly immutable afterwards; the funnel reads them once and
//! does not verify this.
//!
//! Lifecycle callbacks:
//! - `server_started` may veto a server start by returning an error (or
//!   panicking). The server is then asked to stop.
//! - `server_stopped` runs after the server has stopped. It is only invoked for
//!   protocols whose `server_started` succeeded for that server, so there is
//!   nothing to veto.
//! - `attendant_started` / `attendant_stopped` follow the same rules per
//!   connected peer.

use crate::error::{ProtocolError, TransportError};
use crate::handlers::HandlerMap;
use crate::transport::{Peer, Server, StopReason};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared handle to a protocol. The allocation's address is its identity.
pub type ProtocolRef = Arc<dyn Protocol>;

/// A composable unit contributing dependencies, message handlers and lifecycle
/// callbacks to a [`ProtocolFunnel`](crate::ProtocolFunnel).
pub trait Protocol: Send + Sync {
    /// Human-readable label used in logs and errors. Not an identity.
    fn name(&self) -> &str;

    /// Protocols this one depends on. They start before it and stop after it.
    fn dependencies(&self) -> Vec<ProtocolRef> {
        Vec::new()
    }

    /// Command handlers contributed by this protocol. A `None` entry claims
    /// nothing and never conflicts.
    fn handlers(&self) -> HandlerMap {
        HandlerMap::new()
    }

    fn server_started(&self, _server: &dyn Server, _addr: SocketAddr) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn server_stopped(&self, _server: &dyn Server) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn attendant_started(&self, _server: &dyn Server, _peer: &dyn Peer) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn attendant_stopped(
        &self,
        _server: &dyn Server,
        _peer: &dyn Peer,
        _reason: StopReason,
        _error: Option<&TransportError>,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Identity of a protocol allocation, usable as a map or graph key.
///
/// Only valid while the protocol it was taken from is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolKey(usize);

impl ProtocolKey {
    pub fn of(protocol: &ProtocolRef) -> Self {
        Self(Arc::as_ptr(protocol) as *const () as usize)
    }
}

impl fmt::Debug for dyn Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol").field("name", &self.name()).finish()
    }
}
