//! Reporting hooks supplied by whoever embeds the funnel.
//!
//! Every hook is optional; an unset hook is a no-op. Hooks are for the server
//! designer, not for protocol authors, and should not panic themselves. The
//! funnel still contains a panicking hook so it never unwinds into the
//! transport.

use crate::error::{ProtocolError, TransportError};
use crate::message::Message;
use crate::protocol::Protocol;
use crate::transport::{Peer, Server, StopReason};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub type ServerStartFaultHook =
    Arc<dyn Fn(&dyn Server, SocketAddr, &dyn Protocol, &ProtocolError) + Send + Sync>;
pub type AcceptFailureHook = Arc<dyn Fn(&dyn Server, &TransportError) + Send + Sync>;
pub type PeerStartFaultHook =
    Arc<dyn Fn(&dyn Server, &dyn Peer, &dyn Protocol, &ProtocolError) + Send + Sync>;
pub type UnknownCommandHook = Arc<dyn Fn(&dyn Server, &dyn Peer, &Message) + Send + Sync>;
pub type HandlerFaultHook =
    Arc<dyn Fn(&dyn Server, &dyn Peer, &Message, &ProtocolError) + Send + Sync>;
pub type MessageThrottledHook =
    Arc<dyn Fn(&dyn Server, &dyn Peer, &Message, SystemTime, Duration) + Send + Sync>;
pub type PeerStopFaultHook = Arc<
    dyn Fn(&dyn Server, &dyn Peer, StopReason, Option<&TransportError>, &dyn Protocol, &ProtocolError)
        + Send
        + Sync,
>;
pub type ServerStopFaultHook = Arc<dyn Fn(&dyn Server, &dyn Protocol, &ProtocolError) + Send + Sync>;

/// Optional hooks applied at funnel construction.
///
/// ```
/// use protocol_funnel::FunnelHooks;
///
/// let hooks = FunnelHooks::new()
///     .with_unknown_command(|_server, _peer, message| {
///         eprintln!("unknown command {}", message.command);
///     })
///     .with_handler_fault(|_server, _peer, message, error| {
///         eprintln!("{} failed: {}", message.command, error);
///     });
/// assert!(hooks.on_unknown_command.is_some());
/// assert!(hooks.on_server_start_fault.is_none());
/// ```
#[derive(Clone, Default)]
pub struct FunnelHooks {
    /// A protocol vetoed a server start
    pub on_server_start_fault: Option<ServerStartFaultHook>,
    /// The transport failed to accept a connection
    pub on_accept_failure: Option<AcceptFailureHook>,
    /// A protocol vetoed a peer start
    pub on_peer_start_fault: Option<PeerStartFaultHook>,
    /// No handler is registered for an incoming command
    pub on_unknown_command: Option<UnknownCommandHook>,
    /// A message handler failed or panicked
    pub on_handler_fault: Option<HandlerFaultHook>,
    /// The transport throttled a message
    pub on_message_throttled: Option<MessageThrottledHook>,
    /// A protocol failed while cleaning up after a peer
    pub on_peer_stop_fault: Option<PeerStopFaultHook>,
    /// A protocol failed while cleaning up after a server
    pub on_server_stop_fault: Option<ServerStopFaultHook>,
}

impl FunnelHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server_start_fault<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, SocketAddr, &dyn Protocol, &ProtocolError) + Send + Sync + 'static,
    {
        self.on_server_start_fault = Some(Arc::new(hook));
        self
    }

    pub fn with_accept_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, &TransportError) + Send + Sync + 'static,
    {
        self.on_accept_failure = Some(Arc::new(hook));
        self
    }

    pub fn with_peer_start_fault<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, &dyn Peer, &dyn Protocol, &ProtocolError) + Send + Sync + 'static,
    {
        self.on_peer_start_fault = Some(Arc::new(hook));
        self
    }

    pub fn with_unknown_command<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, &dyn Peer, &Message) + Send + Sync + 'static,
    {
        self.on_unknown_command = Some(Arc::new(hook));
        self
    }

    pub fn with_handler_fault<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, &dyn Peer, &Message, &ProtocolError) + Send + Sync + 'static,
    {
        self.on_handler_fault = Some(Arc::new(hook));
        self
    }

    pub fn with_message_throttled<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, &dyn Peer, &Message, SystemTime, Duration) + Send + Sync + 'static,
    {
        self.on_message_throttled = Some(Arc::new(hook));
        self
    }

    pub fn with_peer_stop_fault<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, &dyn Peer, StopReason, Option<&TransportError>, &dyn Protocol, &ProtocolError)
            + Send
            + Sync
            + 'static,
    {
        self.on_peer_stop_fault = Some(Arc::new(hook));
        self
    }

    pub fn with_server_stop_fault<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Server, &dyn Protocol, &ProtocolError) + Send + Sync + 'static,
    {
        self.on_server_stop_fault = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for FunnelHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunnelHooks")
            .field("on_server_start_fault", &self.on_server_start_fault.is_some())
            .field("on_accept_failure", &self.on_accept_failure.is_some())
            .field("on_peer_start_fault", &self.on_peer_start_fault.is_some())
            .field("on_unknown_command", &self.on_unknown_command.is_some())
            .field("on_handler_fault", &self.on_handler_fault.is_some())
            .field("on_message_throttled", &self.on_message_throttled.is_some())
            .field("on_peer_stop_fault", &self.on_peer_stop_fault.is_some())
            .field("on_server_stop_fault", &self.on_server_stop_fault.is_some())
            .finish()
    }
}
