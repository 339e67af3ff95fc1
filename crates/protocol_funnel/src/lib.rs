//! # Protocol Funnel
//!
//! Composes independently written protocols into one message-server extension.
//! Each protocol declares the protocols it depends on, contributes named command
//! handlers, and receives lifecycle callbacks when a server or a connected peer
//! starts or stops.
//!
//! ## Key Features
//!
//! - **Dependency ordering**: protocols start after everything they depend on
//!   and stop before it; cycles are rejected at construction
//! - **Conflict-free dispatch**: handler tables are merged once, and two
//!   protocols claiming the same command is a construction error
//! - **Fault isolation**: every callback runs in its own fault boundary; a
//!   returned error or a panic is reported through a hook and never escapes
//! - **Precise unwinding**: per-instance progress counters make sure only the
//!   protocols that actually started for an instance are stopped for it
//!
//! ## Lifecycle
//!
//! For each server instance the transport calls [`ProtocolFunnel::started`] and
//! later [`ProtocolFunnel::stopped`]; for each peer it calls
//! [`ProtocolFunnel::attendant_started`] and
//! [`ProtocolFunnel::attendant_stopped`]. Lifecycle events of one instance must
//! be serialized by the transport; different instances may run concurrently.
//!
//! ## Usage
//!
//! ```
//! use protocol_funnel::*;
//! use std::sync::Arc;
//!
//! struct Ping;
//!
//! impl Protocol for Ping {
//!     fn name(&self) -> &str {
//!         "ping"
//!     }
//!
//!     fn handlers(&self) -> HandlerMap {
//!         HandlerMap::from([(
//!             "PING".to_string(),
//!             handler(|_server, peer, _message| {
//!                 peer.send(Message::new("PONG"))
//!                     .map_err(|e| ProtocolError::Failed(e.to_string()))
//!             }),
//!         )])
//!     }
//! }
//!
//! let protocols: Vec<ProtocolRef> = vec![Arc::new(Ping)];
//! let funnel = ProtocolFunnel::new(&protocols, FunnelHooks::new()).unwrap();
//! assert!(funnel.handlers().contains("PING"));
//! ```

pub mod error;
pub mod fault;
pub mod funnel;
pub mod handlers;
pub mod hooks;
pub mod message;
mod progress;
pub mod protocol;
pub mod resolver;
pub mod transport;

pub use error::{FunnelError, ProtocolError, StartFault, TransportError};
pub use funnel::ProtocolFunnel;
pub use handlers::{handler, Dispatch, HandlerMap, HandlerTable, MessageHandler};
pub use hooks::FunnelHooks;
pub use message::Message;
pub use protocol::{Protocol, ProtocolKey, ProtocolRef};
pub use resolver::{resolve, Resolution};
pub use transport::{Peer, PeerId, Server, ServerId, StopReason};

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, FunnelError>;
