//! Error types for funnel construction, protocol faults and transport failures.

/// Errors that prevent a [`ProtocolFunnel`](crate::ProtocolFunnel) from being built.
///
/// All of these are configuration errors: there is no partially usable funnel,
/// the caller must fix the protocol set and construct again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FunnelError {
    /// The initial protocol set was empty
    #[error("no protocols specified")]
    EmptyInput,
    /// The dependency graph contains a cycle
    #[error("a circular dependency was detected among protocols")]
    CircularDependency,
    /// Two protocols supplied a handler for the same command
    #[error("handler for command '{command}' of protocol '{protocol}' is already registered")]
    HandlerConflict {
        /// The contested command name
        command: String,
        /// Name of the protocol whose table collided with an earlier one
        protocol: String,
    },
}

/// Fault raised by a protocol callback or a message handler.
///
/// Callbacks report failure by returning one of the first two variants. A
/// panic inside a callback is caught at the fault boundary and surfaces as
/// [`ProtocolError::Panicked`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The protocol refused to take part in the instance
    #[error("protocol rejected the instance: {0}")]
    Rejected(String),
    /// The callback could not complete
    #[error("protocol callback failed: {0}")]
    Failed(String),
    /// The callback panicked
    #[error("protocol panicked: {0}")]
    Panicked(String),
}

impl ProtocolError {
    /// Returns true when this fault came from a caught panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, ProtocolError::Panicked(_))
    }
}

/// Errors originating in the surrounding transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection is already closed
    #[error("connection closed")]
    Closed,
    /// Underlying socket error
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Any other transport failure
    #[error("transport error: {0}")]
    Other(String),
}

/// A start callback fault that aborted the startup of one instance.
///
/// Returned by [`ProtocolFunnel::started`](crate::ProtocolFunnel::started) and
/// [`ProtocolFunnel::attendant_started`](crate::ProtocolFunnel::attendant_started)
/// after the matching hook has been invoked and the instance was told to stop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("protocol '{protocol}' failed to start: {error}")]
pub struct StartFault {
    /// Name of the protocol whose start callback faulted
    pub protocol: String,
    /// Position of that protocol in the direct order
    pub index: usize,
    /// The fault payload
    pub error: ProtocolError,
}
