//! The lifecycle funnel.
//!
//! Funnels several protocols simultaneously for the managed servers and their
//! peers. One funnel may serve several servers at once; starting with respect to
//! one server has nothing to do with starting with respect to another, so every
//! instance gets its own progress counter.
//!
//! Protocol start is not atomic: a protocol may have touched instance state
//! before it faults. If protocol `k` faults, protocols `[0, k)` must be unwound
//! and `[k, end)` must not. The progress counter bounds that unwind.

use crate::error::{FunnelError, StartFault, TransportError};
use crate::fault;
use crate::handlers::{Dispatch, HandlerTable};
use crate::hooks::FunnelHooks;
use crate::message::Message;
use crate::progress::ProgressTracker;
use crate::protocol::ProtocolRef;
use crate::resolver;
use crate::transport::{Peer, PeerId, Server, ServerId, StopReason};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Composes protocols into one lifecycle and dispatch surface for a transport.
pub struct ProtocolFunnel {
    /// Dependency-first order
    direct: Vec<ProtocolRef>,
    /// Mirror of `direct`, used for unwinding
    reverse: Vec<ProtocolRef>,
    handlers: HandlerTable,
    hooks: FunnelHooks,
    server_progress: ProgressTracker<ServerId>,
    attendant_progress: ProgressTracker<(ServerId, PeerId)>,
}

impl ProtocolFunnel {
    /// Resolves `protocols` (and everything they depend on), merges their
    /// handler tables and applies `hooks`.
    pub fn new(protocols: &[ProtocolRef], hooks: FunnelHooks) -> Result<Self, FunnelError> {
        if protocols.is_empty() {
            return Err(FunnelError::EmptyInput);
        }

        let resolution = resolver::resolve(protocols)?;
        let handlers = HandlerTable::from_protocols(&resolution.direct)?;

        info!(
            "Protocol funnel ready: {} protocols {:?}, {} commands",
            resolution.len(),
            resolution.names(),
            handlers.len()
        );

        Ok(Self {
            direct: resolution.direct,
            reverse: resolution.reverse,
            handlers,
            hooks,
            server_progress: ProgressTracker::new(),
            attendant_progress: ProgressTracker::new(),
        })
    }

    /// Protocols in dependency-first order.
    pub fn protocols(&self) -> &[ProtocolRef] {
        &self.direct
    }

    /// Protocols in unwind order.
    pub fn reverse_protocols(&self) -> &[ProtocolRef] {
        &self.reverse
    }

    pub fn protocol_count(&self) -> usize {
        self.direct.len()
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn hooks(&self) -> &FunnelHooks {
        &self.hooks
    }

    /// How many protocols have started for `server`, if a start was attempted
    /// and the server has not been stopped since.
    pub fn server_progress(&self, server: ServerId) -> Option<usize> {
        self.server_progress.get(&server)
    }

    /// Same as [`server_progress`](Self::server_progress), for one peer.
    pub fn attendant_progress(&self, server: ServerId, peer: PeerId) -> Option<usize> {
        self.attendant_progress.get(&(server, peer))
    }

    /// Servers with a start attempt that has not been stopped yet.
    pub fn live_servers(&self) -> Vec<ServerId> {
        self.server_progress.keys()
    }

    /// Peers with a start attempt that has not been stopped yet.
    pub fn live_attendants(&self) -> Vec<(ServerId, PeerId)> {
        self.attendant_progress.keys()
    }

    // ------------------------------------------------------------------------
    // Server lifecycle
    // ------------------------------------------------------------------------

    /// Starts every protocol for `server`, in direct order.
    ///
    /// On the first fault the remaining protocols are skipped, the fault is
    /// reported through `on_server_start_fault`, and the server is asked to
    /// stop. The transport must then call [`stopped`](Self::stopped), which
    /// unwinds exactly the protocols that did start.
    pub fn started(&self, server: &dyn Server, addr: SocketAddr) -> Result<(), StartFault> {
        let id = server.id();
        self.server_progress.begin(id);

        for (index, protocol) in self.direct.iter().enumerate() {
            debug!("Starting protocol {} for server {}", protocol.name(), id);
            if let Err(error) = fault::guard(|| protocol.server_started(server, addr)) {
                error!(
                    "Protocol {} vetoed start of server {} at {}: {}",
                    protocol.name(),
                    id,
                    addr,
                    error
                );
                if let Some(hook) = &self.hooks.on_server_start_fault {
                    fault::guard_hook("on_server_start_fault", || {
                        hook(server, addr, &**protocol, &error)
                    });
                }
                server.stop();
                return Err(StartFault {
                    protocol: protocol.name().to_string(),
                    index,
                    error,
                });
            }
            self.server_progress.advance(&id);
        }

        info!(
            "Server {} started at {} with {} protocols",
            id,
            addr,
            self.direct.len()
        );
        Ok(())
    }

    /// Stops, in reverse order, every protocol that started for `server`.
    ///
    /// Each stop callback runs in its own fault boundary: a fault is reported
    /// through `on_server_stop_fault` and the earlier-started protocols still
    /// get their callback. When no start was ever recorded for `server`, every
    /// protocol is assumed to have started.
    pub fn stopped(&self, server: &dyn Server) {
        let id = server.id();
        let count = self.unwind_count(self.server_progress.take(&id), "server", &id);

        for protocol in self.unwind_slice(count) {
            debug!("Stopping protocol {} for server {}", protocol.name(), id);
            if let Err(error) = fault::guard(|| protocol.server_stopped(server)) {
                warn!(
                    "Protocol {} failed to stop for server {}: {}",
                    protocol.name(),
                    id,
                    error
                );
                if let Some(hook) = &self.hooks.on_server_stop_fault {
                    fault::guard_hook("on_server_stop_fault", || {
                        hook(server, &**protocol, &error)
                    });
                }
            }
        }

        info!("Server {} stopped, {} protocols unwound", id, count);
    }

    /// Processes errors related to connections not being accepted.
    pub fn accept_failed(&self, server: &dyn Server, err: &TransportError) {
        debug!("Server {} failed to accept a connection: {}", server.id(), err);
        if let Some(hook) = &self.hooks.on_accept_failure {
            fault::guard_hook("on_accept_failure", || hook(server, err));
        }
    }

    // ------------------------------------------------------------------------
    // Peer lifecycle
    // ------------------------------------------------------------------------

    /// Starts every protocol for a newly connected peer, in direct order.
    ///
    /// Mirrors [`started`](Self::started): on fault the peer is asked to stop
    /// and [`attendant_stopped`](Self::attendant_stopped) unwinds the
    /// protocols that did start.
    pub fn attendant_started(&self, server: &dyn Server, peer: &dyn Peer) -> Result<(), StartFault> {
        let key = (server.id(), peer.id());
        self.attendant_progress.begin(key);

        for (index, protocol) in self.direct.iter().enumerate() {
            if let Err(error) = fault::guard(|| protocol.attendant_started(server, peer)) {
                error!(
                    "Protocol {} vetoed peer {} on server {}: {}",
                    protocol.name(),
                    key.1,
                    key.0,
                    error
                );
                if let Some(hook) = &self.hooks.on_peer_start_fault {
                    fault::guard_hook("on_peer_start_fault", || {
                        hook(server, peer, &**protocol, &error)
                    });
                }
                peer.stop();
                return Err(StartFault {
                    protocol: protocol.name().to_string(),
                    index,
                    error,
                });
            }
            self.attendant_progress.advance(&key);
        }

        debug!("Peer {} started on server {}", key.1, key.0);
        Ok(())
    }

    /// Stops, in reverse order, every protocol that started for `peer`.
    pub fn attendant_stopped(
        &self,
        server: &dyn Server,
        peer: &dyn Peer,
        reason: StopReason,
        err: Option<&TransportError>,
    ) {
        let key = (server.id(), peer.id());
        let count = self.unwind_count(self.attendant_progress.take(&key), "peer", &key.1);

        for protocol in self.unwind_slice(count) {
            if let Err(error) =
                fault::guard(|| protocol.attendant_stopped(server, peer, reason, err))
            {
                warn!(
                    "Protocol {} failed to stop for peer {} ({}): {}",
                    protocol.name(),
                    key.1,
                    reason,
                    error
                );
                if let Some(hook) = &self.hooks.on_peer_stop_fault {
                    fault::guard_hook("on_peer_stop_fault", || {
                        hook(server, peer, reason, err, &**protocol, &error)
                    });
                }
            }
        }

        debug!("Peer {} stopped on server {} ({})", key.1, key.0, reason);
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Delegates the processing to the merged handler table.
    pub fn message_arrived(&self, server: &dyn Server, peer: &dyn Peer, message: &Message) -> Dispatch {
        self.handlers.handle(
            server,
            peer,
            message,
            self.hooks.on_unknown_command.as_ref(),
            self.hooks.on_handler_fault.as_ref(),
        )
    }

    /// This event is strictly bypassed to the hook.
    pub fn message_throttled(
        &self,
        server: &dyn Server,
        peer: &dyn Peer,
        message: &Message,
        when: SystemTime,
        lapse: Duration,
    ) {
        if let Some(hook) = &self.hooks.on_message_throttled {
            fault::guard_hook("on_message_throttled", || {
                hook(server, peer, message, when, lapse)
            });
        }
    }

    fn unwind_count<I: std::fmt::Display>(&self, recorded: Option<usize>, kind: &str, id: &I) -> usize {
        match recorded {
            Some(count) => count.min(self.direct.len()),
            None => {
                debug!(
                    "No start recorded for {} {}; unwinding all {} protocols",
                    kind,
                    id,
                    self.direct.len()
                );
                self.direct.len()
            }
        }
    }

    /// The last `count` entries of `reverse`, i.e. `direct[..count]` backwards.
    fn unwind_slice(&self, count: usize) -> &[ProtocolRef] {
        &self.reverse[self.reverse.len() - count..]
    }
}

impl std::fmt::Debug for ProtocolFunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolFunnel")
            .field(
                "protocols",
                &self.direct.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("commands", &self.handlers.commands())
            .field("hooks", &self.hooks)
            .finish()
    }
}
