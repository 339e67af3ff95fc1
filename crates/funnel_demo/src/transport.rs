//! In-process transport used by the demo.
//!
//! [`LocalHub`] plays the role of a message server: it owns one
//! [`LocalServer`], a set of named [`LocalPeer`] clients, and forwards every
//! lifecycle event and every client message to the protocol funnel.

use crossbeam::channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use protocol_funnel::{
    Dispatch, Message, Peer, PeerId, ProtocolFunnel, Server, ServerId, StartFault, StopReason,
    TransportError,
};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("unknown client: {0}")]
    UnknownClient(String),
    #[error("client already connected: {0}")]
    DuplicateClient(String),
    #[error("server is not running")]
    NotRunning,
    #[error("server is already running")]
    AlreadyRunning,
    #[error("server start rejected: {0}")]
    ServerRejected(StartFault),
    #[error("client {name} rejected: {fault}")]
    ClientRejected { name: String, fault: StartFault },
}

pub struct LocalServer {
    id: ServerId,
    stop_requested: AtomicBool,
}

impl LocalServer {
    pub fn new() -> Self {
        Self {
            id: ServerId::new(),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

impl Default for LocalServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Server for LocalServer {
    fn id(&self) -> ServerId {
        self.id
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

/// A connected client. Messages sent to it land in its mailbox.
pub struct LocalPeer {
    id: PeerId,
    name: String,
    outbox: Sender<Message>,
    inbox: Receiver<Message>,
    closed: AtomicBool,
    stop_requested: AtomicBool,
}

impl LocalPeer {
    pub fn new(name: impl Into<String>) -> Self {
        let (outbox, inbox) = unbounded();
        Self {
            id: PeerId::new(),
            name: name.into(),
            outbox,
            inbox,
            closed: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes every message delivered so far.
    pub fn drain(&self) -> Vec<Message> {
        self.inbox.try_iter().collect()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for LocalPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPeer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending", &self.inbox.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

impl Peer for LocalPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        debug!("-> {} {}", self.name, message.command());
        self.outbox
            .send(message)
            .map_err(|e| TransportError::Other(e.to_string()))
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

/// Live peers by id, so protocols can reach peers other than the sender.
#[derive(Default)]
pub struct PeerDirectory {
    peers: DashMap<PeerId, Arc<dyn Peer>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: Arc<dyn Peer>) {
        self.peers.insert(peer.id(), peer);
    }

    pub fn remove(&self, id: PeerId) {
        self.peers.remove(&id);
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<dyn Peer>> {
        self.peers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub max_messages: u32,
    pub window: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            max_messages: 20,
            window: Duration::from_secs(1),
        }
    }
}

/// Outcome of handing a client message to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Dispatched(Dispatch),
    Throttled,
}

struct Window {
    opened: Instant,
    count: u32,
}

pub struct LocalHub {
    funnel: Arc<ProtocolFunnel>,
    server: LocalServer,
    addr: SocketAddr,
    directory: Arc<PeerDirectory>,
    clients: DashMap<String, Arc<LocalPeer>>,
    throttle: Throttle,
    windows: DashMap<PeerId, Window>,
    running: AtomicBool,
}

impl LocalHub {
    pub fn new(
        funnel: Arc<ProtocolFunnel>,
        directory: Arc<PeerDirectory>,
        addr: SocketAddr,
        throttle: Throttle,
    ) -> Self {
        Self {
            funnel,
            server: LocalServer::new(),
            addr,
            directory,
            clients: DashMap::new(),
            throttle,
            windows: DashMap::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn server(&self) -> &LocalServer {
        &self.server
    }

    pub fn funnel(&self) -> &ProtocolFunnel {
        &self.funnel
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the server. A rejected start is unwound before returning.
    pub fn start(&self) -> Result<(), HubError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HubError::AlreadyRunning);
        }

        if let Err(fault) = self.funnel.started(&self.server, self.addr) {
            self.funnel.stopped(&self.server);
            self.running.store(false, Ordering::SeqCst);
            return Err(HubError::ServerRejected(fault));
        }

        info!("Server {} listening at {}", self.server.id(), self.addr);
        Ok(())
    }

    pub fn connect(&self, name: &str) -> Result<Arc<LocalPeer>, HubError> {
        if !self.is_running() {
            return Err(HubError::NotRunning);
        }
        if self.clients.contains_key(name) {
            return Err(HubError::DuplicateClient(name.to_string()));
        }

        let peer = Arc::new(LocalPeer::new(name));
        self.directory.register(peer.clone());

        if let Err(fault) = self.funnel.attendant_started(&self.server, peer.as_ref()) {
            peer.close();
            self.funnel
                .attendant_stopped(&self.server, peer.as_ref(), StopReason::Error, None);
            self.directory.remove(peer.id());
            return Err(HubError::ClientRejected {
                name: name.to_string(),
                fault,
            });
        }

        self.clients.insert(name.to_string(), peer.clone());
        info!(
            "Client {} connected as {} ({} peers online)",
            name,
            peer.id(),
            self.directory.len()
        );
        Ok(peer)
    }

    /// Hands `message` from client `name` to the funnel, unless the client
    /// exceeded its message rate.
    pub fn deliver(&self, name: &str, message: Message) -> Result<Delivery, HubError> {
        let peer = self.client(name)?;

        if let Some(lapse) = self.exceeds_rate(peer.id()) {
            warn!("Client {} throttled on {}", name, message.command());
            self.funnel.message_throttled(
                &self.server,
                peer.as_ref(),
                &message,
                SystemTime::now(),
                lapse,
            );
            return Ok(Delivery::Throttled);
        }

        let dispatch = self
            .funnel
            .message_arrived(&self.server, peer.as_ref(), &message);

        if peer.stop_requested() && self.clients.remove(name).is_some() {
            self.release(&peer, StopReason::Local, None);
            info!("Client {} dropped on request", name);
        }
        Ok(Delivery::Dispatched(dispatch))
    }

    pub fn disconnect(&self, name: &str, reason: StopReason) -> Result<(), HubError> {
        let (_, peer) = self
            .clients
            .remove(name)
            .ok_or_else(|| HubError::UnknownClient(name.to_string()))?;
        self.release(&peer, reason, None);
        info!("Client {} disconnected ({})", name, reason);
        Ok(())
    }

    /// Disconnects every client, then stops the server.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, peer)) = self.clients.remove(&name) {
                self.release(&peer, StopReason::ServerShutdown, None);
            }
        }

        self.funnel.stopped(&self.server);
        info!("Server {} shut down", self.server.id());
    }

    pub fn client(&self, name: &str) -> Result<Arc<LocalPeer>, HubError> {
        self.clients
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HubError::UnknownClient(name.to_string()))
    }

    pub fn client_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Takes pending messages of every client, grouped by client name.
    pub fn drain_all(&self) -> Vec<(String, Message)> {
        let mut out = Vec::new();
        for name in self.client_names() {
            if let Ok(peer) = self.client(&name) {
                out.extend(peer.drain().into_iter().map(|m| (peer.name().to_string(), m)));
            }
        }
        out
    }

    fn release(&self, peer: &LocalPeer, reason: StopReason, err: Option<&TransportError>) {
        peer.close();
        self.windows.remove(&peer.id());
        self.funnel
            .attendant_stopped(&self.server, peer, reason, err);
        self.directory.remove(peer.id());
    }

    /// Counts one message against the peer's window. Returns the time spent
    /// in the current window when the limit is already reached.
    fn exceeds_rate(&self, peer: PeerId) -> Option<Duration> {
        let now = Instant::now();
        let mut window = self.windows.entry(peer).or_insert(Window {
            opened: now,
            count: 0,
        });

        let lapse = now.duration_since(window.opened);
        if lapse >= self.throttle.window {
            window.opened = now;
            window.count = 0;
        }

        if window.count >= self.throttle.max_messages {
            return Some(lapse);
        }
        window.count += 1;
        None
    }
}

impl Drop for LocalHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
