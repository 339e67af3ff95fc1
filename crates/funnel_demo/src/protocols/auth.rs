//! Authentication protocol.
//!
//! Tracks, per server, which peers are connected and which user each peer is
//! logged in as. A user may be logged in from one peer at a time: logging in
//! again elsewhere ghosts the previous session.

use super::{invalid_format, reply};
use crate::config::UserSettings;
use crate::transport::PeerDirectory;
use dashmap::DashMap;
use protocol_funnel::{
    handler, HandlerMap, Message, MessageHandler, Peer, PeerId, Protocol, ProtocolError, Server,
    ServerId, StopReason, TransportError,
};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub nick: String,
    pub role: String,
    pub password: String,
}

impl From<&UserSettings> for User {
    fn from(settings: &UserSettings) -> Self {
        Self {
            nick: settings.nick.clone(),
            role: settings.role.clone(),
            password: settings.password.clone(),
        }
    }
}

#[derive(Default)]
struct Sessions {
    connected: HashSet<PeerId>,
    logins: HashMap<String, PeerId>,
    users_by_peer: HashMap<PeerId, String>,
}

impl Sessions {
    /// Logs `peer` in as `nick`. Returns the peer that held `nick` before, if
    /// it was a different one.
    fn bind(&mut self, nick: &str, peer: PeerId) -> Option<PeerId> {
        if let Some(old_nick) = self.users_by_peer.insert(peer, nick.to_string()) {
            if old_nick != nick {
                self.logins.remove(&old_nick);
            }
        }

        match self.logins.insert(nick.to_string(), peer) {
            Some(previous) if previous != peer => {
                self.users_by_peer.remove(&previous);
                Some(previous)
            }
            _ => None,
        }
    }

    fn unbind(&mut self, peer: PeerId) -> Option<String> {
        let nick = self.users_by_peer.remove(&peer)?;
        if self.logins.get(&nick) == Some(&peer) {
            self.logins.remove(&nick);
        }
        Some(nick)
    }
}

struct AuthState {
    users: HashMap<String, User>,
    sessions: DashMap<ServerId, Sessions>,
    directory: Arc<PeerDirectory>,
}

impl AuthState {
    fn user_of(&self, server: ServerId, peer: PeerId) -> Option<String> {
        self.sessions
            .get(&server)
            .and_then(|sessions| sessions.users_by_peer.get(&peer).cloned())
    }

    fn login(&self, server: ServerId, peer: &dyn Peer, message: &Message) -> Result<(), ProtocolError> {
        if message.args.len() != 2 || !message.kwargs.is_empty() {
            return invalid_format(
                peer,
                "LOGIN",
                "Expected 2 positional arguments: username, password. No keyword arguments expected",
            );
        }
        let Some(nick) = message.arg_str(0) else {
            return invalid_format(peer, "LOGIN", "First argument (username) must be a string");
        };
        let Some(password) = message.arg_str(1) else {
            return invalid_format(peer, "LOGIN", "Second argument (password) must be a string");
        };
        let Some(user) = self.users.get(nick) else {
            return reply(peer, "INVALID_USER", vec![nick.into()]);
        };
        if user.password != password {
            return reply(peer, "INVALID_PASSWORD", Vec::new());
        }

        let ghosted = self
            .sessions
            .get_mut(&server)
            .ok_or_else(|| ProtocolError::Failed(format!("server {server} is not tracked")))?
            .bind(&user.nick, peer.id());

        if let Some(previous) = ghosted {
            info!("User {} ghosted from peer {}", user.nick, previous);
            if let Some(previous) = self.directory.get(previous) {
                if let Err(e) = previous.send(Message::new("GHOSTED")) {
                    warn!("Could not notify ghosted peer {}: {}", previous.id(), e);
                }
            }
        }

        info!("User {} ({}) logged in from peer {}", user.nick, user.role, peer.id());
        reply(peer, "OK", Vec::new())
    }

    fn logout(&self, server: ServerId, peer: &dyn Peer, message: &Message) -> Result<(), ProtocolError> {
        if !message.args.is_empty() || !message.kwargs.is_empty() {
            return invalid_format(peer, "LOGOUT", "No arguments expected");
        }

        let nick = self
            .sessions
            .get_mut(&server)
            .and_then(|mut sessions| sessions.unbind(peer.id()));

        match nick {
            Some(nick) => {
                info!("User {} logged out from peer {}", nick, peer.id());
                reply(peer, "LOGGED_OUT", Vec::new())
            }
            None => reply(peer, "ALREADY_LOGGED_OUT", Vec::new()),
        }
    }
}

/// Login bookkeeping shared by every protocol that needs to know who a peer is.
pub struct AuthProtocol {
    state: Arc<AuthState>,
}

impl AuthProtocol {
    pub fn new(users: impl IntoIterator<Item = User>, directory: Arc<PeerDirectory>) -> Self {
        Self {
            state: Arc::new(AuthState {
                users: users.into_iter().map(|u| (u.nick.clone(), u)).collect(),
                sessions: DashMap::new(),
                directory,
            }),
        }
    }

    /// Nick of the user `peer` is logged in as on `server`.
    pub fn user_of(&self, server: ServerId, peer: PeerId) -> Option<String> {
        self.state.user_of(server, peer)
    }

    /// Every logged-in user of `server` with its peer, sorted by nick.
    pub fn logged_in(&self, server: ServerId) -> Vec<(String, Arc<dyn Peer>)> {
        let mut logins: Vec<(String, PeerId)> = match self.state.sessions.get(&server) {
            Some(sessions) => sessions
                .logins
                .iter()
                .map(|(nick, peer)| (nick.clone(), *peer))
                .collect(),
            None => Vec::new(),
        };
        logins.sort_by(|a, b| a.0.cmp(&b.0));

        logins
            .into_iter()
            .filter_map(|(nick, id)| self.state.directory.get(id).map(|peer| (nick, peer)))
            .collect()
    }

    /// The peer `nick` is logged in from, if any.
    pub fn login_of(&self, server: ServerId, nick: &str) -> Option<Arc<dyn Peer>> {
        let id = self
            .state
            .sessions
            .get(&server)
            .and_then(|sessions| sessions.logins.get(nick).copied())?;
        self.state.directory.get(id)
    }

    pub fn connected(&self, server: ServerId) -> usize {
        self.state
            .sessions
            .get(&server)
            .map_or(0, |sessions| sessions.connected.len())
    }

    pub fn is_serving(&self, server: ServerId) -> bool {
        self.state.sessions.contains_key(&server)
    }

    /// Wraps `f` so it only runs for logged-in peers; anyone else gets
    /// `LOGIN_REQUIRED`. `f` receives the nick of the sender.
    pub fn auth_required<F>(&self, f: F) -> Option<MessageHandler>
    where
        F: Fn(&dyn Server, &dyn Peer, &Message, &str) -> Result<(), ProtocolError>
            + Send
            + Sync
            + 'static,
    {
        let state = self.state.clone();
        handler(move |server, peer, message| {
            match state.user_of(server.id(), peer.id()) {
                Some(nick) => f(server, peer, message, nick.as_str()),
                None => reply(peer, "LOGIN_REQUIRED", Vec::new()),
            }
        })
    }
}

impl Protocol for AuthProtocol {
    fn name(&self) -> &str {
        "auth"
    }

    fn handlers(&self) -> HandlerMap {
        let login = self.state.clone();
        let logout = self.state.clone();
        HandlerMap::from([
            (
                "LOGIN".to_string(),
                handler(move |server, peer, message| login.login(server.id(), peer, message)),
            ),
            (
                "LOGOUT".to_string(),
                handler(move |server, peer, message| logout.logout(server.id(), peer, message)),
            ),
        ])
    }

    fn server_started(&self, server: &dyn Server, addr: SocketAddr) -> Result<(), ProtocolError> {
        self.state.sessions.insert(server.id(), Sessions::default());
        info!("Auth started for server {} at {}", server.id(), addr);
        Ok(())
    }

    fn server_stopped(&self, server: &dyn Server) -> Result<(), ProtocolError> {
        self.state.sessions.remove(&server.id());
        info!("Auth stopped for server {}", server.id());
        Ok(())
    }

    fn attendant_started(&self, server: &dyn Server, peer: &dyn Peer) -> Result<(), ProtocolError> {
        let mut sessions = self
            .state
            .sessions
            .get_mut(&server.id())
            .ok_or_else(|| ProtocolError::Rejected(format!("server {} is not started", server.id())))?;
        sessions.connected.insert(peer.id());
        Ok(())
    }

    fn attendant_stopped(
        &self,
        server: &dyn Server,
        peer: &dyn Peer,
        reason: StopReason,
        err: Option<&TransportError>,
    ) -> Result<(), ProtocolError> {
        if let Some(mut sessions) = self.state.sessions.get_mut(&server.id()) {
            sessions.unbind(peer.id());
            sessions.connected.remove(&peer.id());
        }
        match err {
            Some(err) => info!("Auth released peer {} ({}): {}", peer.id(), reason, err),
            None => info!("Auth released peer {} ({})", peer.id(), reason),
        }
        Ok(())
    }
}
