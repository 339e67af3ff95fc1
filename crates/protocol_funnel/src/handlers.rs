//! Command handler tables and fault-isolated dispatch.

use crate::error::{FunnelError, ProtocolError};
use crate::fault;
use crate::hooks::{HandlerFaultHook, UnknownCommandHook};
use crate::message::Message;
use crate::protocol::ProtocolRef;
use crate::transport::{Peer, Server};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handling a message involves the server, the peer that sent it, and the
/// message itself.
pub type MessageHandler =
    Arc<dyn Fn(&dyn Server, &dyn Peer, &Message) -> Result<(), ProtocolError> + Send + Sync>;

/// One protocol's declared handlers. A `None` value claims nothing.
pub type HandlerMap = HashMap<String, Option<MessageHandler>>;

/// Wraps a closure as a [`MessageHandler`].
pub fn handler<F>(f: F) -> Option<MessageHandler>
where
    F: Fn(&dyn Server, &dyn Peer, &Message) -> Result<(), ProtocolError> + Send + Sync + 'static,
{
    Some(Arc::new(f))
}

/// Outcome of dispatching a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran and returned normally
    Handled,
    /// No handler was registered for the command
    Unknown,
    /// The handler (or the unknown-command hook) failed or panicked
    Faulted,
}

/// Merged command table of every protocol in a funnel.
///
/// Built once in direct order and immutable afterwards, so it can be read from
/// any thread without locking.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, MessageHandler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges every protocol's table in the given order.
    pub fn from_protocols(protocols: &[ProtocolRef]) -> Result<Self, FunnelError> {
        let mut table = Self::new();
        for protocol in protocols {
            table.merge(protocol.name(), protocol.handlers())?;
        }
        debug!("Merged {} command handlers", table.len());
        Ok(table)
    }

    /// Merges `other` into this table.
    ///
    /// Only merges if none of the commands `other` claims with a handler is
    /// already claimed here. On conflict nothing from `other` is applied.
    pub fn merge(&mut self, protocol_name: &str, other: HandlerMap) -> Result<(), FunnelError> {
        for (command, incoming) in &other {
            if incoming.is_some() && self.handlers.contains_key(command) {
                return Err(FunnelError::HandlerConflict {
                    command: command.clone(),
                    protocol: protocol_name.to_string(),
                });
            }
        }

        for (command, incoming) in other {
            if let Some(handler) = incoming {
                self.handlers.insert(command, handler);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.handlers.contains_key(command)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut commands: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        commands.sort_unstable();
        commands
    }

    /// Dispatches `message` to its handler.
    ///
    /// A failing or panicking handler is reported once through `on_fault` and
    /// never propagates, so the next message is processed normally. Commands
    /// with no handler go to `on_unknown` when one is supplied.
    pub fn handle(
        &self,
        server: &dyn Server,
        peer: &dyn Peer,
        message: &Message,
        on_unknown: Option<&UnknownCommandHook>,
        on_fault: Option<&HandlerFaultHook>,
    ) -> Dispatch {
        let (outcome, result) = match self.handlers.get(&message.command) {
            Some(handler) => (
                Dispatch::Handled,
                fault::guard(|| handler(server, peer, message)),
            ),
            None => {
                let result = match on_unknown {
                    Some(hook) => fault::guard(|| {
                        hook(server, peer, message);
                        Ok(())
                    }),
                    None => Ok(()),
                };
                (Dispatch::Unknown, result)
            }
        };

        match result {
            Ok(()) => outcome,
            Err(error) => {
                warn!(
                    "Handling of command {} from peer {} failed: {}",
                    message.command,
                    peer.id(),
                    error
                );
                if let Some(hook) = on_fault {
                    fault::guard_hook("on_handler_fault", || hook(server, peer, message, &error));
                }
                Dispatch::Faulted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{PeerId, ServerId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubServer(ServerId);

    impl Server for StubServer {
        fn id(&self) -> ServerId {
            self.0
        }
        fn stop(&self) {}
    }

    struct StubPeer(PeerId);

    impl Peer for StubPeer {
        fn id(&self) -> PeerId {
            self.0
        }
        fn send(&self, _message: Message) -> Result<(), TransportError> {
            Ok(())
        }
        fn stop(&self) {}
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Option<MessageHandler> {
        let counter = counter.clone();
        handler(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stubs() -> (StubServer, StubPeer) {
        (StubServer(ServerId::new()), StubPeer(PeerId::new()))
    }

    #[test]
    fn test_merge_disjoint_tables() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::new();
        table
            .merge("auth", HashMap::from([("LOGIN".to_string(), counting_handler(&hits))]))
            .unwrap();
        table
            .merge("chat", HashMap::from([("MSG".to_string(), counting_handler(&hits))]))
            .unwrap();

        assert_eq!(table.commands(), vec!["LOGIN", "MSG"]);
    }

    #[test]
    fn test_merge_conflict_is_atomic() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::new();
        table
            .merge("auth", HashMap::from([("X".to_string(), counting_handler(&hits))]))
            .unwrap();

        let result = table.merge(
            "other",
            HashMap::from([
                ("X".to_string(), counting_handler(&hits)),
                ("Y".to_string(), counting_handler(&hits)),
            ]),
        );

        assert_eq!(
            result,
            Err(FunnelError::HandlerConflict {
                command: "X".to_string(),
                protocol: "other".to_string(),
            })
        );
        assert!(!table.contains("Y"));
    }

    #[test]
    fn test_null_handlers_never_conflict() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::new();
        table
            .merge("first", HashMap::from([("X".to_string(), None)]))
            .unwrap();
        table
            .merge("second", HashMap::from([("X".to_string(), counting_handler(&hits))]))
            .unwrap();
        table
            .merge("third", HashMap::from([("X".to_string(), None)]))
            .unwrap();

        let (server, peer) = stubs();
        let outcome = table.handle(&server, &peer, &Message::new("X"), None, None);
        assert_eq!(outcome, Dispatch::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_command_without_hook_is_tolerated() {
        let (server, peer) = stubs();
        let table = HandlerTable::new();
        assert_eq!(
            table.handle(&server, &peer, &Message::new("NOPE"), None, None),
            Dispatch::Unknown
        );
    }

    #[test]
    fn test_unknown_command_hook_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let unknown = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::new();
        table
            .merge("auth", HashMap::from([("LOGIN".to_string(), counting_handler(&hits))]))
            .unwrap();

        let unknown_clone = unknown.clone();
        let hook: UnknownCommandHook = Arc::new(move |_, _, message: &Message| {
            assert_eq!(message.command, "NOPE");
            unknown_clone.fetch_add(1, Ordering::SeqCst);
        });

        let (server, peer) = stubs();
        let outcome = table.handle(&server, &peer, &Message::new("NOPE"), Some(&hook), None);

        assert_eq!(outcome, Dispatch::Unknown);
        assert_eq!(unknown.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let hits = Arc::new(AtomicUsize::new(0));
        let faults = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::new();
        table
            .merge(
                "bad",
                HashMap::from([("BOOM".to_string(), handler(|_, _, _| panic!("kaboom")))]),
            )
            .unwrap();
        table
            .merge("good", HashMap::from([("PING".to_string(), counting_handler(&hits))]))
            .unwrap();

        let faults_clone = faults.clone();
        let on_fault: HandlerFaultHook = Arc::new(move |_, _, _, error: &ProtocolError| {
            assert_eq!(error, &ProtocolError::Panicked("kaboom".to_string()));
            faults_clone.fetch_add(1, Ordering::SeqCst);
        });

        let (server, peer) = stubs();
        let first = table.handle(&server, &peer, &Message::new("BOOM"), None, Some(&on_fault));
        let second = table.handle(&server, &peer, &Message::new("PING"), None, Some(&on_fault));

        assert_eq!(first, Dispatch::Faulted);
        assert_eq!(second, Dispatch::Handled);
        assert_eq!(faults.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_error_reported_like_panic() {
        let faults = Arc::new(AtomicUsize::new(0));
        let mut table = HandlerTable::new();
        table
            .merge(
                "strict",
                HashMap::from([(
                    "CHECK".to_string(),
                    handler(|_, _, _| Err(ProtocolError::Failed("bad input".into()))),
                )]),
            )
            .unwrap();

        let faults_clone = faults.clone();
        let on_fault: HandlerFaultHook = Arc::new(move |_, _, _, _| {
            faults_clone.fetch_add(1, Ordering::SeqCst);
        });

        let (server, peer) = stubs();
        let outcome = table.handle(&server, &peer, &Message::new("CHECK"), None, Some(&on_fault));
        assert_eq!(outcome, Dispatch::Faulted);
        assert_eq!(faults.load(Ordering::SeqCst), 1);
    }
}
