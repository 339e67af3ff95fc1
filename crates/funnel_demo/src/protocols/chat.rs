//! Chat protocol: broadcast and private messages between logged-in users.
//!
//! User management lives entirely in [`AuthProtocol`], so this protocol has no
//! lifecycle state of its own.

use super::{invalid_format, reply, AuthProtocol};
use protocol_funnel::{HandlerMap, Message, Peer, Protocol, ProtocolError, ProtocolRef, Server};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ChatProtocol {
    auth: Arc<AuthProtocol>,
}

impl ChatProtocol {
    pub fn new(auth: Arc<AuthProtocol>) -> Self {
        Self { auth }
    }
}

fn shout(
    auth: &AuthProtocol,
    server: &dyn Server,
    peer: &dyn Peer,
    message: &Message,
    sender: &str,
) -> Result<(), ProtocolError> {
    if message.args.len() != 1 || !message.kwargs.is_empty() {
        return invalid_format(
            peer,
            "MSG",
            "Expected 1 positional (string) argument, and no keyword arguments",
        );
    }
    let Some(text) = message.arg_str(0) else {
        return invalid_format(peer, "MSG", "The content must be a string");
    };

    let audience = auth.logged_in(server.id());
    debug!("{} shouts to {} users", sender, audience.len());
    for (nick, target) in audience {
        let received = Message::with_args("MSG_RECEIVED", vec![sender.into(), text.into()]);
        if let Err(e) = target.send(received) {
            warn!("Could not deliver message from {} to {}: {}", sender, nick, e);
        }
    }
    Ok(())
}

fn whisper(
    auth: &AuthProtocol,
    server: &dyn Server,
    peer: &dyn Peer,
    message: &Message,
    sender: &str,
) -> Result<(), ProtocolError> {
    if message.args.len() != 2 || !message.kwargs.is_empty() {
        return invalid_format(
            peer,
            "PMSG",
            "Expected 2 positional (string) arguments: user and content, and no keyword arguments",
        );
    }
    let Some(target_nick) = message.arg_str(0) else {
        return invalid_format(peer, "PMSG", "The target username must be a string");
    };
    let Some(text) = message.arg_str(1) else {
        return invalid_format(peer, "PMSG", "The content must be a string");
    };
    let Some(target) = auth.login_of(server.id(), target_nick) else {
        return invalid_format(peer, "PMSG", "The target is not logged in");
    };

    reply(
        target.as_ref(),
        "MSG_RECEIVED",
        vec![sender.into(), text.into()],
    )
}

impl Protocol for ChatProtocol {
    fn name(&self) -> &str {
        "chat"
    }

    fn dependencies(&self) -> Vec<ProtocolRef> {
        vec![self.auth.clone() as ProtocolRef]
    }

    fn handlers(&self) -> HandlerMap {
        let shout_auth = self.auth.clone();
        let whisper_auth = self.auth.clone();
        HandlerMap::from([
            (
                "MSG".to_string(),
                self.auth.auth_required(move |server, peer, message, sender| {
                    shout(&shout_auth, server, peer, message, sender)
                }),
            ),
            (
                "PMSG".to_string(),
                self.auth.auth_required(move |server, peer, message, sender| {
                    whisper(&whisper_auth, server, peer, message, sender)
                }),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::test_support::{demo_users, hub_for, replies};
    use crate::transport::{LocalHub, PeerDirectory};

    fn chat_hub() -> LocalHub {
        let directory = Arc::new(PeerDirectory::new());
        let auth = Arc::new(AuthProtocol::new(demo_users(), directory.clone()));
        let chat: ProtocolRef = Arc::new(ChatProtocol::new(auth));
        let hub = hub_for(vec![chat], directory);
        hub.start().unwrap();
        hub
    }

    fn login(hub: &LocalHub, client: &str, user: &str) {
        hub.connect(client).unwrap();
        let password = format!("{user}$123");
        hub.deliver(
            client,
            Message::with_args("LOGIN", vec![user.into(), password.into()]),
        )
        .unwrap();
        assert_eq!(replies(hub, client), vec!["OK"]);
    }

    #[test]
    fn test_auth_is_pulled_in_first() {
        let hub = chat_hub();
        let names: Vec<&str> = hub.funnel().protocols().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["auth", "chat"]);
        assert_eq!(
            hub.funnel().handlers().commands(),
            vec!["LOGIN", "LOGOUT", "MSG", "PMSG"]
        );
    }

    #[test]
    fn test_chat_requires_login() {
        let hub = chat_hub();
        hub.connect("a").unwrap();
        hub.deliver("a", Message::with_args("MSG", vec!["hi".into()])).unwrap();
        hub.deliver("a", Message::with_args("PMSG", vec!["pepe".into(), "hi".into()]))
            .unwrap();
        assert_eq!(replies(&hub, "a"), vec!["LOGIN_REQUIRED", "LOGIN_REQUIRED"]);
    }

    #[test]
    fn test_shout_reaches_every_logged_in_user() {
        let hub = chat_hub();
        login(&hub, "a", "pepe");
        login(&hub, "b", "toto");
        hub.connect("c").unwrap();

        hub.deliver("a", Message::with_args("MSG", vec!["hello all".into()]))
            .unwrap();

        for client in ["a", "b"] {
            let received = hub.client(client).unwrap().drain();
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].command(), "MSG_RECEIVED");
            assert_eq!(received[0].arg_str(0), Some("pepe"));
            assert_eq!(received[0].arg_str(1), Some("hello all"));
        }
        assert!(replies(&hub, "c").is_empty());
    }

    #[test]
    fn test_whisper() {
        let hub = chat_hub();
        login(&hub, "a", "pepe");
        login(&hub, "b", "toto");

        hub.deliver("a", Message::with_args("PMSG", vec!["toto".into(), "psst".into()]))
            .unwrap();
        hub.deliver("a", Message::with_args("PMSG", vec!["carlos".into(), "psst".into()]))
            .unwrap();

        let to_b = hub.client("b").unwrap().drain();
        assert_eq!(to_b.len(), 1);
        assert_eq!(to_b[0].arg_str(0), Some("pepe"));
        assert_eq!(to_b[0].arg_str(1), Some("psst"));

        let to_a = hub.client("a").unwrap().drain();
        assert_eq!(to_a.len(), 1);
        assert_eq!(to_a[0].command(), "INVALID_FORMAT");
        assert_eq!(to_a[0].arg_str(1), Some("The target is not logged in"));
    }

    #[test]
    fn test_malformed_chat_messages() {
        let hub = chat_hub();
        login(&hub, "a", "pepe");

        hub.deliver("a", Message::new("MSG")).unwrap();
        hub.deliver("a", Message::with_args("MSG", vec![serde_json::json!(42)]))
            .unwrap();
        hub.deliver("a", Message::with_args("PMSG", vec!["toto".into()]))
            .unwrap();

        assert_eq!(
            replies(&hub, "a"),
            vec!["INVALID_FORMAT", "INVALID_FORMAT", "INVALID_FORMAT"]
        );
    }

    #[test]
    fn test_logged_out_user_stops_receiving() {
        let hub = chat_hub();
        login(&hub, "a", "pepe");
        login(&hub, "b", "toto");
        hub.deliver("b", Message::new("LOGOUT")).unwrap();
        assert_eq!(replies(&hub, "b"), vec!["LOGGED_OUT"]);

        hub.deliver("a", Message::with_args("MSG", vec!["anyone?".into()]))
            .unwrap();
        assert!(replies(&hub, "b").is_empty());
        assert_eq!(replies(&hub, "a"), vec!["MSG_RECEIVED"]);
    }
}
