//! Messages exchanged between peers and protocols.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded message: a command name plus positional and keyword arguments.
///
/// Framing and marshaling belong to the transport; by the time a message reaches
/// the funnel it is already in this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Command used to route the message to a handler
    pub command: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Message {
    /// Creates a message with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Creates a message with positional arguments only.
    pub fn with_args(command: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            args,
            kwargs: Map::new(),
        }
    }

    /// Adds a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Positional argument `index` as a string, if present and a string.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_accessors() {
        let message = Message::with_args("LOGIN", vec![json!("pepe"), json!(7)]).kwarg("remember", true);
        assert_eq!(message.command(), "LOGIN");
        assert_eq!(message.arg_str(0), Some("pepe"));
        assert_eq!(message.arg_str(1), None);
        assert_eq!(message.arg_str(2), None);
        assert_eq!(message.kwargs.get("remember"), Some(&json!(true)));
    }

    #[test]
    fn test_missing_arguments_default_to_empty() {
        let message: Message = serde_json::from_str(r#"{"command":"LOGOUT"}"#).unwrap();
        assert_eq!(message, Message::new("LOGOUT"));
    }
}
