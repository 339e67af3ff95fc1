//! Interactive console commands driving the local clients.

use crate::transport::{Delivery, HubError, LocalHub};
use protocol_funnel::{Message, StopReason};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start { client: String },
    Login { client: String, user: String, password: String },
    Shout { client: String, text: String },
    Whisper { client: String, target: String, text: String },
    Logout { client: String },
    Stop { client: String },
    Bye,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("{command} has the incorrect number of arguments: {args}")]
    Arity { command: String, args: String },
    #[error("command not understood: {0}")]
    Unknown(String),
}

/// Parses one console line.
///
/// Text arguments (the message of `shout` and `whisper`) keep their inner
/// spaces; every other argument is a single word.
pub fn parse_line(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    if line == "bye" {
        return Ok(ConsoleCommand::Bye);
    }

    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let arity = || ParseError::Arity {
        command: command.to_string(),
        args: rest.to_string(),
    };

    match command {
        "start" | "logout" | "stop" => {
            if rest.is_empty() || rest.contains(' ') {
                return Err(arity());
            }
            let client = rest.to_string();
            Ok(match command {
                "start" => ConsoleCommand::Start { client },
                "logout" => ConsoleCommand::Logout { client },
                _ => ConsoleCommand::Stop { client },
            })
        }
        "login" => match rest.split_whitespace().collect::<Vec<_>>()[..] {
            [client, user, password] => Ok(ConsoleCommand::Login {
                client: client.to_string(),
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err(arity()),
        },
        "shout" => match rest.split_once(' ') {
            Some((client, text)) if !text.trim().is_empty() => Ok(ConsoleCommand::Shout {
                client: client.to_string(),
                text: text.trim().to_string(),
            }),
            _ => Err(arity()),
        },
        "whisper" => {
            let mut parts = rest.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(client), Some(target), Some(text)) if !text.trim().is_empty() => {
                    Ok(ConsoleCommand::Whisper {
                        client: client.to_string(),
                        target: target.to_string(),
                        text: text.trim().to_string(),
                    })
                }
                _ => Err(arity()),
            }
        }
        _ => Err(ParseError::Unknown(line.to_string())),
    }
}

/// Runs `command` against `hub`.
///
/// Returns whether the console should keep running.
pub fn execute(hub: &LocalHub, command: ConsoleCommand) -> Result<bool, HubError> {
    let delivery = match command {
        ConsoleCommand::Bye => return Ok(false),
        ConsoleCommand::Start { client } => {
            hub.connect(&client)?;
            return Ok(true);
        }
        ConsoleCommand::Stop { client } => {
            hub.disconnect(&client, StopReason::Local)?;
            return Ok(true);
        }
        ConsoleCommand::Login {
            client,
            user,
            password,
        } => hub.deliver(
            &client,
            Message::with_args("LOGIN", vec![user.into(), password.into()]),
        )?,
        ConsoleCommand::Shout { client, text } => {
            hub.deliver(&client, Message::with_args("MSG", vec![text.into()]))?
        }
        ConsoleCommand::Whisper {
            client,
            target,
            text,
        } => hub.deliver(
            &client,
            Message::with_args("PMSG", vec![target.into(), text.into()]),
        )?,
        ConsoleCommand::Logout { client } => hub.deliver(&client, Message::new("LOGOUT"))?,
    };

    if delivery == Delivery::Throttled {
        println!("(message throttled)");
    }
    Ok(true)
}

/// Renders a delivered message as `[client] COMMAND arg1 arg2 ...`.
pub fn render(client: &str, message: &Message) -> String {
    let mut out = format!("[{client}] {}", message.command());
    for arg in &message.args {
        match arg.as_str() {
            Some(text) => out.push_str(&format!(" {text}")),
            None => out.push_str(&format!(" {arg}")),
        }
    }
    out
}
