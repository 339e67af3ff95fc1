//! Chat server demo for the protocol funnel.
//!
//! An in-process transport ([`transport::LocalHub`]) drives the `auth` and
//! `chat` protocols through a [`protocol_funnel::ProtocolFunnel`]; the console
//! module turns typed commands into client messages.

pub mod cli;
pub mod config;
pub mod console;
pub mod logging;
pub mod protocols;
pub mod signals;
pub mod transport;
