//! Interactive chat server built from two protocols funneled together.
//!
//! Reads console commands from stdin that drive in-process clients against a
//! local server running the `auth` and `chat` protocols.

use anyhow::{anyhow, Result};
use funnel_demo::cli::CliArgs;
use funnel_demo::config::AppConfig;
use funnel_demo::console::{self, ParseError};
use funnel_demo::protocols::{AuthProtocol, ChatProtocol, User};
use funnel_demo::transport::{LocalHub, PeerDirectory, Throttle};
use funnel_demo::{logging, signals};
use protocol_funnel::{FunnelHooks, ProtocolFunnel, ProtocolRef, Server};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

/// Reporting hooks of the demo server: everything ends up in the log.
fn reporting_hooks() -> FunnelHooks {
    FunnelHooks::new()
        .with_server_start_fault(|server, addr, protocol, err| {
            error!("Server {} at {} rejected by {}: {}", server.id(), addr, protocol.name(), err);
        })
        .with_peer_start_fault(|server, peer, protocol, err| {
            error!(
                "Peer {} on server {} rejected by {}: {}",
                peer.id(),
                server.id(),
                protocol.name(),
                err
            );
        })
        .with_unknown_command(|_server, peer, message| {
            warn!("Peer {} sent unknown command {}", peer.id(), message.command());
        })
        .with_handler_fault(|_server, peer, message, err| {
            error!("Handler for {} failed for peer {}: {}", message.command(), peer.id(), err);
        })
        .with_message_throttled(|_server, peer, message, _when, lapse| {
            warn!(
                "Peer {} throttled on {} after {:?}",
                peer.id(),
                message.command(),
                lapse
            );
        })
        .with_peer_stop_fault(|_server, peer, reason, _err, protocol, err| {
            warn!(
                "Protocol {} failed to release peer {} ({}): {}",
                protocol.name(),
                peer.id(),
                reason,
                err
            );
        })
        .with_server_stop_fault(|server, protocol, err| {
            warn!("Protocol {} failed to stop on server {}: {}", protocol.name(), server.id(), err);
        })
}

struct Application {
    config: AppConfig,
    hub: LocalHub,
}

impl Application {
    async fn new(args: CliArgs) -> Result<Self> {
        // Configuration first, logging depends on it
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging)?;

        let directory = Arc::new(PeerDirectory::new());
        let auth = Arc::new(AuthProtocol::new(
            config.users.iter().map(User::from),
            directory.clone(),
        ));
        let chat: ProtocolRef = Arc::new(ChatProtocol::new(auth.clone()));
        let funnel = ProtocolFunnel::new(&[chat, auth as ProtocolRef], reporting_hooks())?;

        let addr = config.bind_address().map_err(|e| anyhow!(e))?;
        let throttle = Throttle {
            max_messages: config.throttle.max_messages,
            window: Duration::from_millis(config.throttle.window_ms),
        };
        let hub = LocalHub::new(Arc::new(funnel), directory, addr, throttle);

        Ok(Self { config, hub })
    }

    async fn run(self) -> Result<()> {
        info!("Starting {} at {}", self.config.server.name, self.config.server.bind_address);
        self.hub.start()?;
        println!("Commands: start <client> | login <client> <user> <pass> | shout <client> <text>");
        println!("          whisper <client> <user> <text> | logout <client> | stop <client> | bye");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("Enter a command: ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                result = signals::shutdown_signal() => {
                    result?;
                    None
                }
            };
            let Some(line) = line else {
                break;
            };

            match console::parse_line(&line) {
                Ok(command) => match console::execute(&self.hub, command) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("{e}"),
                },
                Err(ParseError::Empty) => {}
                Err(e) => println!("{e}. Retrying..."),
            }

            for (client, message) in self.hub.drain_all() {
                println!("{}", console::render(&client, &message));
            }
        }

        info!("Shutting down server {}", self.hub.server().id());
        self.hub.shutdown();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to start: {e}");
            return Err(e);
        }
    };

    if let Err(e) = app.run().await {
        error!("Application error: {e}");
        return Err(e);
    }

    info!("Bye");
    Ok(())
}
