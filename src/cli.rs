//! CLI - Command line interface for Streamgate
//!
//! The gateway is a single long-running server process; the CLI covers the
//! listen address, config, and a couple of one-shot diagnostics.
//!
//! # Examples
//!
//! ```bash
//! # Run the gateway
//! streamgate serve --listen 0.0.0.0:8974
//!
//! # Resolve a magnet once and print the outcome
//! streamgate resolve "magnet:?xt=urn:btih:..."
//!
//! # Check debrid connectivity
//! streamgate health
//! ```

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Streamgate - debrid streaming gateway
///
/// Resolves magnet links through a debrid service and serves them as
/// browser-playable HTTP streams, transcoding when the container needs it.
#[derive(Parser, Debug)]
#[command(name = "streamgate", version, about)]
pub struct Cli {
    /// Path to a config file (default: ~/.config/streamgate/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debrid API token (overrides config and environment)
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the gateway server (default)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8974")]
        listen: SocketAddr,
    },

    /// Resolve a magnet URI once and print the result
    Resolve {
        /// The magnet URI to resolve
        magnet: String,
    },

    /// Check debrid-service connectivity and account standing
    Health,
}

impl Cli {
    /// The subcommand to run, defaulting to `serve` on the default address
    pub fn command_or_default(self) -> Command {
        self.command.unwrap_or(Command::Serve {
            listen: "127.0.0.1:8974".parse().expect("static address"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::parse_from(["streamgate"]);
        assert!(matches!(
            cli.command_or_default(),
            Command::Serve { listen } if listen.port() == 8974
        ));
    }

    #[test]
    fn test_resolve_command_parses() {
        let cli = Cli::parse_from(["streamgate", "resolve", "magnet:?xt=urn:btih:abc"]);
        assert!(matches!(cli.command, Some(Command::Resolve { .. })));
    }

    #[test]
    fn test_global_token_flag() {
        let cli = Cli::parse_from(["streamgate", "--token", "t0k3n", "health"]);
        assert_eq!(cli.token.as_deref(), Some("t0k3n"));
    }
}
