use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "logspan", version, about = "Correlated logs, spans and metrics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the demo HTTP server (default)
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "LOGSPAN_ADDR")]
        addr: SocketAddr,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration (with secrets masked)
    Show,

    /// Validate configuration from file and environment
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Serve if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        })
    }
}
