//! Command-line interface for vicictl.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// vicictl - talk to the IKE daemon over its VICI control socket
#[derive(Debug, Parser)]
#[command(name = "vicictl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "VICICTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "VICICTL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Override socket path
    #[arg(short, long, global = true, env = "VICI_SOCKET")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a command and print its response
    Command {
        /// Command name, e.g. "list-conns"
        name: String,

        /// Request fields: key=value, section.key=value or list[]=value
        #[arg(value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },

    /// Run a command that reports progress through an event
    Stream {
        /// Command name, e.g. "initiate"
        name: String,

        /// Event streamed while the command runs, e.g. "control-log"
        event: String,

        /// Request fields: key=value, section.key=value or list[]=value
        #[arg(value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },

    /// Print events until interrupted
    Listen {
        /// Events to register for
        #[arg(required = true)]
        events: Vec<String>,
    },

    /// Show the daemon version
    Version,
}
