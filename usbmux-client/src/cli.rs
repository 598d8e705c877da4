//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Talk to the usbmux daemon
#[derive(Parser, Debug)]
#[command(name = "usbmux")]
#[command(about = "List, watch and connect to devices through usbmuxd")]
#[command(version)]
pub struct Cli {
    /// Daemon socket path
    ///
    /// Overrides USBMUXD_SOCKET_ADDRESS and the config file.
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,

    /// Log at debug level to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append logs to a file in the usbmux state directory
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List attached USB devices
    List {
        /// Print devices as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print attach/detach events until interrupted
    Listen,

    /// Relay stdin/stdout to a port on a device
    Connect {
        /// Device id as reported by `list`
        device_id: u32,

        /// Port on the device
        port: u16,
    },
}
