//! usbmux: command-line front end for the usbmux daemon

mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use usbmux_client::{ClientConfig, MuxClient};
use usbmux_utils::{init_logging_with_config, LogConfig, LOG_ENV};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = ClientConfig::load();

    let mut log_config = if cli.verbose {
        LogConfig::development()
    } else {
        LogConfig::cli()
    };
    if !cli.verbose && std::env::var(LOG_ENV).is_err() {
        if let Some(filter) = &config.log_filter {
            log_config.filter = filter.clone();
        }
    }
    if cli.log_file || config.log_file {
        log_config = log_config.with_log_file();
    }
    if let Err(e) = init_logging_with_config(log_config) {
        eprintln!("{}", e);
    }

    let client = MuxClient::from_config(&config, cli.socket.as_deref());
    tracing::debug!(socket = %client.socket_path().display(), "Using daemon socket");

    let exit_code = match commands::execute(cli.command, client).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}
