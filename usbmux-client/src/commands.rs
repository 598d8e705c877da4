//! Command implementations for the `usbmux` binary

use std::pin::pin;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use usbmux_client::{DeviceEvent, MuxClient};
use usbmux_utils::{Result, UsbmuxError};

use crate::cli::Command;

/// Run a command, returning the process exit code
pub async fn execute(command: Command, client: MuxClient) -> Result<i32> {
    match command {
        Command::List { json } => list(&client, json).await,
        Command::Listen => listen(&client).await,
        Command::Connect { device_id, port } => connect(&client, device_id, port).await,
    }
}

async fn list(client: &MuxClient, json: bool) -> Result<i32> {
    let devices = client.list_devices().await?;

    if json {
        let out = serde_json::to_string_pretty(&devices)
            .map_err(|e| UsbmuxError::internal(format!("JSON output: {}", e)))?;
        println!("{}", out);
        return Ok(0);
    }

    if devices.is_empty() {
        eprintln!("no devices attached");
    }
    for device in &devices {
        println!("{}", device);
    }
    Ok(0)
}

async fn listen(client: &MuxClient) -> Result<i32> {
    let (listener, mut events) = client.device_listener().await?;
    let mut handle = listener.spawn();
    let mut ctrl_c = pin!(tokio::signal::ctrl_c());
    let mut stopping = false;

    let (_, outcome) = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => print_event(&event),
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                handle.request_stop();
            }
            finished = &mut handle => break finished?,
        }
    };

    // Events queued before the task ended
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    match outcome {
        Ok(()) => Ok(0),
        Err(e) => {
            eprintln!("{}", e);
            Ok(1)
        }
    }
}

fn print_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Attached(device) => println!("attached {}", device),
        DeviceEvent::Detached(device) => println!("detached {}", device),
    }
}

async fn connect(client: &MuxClient, device_id: u32, port: u16) -> Result<i32> {
    let devices = client.list_devices().await?;
    let Some(device) = devices.iter().find(|d| d.id() == device_id) else {
        eprintln!("device not found: {}", device_id);
        return Ok(1);
    };

    let stream = client.connect(device, port).await?;
    tracing::info!(device = %device, port, "Relaying stdin/stdout");

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    let upstream = async {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = stdin.read(&mut buf).await?;
            if n == 0 {
                writer.shutdown().await?;
                return Ok::<_, std::io::Error>(());
            }
            writer.write_all(&buf[..n]).await?;
        }
    };
    let downstream = async {
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, std::io::Error>(());
            }
            stdout.write_all(&buf[..n]).await?;
            stdout.flush().await?;
        }
    };

    // Device hang-up ends the session; stdin EOF only half-closes it
    let mut upstream = pin!(upstream);
    let mut downstream = pin!(downstream);
    tokio::select! {
        result = &mut downstream => result?,
        result = &mut upstream => {
            result?;
            downstream.await?;
        }
    }
    Ok(0)
}
