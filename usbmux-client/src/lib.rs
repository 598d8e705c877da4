//! usbmux-client: async client for the usbmux daemon
//!
//! - [`MuxClient`] lists devices, opens relayed device connections and
//!   subscribes to attach/detach notifications
//! - [`DeviceListener`] tracks the attached device set from a Listen
//!   connection
//! - [`ClientConfig`] reads `~/.config/usbmux/config.toml`

pub mod client;
pub mod config;
pub mod listener;
pub mod stream;

pub use client::{MuxClient, StreamTrait};
pub use config::ClientConfig;
pub use listener::{DeviceEvent, DeviceListener, ListenerHandle};
pub use stream::DeviceStream;
