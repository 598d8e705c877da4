//! usbmux-protocol: wire definitions for talking to usbmuxd
//!
//! This crate defines the frame format, the structured payload model and the
//! request/response shapes used between a client and the usbmux daemon.
//! It performs no I/O of its own.

pub mod frame;
pub mod request;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use frame::{Frame, FrameCodec, FrameError, MessageType, HEADER_SIZE, MAX_FRAME_SIZE, PLIST_VERSION};
pub use request::{
    build_request, connect_request, keys, list_devices_request, listen_request, network_order,
};
pub use types::{
    bytes_to_hex, bytes_to_hex_separated, connection_type, hex_to_bytes, Device, HexError,
    Notification, ResultCode,
};
pub use value::{Value, ValueCodec, ValueError, XmlPlistCodec};

/// Connection type of devices this client handles
pub const USB_CONNECTION_TYPE: &str = "USB";
