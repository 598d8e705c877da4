//! Error types for usbmux
//!
//! Provides a unified error type used across all usbmux crates.

use std::path::PathBuf;
use std::time::Duration;

use usbmux_protocol::{Device, FrameError, ResultCode, ValueError};

/// Main error type for usbmux operations
#[derive(Debug, thiserror::Error)]
pub enum UsbmuxError {
    // === Connection Errors ===

    #[error("Connection failed: {context}: {source}")]
    ConnectionFailure {
        context: String,
        source: std::io::Error,
    },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Request timeout after {limit:?}")]
    Timeout { limit: Duration },

    // === Payload Errors ===

    #[error("Failed to serialize request: {0}")]
    SerializationFailure(#[source] ValueError),

    #[error("Failed to parse response: {0}")]
    ResponseParseFailure(#[source] ValueError),

    // === Frame Errors ===

    #[error("Frame truncated: expected {expected} bytes, only {available} available")]
    FrameTruncated { expected: usize, available: usize },

    #[error("Invalid frame length {length}: shorter than the 16-byte header")]
    FrameLengthInvalid { length: u32 },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // === Daemon Results ===

    #[error("Failed to connect to {device}: daemon returned {code}")]
    DeviceConnectionRefused { device: Device, code: ResultCode },

    #[error("Failed to listen to usbmuxd: daemon returned {code}")]
    ListenFailure { code: ResultCode },

    // === Device Tracking Errors ===

    #[error("Device {device_id} attached while already present")]
    DuplicateDeviceAttach { device_id: u32 },

    #[error("Device {device_id} detached but was never attached")]
    UnknownDeviceDetach { device_id: u32 },

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UsbmuxError {
    /// Create a connection error with context
    pub fn connection(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::ConnectionFailure {
            context: context.into(),
            source,
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure { .. } | Self::ConnectionClosed | Self::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for UsbmuxError {
    fn from(source: std::io::Error) -> Self {
        Self::connection("transport", source)
    }
}

impl From<FrameError> for UsbmuxError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(source) => Self::from(source),
            FrameError::LengthInvalid { length } => Self::FrameLengthInvalid { length },
            FrameError::Truncated {
                expected,
                available,
            } => Self::FrameTruncated {
                expected,
                available,
            },
            FrameError::TooLarge { size, max } => Self::FrameTooLarge { size, max },
        }
    }
}

/// Result type alias using UsbmuxError
pub type Result<T> = std::result::Result<T, UsbmuxError>;
