//! usbmux-utils: Common utilities shared across usbmux crates
//!
//! This crate provides:
//! - Unified error types ([`UsbmuxError`], [`Result`])
//! - Logging infrastructure ([`init_logging_with_config`], [`LogConfig`])
//! - Socket and XDG path resolution ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{Result, UsbmuxError};
pub use logging::{init_logging_with_config, LogConfig, LogOutput, LOG_ENV};

// Re-export commonly used path functions
pub use paths::{config_dir, config_file, log_dir, socket_path, state_dir, DEFAULT_SOCKET_PATH};
