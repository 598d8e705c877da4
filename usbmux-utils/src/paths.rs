//! Path utilities for usbmux
//!
//! Resolves the daemon socket and the XDG config/state directories.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Application identifier for XDG directories
const APP_NAME: &str = "usbmux";

/// Where usbmuxd listens unless told otherwise
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/usbmuxd";

/// Environment override for the daemon address (`UNIX:/path` or a bare path)
pub const SOCKET_ADDRESS_ENV: &str = "USBMUXD_SOCKET_ADDRESS";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

/// Get the daemon socket path
///
/// Honors `USBMUXD_SOCKET_ADDRESS`, falling back to `/var/run/usbmuxd`.
pub fn socket_path() -> PathBuf {
    resolve_socket_path(std::env::var(SOCKET_ADDRESS_ENV).ok().as_deref())
}

/// Resolve the socket path from an optional address override
pub fn resolve_socket_path(address: Option<&str>) -> PathBuf {
    match address {
        Some(addr) => match parse_socket_address(addr) {
            Some(path) => path,
            None => {
                tracing::warn!(
                    address = addr,
                    "Ignoring unsupported {}, using {}",
                    SOCKET_ADDRESS_ENV,
                    DEFAULT_SOCKET_PATH
                );
                PathBuf::from(DEFAULT_SOCKET_PATH)
            }
        },
        None => PathBuf::from(DEFAULT_SOCKET_PATH),
    }
}

/// Parse a socket address of the form `UNIX:/path` or `/path`
///
/// TCP addresses (`host:port`) are not supported and yield `None`.
pub fn parse_socket_address(addr: &str) -> Option<PathBuf> {
    let addr = addr.trim();
    let path = match addr.split_once(':') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("unix") => rest,
        _ => addr,
    };

    if Path::new(path).is_absolute() {
        Some(PathBuf::from(path))
    } else {
        None
    }
}

/// Get the configuration directory
///
/// Location: `$XDG_CONFIG_HOME/usbmux` or `~/.config/usbmux`
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(fallback_config_dir)
}

/// Get the main configuration file path
///
/// Location: `$XDG_CONFIG_HOME/usbmux/config.toml`
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the state directory
///
/// Location: `$XDG_STATE_HOME/usbmux` or `~/.local/state/usbmux`
pub fn state_dir() -> PathBuf {
    project_dirs()
        .and_then(|p| p.state_dir().map(|d| d.to_path_buf()))
        .unwrap_or_else(fallback_state_dir)
}

/// Get the log directory
///
/// Location: `$XDG_STATE_HOME/usbmux/log`
pub fn log_dir() -> PathBuf {
    state_dir().join("log")
}

// Fallback implementations when ProjectDirs is unavailable

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn fallback_config_dir() -> PathBuf {
    home_dir().join(".config").join(APP_NAME)
}

fn fallback_state_dir() -> PathBuf {
    home_dir().join(".local").join("state").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Socket Address Tests ====================

    #[test]
    fn test_default_socket_path() {
        assert_eq!(resolve_socket_path(None), PathBuf::from("/var/run/usbmuxd"));
    }

    #[test]
    fn test_unix_prefixed_address() {
        assert_eq!(
            parse_socket_address("UNIX:/tmp/usbmuxd.sock"),
            Some(PathBuf::from("/tmp/usbmuxd.sock"))
        );
        assert_eq!(
            parse_socket_address("unix:/run/usbmuxd"),
            Some(PathBuf::from("/run/usbmuxd"))
        );
    }

    #[test]
    fn test_bare_path_address() {
        assert_eq!(
            parse_socket_address("  /run/usbmuxd "),
            Some(PathBuf::from("/run/usbmuxd"))
        );
    }

    #[test]
    fn test_tcp_address_unsupported() {
        assert_eq!(parse_socket_address("127.0.0.1:27015"), None);
        assert_eq!(parse_socket_address("relative/path"), None);
    }

    #[test]
    fn test_resolve_override() {
        assert_eq!(
            resolve_socket_path(Some("UNIX:/tmp/mux")),
            PathBuf::from("/tmp/mux")
        );
        assert_eq!(
            resolve_socket_path(Some("localhost:27015")),
            PathBuf::from(DEFAULT_SOCKET_PATH)
        );
    }

    // ==================== Directory Tests ====================

    #[test]
    fn test_config_dir() {
        let path = config_dir();
        assert!(path.to_string_lossy().contains("usbmux"));
    }

    #[test]
    fn test_config_file_is_toml() {
        let path = config_file();
        assert!(path.to_string_lossy().ends_with(".toml"));
        assert!(path.starts_with(config_dir()));
    }

    #[test]
    fn test_log_dir_in_state_dir() {
        let log = log_dir();
        assert!(log.starts_with(state_dir()));
        assert_eq!(log.file_name().unwrap(), "log");
    }
}
