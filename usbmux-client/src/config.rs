//! Client configuration loading
//!
//! Loads daemon and logging settings from `~/.config/usbmux/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use usbmux_utils::{config_file, paths, Result, UsbmuxError};

/// Settings read from the config file; every field is optional
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon socket, used when neither `--socket` nor the environment names one
    pub socket_path: Option<PathBuf>,
    /// Round-trip limit for ListDevices/Connect/Listen
    pub request_timeout_secs: Option<u64>,
    /// Tracing filter used when `USBMUX_LOG` is unset
    pub log_filter: Option<String>,
    /// Also write logs to `$XDG_STATE_HOME/usbmux/log/usbmux.log`
    pub log_file: bool,
}

impl ClientConfig {
    /// Load from the default config file
    ///
    /// Returns defaults if the file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        Self::load_from(&config_file())
    }

    pub fn load_from(path: &Path) -> Self {
        match Self::try_load_from(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Load from `path`, reporting unreadable or invalid files
    ///
    /// A missing file is not an error and yields the defaults.
    pub fn try_load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        let invalid = |message: String| UsbmuxError::ConfigInvalid {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let config = Self::parse(&content).map_err(|e| invalid(e.message().to_string()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Pick the daemon socket
    ///
    /// Order: explicit path, `USBMUXD_SOCKET_ADDRESS`, config file, then
    /// `/var/run/usbmuxd`.
    pub fn resolve_socket_path(&self, explicit: Option<&Path>) -> PathBuf {
        let env = std::env::var(paths::SOCKET_ADDRESS_ENV).ok();
        self.resolve_socket_path_with(explicit, env.as_deref())
    }

    fn resolve_socket_path_with(&self, explicit: Option<&Path>, env: Option<&str>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if env.is_some() {
            return paths::resolve_socket_path(env);
        }
        match &self.socket_path {
            Some(path) => path.clone(),
            None => PathBuf::from(paths::DEFAULT_SOCKET_PATH),
        }
    }

    /// Zero disables the limit
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
