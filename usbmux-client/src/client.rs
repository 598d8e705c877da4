//! Request/response client for usbmuxd
//!
//! Every operation opens its own connection to the daemon socket, sends one
//! plist request and reads one response. `ListDevices` drops the connection
//! when done; `Connect` and `Listen` hand it to the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use usbmux_protocol::{
    connect_request, connection_type, keys, list_devices_request, listen_request, Device, Frame,
    FrameCodec, MessageType, ResultCode, Value, ValueCodec, XmlPlistCodec, USB_CONNECTION_TYPE,
};
use usbmux_utils::{socket_path, Result, UsbmuxError};

use crate::config::ClientConfig;
use crate::listener::{DeviceEvent, DeviceListener};
use crate::stream::DeviceStream;

/// Tag sent with every request; each connection carries a single exchange
const REQUEST_TAG: u32 = 1;

/// Trait alias for streams that can be used with Framed
pub trait StreamTrait: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamTrait for T {}

/// Client for the usbmux daemon
#[derive(Debug, Clone)]
pub struct MuxClient {
    socket_path: PathBuf,
    /// Bound on each request/response round trip; `None` waits indefinitely
    timeout: Option<Duration>,
}

impl MuxClient {
    /// Client for the default daemon socket
    pub fn new() -> Self {
        Self::with_socket_path(socket_path())
    }

    /// Client for a custom socket path
    pub fn with_socket_path(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            timeout: None,
        }
    }

    /// Client configured from a loaded config file
    ///
    /// `socket` takes precedence over every configured socket address.
    pub fn from_config(config: &ClientConfig, socket: Option<&Path>) -> Self {
        let client = Self::with_socket_path(config.resolve_socket_path(socket));
        match config.request_timeout() {
            Some(limit) => client.with_timeout(limit),
            None => client,
        }
    }

    /// Bound every round trip by `limit`
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// List USB-attached devices, in the order the daemon reports them
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let mut framed = self.open().await?;
        let response = exchange(&mut framed, list_devices_request(), self.timeout).await?;
        parse_device_list(&response)
    }

    /// Open a relayed stream to `port` on `device`
    ///
    /// `port` is in host byte order. On success the connection belongs to
    /// the caller and carries raw device bytes only.
    pub async fn connect(&self, device: &Device, port: u16) -> Result<DeviceStream<UnixStream>> {
        let mut framed = self.open().await?;
        let request = connect_request(device.id(), port);
        let response = exchange(&mut framed, request, self.timeout).await?;

        let code = ResultCode::from_response(&response).map_err(UsbmuxError::ResponseParseFailure)?;
        if !code.is_ok() {
            tracing::warn!(device = %device, port, %code, "Daemon refused device connection");
            return Err(UsbmuxError::DeviceConnectionRefused {
                device: device.clone(),
                code,
            });
        }

        tracing::debug!(device_id = device.id(), port, "Connected to device port");
        Ok(DeviceStream::from_framed(framed))
    }

    /// Subscribe to attach/detach notifications
    ///
    /// The returned connection only carries notification frames from now on.
    pub async fn listen(&self) -> Result<Framed<UnixStream, FrameCodec>> {
        let mut framed = self.open().await?;
        let response = exchange(&mut framed, listen_request(), self.timeout).await?;

        let code = ResultCode::from_response(&response).map_err(UsbmuxError::ResponseParseFailure)?;
        if !code.is_ok() {
            return Err(UsbmuxError::ListenFailure { code });
        }

        tracing::debug!("Listening for device notifications");
        Ok(framed)
    }

    /// `listen()` wrapped in a device set tracker
    pub async fn device_listener(
        &self,
    ) -> Result<(DeviceListener<UnixStream>, mpsc::UnboundedReceiver<DeviceEvent>)> {
        let framed = self.listen().await?;
        Ok(DeviceListener::new(framed))
    }

    async fn open(&self) -> Result<Framed<UnixStream, FrameCodec>> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            UsbmuxError::connection(
                format!("Failed to connect to {}", self.socket_path.display()),
                e,
            )
        })?;
        Ok(Framed::new(stream, FrameCodec::new()))
    }
}

impl Default for MuxClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Send one request and decode the single response payload
async fn exchange<S: StreamTrait>(
    framed: &mut Framed<S, FrameCodec>,
    request: Value,
    limit: Option<Duration>,
) -> Result<Value> {
    let codec = XmlPlistCodec;
    let payload = codec
        .encode(&request)
        .map_err(UsbmuxError::SerializationFailure)?;
    tracing::debug!(
        request = request.string_field(keys::MESSAGE_TYPE).unwrap_or("?"),
        len = payload.len(),
        "Sending request"
    );

    let round_trip = async {
        framed.send(Frame::plist(REQUEST_TAG, payload)).await?;
        let frame = framed.next().await.ok_or(UsbmuxError::ConnectionClosed)??;
        Ok::<_, UsbmuxError>(frame)
    };

    let frame = match limit {
        Some(limit) => tokio::time::timeout(limit, round_trip)
            .await
            .map_err(|_| UsbmuxError::Timeout { limit })??,
        None => round_trip.await?,
    };

    tracing::debug!(
        tag = frame.tag,
        message_type = ?frame.message_type,
        len = frame.payload.len(),
        "Received response frame"
    );
    if frame.message_type != MessageType::PropertyListMessage {
        tracing::warn!(message_type = ?frame.message_type, "Unexpected response frame type");
    }

    codec
        .decode(&frame.payload)
        .map_err(UsbmuxError::ResponseParseFailure)
}

/// Extract USB devices from a `ListDevices` response
fn parse_device_list(response: &Value) -> Result<Vec<Device>> {
    let entries = response
        .array_field(keys::DEVICE_LIST)
        .map_err(UsbmuxError::ResponseParseFailure)?;

    let mut devices = Vec::with_capacity(entries.len());
    for entry in entries {
        // Entries without a usable ConnectionType are not USB devices
        match connection_type(entry) {
            Ok(USB_CONNECTION_TYPE) => {}
            Ok(kind) => {
                tracing::debug!(connection_type = kind, "Skipping non-USB device");
                continue;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Skipping device without connection type");
                continue;
            }
        }
        devices.push(Device::from_record(entry).map_err(UsbmuxError::ResponseParseFailure)?);
    }
    Ok(devices)
}
