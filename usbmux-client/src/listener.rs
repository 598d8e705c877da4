//! Device set tracker for a Listen connection
//!
//! Turns the daemon's notification frames into attach/detach events and keeps
//! the set of currently attached devices.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use usbmux_protocol::{Device, Frame, FrameCodec, Notification, ValueCodec, XmlPlistCodec};
use usbmux_utils::{Result, UsbmuxError};

use crate::client::StreamTrait;

/// Change to the attached device set
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Attached(Device),
    /// Carries the device as it was recorded at attach time
    Detached(Device),
}

impl DeviceEvent {
    pub fn device(&self) -> &Device {
        match self {
            DeviceEvent::Attached(device) | DeviceEvent::Detached(device) => device,
        }
    }
}

/// Tracks attached devices from a single Listen connection
///
/// The set is only mutated while processing notifications, one whole frame
/// at a time.
pub struct DeviceListener<S> {
    framed: Framed<S, FrameCodec>,
    codec: XmlPlistCodec,
    devices: HashMap<u32, Device>,
    events: mpsc::UnboundedSender<DeviceEvent>,
}

impl<S: StreamTrait> DeviceListener<S> {
    /// Wrap an accepted Listen connection
    pub fn new(framed: Framed<S, FrameCodec>) -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let listener = Self {
            framed,
            codec: XmlPlistCodec,
            devices: HashMap::new(),
            events,
        };
        (listener, rx)
    }

    /// Wrap a raw stream already past the Listen handshake
    pub fn from_stream(stream: S) -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        Self::new(Framed::new(stream, FrameCodec::new()))
    }

    /// Process every frame that is available without waiting
    ///
    /// Returns the number of events emitted. A malformed frame aborts the
    /// call; frames before it stay applied. Must run inside a tokio runtime.
    pub fn poll(&mut self) -> Result<usize> {
        let mut emitted = 0;
        loop {
            match self.framed.next().now_or_never() {
                None => return Ok(emitted),
                Some(None) => return Err(UsbmuxError::ConnectionClosed),
                Some(Some(frame)) => {
                    if self.handle_frame(frame?)? {
                        emitted += 1;
                    }
                }
            }
        }
    }

    /// Snapshot of the attached devices, ordered by id
    pub fn attached_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by_key(Device::id);
        devices
    }

    pub fn is_attached(&self, device_id: u32) -> bool {
        self.devices.contains_key(&device_id)
    }

    /// Move the listener onto a tokio task that waits for frames
    pub fn spawn(self) -> ListenerHandle<S>
    where
        S: 'static,
    {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        ListenerHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) -> (Self, Result<()>) {
        tracing::debug!("Device listener started");
        let outcome = loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::debug!("Device listener stopped");
                    break Ok(());
                }
                next = self.framed.next() => {
                    let result = match next {
                        None => Err(UsbmuxError::ConnectionClosed),
                        Some(frame) => frame
                            .map_err(UsbmuxError::from)
                            .and_then(|frame| self.handle_frame(frame).map(|_| ())),
                    };
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Device listener ended");
                        break Err(e);
                    }
                }
            }
        };
        (self, outcome)
    }

    /// Apply one notification frame, returning whether an event was emitted
    fn handle_frame(&mut self, frame: Frame) -> Result<bool> {
        let message = self
            .codec
            .decode(&frame.payload)
            .map_err(UsbmuxError::ResponseParseFailure)?;
        let notification =
            Notification::from_value(&message).map_err(UsbmuxError::ResponseParseFailure)?;
        self.apply(notification)
    }

    fn apply(&mut self, notification: Notification) -> Result<bool> {
        let event = match notification {
            Notification::Attached(device) => {
                if self.devices.contains_key(&device.id()) {
                    return Err(UsbmuxError::DuplicateDeviceAttach {
                        device_id: device.id(),
                    });
                }
                tracing::info!(device = %device, "Device attached");
                self.devices.insert(device.id(), device.clone());
                DeviceEvent::Attached(device)
            }
            Notification::Detached { device_id } => {
                let device = self
                    .devices
                    .remove(&device_id)
                    .ok_or(UsbmuxError::UnknownDeviceDetach { device_id })?;
                tracing::info!(device = %device, "Device detached");
                DeviceEvent::Detached(device)
            }
            Notification::Other(message_type) => {
                tracing::warn!(message_type = %message_type, "Ignoring notification");
                return Ok(false);
            }
        };

        // A dropped receiver only means nobody is watching
        let _ = self.events.send(event);
        Ok(true)
    }
}

/// Handle to a listener running on a background task
///
/// Awaiting the handle waits for the task to end and yields the listener
/// along with the reason it stopped.
pub struct ListenerHandle<S> {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<(DeviceListener<S>, Result<()>)>,
}

impl<S> ListenerHandle<S> {
    /// Ask the task to stop without waiting for it
    pub fn request_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Stop listening and take the listener back
    ///
    /// The inner result reports why the task ended if it had already failed.
    pub async fn stop(mut self) -> Result<(DeviceListener<S>, Result<()>)> {
        self.request_stop();
        self.await
    }

    /// Wait for the listener to end on its own
    pub async fn join(self) -> Result<(DeviceListener<S>, Result<()>)> {
        self.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<S> Future for ListenerHandle<S> {
    type Output = Result<(DeviceListener<S>, Result<()>)>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task)
            .poll(cx)
            .map_err(|e| UsbmuxError::internal(format!("Listener task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use usbmux_protocol::Value;

    fn attached(id: i64) -> Value {
        Value::Dictionary(vec![
            ("MessageType".into(), "Attached".into()),
            ("DeviceID".into(), Value::Integer(id)),
            (
                "Properties".into(),
                Value::Dictionary(vec![
                    ("ConnectionType".into(), "USB".into()),
                    ("ProductID".into(), Value::Integer(4776)),
                    ("SerialNumber".into(), "0A0B".into()),
                    ("LocationID".into(), Value::Integer(0x1410_0000)),
                ]),
            ),
        ])
    }

    fn detached(id: i64) -> Value {
        Value::Dictionary(vec![
            ("MessageType".into(), "Detached".into()),
            ("DeviceID".into(), Value::Integer(id)),
        ])
    }

    fn paired(id: i64) -> Value {
        Value::Dictionary(vec![
            ("MessageType".into(), "Paired".into()),
            ("DeviceID".into(), Value::Integer(id)),
        ])
    }

    fn wire(messages: &[Value]) -> Vec<u8> {
        let mut out = Vec::new();
        for message in messages {
            let payload = XmlPlistCodec.encode(message).unwrap();
            out.extend_from_slice(&Frame::plist(0, payload).to_bytes().unwrap());
        }
        out
    }

    fn listener() -> (
        DeviceListener<DuplexStream>,
        mpsc::UnboundedReceiver<DeviceEvent>,
        DuplexStream,
    ) {
        let (client, daemon) = tokio::io::duplex(64 * 1024);
        let (listener, rx) = DeviceListener::from_stream(client);
        (listener, rx, daemon)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // ==================== poll() Tests ====================

    #[tokio::test]
    async fn test_attach_then_detach_in_one_poll() {
        let (mut listener, mut rx, mut daemon) = listener();
        daemon
            .write_all(&wire(&[attached(7), detached(7)]))
            .await
            .unwrap();

        assert_eq!(listener.poll().unwrap(), 2);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], DeviceEvent::Attached(d) if d.id() == 7));
        match &events[1] {
            DeviceEvent::Detached(device) => {
                assert_eq!(device.id(), 7);
                assert_eq!(device.serial_number(), &[0x0A, 0x0B]);
            }
            other => panic!("Expected Detached, got {:?}", other),
        }
        assert!(listener.attached_devices().is_empty());
    }

    #[tokio::test]
    async fn test_poll_without_data_returns_immediately() {
        let (mut listener, mut rx, _daemon) = listener();
        assert_eq!(listener.poll().unwrap(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_net_membership() {
        let (mut listener, mut rx, mut daemon) = listener();
        daemon
            .write_all(&wire(&[
                attached(1),
                attached(2),
                attached(3),
                detached(2),
                attached(4),
                detached(1),
            ]))
            .await
            .unwrap();

        assert_eq!(listener.poll().unwrap(), 6);
        assert_eq!(drain(&mut rx).len(), 6);

        let ids: Vec<u32> = listener.attached_devices().iter().map(Device::id).collect();
        assert_eq!(ids, [3, 4]);
        assert!(listener.is_attached(3));
        assert!(!listener.is_attached(1));
    }

    #[tokio::test]
    async fn test_duplicate_attach() {
        let (mut listener, mut rx, mut daemon) = listener();
        daemon
            .write_all(&wire(&[attached(7), attached(7)]))
            .await
            .unwrap();

        let result = listener.poll();
        assert!(matches!(
            result,
            Err(UsbmuxError::DuplicateDeviceAttach { device_id: 7 })
        ));

        // The first attach still happened
        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(listener.attached_devices().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_detach() {
        let (mut listener, mut rx, mut daemon) = listener();
        daemon.write_all(&wire(&[detached(9)])).await.unwrap();

        let result = listener.poll();
        assert!(matches!(
            result,
            Err(UsbmuxError::UnknownDeviceDetach { device_id: 9 })
        ));
        assert!(drain(&mut rx).is_empty());
        assert!(listener.attached_devices().is_empty());
    }

    #[tokio::test]
    async fn test_other_notifications_ignored() {
        let (mut listener, mut rx, mut daemon) = listener();
        daemon
            .write_all(&wire(&[attached(3), paired(3)]))
            .await
            .unwrap();

        assert_eq!(listener.poll().unwrap(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(listener.is_attached(3));
    }

    #[tokio::test]
    async fn test_partial_frame_waits_for_rest() {
        let (mut listener, mut rx, mut daemon) = listener();
        let bytes = wire(&[attached(5)]);
        let (head, tail) = bytes.split_at(bytes.len() / 2);

        daemon.write_all(head).await.unwrap();
        assert_eq!(listener.poll().unwrap(), 0);
        assert!(listener.attached_devices().is_empty());

        daemon.write_all(tail).await.unwrap();
        assert_eq!(listener.poll().unwrap(), 1);
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(listener.is_attached(5));
    }

    #[tokio::test]
    async fn test_malformed_payload_leaves_set_untouched() {
        let (mut listener, mut rx, mut daemon) = listener();
        daemon.write_all(&wire(&[attached(1)])).await.unwrap();
        listener.poll().unwrap();

        // Attached without Properties
        let broken = Value::Dictionary(vec![
            ("MessageType".into(), "Attached".into()),
            ("DeviceID".into(), Value::Integer(2)),
        ]);
        daemon.write_all(&wire(&[broken])).await.unwrap();

        let result = listener.poll();
        assert!(matches!(result, Err(UsbmuxError::ResponseParseFailure(_))));
        assert_eq!(drain(&mut rx).len(), 1);

        let ids: Vec<u32> = listener.attached_devices().iter().map(Device::id).collect();
        assert_eq!(ids, [1]);
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (mut listener, _rx, daemon) = listener();
        drop(daemon);

        let result = listener.poll();
        assert!(matches!(result, Err(UsbmuxError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_snapshot_is_independent() {
        let (mut listener, _rx, mut daemon) = listener();
        daemon.write_all(&wire(&[attached(1)])).await.unwrap();
        listener.poll().unwrap();

        let mut snapshot = listener.attached_devices();
        snapshot.clear();
        assert_eq!(listener.attached_devices().len(), 1);
    }

    #[tokio::test]
    async fn test_events_survive_dropped_receiver() {
        let (mut listener, rx, mut daemon) = listener();
        drop(rx);
        daemon.write_all(&wire(&[attached(1)])).await.unwrap();

        assert_eq!(listener.poll().unwrap(), 1);
        assert!(listener.is_attached(1));
    }

    #[tokio::test]
    async fn test_device_listener_over_unix_socket_keeps_read_ahead() {
        use crate::client::MuxClient;
        use tokio::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("usbmuxd");
        let daemon_socket = UnixListener::bind(&socket_path).unwrap();

        let daemon = tokio::spawn(async move {
            let (stream, _) = daemon_socket.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::new());
            framed.next().await.unwrap().unwrap();

            let result = Value::Dictionary(vec![
                ("MessageType".into(), "Result".into()),
                ("Number".into(), Value::Integer(0)),
            ]);
            let mut bytes = wire(&[result]);
            bytes.extend_from_slice(&wire(&[attached(7), detached(7)]));

            // Result and notifications leave in one write
            let mut stream = framed.into_inner();
            stream.write_all(&bytes).await.unwrap();
            stream.flush().await.unwrap();
            stream
        });

        let client = MuxClient::with_socket_path(&socket_path);
        let (mut listener, mut rx) = client.device_listener().await.unwrap();
        let _daemon_side = daemon.await.unwrap();

        assert_eq!(listener.poll().unwrap(), 2);
        let events = drain(&mut rx);
        assert!(matches!(&events[0], DeviceEvent::Attached(d) if d.id() == 7));
        assert!(matches!(&events[1], DeviceEvent::Detached(d) if d.id() == 7));
        assert!(listener.attached_devices().is_empty());

        // Nothing further queued; the connection stays open
        assert_eq!(listener.poll().unwrap(), 0);
    }

    // ==================== spawn() Tests ====================

    #[tokio::test]
    async fn test_spawned_listener_delivers_events() {
        let (listener, mut rx, mut daemon) = listener();
        let handle = listener.spawn();

        daemon.write_all(&wire(&[attached(4)])).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DeviceEvent::Attached(ref d) if d.id() == 4));

        daemon.write_all(&wire(&[attached(8)])).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.device().id(), 8);

        let (listener, outcome) = handle.stop().await.unwrap();
        assert!(outcome.is_ok());
        let ids: Vec<u32> = listener.attached_devices().iter().map(Device::id).collect();
        assert_eq!(ids, [4, 8]);
    }

    #[tokio::test]
    async fn test_spawned_listener_ends_on_eof() {
        let (listener, mut rx, mut daemon) = listener();
        let handle = listener.spawn();

        daemon.write_all(&wire(&[attached(2)])).await.unwrap();
        drop(daemon);

        let (listener, outcome) = handle.join().await.unwrap();
        assert!(matches!(outcome, Err(UsbmuxError::ConnectionClosed)));
        assert!(listener.is_attached(2));
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_listener_ends_on_duplicate() {
        let (listener, _rx, mut daemon) = listener();
        let handle = listener.spawn();

        daemon
            .write_all(&wire(&[attached(2), attached(2)]))
            .await
            .unwrap();

        let (_, outcome) = handle.join().await.unwrap();
        assert!(matches!(
            outcome,
            Err(UsbmuxError::DuplicateDeviceAttach { device_id: 2 })
        ));
    }

    #[tokio::test]
    async fn test_request_stop_then_await_handle() {
        let (listener, _rx, _daemon) = listener();
        let mut handle = listener.spawn();
        assert!(!handle.is_finished());

        handle.request_stop();
        handle.request_stop();
        let (listener, outcome) = (&mut handle).await.unwrap();
        assert!(outcome.is_ok());
        assert!(listener.attached_devices().is_empty());
    }
}
