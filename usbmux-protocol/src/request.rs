//! Request bodies sent to the daemon

use crate::value::Value;

/// Dictionary keys used by the usbmuxd plist protocol
pub mod keys {
    pub const MESSAGE_TYPE: &str = "MessageType";
    pub const DEVICE_ID: &str = "DeviceID";
    pub const PORT_NUMBER: &str = "PortNumber";
    pub const DEVICE_LIST: &str = "DeviceList";
    pub const PROPERTIES: &str = "Properties";
    pub const CONNECTION_TYPE: &str = "ConnectionType";
    pub const PRODUCT_ID: &str = "ProductID";
    pub const SERIAL_NUMBER: &str = "SerialNumber";
    pub const LOCATION_ID: &str = "LocationID";
    pub const NUMBER: &str = "Number";
}

/// Build a request dictionary
///
/// `MessageType` always comes first, followed by `extra_fields` in the order
/// given. Keys are not deduplicated.
pub fn build_request<K, I>(message_type: &str, extra_fields: I) -> Value
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    let mut entries = vec![(keys::MESSAGE_TYPE.to_string(), Value::from(message_type))];
    entries.extend(extra_fields.into_iter().map(|(k, v)| (k.into(), v)));
    Value::Dictionary(entries)
}

pub fn list_devices_request() -> Value {
    build_request::<&str, _>("ListDevices", [])
}

pub fn listen_request() -> Value {
    build_request::<&str, _>("Listen", [])
}

/// `Connect` request; `port` is given in host order
pub fn connect_request(device_id: u32, port: u16) -> Value {
    build_request(
        "Connect",
        [
            (keys::DEVICE_ID, Value::from(device_id)),
            (keys::PORT_NUMBER, Value::from(network_order(port))),
        ],
    )
}

/// Host to network (big-endian) byte order, as the daemon expects for ports
pub fn network_order(port: u16) -> u16 {
    port.to_be()
}
