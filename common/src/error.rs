use thiserror::Error;

use crate::status::{MqttState, WifiStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Temperature,
    Humidity,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        }
    }
}

/// Conditions the node cannot recover from without a device restart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("{consecutive} consecutive invalid {} readings", .channel.as_str())]
    SensorInvalid { channel: Channel, consecutive: u32 },
    #[error("unable to allocate a {requested} byte MQTT buffer")]
    BufferAllocation { requested: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WifiError {
    #[error("wifi association failed: {}", .0.description())]
    Association(WifiStatus),
    #[error("wifi driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    #[error("mqtt session failed: {} ({})", .0.description(), .0.code())]
    Session(MqttState),
    #[error("payload of {len} bytes exceeds the {capacity} byte buffer")]
    PayloadTooLarge { len: usize, capacity: usize },
    #[error("buffer allocation of {0} bytes failed")]
    Allocation(usize),
    #[error("mqtt client error: {0}")]
    Client(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("sensor bus error: {0}")]
    Bus(String),
    #[error("sensor checksum mismatch")]
    Checksum,
    #[error("sensor not responding")]
    NotResponding,
}

/// OTA failure categories reported through `OtaHandler::on_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtaError {
    #[error("ota auth failed")]
    Auth,
    #[error("ota begin failed: {0}")]
    Begin(String),
    #[error("ota connect failed: {0}")]
    Connect(String),
    #[error("ota receive failed: {0}")]
    Receive(String),
    #[error("ota end failed: {0}")]
    End(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("command payload has no `command` field")]
    MissingCommand,
    #[error("`{command}` requires a numeric `value` field")]
    MissingValue { command: &'static str },
    #[error("command payload of {0} bytes is too large")]
    Oversized(usize),
}
