//! Collaborator traits the node drives.
//!
//! Platform crates implement these for real hardware (esp-idf) or for a
//! workstation simulation; the node only ever sees the traits.

use std::net::Ipv4Addr;

use crate::{
    error::{MqttError, OtaError, SensorError, WifiError},
    status::{MqttState, WifiStatus},
    types::{InboundMessage, Sample},
};

pub trait WifiPort {
    fn is_associated(&self) -> bool;

    /// Scan-based presence check.
    fn is_visible(&mut self, ssid: &str) -> bool;

    /// Start associating. Returns once the attempt is initiated; progress is
    /// observed through `status`.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), WifiError>;

    fn status(&self) -> WifiStatus;

    fn mac_address(&self) -> String;

    fn ip_address(&self) -> Option<Ipv4Addr>;

    fn rssi(&self) -> i32;
}

pub trait MqttPort {
    fn set_server(&mut self, host: &str, port: u16);

    /// Open a session, blocking at most for the client's own connect timeout.
    fn connect(&mut self, client_id: &str) -> Result<(), MqttError>;

    fn is_connected(&self) -> bool;

    fn state(&self) -> MqttState;

    fn set_buffer_size(&mut self, size: usize) -> Result<(), MqttError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), MqttError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError>;

    /// Drain messages received since the last call.
    fn poll(&mut self) -> Vec<InboundMessage>;
}

pub trait SensorPort {
    fn read(&mut self) -> Result<Sample, SensorError>;
}

/// Lifecycle callbacks registered with the OTA collaborator.
pub trait OtaHandler: Send {
    fn on_start(&mut self);
    fn on_progress(&mut self, written: u64, total: Option<u64>);
    fn on_end(&mut self);
    fn on_error(&mut self, error: &OtaError);
}

pub trait OtaPort {
    fn begin(&mut self, hostname: &str, handler: Box<dyn OtaHandler>) -> Result<(), OtaError>;

    /// Called once per loop iteration.
    fn handle(&mut self);
}

/// Clock, delays, status LED and entropy of the board.
pub trait Board {
    fn now_ms(&self) -> u64;

    /// Blocks the node thread.
    fn delay_ms(&mut self, ms: u64);

    fn set_indicator(&mut self, lit: bool);

    fn random_u32(&mut self) -> u32;
}
