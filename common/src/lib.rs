pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod node;
pub mod ota;
pub mod ports;
pub mod publisher;
pub mod reader;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod topics;
pub mod types;

#[cfg(test)]
mod mock;

pub use buffer::PacketBuffer;
pub use config::{
    ConnectionConfig, NetworkCredentials, NodeConfig, ScheduleConfig, SensorLimits, TopicConfig,
};
pub use connection::{ConnectionManager, MqttOutcome};
pub use dispatcher::Command;
pub use error::{
    Channel, CommandError, FatalError, MqttError, OtaError, SensorError, WifiError,
};
pub use node::Node;
pub use ota::LoggingOtaHandler;
pub use ports::{Board, MqttPort, OtaHandler, OtaPort, SensorPort, WifiPort};
pub use state::DeviceState;
pub use status::{MqttState, WifiStatus};
pub use topics::*;
pub use types::{InboundMessage, Reading, Sample, StatsPayload, TelemetryPayload};
