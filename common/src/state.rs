use crate::{config::NodeConfig, types::Reading};

pub const IP_PLACEHOLDER: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Index into `NodeConfig::networks` of the credential set that associated.
    pub network_index: Option<usize>,
    pub mac_address: String,
    pub ip_address: String,

    pub last_poll_ms: Option<u64>,
    pub last_publish_ms: Option<u64>,
    pub last_indicator_ms: Option<u64>,

    pub publish_interval_ms: u64,
    pub telemetry_interval_ms: u64,
    pub indicator_interval_ms: u64,

    pub publish_count: u64,
    pub consecutive_bad_temp: u32,
    pub consecutive_bad_humidity: u32,
    pub last_reading: Reading,

    pub indicator_lit: bool,
}

impl DeviceState {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            network_index: None,
            mac_address: String::new(),
            ip_address: IP_PLACEHOLDER.to_string(),
            last_poll_ms: None,
            last_publish_ms: None,
            last_indicator_ms: None,
            publish_interval_ms: config.schedule.publish_interval_ms,
            telemetry_interval_ms: config.schedule.telemetry_interval_ms,
            indicator_interval_ms: config.schedule.indicator_interval_ms,
            publish_count: 0,
            consecutive_bad_temp: 0,
            consecutive_bad_humidity: 0,
            last_reading: Reading::default(),
            indicator_lit: false,
        }
    }

    /// Human-readable name of the active network, for logs.
    pub fn network_label<'a>(&self, config: &'a NodeConfig) -> &'a str {
        match self.network_index {
            Some(index) => config
                .networks
                .get(index)
                .map(|network| network.ssid.as_str())
                .unwrap_or("<unknown>"),
            None => "<not connected>",
        }
    }
}
