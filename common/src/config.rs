use serde::{Deserialize, Serialize};

use crate::topics::{
    TOPIC_COMMAND, TOPIC_HUMIDITY, TOPIC_IP, TOPIC_MAC, TOPIC_NOTES, TOPIC_PUBLISH_COUNT,
    TOPIC_RSSI, TOPIC_SKETCH, TOPIC_STATS, TOPIC_TELEMETRY, TOPIC_TEMP_C, TOPIC_TEMP_F,
};

/// Publish intervals at or below this are rejected, both from config and from
/// the `changeTelemetryInterval` command.
pub const MIN_PUBLISH_INTERVAL_MS: u64 = 4_000;

const MIN_TELEMETRY_INTERVAL_MS: u64 = 100;
const MIN_BUFFER_SIZE: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub password: String,
    pub broker_host: String,
    pub broker_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicConfig {
    pub command: String,
    pub telemetry: String,
    pub stats: String,
    pub sketch: String,
    pub mac: String,
    pub ip: String,
    pub rssi: String,
    pub publish_count: String,
    pub notes: String,
    pub temp_c: String,
    pub temp_f: String,
    pub humidity: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            command: TOPIC_COMMAND.to_string(),
            telemetry: TOPIC_TELEMETRY.to_string(),
            stats: TOPIC_STATS.to_string(),
            sketch: TOPIC_SKETCH.to_string(),
            mac: TOPIC_MAC.to_string(),
            ip: TOPIC_IP.to_string(),
            rssi: TOPIC_RSSI.to_string(),
            publish_count: TOPIC_PUBLISH_COUNT.to_string(),
            notes: TOPIC_NOTES.to_string(),
            temp_c: TOPIC_TEMP_C.to_string(),
            temp_f: TOPIC_TEMP_F.to_string(),
            humidity: TOPIC_HUMIDITY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub publish_interval_ms: u64,
    pub telemetry_interval_ms: u64,
    pub indicator_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            publish_interval_ms: 60_000,
            telemetry_interval_ms: 10_000,
            indicator_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub wifi_connect_timeout_ms: u64,
    pub wifi_poll_interval_ms: u64,
    pub mqtt_reconnect_cooldown_ms: u64,
    pub mqtt_reconnect_delay_ms: u64,
    pub mqtt_setup_attempts: u32,
    pub buffer_size: usize,
    #[serde(default)]
    pub mqtt_user: String,
    #[serde(default)]
    pub mqtt_pass: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            wifi_connect_timeout_ms: 10_000,
            wifi_poll_interval_ms: 1_000,
            mqtt_reconnect_cooldown_ms: 20_000,
            mqtt_reconnect_delay_ms: 5_000,
            mqtt_setup_attempts: 3,
            buffer_size: 512,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorLimits {
    /// Exclusive lower bound in Celsius.
    pub min_temp_c: f32,
    /// Exclusive upper bound in Celsius.
    pub max_temp_c: f32,
    pub min_humidity: f32,
    pub max_humidity: f32,
    pub max_consecutive_bad: u32,
}

impl Default for SensorLimits {
    fn default() -> Self {
        Self {
            min_temp_c: -30.0,
            max_temp_c: 90.0,
            min_humidity: 0.0,
            max_humidity: 100.0,
            max_consecutive_bad: 5,
        }
    }
}

impl SensorLimits {
    pub fn temp_valid(&self, temp_c: f32) -> bool {
        temp_c > self.min_temp_c && temp_c < self.max_temp_c
    }

    pub fn humidity_valid(&self, humidity: f32) -> bool {
        (self.min_humidity..=self.max_humidity).contains(&humidity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub sketch_name: String,
    pub notes: String,
    pub hostname: String,
    pub networks: Vec<NetworkCredentials>,
    #[serde(default)]
    pub topics: TopicConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub sensor: SensorLimits,
    #[serde(default)]
    pub ota_password: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sketch_name: "weather-sensor".to_string(),
            notes: "ESP32 with HTU21D and OTA".to_string(),
            hostname: "weather-htu21d".to_string(),
            networks: Vec::new(),
            topics: TopicConfig::default(),
            schedule: ScheduleConfig::default(),
            connection: ConnectionConfig::default(),
            sensor: SensorLimits::default(),
            ota_password: String::new(),
        }
    }
}

impl NodeConfig {
    pub fn sanitize(&mut self) {
        if self.schedule.publish_interval_ms <= MIN_PUBLISH_INTERVAL_MS {
            self.schedule.publish_interval_ms = ScheduleConfig::default().publish_interval_ms;
        }
        self.schedule.telemetry_interval_ms = self
            .schedule
            .telemetry_interval_ms
            .max(MIN_TELEMETRY_INTERVAL_MS);
        if self.schedule.indicator_interval_ms == 0 {
            self.schedule.indicator_interval_ms = ScheduleConfig::default().indicator_interval_ms;
        }

        self.connection.wifi_poll_interval_ms = self.connection.wifi_poll_interval_ms.max(1);
        self.connection.mqtt_setup_attempts = self.connection.mqtt_setup_attempts.max(1);
        self.connection.buffer_size = self.connection.buffer_size.max(MIN_BUFFER_SIZE);

        self.networks.retain(|network| {
            !network.ssid.trim().is_empty() && !network.broker_host.trim().is_empty()
        });
        for network in &mut self.networks {
            if network.broker_port == 0 {
                network.broker_port = 1883;
            }
        }
    }
}
