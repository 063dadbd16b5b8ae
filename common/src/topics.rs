pub const TOPIC_COMMAND: &str = "weather/node/command";

pub const TOPIC_TELEMETRY: &str = "espWeather";
pub const TOPIC_STATS: &str = "espStats";

pub const TOPIC_SKETCH: &str = "weather/node/sketch";
pub const TOPIC_MAC: &str = "weather/node/mac";
pub const TOPIC_IP: &str = "weather/node/ip";
pub const TOPIC_RSSI: &str = "weather/node/rssi";
pub const TOPIC_PUBLISH_COUNT: &str = "weather/node/publishCount";
pub const TOPIC_NOTES: &str = "weather/node/notes";
pub const TOPIC_TEMP_C: &str = "weather/node/htu21d/tempC";
pub const TOPIC_TEMP_F: &str = "weather/node/htu21d/tempF";
pub const TOPIC_HUMIDITY: &str = "weather/node/htu21d/humidity";
