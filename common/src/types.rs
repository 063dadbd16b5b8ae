use serde::Serialize;

/// One raw sensor transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temp_c: f32,
    pub humidity: f32,
}

/// Last-known-good telemetry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    pub temp_c: f32,
    pub temp_f: f32,
    pub humidity: f32,
    pub rssi: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorMode {
    SteadyOn,
    Toggle,
    SteadyOff,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryPayload {
    pub sketch: String,
    pub mac: String,
    pub ip: String,
    pub rssi: i32,
    pub notes: String,
    #[serde(rename = "tempC")]
    pub temp_c: f32,
    #[serde(rename = "tempF")]
    pub temp_f: f32,
    pub humidity: f32,
    #[serde(rename = "publishCount")]
    pub publish_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsPayload {
    pub sketch: String,
    pub mac: String,
    pub ip: String,
    pub rssi: i32,
    pub notes: String,
    #[serde(rename = "publishCount")]
    pub publish_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryField {
    Sketch,
    Mac,
    Ip,
    Rssi,
    PublishCount,
    Notes,
    TempC,
    TempF,
    Humidity,
}

impl TelemetryField {
    pub const ALL: [TelemetryField; 9] = [
        Self::Sketch,
        Self::Mac,
        Self::Ip,
        Self::Rssi,
        Self::PublishCount,
        Self::Notes,
        Self::TempC,
        Self::TempF,
        Self::Humidity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sketch => "sketch",
            Self::Mac => "mac",
            Self::Ip => "ip",
            Self::Rssi => "rssi",
            Self::PublishCount => "publishCount",
            Self::Notes => "notes",
            Self::TempC => "tempC",
            Self::TempF => "tempF",
            Self::Humidity => "humidity",
        }
    }
}

impl TelemetryPayload {
    /// Plain-text rendering of every field, in publish order.
    pub fn fields(&self) -> Vec<(TelemetryField, String)> {
        TelemetryField::ALL
            .into_iter()
            .map(|field| {
                let value = match field {
                    TelemetryField::Sketch => self.sketch.clone(),
                    TelemetryField::Mac => self.mac.clone(),
                    TelemetryField::Ip => self.ip.clone(),
                    TelemetryField::Rssi => self.rssi.to_string(),
                    TelemetryField::PublishCount => self.publish_count.to_string(),
                    TelemetryField::Notes => self.notes.clone(),
                    TelemetryField::TempC => format!("{:.2}", self.temp_c),
                    TelemetryField::TempF => format!("{:.2}", self.temp_f),
                    TelemetryField::Humidity => format!("{:.2}", self.humidity),
                };
                (field, value)
            })
            .collect()
    }
}

pub fn celsius_to_fahrenheit(temp_c: f32) -> f32 {
    temp_c * 1.8 + 32.0
}
