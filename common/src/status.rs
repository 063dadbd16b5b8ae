//! Numeric connection status codes and their human-readable descriptions.
//!
//! Values follow the Arduino `WiFi.status()` and PubSubClient `state()`
//! conventions.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    Idle,
    NoSsidAvailable,
    ScanCompleted,
    Connected,
    ConnectFailed,
    ConnectionLost,
    WrongPassword,
    Disconnected,
}

impl WifiStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Idle => 0,
            Self::NoSsidAvailable => 1,
            Self::ScanCompleted => 2,
            Self::Connected => 3,
            Self::ConnectFailed => 4,
            Self::ConnectionLost => 5,
            Self::WrongPassword => 6,
            Self::Disconnected => 7,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Idle => "Wi-Fi is in process of changing between statuses",
            Self::NoSsidAvailable => "SSID cannot be reached",
            Self::ScanCompleted => "Scan completed",
            Self::Connected => "Successful connection is established",
            Self::ConnectFailed => "Password is incorrect",
            Self::ConnectionLost => "Connection lost",
            Self::WrongPassword => "Wrong password",
            Self::Disconnected => "Module is not configured in station mode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttState {
    ConnectionTimeout,
    ConnectionLost,
    ConnectFailed,
    Disconnected,
    Connected,
    BadProtocol,
    BadClientId,
    Unavailable,
    BadCredentials,
    Unauthorized,
}

impl MqttState {
    pub fn code(self) -> i32 {
        match self {
            Self::ConnectionTimeout => -4,
            Self::ConnectionLost => -3,
            Self::ConnectFailed => -2,
            Self::Disconnected => -1,
            Self::Connected => 0,
            Self::BadProtocol => 1,
            Self::BadClientId => 2,
            Self::Unavailable => 3,
            Self::BadCredentials => 4,
            Self::Unauthorized => 5,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ConnectionTimeout => "The server didn't respond within the keepalive time",
            Self::ConnectionLost => "The network connection was broken",
            Self::ConnectFailed => "The network connection failed",
            Self::Disconnected => "The client is disconnected cleanly",
            Self::Connected => "The client is connected",
            Self::BadProtocol => "The server doesn't support the requested version of MQTT",
            Self::BadClientId => "The server rejected the client identifier",
            Self::Unavailable => "The server was unable to accept the connection",
            Self::BadCredentials => "The username/password were rejected",
            Self::Unauthorized => "The client was not authorized to connect",
        }
    }
}
