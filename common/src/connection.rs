use log::{debug, error, info, warn};

use crate::{
    config::NodeConfig,
    error::FatalError,
    ports::{Board, MqttPort, WifiPort},
    scheduler::is_due,
    state::{DeviceState, IP_PLACEHOLDER},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttOutcome {
    AlreadyConnected,
    CoolingDown,
    NoNetwork,
    Connected,
    Failed,
}

/// Owns WiFi/MQTT reconnection policy: ordered credential fallback, bounded
/// association waits and the broker reconnect cooldown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager {
    last_mqtt_attempt_ms: Option<u64>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_mqtt_attempt_ms(&self) -> Option<u64> {
        self.last_mqtt_attempt_ms
    }

    /// Returns whether WiFi is associated afterwards.
    pub fn ensure_wifi<W: WifiPort, B: Board>(
        &self,
        state: &mut DeviceState,
        config: &NodeConfig,
        wifi: &mut W,
        board: &mut B,
    ) -> bool {
        if wifi.is_associated() {
            return true;
        }

        for (index, network) in config.networks.iter().enumerate() {
            if !wifi.is_visible(&network.ssid) {
                info!("network `{}` is not in range, skipping", network.ssid);
                continue;
            }

            info!("connecting to wifi `{}`", network.ssid);
            if let Err(err) = wifi.begin(&network.ssid, &network.password) {
                warn!("unable to start association with `{}`: {err}", network.ssid);
                continue;
            }

            if wait_for_association(config, wifi, board) {
                state.network_index = Some(index);
                state.mac_address = wifi.mac_address();
                state.ip_address = wifi
                    .ip_address()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| IP_PLACEHOLDER.to_string());
                info!(
                    "wifi connected to `{}` (index {index}), ip {}, mac {}",
                    network.ssid, state.ip_address, state.mac_address
                );
                return true;
            }

            let status = wifi.status();
            warn!(
                "wifi `{}` did not connect within {} ms: {} (status {})",
                network.ssid,
                config.connection.wifi_connect_timeout_ms,
                status.description(),
                status.code()
            );
        }

        warn!("no configured wifi network accepted a connection; will retry");
        false
    }

    /// Establish an MQTT session, at most once per cooldown window.
    ///
    /// Only a failed buffer allocation is fatal; every other failure is left
    /// for a later call to retry.
    pub fn ensure_mqtt<W: WifiPort, M: MqttPort, B: Board>(
        &mut self,
        state: &mut DeviceState,
        config: &NodeConfig,
        wifi: &mut W,
        mqtt: &mut M,
        board: &mut B,
        max_attempts: u32,
    ) -> Result<MqttOutcome, FatalError> {
        if mqtt.is_connected() {
            return Ok(MqttOutcome::AlreadyConnected);
        }

        let cooldown_ms = config.connection.mqtt_reconnect_cooldown_ms;
        if !is_due(board.now_ms(), cooldown_ms, self.last_mqtt_attempt_ms) {
            debug!("mqtt reconnect cooling down");
            return Ok(MqttOutcome::CoolingDown);
        }

        if !wifi.is_associated() {
            self.ensure_wifi(state, config, wifi, board);
        }

        let network = match state.network_index {
            Some(index) if wifi.is_associated() => config.networks.get(index),
            _ => None,
        };
        let Some(network) = network else {
            self.last_mqtt_attempt_ms = Some(board.now_ms());
            warn!("skipping mqtt connection: wifi is not connected");
            return Ok(MqttOutcome::NoNetwork);
        };

        mqtt.set_server(&network.broker_host, network.broker_port);

        for attempt in 1..=max_attempts {
            let client_id = client_id(&state.mac_address, board.random_u32());
            info!(
                "connecting to mqtt broker {}:{} as `{client_id}` (attempt {attempt}/{max_attempts})",
                network.broker_host, network.broker_port
            );

            let result = mqtt.connect(&client_id);
            self.last_mqtt_attempt_ms = Some(board.now_ms());

            match result {
                Ok(()) => {
                    let requested = config.connection.buffer_size;
                    if let Err(err) = mqtt.set_buffer_size(requested) {
                        error!("mqtt buffer resize failed: {err}");
                        return Err(FatalError::BufferAllocation { requested });
                    }

                    match mqtt.subscribe(&config.topics.command) {
                        Ok(()) => info!("subscribed to `{}`", config.topics.command),
                        Err(err) => warn!(
                            "failed to subscribe to `{}`: {err}",
                            config.topics.command
                        ),
                    }

                    info!("mqtt connected to {}", network.broker_host);
                    return Ok(MqttOutcome::Connected);
                }
                Err(err) => {
                    let session = mqtt.state();
                    warn!(
                        "mqtt connection failed: {err}; state {}: {}",
                        session.code(),
                        session.description()
                    );
                    if max_attempts > 1 && attempt < max_attempts {
                        board.delay_ms(config.connection.mqtt_reconnect_delay_ms);
                    }
                }
            }
        }

        Ok(MqttOutcome::Failed)
    }
}

fn wait_for_association<W: WifiPort, B: Board>(
    config: &NodeConfig,
    wifi: &mut W,
    board: &mut B,
) -> bool {
    let started = board.now_ms();
    loop {
        if wifi.is_associated() {
            return true;
        }
        if board.now_ms().saturating_sub(started) >= config.connection.wifi_connect_timeout_ms {
            return false;
        }
        board.delay_ms(config.connection.wifi_poll_interval_ms);
    }
}

/// Client identifier unique across restarts: MAC without separators plus a
/// random 16-bit suffix.
pub fn client_id(mac_address: &str, entropy: u32) -> String {
    let mac: String = mac_address.chars().filter(|c| *c != ':').collect();
    let prefix = if mac.is_empty() { "weather" } else { mac.as_str() };
    format!("{prefix}-{:04X}", entropy & 0xFFFF)
}
