//! The node context: one owned `DeviceState`, the port handles, and the
//! cooperative loop that multiplexes polling, publishing, commands, OTA and
//! the status LED.

use log::{debug, info, warn};

use crate::{
    config::NodeConfig,
    connection::{ConnectionManager, MqttOutcome},
    dispatcher::{self, Command},
    error::{CommandError, FatalError},
    ota::LoggingOtaHandler,
    ports::{Board, MqttPort, OtaPort, SensorPort, WifiPort},
    publisher,
    reader::{self, ReadOutcome},
    scheduler::{indicator_mode, is_due, next_indicator_level},
    state::DeviceState,
    types::InboundMessage,
};

pub struct Node<W, M, S, O, B> {
    config: NodeConfig,
    state: DeviceState,
    connection: ConnectionManager,
    wifi: W,
    mqtt: M,
    sensor: S,
    ota: O,
    board: B,
}

impl<W, M, S, O, B> Node<W, M, S, O, B>
where
    W: WifiPort,
    M: MqttPort,
    S: SensorPort,
    O: OtaPort,
    B: Board,
{
    pub fn new(mut config: NodeConfig, wifi: W, mqtt: M, sensor: S, ota: O, board: B) -> Self {
        config.sanitize();
        let state = DeviceState::new(&config);
        Self {
            config,
            state,
            connection: ConnectionManager::new(),
            wifi,
            mqtt,
            sensor,
            ota,
            board,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn setup(&mut self) -> Result<(), FatalError> {
        info!(
            "{} ({}) starting as `{}`, {} network(s) configured",
            self.config.sketch_name,
            self.config.notes,
            self.config.hostname,
            self.config.networks.len()
        );

        if let Err(err) = self
            .ota
            .begin(&self.config.hostname, Box::new(LoggingOtaHandler::new()))
        {
            warn!("ota unavailable: {err}");
        }

        self.connection
            .ensure_wifi(&mut self.state, &self.config, &mut self.wifi, &mut self.board);

        let attempts = self.config.connection.mqtt_setup_attempts;
        self.connect_mqtt(attempts)?;

        info!(
            "setup complete on `{}`",
            self.state.network_label(&self.config)
        );
        Ok(())
    }

    /// One pass of the cooperative loop. Only returns `Err` when the device
    /// has to restart.
    pub fn tick(&mut self) -> Result<(), FatalError> {
        if !self.mqtt.is_connected() {
            self.connect_mqtt(1)?;
        }

        if self.mqtt.is_connected() {
            for message in self.mqtt.poll() {
                self.handle_message(message)?;
            }
        }

        self.ota.handle();

        let now = self.board.now_ms();

        if is_due(now, self.state.telemetry_interval_ms, self.state.last_poll_ms) {
            self.read()?;
            self.state.last_poll_ms = Some(now);
        }

        if is_due(now, self.state.publish_interval_ms, self.state.last_publish_ms) {
            self.read()?;
            publisher::publish_telemetry(&mut self.state, &self.config, &mut self.mqtt, now);
        }

        if is_due(now, self.state.indicator_interval_ms, self.state.last_indicator_ms) {
            let mode = indicator_mode(self.wifi.is_associated(), self.mqtt.is_connected());
            let lit = next_indicator_level(mode, self.state.indicator_lit);
            self.board.set_indicator(lit);
            self.state.indicator_lit = lit;
            self.state.last_indicator_ms = Some(now);
        }

        Ok(())
    }

    /// Run setup and then loop until a fatal condition occurs.
    pub fn run(&mut self, idle_ms: u64) -> FatalError {
        if let Err(err) = self.setup() {
            return err;
        }
        loop {
            if let Err(err) = self.tick() {
                return err;
            }
            self.board.delay_ms(idle_ms);
        }
    }

    fn connect_mqtt(&mut self, attempts: u32) -> Result<(), FatalError> {
        let outcome = self.connection.ensure_mqtt(
            &mut self.state,
            &self.config,
            &mut self.wifi,
            &mut self.mqtt,
            &mut self.board,
            attempts,
        )?;
        if outcome == MqttOutcome::Connected {
            publisher::publish_stats(&mut self.state, &self.config, &mut self.mqtt);
        }
        Ok(())
    }

    fn read(&mut self) -> Result<ReadOutcome, FatalError> {
        let rssi = self.wifi.rssi();
        reader::read_telemetry(&mut self.state, &self.config.sensor, &mut self.sensor, rssi)
    }

    fn handle_message(&mut self, message: InboundMessage) -> Result<(), FatalError> {
        if message.topic != self.config.topics.command {
            debug!("ignoring message on `{}`", message.topic);
            return Ok(());
        }

        match dispatcher::decode(&message.payload) {
            Ok(Command::PublishTelemetry) => {
                info!("command: publish telemetry");
                self.read()?;
                let now = self.board.now_ms();
                publisher::publish_telemetry(&mut self.state, &self.config, &mut self.mqtt, now);
            }
            Ok(Command::ChangeTelemetryInterval(interval_ms)) => {
                dispatcher::change_publish_interval(&mut self.state, interval_ms);
            }
            Ok(Command::PublishStats) => {
                info!("command: publish stats");
                self.read()?;
                publisher::publish_stats(&mut self.state, &self.config, &mut self.mqtt);
            }
            Ok(Command::Unknown(name)) => warn!("unknown command `{name}`"),
            Err(CommandError::MissingCommand) => {
                warn!("command message without a `command` field, ignoring")
            }
            Err(err) => warn!("dropping command message: {err}"),
        }

        Ok(())
    }
}
