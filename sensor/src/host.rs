use std::{
    io::ErrorKind,
    net::Ipv4Addr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{Timelike, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS,
};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, warn};

use weather_common::{
    Board, InboundMessage, MqttError, MqttPort, MqttState, NetworkCredentials, Node, NodeConfig,
    OtaError, OtaHandler, OtaPort, PacketBuffer, Sample, SensorError, SensorPort, WifiError,
    WifiPort, WifiStatus,
};

const LOOP_IDLE_MS: u64 = 10;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KEEP_ALIVE: Duration = Duration::from_secs(15);
const DEFAULT_PACKET_SIZE: usize = 256;
const HOST_MAC: &str = "02:00:00:00:00:01";
const HOST_RSSI: i32 = -50;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = NodeStore::new();
    let mut config = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load node config from {}: {err:#}", store.path.display());
        NodeConfig::default()
    });
    apply_broker_overrides(&mut config, BrokerOverrides::from_env());

    let runtime = Handle::current();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    std::thread::Builder::new()
        .name("weather-node".to_string())
        .spawn(move || {
            let mqtt = HostMqtt::new(runtime, &config);
            let mut node = Node::new(
                config,
                HostWifi::default(),
                mqtt,
                SimulatedSensor::new(),
                LogOnlyOta,
                HostBoard::new(),
            );
            let fatal = node.run(LOOP_IDLE_MS);
            let _ = done_tx.send(fatal);
        })
        .context("failed to spawn node thread")?;

    tokio::select! {
        fatal = done_rx => match fatal {
            Ok(err) => Err(anyhow::Error::new(err).context("node requested a restart")),
            Err(_) => anyhow::bail!("node thread exited without reporting"),
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("shutting down");
            Ok(())
        }
    }
}

struct NodeStore {
    path: PathBuf,
}

impl NodeStore {
    fn new() -> Self {
        let data_dir = std::env::var("WEATHER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.weather"));

        Self {
            path: data_dir.join("node.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<NodeConfig> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice::<NodeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(NodeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerOverrides {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    pass: Option<String>,
}

impl BrokerOverrides {
    fn from_env() -> Self {
        Self {
            host: std::env::var("MQTT_HOST").ok(),
            port: std::env::var("MQTT_PORT")
                .ok()
                .and_then(|value| value.parse::<u16>().ok()),
            user: std::env::var("MQTT_USER").ok(),
            pass: std::env::var("MQTT_PASS").ok(),
        }
    }
}

/// The workstation has no radio, so the first credential set only carries
/// the broker address. One is created when the file configures none.
fn apply_broker_overrides(config: &mut NodeConfig, overrides: BrokerOverrides) {
    if config.networks.is_empty() {
        config.networks.push(NetworkCredentials {
            ssid: "host-loopback".to_string(),
            password: String::new(),
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
        });
    }

    let primary = &mut config.networks[0];
    if let Some(host) = overrides.host {
        primary.broker_host = host;
    }
    if let Some(port) = overrides.port {
        primary.broker_port = port;
    }
    if let Some(user) = overrides.user {
        config.connection.mqtt_user = user;
    }
    if let Some(pass) = overrides.pass {
        config.connection.mqtt_pass = pass;
    }
}

/// Every configured SSID is "visible" and associates immediately.
#[derive(Debug, Default)]
struct HostWifi {
    associated: Option<String>,
}

impl WifiPort for HostWifi {
    fn is_associated(&self) -> bool {
        self.associated.is_some()
    }

    fn is_visible(&mut self, _ssid: &str) -> bool {
        true
    }

    fn begin(&mut self, ssid: &str, _password: &str) -> Result<(), WifiError> {
        debug!("simulated association with `{ssid}`");
        self.associated = Some(ssid.to_string());
        Ok(())
    }

    fn status(&self) -> WifiStatus {
        if self.associated.is_some() {
            WifiStatus::Connected
        } else {
            WifiStatus::Disconnected
        }
    }

    fn mac_address(&self) -> String {
        HOST_MAC.to_string()
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        self.associated.as_ref().map(|_| Ipv4Addr::LOCALHOST)
    }

    fn rssi(&self) -> i32 {
        HOST_RSSI
    }
}

struct HostMqtt {
    runtime: Handle,
    server: Option<(String, u16)>,
    credentials: Option<(String, String)>,
    client: Option<AsyncClient>,
    session: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
    state: MqttState,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    buffer: PacketBuffer,
}

impl HostMqtt {
    fn new(runtime: Handle, config: &NodeConfig) -> Self {
        let credentials = (!config.connection.mqtt_user.is_empty()).then(|| {
            (
                config.connection.mqtt_user.clone(),
                config.connection.mqtt_pass.clone(),
            )
        });
        let mut buffer = PacketBuffer::new();
        if let Err(err) = buffer.resize(DEFAULT_PACKET_SIZE) {
            warn!("failed to reserve default mqtt buffer: {err}");
        }
        let (inbound_tx, inbound_rx) = mpsc::channel();

        Self {
            runtime,
            server: None,
            credentials,
            client: None,
            session: None,
            connected: Arc::new(AtomicBool::new(false)),
            state: MqttState::Disconnected,
            inbound_tx,
            inbound_rx,
            buffer,
        }
    }

    fn drop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl MqttPort for HostMqtt {
    fn set_server(&mut self, host: &str, port: u16) {
        self.server = Some((host.to_string(), port));
    }

    fn connect(&mut self, client_id: &str) -> Result<(), MqttError> {
        self.drop_session();

        let Some((host, port)) = self.server.clone() else {
            return Err(MqttError::Client("broker address not set".to_string()));
        };

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((user, pass)) = &self.credentials {
            options.set_credentials(user.clone(), pass.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, 32);
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        self.session = Some(self.runtime.spawn(drive_session(
            eventloop,
            ack_tx,
            self.inbound_tx.clone(),
            Arc::clone(&self.connected),
        )));

        self.state = match ack_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(code) => connack_state(code),
            Err(RecvTimeoutError::Timeout) => MqttState::ConnectionTimeout,
            Err(RecvTimeoutError::Disconnected) => MqttState::ConnectFailed,
        };

        if self.state == MqttState::Connected {
            self.client = Some(client);
            Ok(())
        } else {
            self.drop_session();
            Err(MqttError::Session(self.state))
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn state(&self) -> MqttState {
        match (self.is_connected(), self.state) {
            (true, _) => MqttState::Connected,
            (false, MqttState::Connected) => MqttState::ConnectionLost,
            (false, state) => state,
        }
    }

    fn set_buffer_size(&mut self, size: usize) -> Result<(), MqttError> {
        self.buffer
            .resize(size)
            .map_err(|_| MqttError::Allocation(size))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        let client = self
            .client
            .as_ref()
            .ok_or(MqttError::Session(MqttState::Disconnected))?;
        client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|err| MqttError::Client(err.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::Session(self.state()));
        }
        let Some(client) = self.client.as_ref() else {
            return Err(MqttError::Session(MqttState::Disconnected));
        };
        let staged = self.buffer.stage(payload)?.to_vec();
        client
            .try_publish(topic, QoS::AtMostOnce, false, staged)
            .map_err(|err| MqttError::Client(err.to_string()))
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        self.inbound_rx.try_iter().collect()
    }
}

async fn drive_session(
    mut eventloop: EventLoop,
    ack: mpsc::SyncSender<ConnectReturnCode>,
    inbound: mpsc::Sender<InboundMessage>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                let accepted = connack.code == ConnectReturnCode::Success;
                connected.store(accepted, Ordering::SeqCst);
                let _ = ack.try_send(connack.code);
                if !accepted {
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::Publish(message))) => {
                let message = InboundMessage {
                    topic: message.topic,
                    payload: message.payload.to_vec(),
                };
                if inbound.send(message).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                let _ = ack.try_send(code);
                break;
            }
            Err(err) => {
                warn!("mqtt session ended: {err}");
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}

fn connack_state(code: ConnectReturnCode) -> MqttState {
    match code {
        ConnectReturnCode::Success => MqttState::Connected,
        ConnectReturnCode::RefusedProtocolVersion => MqttState::BadProtocol,
        ConnectReturnCode::BadClientId => MqttState::BadClientId,
        ConnectReturnCode::ServiceUnavailable => MqttState::Unavailable,
        ConnectReturnCode::BadUserNamePassword => MqttState::BadCredentials,
        ConnectReturnCode::NotAuthorized => MqttState::Unauthorized,
    }
}

/// Diurnal temperature/humidity curve with a little noise.
struct SimulatedSensor {
    rng: StdRng,
}

impl SimulatedSensor {
    fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    fn baseline(seconds_since_midnight: u32) -> Sample {
        let day_fraction = seconds_since_midnight as f32 / 86_400.0;
        // Warmest mid-afternoon, coolest before dawn.
        let phase = (day_fraction - 0.625) * std::f32::consts::TAU;
        let temp_c = 18.0 + 6.0 * phase.cos();
        let humidity = 55.0 - 15.0 * phase.cos();
        Sample { temp_c, humidity }
    }
}

impl SensorPort for SimulatedSensor {
    fn read(&mut self) -> Result<Sample, SensorError> {
        let Sample { temp_c, humidity } =
            Self::baseline(Utc::now().num_seconds_from_midnight());
        Ok(Sample {
            temp_c: temp_c + self.rng.gen_range(-0.3..0.3),
            humidity: (humidity + self.rng.gen_range(-1.5..1.5)).clamp(0.0, 100.0),
        })
    }
}

/// Accepts registration; updates are never offered on a workstation.
#[derive(Debug, Default)]
struct LogOnlyOta;

impl OtaPort for LogOnlyOta {
    fn begin(&mut self, hostname: &str, _handler: Box<dyn OtaHandler>) -> Result<(), OtaError> {
        info!("ota listener disabled on host build (hostname `{hostname}`)");
        Ok(())
    }

    fn handle(&mut self) {}
}

struct HostBoard {
    rng: StdRng,
}

impl HostBoard {
    fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Board for HostBoard {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn set_indicator(&mut self, lit: bool) {
        debug!("status led {}", if lit { "on" } else { "off" });
    }

    fn random_u32(&mut self) -> u32 {
        self.rng.gen()
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
