use std::{
    collections::VecDeque,
    net::Ipv4Addr,
    sync::{Arc, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{client::Client as HttpClient, Headers, Method, Status},
    io::{Read, Write},
    mqtt::client::QoS,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{FreeRtos, BLOCK},
    gpio::{AnyOutputPin, Output, OutputPin, PinDriver},
    i2c::{I2cConfig, I2cDriver},
    prelude::*,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    http::{
        client::{Configuration as HttpClientConfiguration, EspHttpConnection},
        server::{Configuration as HttpConfiguration, EspHttpServer},
    },
    log::EspLogger,
    mqtt::client::{Details, EspMqttClient, EventPayload, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    ota::EspOta,
    wifi::EspWifi,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use weather_common::{
    Board, ConnectionConfig, InboundMessage, MqttError, MqttPort, MqttState, NetworkCredentials,
    Node, NodeConfig, OtaError, OtaHandler, OtaPort, PacketBuffer, Sample, SensorError,
    SensorPort, WifiError, WifiPort, WifiStatus,
};

use crate::htu21d;

const NVS_NAMESPACE: &str = "weather";
const NVS_CONFIG_KEY: &str = "node_json";

const LOOP_IDLE_MS: u64 = 10;
const MAX_HTTP_BODY: usize = 4096;
const OTA_CHUNK_SIZE: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;
const WATCHDOG_FEED_SLICE_MS: u64 = 1_000;
const MQTT_CONNECT_TIMEOUT_MS: u64 = 15_000;
const SCAN_CACHE_MS: u64 = 15_000;
const I2C_BAUDRATE_KHZ: u32 = 100;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut config = nvs_store.load_node_config().unwrap_or_else(|err| {
        warn!("failed to load node config from NVS: {err:#}");
        NodeConfig::default()
    });
    seed_build_defaults(&mut config);

    let peripherals = esp_idf_hal::peripherals::Peripherals::take()?;
    let pins = peripherals.pins;

    let sensor = Htu21dSensor::new(I2cDriver::new(
        peripherals.i2c0,
        pins.gpio21,
        pins.gpio22,
        &I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into()),
    )?)
    .context("failed to initialize HTU21D")?;

    let led = PinDriver::output(pins.gpio2.downgrade_output())
        .context("failed to configure status led")?;

    let wifi = EspWifiPort::new(peripherals.modem, sys_loop, nvs_partition)
        .context("wifi startup failed")?;

    if let Ok(mut ota) = EspOta::new() {
        if let Err(err) = ota.mark_running_slot_valid() {
            warn!("failed to mark running OTA slot valid: {err:?}");
        }
    }

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let ota = HttpPullOta::new(config.ota_password.clone());
    let mqtt = EspMqttPort::new(&config.connection);
    let board = EspBoard { led, lit: false };

    let mut node = Node::new(config, wifi, mqtt, sensor, ota, board);
    let fatal = node.run(LOOP_IDLE_MS);

    error!("fatal condition, restarting: {fatal}");
    thread::sleep(Duration::from_millis(100));
    restart_device()
}

fn restart_device() -> ! {
    unsafe { esp_idf_svc::sys::esp_restart() };
    unreachable!("esp_restart returned")
}

/// Compile-time credentials used when NVS carries no network list.
fn seed_build_defaults(config: &mut NodeConfig) {
    if !config.networks.is_empty() {
        return;
    }

    match option_env!("WIFI_SSID") {
        Some(ssid) => config.networks.push(NetworkCredentials {
            ssid: ssid.to_string(),
            password: option_env!("WIFI_PASS").unwrap_or_default().to_string(),
            broker_host: option_env!("MQTT_HOST").unwrap_or("192.168.1.1").to_string(),
            broker_port: 1883,
        }),
        None => warn!("no wifi networks configured; the node will stay offline"),
    }
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_node_config(&self) -> anyhow::Result<NodeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_CONFIG_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<NodeConfig>(value)?),
            None => Ok(NodeConfig::default()),
        }
    }
}

struct Htu21dSensor {
    i2c: I2cDriver<'static>,
}

impl Htu21dSensor {
    fn new(mut i2c: I2cDriver<'static>) -> anyhow::Result<Self> {
        i2c.write(htu21d::ADDRESS, &[htu21d::SOFT_RESET], BLOCK)
            .context("HTU21D did not acknowledge soft reset")?;
        FreeRtos::delay_ms(15);
        Ok(Self { i2c })
    }

    fn measure(&mut self, command: u8, conversion_ms: u32) -> Result<u16, SensorError> {
        self.i2c
            .write(htu21d::ADDRESS, &[command], BLOCK)
            .map_err(|err| SensorError::Bus(err.to_string()))?;
        FreeRtos::delay_ms(conversion_ms);

        let mut frame = [0_u8; 3];
        self.i2c
            .read(htu21d::ADDRESS, &mut frame, BLOCK)
            .map_err(|_| SensorError::NotResponding)?;
        htu21d::raw_value(frame)
    }
}

impl SensorPort for Htu21dSensor {
    fn read(&mut self) -> Result<Sample, SensorError> {
        let temp_raw = self.measure(htu21d::TRIGGER_TEMP_NO_HOLD, htu21d::TEMP_CONVERSION_MS)?;
        let humidity_raw = self.measure(
            htu21d::TRIGGER_HUMIDITY_NO_HOLD,
            htu21d::HUMIDITY_CONVERSION_MS,
        )?;
        Ok(Sample {
            temp_c: htu21d::temperature_c(temp_raw),
            humidity: htu21d::relative_humidity(humidity_raw),
        })
    }
}

struct EspWifiPort {
    wifi: EspWifi<'static>,
    pending_ssid: Option<String>,
    scan_cache: Option<(Instant, Vec<String>)>,
}

impl EspWifiPort {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        wifi.start()?;
        disable_wifi_power_save();

        Ok(Self {
            wifi,
            pending_ssid: None,
            scan_cache: None,
        })
    }

    fn visible_ssids(&mut self) -> &[String] {
        let stale = self
            .scan_cache
            .as_ref()
            .map_or(true, |(at, _)| at.elapsed() > Duration::from_millis(SCAN_CACHE_MS));

        if stale {
            let ssids = match self.wifi.scan() {
                Ok(access_points) => access_points
                    .into_iter()
                    .map(|ap| ap.ssid.as_str().to_string())
                    .collect(),
                Err(err) => {
                    warn!("wifi scan failed: {err}");
                    Vec::new()
                }
            };
            debug!("wifi scan found {} access point(s)", ssids.len());
            self.scan_cache = Some((Instant::now(), ssids));
        }

        self.scan_cache
            .as_ref()
            .map(|(_, ssids)| ssids.as_slice())
            .unwrap_or_default()
    }
}

impl WifiPort for EspWifiPort {
    fn is_associated(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn is_visible(&mut self, ssid: &str) -> bool {
        self.visible_ssids().iter().any(|candidate| candidate == ssid)
    }

    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), WifiError> {
        let _ = self.wifi.disconnect();

        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };
        let client = ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| WifiError::Driver("wifi ssid too long".to_string()))?,
            password: password
                .try_into()
                .map_err(|_| WifiError::Driver("wifi password too long".to_string()))?,
            auth_method,
            ..Default::default()
        };

        self.wifi
            .set_configuration(&Configuration::Client(client))
            .map_err(|err| WifiError::Driver(err.to_string()))?;
        self.wifi
            .connect()
            .map_err(|err| WifiError::Driver(err.to_string()))?;
        self.pending_ssid = Some(ssid.to_string());
        self.scan_cache = None;
        Ok(())
    }

    fn status(&self) -> WifiStatus {
        match (self.wifi.is_connected(), self.is_associated()) {
            (_, true) => WifiStatus::Connected,
            (Ok(true), false) => WifiStatus::Idle,
            _ if self.pending_ssid.is_some() => WifiStatus::ConnectFailed,
            _ => WifiStatus::Disconnected,
        }
    }

    fn mac_address(&self) -> String {
        match self.wifi.sta_netif().get_mac() {
            Ok(mac) => mac
                .iter()
                .map(|byte| format!("{byte:02X}"))
                .collect::<Vec<_>>()
                .join(":"),
            Err(err) => {
                warn!("failed to read station mac: {err}");
                String::new()
            }
        }
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip)
            .filter(|ip| !ip.is_unspecified())
    }

    fn rssi(&self) -> i32 {
        let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        if rc == esp_idf_svc::sys::ESP_OK {
            i32::from(ap_info.rssi)
        } else {
            0
        }
    }
}

#[derive(Default)]
struct MqttShared {
    connected: bool,
    closed: bool,
    inbound: VecDeque<InboundMessage>,
}

struct EspMqttPort {
    url: Option<String>,
    username: String,
    password: String,
    client: Option<EspMqttClient<'static>>,
    shared: Arc<Mutex<MqttShared>>,
    state: MqttState,
    buffer: PacketBuffer,
}

impl EspMqttPort {
    fn new(connection: &ConnectionConfig) -> Self {
        let mut buffer = PacketBuffer::new();
        if let Err(err) = buffer.resize(connection.buffer_size) {
            warn!("failed to reserve mqtt buffer: {err}");
        }

        Self {
            url: None,
            username: connection.mqtt_user.clone(),
            password: connection.mqtt_pass.clone(),
            client: None,
            shared: Arc::new(Mutex::new(MqttShared::default())),
            state: MqttState::Disconnected,
            buffer,
        }
    }

    fn shared(&self) -> std::sync::MutexGuard<'_, MqttShared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MqttPort for EspMqttPort {
    fn set_server(&mut self, host: &str, port: u16) {
        self.url = Some(format!("mqtt://{host}:{port}"));
    }

    fn connect(&mut self, client_id: &str) -> Result<(), MqttError> {
        self.client = None;
        *self.shared() = MqttShared::default();

        let Some(url) = self.url.clone() else {
            return Err(MqttError::Client("broker address not set".to_string()));
        };

        let conf = MqttClientConfiguration {
            client_id: Some(client_id),
            username: (!self.username.is_empty()).then_some(self.username.as_str()),
            password: (!self.password.is_empty()).then_some(self.password.as_str()),
            buffer_size: self.buffer.limit(),
            ..Default::default()
        };

        let shared = Arc::clone(&self.shared);
        let client = EspMqttClient::new_cb(&url, &conf, move |event| {
            let mut shared = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match event.payload() {
                EventPayload::Connected(_) => shared.connected = true,
                EventPayload::Disconnected => {
                    shared.connected = false;
                    shared.closed = true;
                }
                EventPayload::Received {
                    topic: Some(topic),
                    data,
                    details: Details::Complete,
                    ..
                } => shared.inbound.push_back(InboundMessage {
                    topic: topic.to_string(),
                    payload: data.to_vec(),
                }),
                EventPayload::Received { .. } => {
                    warn!("dropping fragmented or topic-less mqtt message")
                }
                EventPayload::Error(err) => warn!("mqtt client error: {err:?}"),
                _ => {}
            }
        })
        .map_err(|err| MqttError::Client(err.to_string()))?;

        let started = Instant::now();
        self.state = loop {
            {
                let shared = self.shared();
                if shared.connected {
                    break MqttState::Connected;
                }
                if shared.closed {
                    break MqttState::ConnectFailed;
                }
            }
            if started.elapsed() >= Duration::from_millis(MQTT_CONNECT_TIMEOUT_MS) {
                break MqttState::ConnectionTimeout;
            }
            feed_watchdog();
            thread::sleep(Duration::from_millis(50));
        };

        if self.state == MqttState::Connected {
            self.client = Some(client);
            Ok(())
        } else {
            Err(MqttError::Session(self.state))
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.shared().connected
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
            .as_mut()
            .ok_or(MqttError::Session(MqttState::Disconnected))?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(|_| ())
            .map_err(|err| MqttError::Client(err.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        if !self.is_connected() {
            return Err(MqttError::Session(self.state()));
        }
        let staged = self.buffer.stage(payload)?;
        let Some(client) = self.client.as_mut() else {
            return Err(MqttError::Session(MqttState::Disconnected));
        };
        client
            .publish(topic, QoS::AtMostOnce, false, staged)
            .map(|_| ())
            .map_err(|err| MqttError::Client(err.to_string()))
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        self.shared().inbound.drain(..).collect()
    }
}

struct EspBoard {
    led: PinDriver<'static, AnyOutputPin, Output>,
    lit: bool,
}

impl Board for EspBoard {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u64) {
        let mut remaining = ms;
        while remaining > 0 {
            feed_watchdog();
            let slice = remaining.min(WATCHDOG_FEED_SLICE_MS);
            thread::sleep(Duration::from_millis(slice));
            remaining -= slice;
        }
        feed_watchdog();
    }

    fn set_indicator(&mut self, lit: bool) {
        if lit == self.lit {
            return;
        }
        let result = if lit {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
        match result {
            Ok(()) => self.lit = lit,
            Err(err) => warn!("failed to drive status led: {err}"),
        }
    }

    fn random_u32(&mut self) -> u32 {
        unsafe { esp_idf_svc::sys::esp_random() }
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

#[derive(Debug, Default)]
struct OtaRuntimeState {
    in_progress: bool,
    bytes_written: u64,
    total_bytes: Option<u64>,
    progress_pct: Option<u8>,
    last_error: Option<String>,
    last_sha256: Option<String>,
    last_source_url: Option<String>,
    last_completed_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OtaApplyRequest {
    url: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
struct OtaApplyResponse {
    accepted: bool,
    queued: bool,
}

#[derive(Debug, Serialize)]
struct OtaStatusResponse {
    hostname: String,
    #[serde(rename = "inProgress")]
    in_progress: bool,
    queued: bool,
    #[serde(rename = "bytesWritten")]
    bytes_written: u64,
    #[serde(rename = "totalBytes")]
    total_bytes: Option<u64>,
    #[serde(rename = "progressPct")]
    progress_pct: Option<u8>,
    #[serde(rename = "lastError")]
    last_error: Option<String>,
    #[serde(rename = "lastSha256")]
    last_sha256: Option<String>,
    #[serde(rename = "lastSourceUrl")]
    last_source_url: Option<String>,
    #[serde(rename = "lastCompletedEpoch")]
    last_completed_epoch: Option<i64>,
    #[serde(rename = "runningSlot")]
    running_slot: Option<String>,
}

enum OtaJob {
    Apply(OtaApplyRequest),
    AuthRejected,
}

#[derive(Default)]
struct OtaShared {
    hostname: String,
    queue: VecDeque<OtaJob>,
    runtime: OtaRuntimeState,
}

/// Pull-based OTA: an HTTP endpoint queues an image URL and the node thread
/// downloads and flashes it from `handle()`.
struct HttpPullOta {
    password: String,
    shared: Arc<Mutex<OtaShared>>,
    handler: Option<Box<dyn OtaHandler>>,
    _server: Option<EspHttpServer<'static>>,
}

impl HttpPullOta {
    fn new(password: String) -> Self {
        Self {
            password,
            shared: Arc::new(Mutex::new(OtaShared::default())),
            handler: None,
            _server: None,
        }
    }

    fn report_error(&mut self, error: OtaError) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_error(&error);
        }
        let mut shared = lock_ota(&self.shared);
        shared.runtime.in_progress = false;
        shared.runtime.last_error = Some(error.to_string());
        shared.runtime.last_completed_epoch = Some(chrono::Utc::now().timestamp());
    }

    fn apply(&mut self, request: OtaApplyRequest) {
        {
            let mut shared = lock_ota(&self.shared);
            shared.runtime.in_progress = true;
            shared.runtime.bytes_written = 0;
            shared.runtime.total_bytes = None;
            shared.runtime.progress_pct = None;
            shared.runtime.last_error = None;
            shared.runtime.last_sha256 = None;
            shared.runtime.last_source_url = Some(request.url.clone());
        }
        if let Some(handler) = self.handler.as_mut() {
            handler.on_start();
        }

        let expected_sha = request
            .sha256
            .as_ref()
            .map(|value| value.trim().to_ascii_lowercase());

        let shared = Arc::clone(&self.shared);
        let handler = &mut self.handler;
        let result = download_and_flash(&request.url, expected_sha.as_deref(), |written, total| {
            feed_watchdog();
            {
                let mut shared = lock_ota(&shared);
                shared.runtime.bytes_written = written;
                shared.runtime.total_bytes = total;
                shared.runtime.progress_pct = total
                    .filter(|total| *total > 0)
                    .map(|total| (written.saturating_mul(100) / total).min(100) as u8);
            }
            if let Some(handler) = handler.as_mut() {
                handler.on_progress(written, total);
            }
        });

        match result {
            Ok((bytes_written, digest_hex)) => {
                {
                    let mut shared = lock_ota(&self.shared);
                    shared.runtime.in_progress = false;
                    shared.runtime.bytes_written = bytes_written;
                    shared.runtime.progress_pct = Some(100);
                    shared.runtime.last_sha256 = Some(digest_hex);
                    shared.runtime.last_completed_epoch = Some(chrono::Utc::now().timestamp());
                }
                if let Some(handler) = self.handler.as_mut() {
                    handler.on_end();
                }
                info!("ota image applied ({bytes_written} bytes), rebooting");
                thread::sleep(Duration::from_millis(800));
                restart_device();
            }
            Err(err) => self.report_error(err),
        }
    }
}

impl OtaPort for HttpPullOta {
    fn begin(&mut self, hostname: &str, handler: Box<dyn OtaHandler>) -> Result<(), OtaError> {
        lock_ota(&self.shared).hostname = hostname.to_string();
        self.handler = Some(handler);

        let server = create_ota_server(Arc::clone(&self.shared), self.password.clone())
            .map_err(|err| OtaError::Begin(format!("{err:#}")))?;
        self._server = Some(server);
        info!("ota endpoint ready for `{hostname}`");
        Ok(())
    }

    fn handle(&mut self) {
        let job = lock_ota(&self.shared).queue.pop_front();
        match job {
            Some(OtaJob::Apply(request)) => self.apply(request),
            Some(OtaJob::AuthRejected) => {
                if let Some(handler) = self.handler.as_mut() {
                    handler.on_error(&OtaError::Auth);
                }
            }
            None => {}
        }
    }
}

fn lock_ota(shared: &Mutex<OtaShared>) -> std::sync::MutexGuard<'_, OtaShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn create_ota_server(
    shared: Arc<Mutex<OtaShared>>,
    password: String,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let shared = Arc::clone(&shared);
        server.fn_handler("/api/ota/status", Method::Get, move |req| {
            let payload = build_ota_status_response(&shared);
            write_json(req, 200, &payload)
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/ota/apply", Method::Post, move |mut req| {
        let body = read_request_body(&mut req)?;
        let request: OtaApplyRequest =
            serde_json::from_slice(&body).context("invalid ota payload")?;

        if let Err(message) = validate_ota_apply_request(&request) {
            return write_error(req, 400, message);
        }

        let mut ota = lock_ota(&shared);
        if !password.is_empty() && request.password.as_deref().unwrap_or_default() != password {
            ota.queue.push_back(OtaJob::AuthRejected);
            drop(ota);
            return write_error(req, 403, "invalid OTA password");
        }
        let busy = ota.runtime.in_progress
            || ota.queue.iter().any(|job| matches!(job, OtaJob::Apply(_)));
        if busy {
            drop(ota);
            return write_error(req, 409, "OTA update already in progress");
        }

        ota.queue.push_back(OtaJob::Apply(request));
        drop(ota);
        write_json(
            req,
            202,
            &OtaApplyResponse {
                accepted: true,
                queued: true,
            },
        )
    })?;

    Ok(server)
}

fn validate_ota_apply_request(request: &OtaApplyRequest) -> Result<(), &'static str> {
    let url = request.url.trim();
    if url.is_empty() {
        return Err("url cannot be empty");
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err("url must start with http:// or https://");
    }

    if let Some(sha256) = request.sha256.as_ref() {
        let value = sha256.trim();
        if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("sha256 must be 64 hex characters");
        }
    }

    Ok(())
}

fn build_ota_status_response(shared: &Arc<Mutex<OtaShared>>) -> OtaStatusResponse {
    let ota = lock_ota(shared);
    let running_slot = EspOta::new()
        .ok()
        .and_then(|ota| ota.get_running_slot().ok())
        .map(|slot| slot.label.as_str().to_string());

    OtaStatusResponse {
        hostname: ota.hostname.clone(),
        in_progress: ota.runtime.in_progress,
        queued: !ota.queue.is_empty(),
        bytes_written: ota.runtime.bytes_written,
        total_bytes: ota.runtime.total_bytes,
        progress_pct: ota.runtime.progress_pct,
        last_error: ota.runtime.last_error.clone(),
        last_sha256: ota.runtime.last_sha256.clone(),
        last_source_url: ota.runtime.last_source_url.clone(),
        last_completed_epoch: ota.runtime.last_completed_epoch,
        running_slot,
    }
}

fn download_and_flash(
    url: &str,
    expected_sha256: Option<&str>,
    mut progress: impl FnMut(u64, Option<u64>),
) -> Result<(u64, String), OtaError> {
    let http_conf = HttpClientConfiguration {
        timeout: Some(Duration::from_secs(30)),
        crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
        ..Default::default()
    };
    let connection =
        EspHttpConnection::new(&http_conf).map_err(|err| OtaError::Connect(err.to_string()))?;
    let mut client = HttpClient::wrap(connection);
    let request = client
        .request(Method::Get, url, &[])
        .map_err(|err| OtaError::Connect(format!("{err:?}")))?;
    let mut response = request
        .submit()
        .map_err(|err| OtaError::Connect(format!("{err:?}")))?;

    let status = response.status();
    if !(200..300).contains(&status) {
        return Err(OtaError::Connect(format!("download failed with HTTP {status}")));
    }

    let content_length = response
        .header("content-length")
        .or_else(|| response.header("Content-Length"))
        .and_then(|value| value.parse::<u64>().ok());

    let mut ota = EspOta::new().map_err(|err| OtaError::Begin(format!("{err:?}")))?;
    let mut update = ota
        .initiate_update()
        .map_err(|err| OtaError::Begin(format!("{err:?}")))?;

    let mut hasher = Sha256::new();
    let mut total_written = 0_u64;
    let mut chunk = [0_u8; OTA_CHUNK_SIZE];

    loop {
        let read = response
            .read(&mut chunk)
            .map_err(|err| OtaError::Receive(format!("{err:?}")))?;
        if read == 0 {
            break;
        }

        update
            .write(&chunk[..read])
            .map_err(|err| OtaError::Receive(format!("flash write failed: {err:?}")))?;
        hasher.update(&chunk[..read]);
        total_written = total_written.saturating_add(read as u64);
        progress(total_written, content_length);
    }

    if total_written == 0 {
        return Err(OtaError::Receive("download body is empty".to_string()));
    }

    let digest_hex = hex_digest(&hasher.finalize());
    if let Some(expected) = expected_sha256 {
        if digest_hex != expected {
            return Err(OtaError::End(format!(
                "sha256 mismatch (expected {expected}, got {digest_hex})"
            )));
        }
    }

    update
        .complete()
        .map_err(|err| OtaError::End(format!("{err:?}")))?;

    Ok((total_written, digest_hex))
}

fn hex_digest(bytes: &[u8]) -> String {
    use core::fmt::Write as _;
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn read_request_body(
    req: &mut esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    write_json(req, status_code, &serde_json::json!({ "error": message }))
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
