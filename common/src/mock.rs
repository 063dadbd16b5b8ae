//! Scripted ports sharing one simulated clock.

use std::{
    cell::Cell,
    collections::{HashMap, VecDeque},
    net::Ipv4Addr,
    rc::Rc,
    sync::{Arc, Mutex},
};

use crate::{
    error::{MqttError, OtaError, SensorError, WifiError},
    ports::{Board, MqttPort, OtaHandler, OtaPort, SensorPort, WifiPort},
    status::{MqttState, WifiStatus},
    types::{InboundMessage, Sample},
};

pub const MOCK_MAC: &str = "AA:BB:CC:DD:EE:FF";

#[derive(Debug, Clone, Default)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn set(&self, ms: u64) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

pub struct MockBoard {
    pub clock: SimClock,
    pub delays: Vec<u64>,
    pub indicator: Vec<bool>,
    next_random: u32,
}

impl MockBoard {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            delays: Vec::new(),
            indicator: Vec::new(),
            next_random: 0xBEEF,
        }
    }
}

impl Board for MockBoard {
    fn now_ms(&self) -> u64 {
        self.clock.now()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.delays.push(ms);
        self.clock.advance(ms);
    }

    fn set_indicator(&mut self, lit: bool) {
        self.indicator.push(lit);
    }

    fn random_u32(&mut self) -> u32 {
        let value = self.next_random;
        self.next_random = self.next_random.wrapping_add(1);
        value
    }
}

/// Association succeeds for SSIDs in `accepts` once their delay has elapsed on
/// the shared clock.
pub struct MockWifi {
    clock: SimClock,
    pub visible: Vec<String>,
    pub accepts: HashMap<String, u64>,
    pub begins: Vec<String>,
    pub scans: Vec<String>,
    pub rssi: i32,
    pending: Option<(String, u64)>,
}

impl MockWifi {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            visible: Vec::new(),
            accepts: HashMap::new(),
            begins: Vec::new(),
            scans: Vec::new(),
            rssi: -55,
            pending: None,
        }
    }

    pub fn with_network(mut self, ssid: &str, associate_after_ms: u64) -> Self {
        self.visible.push(ssid.to_string());
        self.accepts.insert(ssid.to_string(), associate_after_ms);
        self
    }

    pub fn with_visible_only(mut self, ssid: &str) -> Self {
        self.visible.push(ssid.to_string());
        self
    }

    pub fn drop_link(&mut self) {
        self.pending = None;
    }

    pub fn associated_ssid(&self) -> Option<&str> {
        let (ssid, started) = self.pending.as_ref()?;
        let delay = self.accepts.get(ssid)?;
        (self.clock.now() >= started + delay).then_some(ssid.as_str())
    }
}

impl WifiPort for MockWifi {
    fn is_associated(&self) -> bool {
        self.associated_ssid().is_some()
    }

    fn is_visible(&mut self, ssid: &str) -> bool {
        self.scans.push(ssid.to_string());
        self.visible.iter().any(|candidate| candidate == ssid)
    }

    fn begin(&mut self, ssid: &str, _password: &str) -> Result<(), WifiError> {
        self.begins.push(ssid.to_string());
        self.pending = Some((ssid.to_string(), self.clock.now()));
        Ok(())
    }

    fn status(&self) -> WifiStatus {
        match (&self.pending, self.is_associated()) {
            (_, true) => WifiStatus::Connected,
            (Some(_), false) => WifiStatus::ConnectFailed,
            (None, false) => WifiStatus::Disconnected,
        }
    }

    fn mac_address(&self) -> String {
        MOCK_MAC.to_string()
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        self.is_associated().then_some(Ipv4Addr::new(192, 168, 1, 50))
    }

    fn rssi(&self) -> i32 {
        self.rssi
    }
}

#[derive(Default)]
pub struct MockMqtt {
    pub server: Option<(String, u16)>,
    pub connect_results: VecDeque<Result<(), MqttState>>,
    pub client_ids: Vec<String>,
    pub connected: bool,
    pub state: Option<MqttState>,
    pub fail_buffer: bool,
    pub buffer_size: Option<usize>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub failing_topics: Vec<String>,
    pub inbound: VecDeque<InboundMessage>,
}

impl MockMqtt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing(mut self, times: usize, state: MqttState) -> Self {
        self.connect_results.extend((0..times).map(|_| Err(state)));
        self
    }

    pub fn push_command(&mut self, topic: &str, payload: &str) {
        self.inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(candidate, _)| candidate == topic)
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

impl MqttPort for MockMqtt {
    fn set_server(&mut self, host: &str, port: u16) {
        self.server = Some((host.to_string(), port));
    }

    fn connect(&mut self, client_id: &str) -> Result<(), MqttError> {
        self.client_ids.push(client_id.to_string());
        match self.connect_results.pop_front().unwrap_or(Ok(())) {
            Ok(()) => {
                self.connected = true;
                self.state = Some(MqttState::Connected);
                Ok(())
            }
            Err(state) => {
                self.connected = false;
                self.state = Some(state);
                Err(MqttError::Session(state))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn state(&self) -> MqttState {
        self.state.unwrap_or(MqttState::Disconnected)
    }

    fn set_buffer_size(&mut self, size: usize) -> Result<(), MqttError> {
        if self.fail_buffer {
            return Err(MqttError::Allocation(size));
        }
        self.buffer_size = Some(size);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        if !self.connected {
            return Err(MqttError::Session(MqttState::Disconnected));
        }
        if self.failing_topics.iter().any(|failing| failing == topic) {
            return Err(MqttError::Client("scripted failure".to_string()));
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        self.inbound.drain(..).collect()
    }
}

pub struct MockSensor {
    queue: VecDeque<Result<Sample, SensorError>>,
    fallback: Option<Sample>,
    pub reads: usize,
}

impl MockSensor {
    pub fn new(script: impl IntoIterator<Item = Result<Sample, SensorError>>) -> Self {
        Self {
            queue: script.into_iter().collect(),
            fallback: None,
            reads: 0,
        }
    }

    pub fn steady(temp_c: f32, humidity: f32) -> Self {
        Self {
            queue: VecDeque::new(),
            fallback: Some(Sample { temp_c, humidity }),
            reads: 0,
        }
    }
}

impl SensorPort for MockSensor {
    fn read(&mut self) -> Result<Sample, SensorError> {
        self.reads += 1;
        match self.queue.pop_front() {
            Some(result) => result,
            None => self.fallback.ok_or(SensorError::NotResponding),
        }
    }
}

/// Records lifecycle callbacks so tests can inspect them after the handler
/// has been moved into the OTA port.
#[derive(Debug, Clone, Default)]
pub struct OtaLog(pub Arc<Mutex<Vec<String>>>);

impl OtaLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl OtaHandler for OtaLog {
    fn on_start(&mut self) {
        self.0.lock().unwrap().push("start".to_string());
    }

    fn on_progress(&mut self, written: u64, total: Option<u64>) {
        self.0
            .lock()
            .unwrap()
            .push(format!("progress {written}/{total:?}"));
    }

    fn on_end(&mut self) {
        self.0.lock().unwrap().push("end".to_string());
    }

    fn on_error(&mut self, error: &OtaError) {
        self.0.lock().unwrap().push(format!("error {error}"));
    }
}

#[derive(Default)]
pub struct MockOta {
    pub hostname: Option<String>,
    pub handled: usize,
    handler: Option<Box<dyn OtaHandler>>,
}

impl MockOta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay an update through the registered handler.
    pub fn simulate_update(&mut self, total: u64, failure: Option<OtaError>) {
        let Some(handler) = self.handler.as_mut() else {
            return;
        };
        handler.on_start();
        handler.on_progress(total / 2, Some(total));
        match failure {
            Some(error) => handler.on_error(&error),
            None => {
                handler.on_progress(total, Some(total));
                handler.on_end();
            }
        }
    }
}

impl OtaPort for MockOta {
    fn begin(&mut self, hostname: &str, handler: Box<dyn OtaHandler>) -> Result<(), OtaError> {
        self.hostname = Some(hostname.to_string());
        self.handler = Some(handler);
        Ok(())
    }

    fn handle(&mut self) {
        self.handled += 1;
    }
}
