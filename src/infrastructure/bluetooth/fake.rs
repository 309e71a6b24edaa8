//! Simulated VisionAir unit for tests.

use crate::domain::error::TransportError;
use crate::domain::models::{AirflowMode, DeviceAddress, DeviceStatus, ScannedDevice};
use crate::infrastructure::bluetooth::protocol::{
    airflow_mode_byte, airflow_mode_from_byte, checksum, frame, setting, StatusRequest, MAGIC,
    FLAG_BOOST, FLAG_PREHEAT, FLAG_SUMMER_LIMIT, OP_COMMAND, OP_STATUS_REQUEST, TAG_DEVICE_STATE,
    TAG_PROBE_SENSORS, TAG_REMOTE_SENSOR, TEMP_NOT_INSTALLED,
};
use crate::infrastructure::bluetooth::transport::{BleAdapter, GattLink};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
struct Behaviour {
    unreachable: bool,
    silent: bool,
    ignore_commands: bool,
    /// Answer this request with a device state frame instead
    misanswer: Option<StatusRequest>,
    /// Answer every status request with a frame of this unknown tag
    unknown_tag: Option<u8>,
    reply_delay: Duration,
}

pub fn sample_status() -> DeviceStatus {
    DeviceStatus {
        temp_remote: Some(21.3),
        temp_probe1: Some(12.5),
        temp_probe2: None,
        humidity_remote: 48,
        airflow_mode: AirflowMode::Medium,
        airflow_rate: 160,
        boost_active: false,
        preheat_enabled: true,
        preheat_temp: 16,
        holiday_days: 0,
        summer_limit_enabled: false,
        filter_days: 200,
    }
}

fn airflow_rate_for(mode: AirflowMode) -> u16 {
    match mode {
        AirflowMode::Low => 110,
        AirflowMode::Medium => 160,
        AirflowMode::High => 230,
    }
}

fn raw_temperature(t: Option<f32>) -> [u8; 2] {
    let raw = t.map_or(TEMP_NOT_INSTALLED, |t| (t * 10.0).round() as i16);
    raw.to_le_bytes()
}

/// Device side of the simulation. Shared between the adapter and the test.
pub struct FakeDevice {
    status: Mutex<DeviceStatus>,
    behaviour: Mutex<Behaviour>,
    requests: Mutex<Vec<Vec<u8>>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub open_sessions: AtomicUsize,
    pub max_open_sessions: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Self::with_status(sample_status())
    }

    pub fn with_status(status: DeviceStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            behaviour: Mutex::new(Behaviour::default()),
            requests: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            open_sessions: AtomicUsize::new(0),
            max_open_sessions: AtomicUsize::new(0),
        })
    }

    pub fn status(&self) -> DeviceStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.behaviour.lock().unwrap().unreachable = !reachable;
    }

    pub fn set_silent(&self, silent: bool) {
        self.behaviour.lock().unwrap().silent = silent;
    }

    pub fn set_ignore_commands(&self, ignore: bool) {
        self.behaviour.lock().unwrap().ignore_commands = ignore;
    }

    pub fn set_misanswer(&self, kind: Option<StatusRequest>) {
        self.behaviour.lock().unwrap().misanswer = kind;
    }

    pub fn set_unknown_tag(&self, tag: Option<u8>) {
        self.behaviour.lock().unwrap().unknown_tag = tag;
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        self.behaviour.lock().unwrap().reply_delay = delay;
    }

    /// Every frame written by the host so far.
    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    /// Opcode and first payload byte of every request.
    pub fn request_kinds(&self) -> Vec<(u8, u8)> {
        self.requests().iter().map(|r| (r[2], r[3])).collect()
    }

    fn behaviour(&self) -> Behaviour {
        self.behaviour.lock().unwrap().clone()
    }

    fn device_state_frame(status: &DeviceStatus) -> Vec<u8> {
        let mut flags = 0;
        if status.boost_active {
            flags |= FLAG_BOOST;
        }
        if status.preheat_enabled {
            flags |= FLAG_PREHEAT;
        }
        if status.summer_limit_enabled {
            flags |= FLAG_SUMMER_LIMIT;
        }
        let filter = status.filter_days.to_le_bytes();
        let rate = status.airflow_rate.to_le_bytes();
        frame(
            TAG_DEVICE_STATE,
            &[
                airflow_mode_byte(status.airflow_mode),
                flags,
                status.preheat_temp,
                status.holiday_days,
                filter[0],
                filter[1],
                rate[0],
                rate[1],
            ],
        )
    }

    fn reply_for(&self, kind: u8) -> Vec<u8> {
        let behaviour = self.behaviour();
        if let Some(tag) = behaviour.unknown_tag {
            return frame(tag, &[0x00]);
        }

        let status = self.status();
        let misanswered = behaviour
            .misanswer
            .is_some_and(|k| k.reply_tag() == kind);
        if misanswered {
            return Self::device_state_frame(&status);
        }

        match kind {
            TAG_PROBE_SENSORS => {
                let p1 = raw_temperature(status.temp_probe1);
                let p2 = raw_temperature(status.temp_probe2);
                frame(TAG_PROBE_SENSORS, &[p1[0], p1[1], p2[0], p2[1]])
            }
            TAG_REMOTE_SENSOR => {
                let t = raw_temperature(status.temp_remote);
                frame(TAG_REMOTE_SENSOR, &[t[0], t[1], status.humidity_remote])
            }
            _ => Self::device_state_frame(&status),
        }
    }

    fn apply(&self, id: u8, value: u8) {
        if self.behaviour().ignore_commands {
            return;
        }
        let mut status = self.status.lock().unwrap();
        match id {
            setting::AIRFLOW_MODE => {
                if let Ok(mode) = airflow_mode_from_byte(value) {
                    status.airflow_mode = mode;
                    status.airflow_rate = airflow_rate_for(mode);
                }
            }
            setting::BOOST => status.boost_active = value != 0,
            setting::PREHEAT => status.preheat_enabled = value != 0,
            setting::PREHEAT_TEMP => status.preheat_temp = value,
            setting::HOLIDAY => status.holiday_days = value,
            setting::SUMMER_LIMIT => status.summer_limit_enabled = value != 0,
            _ => {}
        }
    }

    /// Handle one host frame and return the reply the unit would notify.
    fn handle(&self, request: &[u8]) -> Option<Vec<u8>> {
        self.requests.lock().unwrap().push(request.to_vec());

        let valid = request.len() >= 5
            && request[..2] == MAGIC
            && checksum(&request[..request.len() - 1]) == request[request.len() - 1];
        if !valid {
            return None;
        }

        match request[2] {
            OP_STATUS_REQUEST => Some(self.reply_for(request[3])),
            OP_COMMAND if request.len() >= 6 => {
                self.apply(request[3], request[4]);
                Some(Self::device_state_frame(&self.status()))
            }
            _ => None,
        }
    }
}

pub struct FakeAdapter {
    device: Arc<FakeDevice>,
    advertised: Vec<ScannedDevice>,
}

impl FakeAdapter {
    pub fn new(device: Arc<FakeDevice>) -> Self {
        Self {
            device,
            advertised: Vec::new(),
        }
    }

    pub fn with_advertised(mut self, advertised: Vec<ScannedDevice>) -> Self {
        self.advertised = advertised;
        self
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    type Link = FakeLink;

    async fn connect(&self, address: DeviceAddress) -> Result<FakeLink, TransportError> {
        if self.device.behaviour().unreachable {
            return Err(TransportError::NotFound(format!("{} is not advertising", address)));
        }
        self.device.connects.fetch_add(1, Ordering::SeqCst);
        let open = self.device.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.device.max_open_sessions.fetch_max(open, Ordering::SeqCst);

        Ok(FakeLink {
            device: self.device.clone(),
            pending: VecDeque::new(),
            connected: true,
        })
    }

    async fn discover(&self, _duration: Duration) -> Result<Vec<ScannedDevice>, TransportError> {
        Ok(self.advertised.clone())
    }
}

pub struct FakeLink {
    device: Arc<FakeDevice>,
    pending: VecDeque<Vec<u8>>,
    connected: bool,
}

#[async_trait]
impl GattLink for FakeLink {
    async fn write_request(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::Closed);
        }
        if let Some(reply) = self.device.handle(payload) {
            self.pending.push_back(reply);
        }
        Ok(())
    }

    async fn next_notification(&mut self) -> Result<Vec<u8>, TransportError> {
        let behaviour = self.device.behaviour();
        if behaviour.silent {
            std::future::pending::<()>().await;
        }
        if !behaviour.reply_delay.is_zero() {
            tokio::time::sleep(behaviour.reply_delay).await;
        }
        match self.pending.pop_front() {
            Some(reply) => Ok(reply),
            None => {
                std::future::pending::<()>().await;
                Err(TransportError::Closed)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.device.open_sessions.fetch_sub(1, Ordering::SeqCst);
            self.device.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
