//! Sensor link to the EEG headset.
//!
//! Scans candidate serial ports for a headset, then runs a background
//! read loop that decodes samples and publishes the latest value per
//! channel. Readers never block and never observe a torn value.

#[cfg(feature = "test-source")]
pub mod sim;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::core::{SampleValue, SensorChannel, CHANNEL_COUNT};

/// Serial link settings for the headset.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Candidate serial ports, tried in order
    pub port_candidates: Vec<String>,
    /// Baud rate; the headset speaks 57600 only
    pub baud: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port_candidates: default_port_candidates(),
            baud: 57600,
        }
    }
}

/// The nine serial ports the headset dongle commonly enumerates on.
pub fn default_port_candidates() -> Vec<String> {
    if cfg!(windows) {
        (1..=9).map(|i| format!("COM{i}")).collect()
    } else {
        (0..9).map(|i| format!("/dev/ttyUSB{i}")).collect()
    }
}

/// Identifies one sensor connection; unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor-{}", self.0)
    }
}

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Trying candidate ports
    Scanning,
    /// Port open, read loop not yet running
    Connected,
    /// Background read loop running
    Streaming,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Scanning => "scanning",
            LinkState::Connected => "connected",
            LinkState::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Errors from the sensor link.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("no headset found on any candidate port")]
    NoDeviceFound,
    #[error("port {port}: {message}")]
    Port { port: String, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The background read thread could not be started.
    #[error("failed to start the sensor read thread")]
    Thread(#[source] io::Error),
}

/// Driver for the headset wire protocol.
///
/// Implementations own the physical device. `read_sample` must return
/// within a bounded interval, answering `Ok(None)` when nothing arrived
/// in time, so the read loop can observe shutdown. A failed `connect`
/// must leave the driver reusable for the next candidate port.
pub trait SensorDriver: Send + 'static {
    /// Open the device on `port` at `baud`.
    fn connect(&mut self, port: &str, baud: u32) -> Result<(), SensorError>;

    /// Poll for the next decoded sample.
    fn read_sample(&mut self) -> Result<Option<SampleValue>, SensorError>;

    /// Release the device. Called once, after the last read.
    fn disconnect(&mut self);
}

/// Lock-free last-value store, one cell per channel.
///
/// Values are stored as f32 bits in an `AtomicU32`, so a write can
/// never be torn. The `seen` flag orders the first publication.
#[derive(Debug)]
struct ChannelStore {
    values: [AtomicU32; CHANNEL_COUNT],
    stamps: [AtomicU64; CHANNEL_COUNT],
    seen: [AtomicBool; CHANNEL_COUNT],
}

impl ChannelStore {
    fn new() -> Self {
        Self {
            values: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
            stamps: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            seen: [
                AtomicBool::new(false),
                AtomicBool::new(false),
                AtomicBool::new(false),
            ],
        }
    }

    fn update(&self, sample: &SampleValue) {
        let i = sample.channel as usize;
        self.values[i].store(sample.value.to_bits(), Ordering::Relaxed);
        self.stamps[i].store(sample.timestamp_us, Ordering::Relaxed);
        self.seen[i].store(true, Ordering::Release);
    }

    fn read(&self, channel: SensorChannel) -> f32 {
        f32::from_bits(self.values[channel as usize].load(Ordering::Relaxed))
    }

    fn last(&self, channel: SensorChannel) -> Option<SampleValue> {
        let i = channel as usize;
        if !self.seen[i].load(Ordering::Acquire) {
            return None;
        }
        Some(SampleValue::new(
            channel,
            f32::from_bits(self.values[i].load(Ordering::Relaxed)),
            self.stamps[i].load(Ordering::Relaxed),
        ))
    }
}

/// Cloneable read handle over a link's channel store.
///
/// Reads return the channel default (0) until the first sample lands,
/// and keep returning the last published value after the link
/// disconnects.
#[derive(Clone)]
pub struct SensorReader {
    store: Arc<ChannelStore>,
}

impl SensorReader {
    /// Reader with no backing link; every channel reads as default.
    pub fn detached() -> Self {
        Self {
            store: Arc::new(ChannelStore::new()),
        }
    }

    /// Latest value for `channel`, 0.0 before the first sample.
    pub fn read(&self, channel: SensorChannel) -> f32 {
        self.store.read(channel)
    }

    /// Latest full sample for `channel`, None before the first one.
    pub fn last_sample(&self, channel: SensorChannel) -> Option<SampleValue> {
        self.store.last(channel)
    }
}

/// Handle to a connected headset.
///
/// `connect` scans the candidate ports in order and starts the read
/// loop on the first port that answers. Dropping the link disconnects.
#[derive(Debug)]
pub struct SensorLink {
    id: ConnectionId,
    port: String,
    state: LinkState,
    store: Arc<ChannelStore>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SensorLink {
    /// Scan for a headset and start streaming samples from it.
    pub fn connect(
        mut driver: Box<dyn SensorDriver>,
        config: &SensorConfig,
    ) -> Result<Self, SensorError> {
        let id = ConnectionId::next();
        debug!(
            "{} {}: trying {} candidate ports",
            id,
            LinkState::Scanning,
            config.port_candidates.len()
        );

        let mut port = None;
        for candidate in &config.port_candidates {
            match driver.connect(candidate, config.baud) {
                Ok(()) => {
                    port = Some(candidate.clone());
                    break;
                }
                Err(e) => debug!("{}: no headset on {}: {}", id, candidate, e),
            }
        }
        let Some(port) = port else {
            return Err(SensorError::NoDeviceFound);
        };
        info!("{}: headset on {} at {} baud", id, port, config.baud);

        let mut link = Self {
            id,
            port,
            state: LinkState::Connected,
            store: Arc::new(ChannelStore::new()),
            running: Arc::new(AtomicBool::new(true)),
            thread: None,
        };

        let store = link.store.clone();
        let running = link.running.clone();
        // The driver crosses to the thread via the channel so a failed
        // spawn can still disconnect it
        let (driver_tx, driver_rx) = std::sync::mpsc::channel::<Box<dyn SensorDriver>>();
        let spawned = thread::Builder::new()
            .name("sensor-read".into())
            .spawn(move || {
                if let Ok(driver) = driver_rx.recv() {
                    run_read_loop(driver, store, running);
                }
            });
        match spawned {
            Ok(handle) => {
                // The thread is parked on recv until this send
                let _ = driver_tx.send(driver);
                link.thread = Some(handle);
                link.state = LinkState::Streaming;
                Ok(link)
            }
            Err(e) => {
                driver.disconnect();
                Err(SensorError::Thread(e))
            }
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Port the headset answered on.
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// A read handle that stays valid (serving last values) after
    /// disconnect.
    pub fn reader(&self) -> SensorReader {
        SensorReader {
            store: self.store.clone(),
        }
    }

    /// Stop the read loop and release the device. Idempotent.
    pub fn disconnect(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("{}: read thread panicked", self.id);
            }
            info!("{}: disconnected", self.id);
        }
        self.state = LinkState::Disconnected;
    }
}

impl Drop for SensorLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Poll the driver until shutdown, publishing every decoded sample.
fn run_read_loop(
    mut driver: Box<dyn SensorDriver>,
    store: Arc<ChannelStore>,
    running: Arc<AtomicBool>,
) {
    let mut samples = 0u64;
    while running.load(Ordering::Relaxed) {
        match driver.read_sample() {
            Ok(Some(sample)) => {
                store.update(&sample);
                samples += 1;
                if samples % 1000 == 0 {
                    debug!("Sensor stream: {} samples", samples);
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Sensor read failed, stopping stream: {}", e);
                break;
            }
        }
    }
    driver.disconnect();
    debug!("Sensor read loop finished after {} samples", samples);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Driver that answers on one specific port, then serves a scripted
    /// sample queue.
    struct ScriptedDriver {
        answers_on: String,
        attempted: Arc<Mutex<Vec<String>>>,
        samples: Vec<SampleValue>,
        disconnects: Arc<AtomicUsize>,
    }

    impl ScriptedDriver {
        fn new(answers_on: &str, samples: Vec<SampleValue>) -> Self {
            Self {
                answers_on: answers_on.to_string(),
                attempted: Arc::new(Mutex::new(Vec::new())),
                samples,
                disconnects: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SensorDriver for ScriptedDriver {
        fn connect(&mut self, port: &str, baud: u32) -> Result<(), SensorError> {
            self.attempted.lock().unwrap().push(port.to_string());
            if port == self.answers_on && baud == 57600 {
                Ok(())
            } else {
                Err(SensorError::Port {
                    port: port.to_string(),
                    message: "no answer".to_string(),
                })
            }
        }

        fn read_sample(&mut self) -> Result<Option<SampleValue>, SensorError> {
            thread::sleep(Duration::from_millis(1));
            if self.samples.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.samples.remove(0)))
            }
        }

        fn disconnect(&mut self) {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn config(ports: &[&str]) -> SensorConfig {
        SensorConfig {
            port_candidates: ports.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn scan_tries_ports_in_order_and_stops_at_first_answer() {
        let driver = ScriptedDriver::new("COM3", vec![]);
        let attempted = driver.attempted.clone();
        let disconnects = driver.disconnects.clone();

        let cfg = config(&["COM1", "COM2", "COM3", "COM4", "COM5"]);
        let link = SensorLink::connect(Box::new(driver), &cfg).unwrap();

        assert_eq!(*attempted.lock().unwrap(), vec!["COM1", "COM2", "COM3"]);
        assert_eq!(link.port(), "COM3");
        assert_eq!(link.state(), LinkState::Streaming);

        drop(link);
        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn exhausted_scan_reports_no_device() {
        let driver = ScriptedDriver::new("nowhere", vec![]);
        let attempted = driver.attempted.clone();

        let cfg = config(&["COM1", "COM2"]);
        let err = SensorLink::connect(Box::new(driver), &cfg).unwrap_err();

        assert!(matches!(err, SensorError::NoDeviceFound));
        assert_eq!(attempted.lock().unwrap().len(), 2);
    }

    #[test]
    fn samples_flow_to_the_reader() {
        let driver = ScriptedDriver::new(
            "COM1",
            vec![
                SampleValue::new(SensorChannel::Attention, 57.0, 100),
                SampleValue::new(SensorChannel::Meditation, 43.0, 200),
            ],
        );
        let mut link = SensorLink::connect(Box::new(driver), &config(&["COM1"])).unwrap();
        let reader = link.reader();

        assert!(wait_until(Duration::from_secs(2), || {
            reader.last_sample(SensorChannel::Meditation).is_some()
        }));

        assert_eq!(reader.read(SensorChannel::Attention), 57.0);
        assert_eq!(reader.read(SensorChannel::Meditation), 43.0);
        // Never reported, stays at the default
        assert_eq!(reader.read(SensorChannel::SignalQuality), 0.0);
        assert_eq!(
            reader.last_sample(SensorChannel::Attention).unwrap().timestamp_us,
            100
        );

        link.disconnect();
    }

    #[test]
    fn disconnect_is_idempotent_and_keeps_last_values() {
        let driver = ScriptedDriver::new(
            "COM1",
            vec![SampleValue::new(SensorChannel::Attention, 88.0, 7)],
        );
        let disconnects = driver.disconnects.clone();
        let mut link = SensorLink::connect(Box::new(driver), &config(&["COM1"])).unwrap();
        let reader = link.reader();

        assert!(wait_until(Duration::from_secs(2), || {
            reader.last_sample(SensorChannel::Attention).is_some()
        }));

        link.disconnect();
        link.disconnect();
        drop(link);

        assert_eq!(disconnects.load(Ordering::Relaxed), 1);
        assert_eq!(reader.read(SensorChannel::Attention), 88.0);
    }

    #[test]
    fn reader_defaults_before_first_sample() {
        let reader = SensorReader::detached();
        for channel in SensorChannel::ALL {
            assert_eq!(reader.read(channel), 0.0);
            assert!(reader.last_sample(channel).is_none());
        }
    }

    #[test]
    fn connection_ids_are_unique() {
        let a = SensorLink::connect(
            Box::new(ScriptedDriver::new("COM1", vec![])),
            &config(&["COM1"]),
        )
        .unwrap();
        let b = SensorLink::connect(
            Box::new(ScriptedDriver::new("COM1", vec![])),
            &config(&["COM1"]),
        )
        .unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn thread_error_carries_the_os_source() {
        let err = SensorError::Thread(io::Error::new(io::ErrorKind::WouldBlock, "no threads"));
        assert_eq!(err.to_string(), "failed to start the sensor read thread");
        assert!(std::error::Error::source(&err).is_some());
    }
}
