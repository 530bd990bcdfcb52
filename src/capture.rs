use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::CameraEntry;
use crate::errors::{CameraServerError, Result};

/// Target capture cadence; the loop never polls the device faster than this.
pub const CAPTURE_INTERVAL: Duration = Duration::from_millis(33);
/// Backoff after a failed read, so a dead device does not busy-spin.
pub const READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Consecutive failures before the source reports Offline.
const OFFLINE_THRESHOLD: u32 = 3;
/// Consecutive failures before the source reports Error. The loop keeps
/// retrying past this point so a replugged device recovers on its own.
const ERROR_THRESHOLD: u32 = 10;
/// Upper bound on waiting for the capture thread to exit in `stop()`.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A decoded RGB frame as read from a device.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Row-major RGB8 pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceControl {
    Brightness,
    Exposure,
    WhiteBalance,
}

/// One opened video device. Implementations block in `read_frame`.
pub trait VideoDevice: Send {
    fn read_frame(&mut self) -> Result<Frame>;
    fn resolution(&self) -> (u32, u32);
    /// Current control value; `None` when the device does not expose the
    /// control. A value of exactly zero is reported as `Some(0.0)`.
    fn control(&self, control: DeviceControl) -> Option<f64>;
    fn set_control(&mut self, control: DeviceControl, value: f64) -> Result<()>;
}

/// Factory for opening devices by index. The indirection keeps device
/// access testable and makes discovery share the same open path as capture.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, index: u32, resolution: Option<(u32, u32)>) -> Result<Box<dyn VideoDevice>>;
    /// Device indices visible without opening anything (e.g. `/dev/video*`).
    fn visible_indices(&self) -> Vec<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraState {
    Starting,
    Online,
    Offline,
    Error,
    Stopped,
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CameraState::Starting => "starting",
            CameraState::Online => "online",
            CameraState::Offline => "offline",
            CameraState::Error => "error",
            CameraState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

struct StateInfo {
    state: CameraState,
    message: String,
}

struct SourceShared {
    latest_frame: Mutex<Option<Frame>>,
    frame_ready: Condvar,
    state: Mutex<StateInfo>,
    subscribers: AtomicUsize,
    running: AtomicBool,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SourceShared {
    fn set_state(&self, state: CameraState, message: impl Into<String>) {
        let mut info = lock_unpoisoned(&self.state);
        info.state = state;
        info.message = message.into();
    }
}

/// Background frame grabber for a single video device.
///
/// Owns the device handle exclusively: the capture thread is the only code
/// that touches it, publishing each frame into a mutex-guarded slot that
/// holds only the newest frame. Readers get private copies.
pub struct CameraSource {
    pub id: String,
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    shared: Arc<SourceShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CameraSource {
    /// Open the device for `entry` and start its capture loop. On failure
    /// no source is created; the caller logs and skips this camera.
    pub fn open(entry: &CameraEntry, backend: &dyn CaptureBackend) -> Result<Self> {
        let requested = match (entry.width, entry.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        };
        let mut device = backend.open(entry.device, requested)?;

        apply_controls(device.as_mut(), entry);
        let (width, height) = device.resolution();

        let shared = Arc::new(SourceShared {
            latest_frame: Mutex::new(None),
            frame_ready: Condvar::new(),
            state: Mutex::new(StateInfo {
                state: CameraState::Starting,
                message: "starting".to_string(),
            }),
            subscribers: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        });

        let loop_shared = shared.clone();
        let camera_id = entry.id.clone();
        let thread = std::thread::Builder::new()
            .name(format!("capture-{}", entry.id))
            .spawn(move || capture_loop(camera_id, device, loop_shared))?;

        info!(
            "Opened camera '{}' on device {} at {}x{}",
            entry.id, entry.device, width, height
        );

        Ok(Self {
            id: entry.id.clone(),
            device_index: entry.device,
            width,
            height,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Copy of the latest frame, or `None` if nothing was captured yet.
    /// With `wait` set, blocks up to `timeout` for the first frame.
    pub fn get_frame(&self, wait: bool, timeout: Duration) -> Option<Frame> {
        let guard = lock_unpoisoned(&self.shared.latest_frame);
        if guard.is_some() || !wait {
            return guard.clone();
        }
        let (guard, _timed_out) = self
            .shared
            .frame_ready
            .wait_timeout_while(guard, timeout, |slot| slot.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.clone()
    }

    pub fn subscribe(&self) {
        self.shared.subscribers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unsubscribe(&self) {
        // Saturating decrement; the count must never go negative even if a
        // guard is dropped twice by mistake.
        let _ = self
            .shared
            .subscribers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> (CameraState, String) {
        let info = lock_unpoisoned(&self.shared.state);
        (info.state, info.message.clone())
    }

    /// Signal the capture loop to exit, wait for it (bounded), release the
    /// device. Idempotent, and safe if the loop never ran.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = lock_unpoisoned(&self.thread).take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // The thread is stuck in a device read; it will exit and
                // release the device on its own once the read returns.
                warn!("Capture thread for '{}' did not stop within timeout", self.id);
            }
        }
        self.shared.set_state(CameraState::Stopped, "stopped");
        debug!("Camera '{}' stopped", self.id);
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_controls(device: &mut dyn VideoDevice, entry: &CameraEntry) {
    let controls = [
        (DeviceControl::Brightness, entry.brightness),
        (DeviceControl::Exposure, entry.exposure),
        (DeviceControl::WhiteBalance, entry.white_balance),
    ];
    for (control, value) in controls {
        if let Some(value) = value {
            if let Err(e) = device.set_control(control, value) {
                warn!("Camera '{}': could not set {:?}: {}", entry.id, control, e);
            }
        }
    }
}

fn capture_loop(camera_id: String, mut device: Box<dyn VideoDevice>, shared: Arc<SourceShared>) {
    let mut consecutive_failures: u32 = 0;

    while shared.running.load(Ordering::SeqCst) {
        match device.read_frame() {
            Ok(frame) => {
                if consecutive_failures > 0 {
                    info!("Camera '{}' recovered after {} failed reads", camera_id, consecutive_failures);
                }
                consecutive_failures = 0;
                // State flips to Online before the frame is published, so a
                // waiter woken by the first frame never observes Starting.
                shared.set_state(CameraState::Online, "capturing");
                {
                    let mut slot = lock_unpoisoned(&shared.latest_frame);
                    *slot = Some(frame);
                }
                shared.frame_ready.notify_all();
                std::thread::sleep(CAPTURE_INTERVAL);
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                if consecutive_failures == OFFLINE_THRESHOLD {
                    warn!("Camera '{}' offline: {}", camera_id, e);
                }
                if consecutive_failures >= ERROR_THRESHOLD {
                    if consecutive_failures == ERROR_THRESHOLD {
                        error!("Camera '{}' in error state after {} failed reads", camera_id, consecutive_failures);
                    }
                    shared.set_state(CameraState::Error, e.to_string());
                } else if consecutive_failures >= OFFLINE_THRESHOLD {
                    shared.set_state(CameraState::Offline, e.to_string());
                }
                std::thread::sleep(READ_RETRY_BACKOFF);
            }
        }
    }
    // Dropping the device here releases the handle.
    debug!("Capture loop for '{}' exited", camera_id);
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Scripted device: yields the listed frames in order, then fails
    /// every read. Mirrors how the capture code is exercised without
    /// hardware.
    pub struct FakeDevice {
        pub frames: std::sync::Mutex<Vec<Frame>>,
        pub repeat_last: bool,
        pub width: u32,
        pub height: u32,
        pub controls: HashMap<&'static str, f64>,
    }

    impl FakeDevice {
        pub fn rgb_frame(width: u32, height: u32) -> Frame {
            Frame {
                width,
                height,
                data: vec![0u8; (width * height * 3) as usize],
            }
        }
    }

    impl VideoDevice for FakeDevice {
        fn read_frame(&mut self) -> Result<Frame> {
            let mut frames = self.frames.lock().unwrap();
            if frames.is_empty() {
                return Err(CameraServerError::read_failure("no frame"));
            }
            if self.repeat_last && frames.len() == 1 {
                return Ok(frames[0].clone());
            }
            Ok(frames.remove(0))
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn control(&self, control: DeviceControl) -> Option<f64> {
            let key = match control {
                DeviceControl::Brightness => "brightness",
                DeviceControl::Exposure => "exposure",
                DeviceControl::WhiteBalance => "white_balance",
            };
            self.controls.get(key).copied()
        }

        fn set_control(&mut self, _control: DeviceControl, _value: f64) -> Result<()> {
            Ok(())
        }
    }

    /// Registry-driven backend: index -> scripted device description.
    #[derive(Default)]
    pub struct FakeBackend {
        pub devices: std::sync::Mutex<HashMap<u32, FakeDeviceSpec>>,
        pub visible: std::sync::Mutex<Vec<u32>>,
    }

    #[derive(Clone)]
    pub struct FakeDeviceSpec {
        pub opens: bool,
        pub frame_count: usize,
        pub repeat_last: bool,
        pub width: u32,
        pub height: u32,
        pub controls: HashMap<&'static str, f64>,
    }

    impl Default for FakeDeviceSpec {
        fn default() -> Self {
            Self {
                opens: true,
                frame_count: 0,
                repeat_last: false,
                width: 8,
                height: 8,
                controls: HashMap::new(),
            }
        }
    }

    impl FakeBackend {
        pub fn with_device(index: u32, spec: FakeDeviceSpec) -> Self {
            let backend = Self::default();
            backend.devices.lock().unwrap().insert(index, spec);
            backend
        }

        pub fn insert(&self, index: u32, spec: FakeDeviceSpec) {
            self.devices.lock().unwrap().insert(index, spec);
        }
    }

    impl CaptureBackend for FakeBackend {
        fn open(&self, index: u32, _resolution: Option<(u32, u32)>) -> Result<Box<dyn VideoDevice>> {
            let spec = self
                .devices
                .lock()
                .unwrap()
                .get(&index)
                .cloned()
                .ok_or_else(|| CameraServerError::device_unavailable(index, "no such device"))?;
            if !spec.opens {
                return Err(CameraServerError::device_unavailable(index, "open refused"));
            }
            let frames = (0..spec.frame_count)
                .map(|_| FakeDevice::rgb_frame(spec.width, spec.height))
                .collect();
            Ok(Box::new(FakeDevice {
                frames: std::sync::Mutex::new(frames),
                repeat_last: spec.repeat_last,
                width: spec.width,
                height: spec.height,
                controls: spec.controls,
            }))
        }

        fn visible_indices(&self) -> Vec<u32> {
            self.visible.lock().unwrap().clone()
        }
    }

    pub fn entry(id: &str, device: u32) -> CameraEntry {
        CameraEntry {
            id: id.to_string(),
            name: id.to_string(),
            device,
            port: None,
            width: None,
            height: None,
            brightness: None,
            exposure: None,
            white_balance: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn open_fails_when_device_unavailable() {
        let backend = FakeBackend::with_device(
            0,
            FakeDeviceSpec {
                opens: false,
                ..Default::default()
            },
        );
        let Err(err) = CameraSource::open(&entry("cam0", 0), &backend) else {
            panic!("open succeeded for a device that refuses to open");
        };
        assert!(matches!(err, CameraServerError::DeviceUnavailable { .. }));
    }

    #[test]
    fn get_frame_returns_none_when_device_yields_nothing() {
        let backend = FakeBackend::with_device(
            0,
            FakeDeviceSpec {
                frame_count: 0,
                ..Default::default()
            },
        );
        let source = CameraSource::open(&entry("cam0", 0), &backend).unwrap();
        assert!(source.get_frame(false, Duration::ZERO).is_none());
        // Waiting cannot produce a frame either, only a timeout.
        assert!(source.get_frame(true, Duration::from_millis(50)).is_none());
        source.stop();
    }

    #[test]
    fn first_frame_arrives_and_is_copied_out() {
        let backend = FakeBackend::with_device(
            0,
            FakeDeviceSpec {
                frame_count: 1,
                repeat_last: true,
                width: 4,
                height: 2,
                ..Default::default()
            },
        );
        let source = CameraSource::open(&entry("cam0", 0), &backend).unwrap();
        let frame = source.get_frame(true, Duration::from_secs(2)).expect("frame");
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        let (state, _) = source.state();
        assert_eq!(state, CameraState::Online);
        source.stop();
    }

    #[test]
    fn subscriber_count_never_goes_negative() {
        let backend = FakeBackend::with_device(0, FakeDeviceSpec::default());
        let source = CameraSource::open(&entry("cam0", 0), &backend).unwrap();
        source.subscribe();
        source.unsubscribe();
        source.unsubscribe();
        assert_eq!(source.subscriber_count(), 0);
        source.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let backend = FakeBackend::with_device(0, FakeDeviceSpec::default());
        let source = CameraSource::open(&entry("cam0", 0), &backend).unwrap();
        source.stop();
        source.stop();
        let (state, _) = source.state();
        assert_eq!(state, CameraState::Stopped);
    }

    #[test]
    fn failing_device_transitions_to_error_state() {
        let backend = FakeBackend::with_device(
            0,
            FakeDeviceSpec {
                frame_count: 0,
                ..Default::default()
            },
        );
        let source = CameraSource::open(&entry("cam0", 0), &backend).unwrap();
        // 10 failures at 100ms backoff each; allow some slack.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let (state, _) = source.state();
            if state == CameraState::Error {
                break;
            }
            assert!(Instant::now() < deadline, "never reached Error state");
            std::thread::sleep(Duration::from_millis(50));
        }
        // Error sources still answer reads with None rather than failing.
        assert!(source.get_frame(false, Duration::ZERO).is_none());
        source.stop();
    }
}
