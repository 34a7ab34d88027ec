//! Simulated camera driver.
//!
//! `MockCameraSdk` behaves like a PVCAM camera in continuous mode closely enough to
//! exercise the whole probe without hardware:
//!
//! - `start_continuous` spawns a notification thread that, every `frame_interval`,
//!   writes a frame stamp into the next slot of the caller's buffer and invokes the
//!   registered end-of-frame callback.
//! - The device keeps a small ready queue. Each notified frame adds to it and a
//!   successful `fetch_latest_frame` drains it. When it is full the device stops
//!   notifying, which is how a real camera stalls when the callback forgets to fetch.
//! - Stalls, dropped frames, fetch failures, null frame-info pointers and setup
//!   failures can be injected through [`MockBehavior`].
//!
//! Every call that matters for teardown is counted; see [`MockStats`].

use super::{
    BufferPolicy, CameraHandle, CameraSdk, EofCallback, ExposureMode, FrameInfo, LatestFrame,
    NegotiatedMode, Region, EXT_TRIG_INTERNAL,
};
use crate::error::{SdkError, SetupStage};
use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Error code returned for failures injected through [`MockBehavior::fail_stage`].
pub const INJECTED_FAILURE: i32 = 3001;
/// Error code for calls against a handle that is not open.
pub const UNKNOWN_HANDLE: i32 = 3002;
/// Error code for a fetch with nothing new in the ready queue.
pub const NO_NEW_FRAME: i32 = 3003;
/// Error code for a fetch failure injected through [`MockBehavior::fail_fetch_on`].
pub const FETCH_FAILED: i32 = 3004;
/// Error code for invalid arguments (bad region, short buffer, unknown camera).
pub const INVALID_ARGUMENT: i32 = 3005;
/// Error code for starting an acquisition that is already running or not set up.
pub const INVALID_STATE: i32 = 3006;

/// How the simulated camera behaves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MockBehavior {
    /// Names reported by `enumerate_cameras` and accepted by `open`.
    pub cameras: Vec<String>,
    /// Time between frames.
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    /// Stop notifying after this many frames, without reporting anything.
    pub stop_after: Option<u32>,
    /// 1-based frame numbers whose latest-frame fetch fails.
    pub fail_fetch_on: Vec<i32>,
    /// 1-based frame numbers delivered with a null frame-info pointer.
    pub null_info_on: Vec<i32>,
    /// 1-based frame numbers the device consumes without notifying, leaving a gap in
    /// the frame numbers the callback sees.
    pub drop_frames: Vec<i32>,
    /// Setup stage whose SDK call fails.
    pub fail_stage: Option<SetupStage>,
    /// Frames the device holds before it stops notifying.
    pub ready_queue_depth: usize,
    /// Overrides the frame size reported by continuous setup.
    pub frame_bytes: Option<usize>,
    /// Raw mode reported as the camera's default exposure mode.
    pub default_exposure_mode: i16,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            cameras: vec!["PMUSBCam00".to_string()],
            frame_interval: Duration::from_millis(10),
            stop_after: None,
            fail_fetch_on: Vec::new(),
            null_info_on: Vec::new(),
            drop_frames: Vec::new(),
            fail_stage: None,
            ready_queue_depth: 4,
            frame_bytes: None,
            default_exposure_mode: EXT_TRIG_INTERNAL,
        }
    }
}

/// Call counters, for teardown assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// `open` calls, failed ones included.
    pub open_calls: u64,
    /// `close` calls.
    pub close_calls: u64,
    /// `start_continuous` calls.
    pub start_calls: u64,
    /// `abort` calls.
    pub abort_calls: u64,
    /// `register_eof_callback` calls.
    pub register_calls: u64,
    /// `deregister_eof_callback` calls.
    pub deregister_calls: u64,
    /// `fetch_latest_frame` calls.
    pub fetch_calls: u64,
    /// Notifications sent to the callback, null frame-info ones included.
    pub frames_delivered: u64,
    /// Frame periods skipped because the ready queue was full.
    pub frames_blocked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    open_calls: AtomicU64,
    close_calls: AtomicU64,
    start_calls: AtomicU64,
    abort_calls: AtomicU64,
    register_calls: AtomicU64,
    deregister_calls: AtomicU64,
    fetch_calls: AtomicU64,
    frames_delivered: AtomicU64,
    frames_blocked: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MockStats {
        MockStats {
            open_calls: self.open_calls.load(Ordering::Relaxed),
            close_calls: self.close_calls.load(Ordering::Relaxed),
            start_calls: self.start_calls.load(Ordering::Relaxed),
            abort_calls: self.abort_calls.load(Ordering::Relaxed),
            register_calls: self.register_calls.load(Ordering::Relaxed),
            deregister_calls: self.deregister_calls.load(Ordering::Relaxed),
            fetch_calls: self.fetch_calls.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_blocked: self.frames_blocked.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy)]
struct Registration {
    callback: EofCallback,
    // Stored as an address so the registration can cross into the notification thread.
    context: usize,
}

#[derive(Debug, Default)]
struct ReadyQueue {
    pending: usize,
    latest: Option<LatestFrame>,
}

struct Acquisition {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

#[derive(Default)]
struct MockSession {
    frame_bytes: Option<usize>,
    registration: Arc<Mutex<Option<Registration>>>,
    queue: Arc<Mutex<ReadyQueue>>,
    acquisition: Option<Acquisition>,
}

/// In-process stand-in for the PVCAM driver.
pub struct MockCameraSdk {
    behavior: MockBehavior,
    next_handle: AtomicI16,
    sessions: Mutex<HashMap<CameraHandle, MockSession>>,
    last_error: Mutex<SdkError>,
    counters: Arc<Counters>,
}

impl MockCameraSdk {
    /// Create a simulated driver with the given behavior.
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            next_handle: AtomicI16::new(0),
            sessions: Mutex::new(HashMap::new()),
            last_error: Mutex::new(SdkError::new(0, "No error")),
            counters: Arc::new(Counters::default()),
        }
    }

    /// The behavior this driver was created with.
    pub fn behavior(&self) -> &MockBehavior {
        &self.behavior
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MockStats {
        self.counters.snapshot()
    }

    /// Whether a notification thread is running for `handle`.
    pub fn is_acquiring(&self, handle: CameraHandle) -> bool {
        lock(&self.sessions)
            .get(&handle)
            .is_some_and(|session| session.acquisition.is_some())
    }

    fn fail(&self, code: i32, message: impl Into<String>) -> SdkError {
        let err = SdkError::new(code, message);
        *lock(&self.last_error) = err.clone();
        err
    }

    fn check_injected(&self, stage: SetupStage) -> Result<(), SdkError> {
        if self.behavior.fail_stage == Some(stage) {
            return Err(self.fail(
                INJECTED_FAILURE,
                format!("Mock failure injected at {stage}"),
            ));
        }
        Ok(())
    }

    fn unknown_handle(&self, handle: CameraHandle) -> SdkError {
        self.fail(UNKNOWN_HANDLE, format!("Camera handle {} is not open", handle.0))
    }
}

impl Default for MockCameraSdk {
    fn default() -> Self {
        Self::new(MockBehavior::default())
    }
}

impl Drop for MockCameraSdk {
    fn drop(&mut self) {
        let sessions = self
            .sessions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, session) in sessions.drain() {
            if let Some(acquisition) = session.acquisition {
                stop_acquisition(acquisition);
            }
        }
    }
}

impl CameraSdk for MockCameraSdk {
    fn enumerate_cameras(&self) -> Result<Vec<String>, SdkError> {
        Ok(self.behavior.cameras.clone())
    }

    fn open(&self, name: &str) -> Result<CameraHandle, SdkError> {
        Counters::bump(&self.counters.open_calls);
        self.check_injected(SetupStage::OpenDevice)?;
        if !self.behavior.cameras.iter().any(|c| c == name) {
            return Err(self.fail(INVALID_ARGUMENT, format!("Camera '{name}' not found")));
        }

        let handle = CameraHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        lock(&self.sessions).insert(handle, MockSession::default());
        tracing::debug!(camera = name, handle = handle.0, "Mock camera opened");
        Ok(handle)
    }

    fn close(&self, handle: CameraHandle) -> Result<(), SdkError> {
        Counters::bump(&self.counters.close_calls);
        let session = lock(&self.sessions).remove(&handle);
        match session {
            Some(session) => {
                if let Some(acquisition) = session.acquisition {
                    stop_acquisition(acquisition);
                }
                Ok(())
            }
            None => Err(self.unknown_handle(handle)),
        }
    }

    fn select_exposure_mode(
        &self,
        handle: CameraHandle,
        mode: ExposureMode,
    ) -> Result<NegotiatedMode, SdkError> {
        self.check_injected(SetupStage::SelectExposureMode)?;
        if !lock(&self.sessions).contains_key(&handle) {
            return Err(self.unknown_handle(handle));
        }
        let raw = mode
            .raw_value()
            .unwrap_or(self.behavior.default_exposure_mode);
        Ok(NegotiatedMode {
            requested: mode,
            raw,
        })
    }

    fn setup_continuous(
        &self,
        handle: CameraHandle,
        region: &Region,
        _mode: NegotiatedMode,
        _exposure_ms: u32,
        _policy: BufferPolicy,
    ) -> Result<usize, SdkError> {
        self.check_injected(SetupStage::SetupAcquisition)?;
        if !region.is_valid() {
            return Err(self.fail(INVALID_ARGUMENT, format!("Invalid region {region:?}")));
        }

        let frame_bytes = self.behavior.frame_bytes.unwrap_or_else(|| {
            (region.width() as usize) * (region.height() as usize) * std::mem::size_of::<u16>()
        });

        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(&handle) else {
            drop(sessions);
            return Err(self.unknown_handle(handle));
        };
        session.frame_bytes = Some(frame_bytes);
        Ok(frame_bytes)
    }

    #[allow(unsafe_code)]
    unsafe fn register_eof_callback(
        &self,
        handle: CameraHandle,
        callback: EofCallback,
        context: *mut c_void,
    ) -> Result<(), SdkError> {
        Counters::bump(&self.counters.register_calls);
        self.check_injected(SetupStage::RegisterCallback)?;
        let registration = match lock(&self.sessions).get(&handle) {
            Some(session) => Arc::clone(&session.registration),
            None => return Err(self.unknown_handle(handle)),
        };
        *lock(&registration) = Some(Registration {
            callback,
            context: context as usize,
        });
        Ok(())
    }

    fn deregister_eof_callback(&self, handle: CameraHandle) -> Result<(), SdkError> {
        Counters::bump(&self.counters.deregister_calls);
        let registration = match lock(&self.sessions).get(&handle) {
            Some(session) => Arc::clone(&session.registration),
            None => return Err(self.unknown_handle(handle)),
        };
        // Waits for an in-flight notification to finish.
        *lock(&registration) = None;
        Ok(())
    }

    #[allow(unsafe_code)]
    unsafe fn start_continuous(
        &self,
        handle: CameraHandle,
        buffer: *mut u8,
        len: usize,
    ) -> Result<(), SdkError> {
        Counters::bump(&self.counters.start_calls);
        self.check_injected(SetupStage::StartAcquisition)?;

        let mut sessions = lock(&self.sessions);
        let Some(session) = sessions.get_mut(&handle) else {
            drop(sessions);
            return Err(self.unknown_handle(handle));
        };
        if session.acquisition.is_some() {
            drop(sessions);
            return Err(self.fail(INVALID_STATE, "Acquisition already running"));
        }
        let Some(frame_bytes) = session.frame_bytes else {
            drop(sessions);
            return Err(self.fail(INVALID_STATE, "Continuous acquisition not set up"));
        };
        if buffer.is_null() || frame_bytes == 0 || len < frame_bytes {
            drop(sessions);
            return Err(self.fail(
                INVALID_ARGUMENT,
                format!("Buffer of {len} bytes cannot hold a {frame_bytes} byte frame"),
            ));
        }

        *lock(&session.queue) = ReadyQueue::default();
        let driver = NotificationThread {
            camera: handle.0,
            buffer: buffer as usize,
            frame_bytes,
            slots: len / frame_bytes,
            behavior: self.behavior.clone(),
            registration: Arc::clone(&session.registration),
            queue: Arc::clone(&session.queue),
            counters: Arc::clone(&self.counters),
        };

        let (stop, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("mock-pvcam-notify".to_string())
            .spawn(move || driver.run(stop_rx))
            .map_err(|e| {
                SdkError::new(INVALID_STATE, format!("Failed to spawn notification thread: {e}"))
            });
        let thread = match thread {
            Ok(thread) => thread,
            Err(err) => {
                drop(sessions);
                *lock(&self.last_error) = err.clone();
                return Err(err);
            }
        };
        session.acquisition = Some(Acquisition { stop, thread });
        Ok(())
    }

    fn abort(&self, handle: CameraHandle) -> Result<(), SdkError> {
        Counters::bump(&self.counters.abort_calls);
        let acquisition = match lock(&self.sessions).get_mut(&handle) {
            Some(session) => session.acquisition.take(),
            None => return Err(self.unknown_handle(handle)),
        };
        // Join outside the sessions lock: the callback may be inside fetch_latest_frame.
        if let Some(acquisition) = acquisition {
            stop_acquisition(acquisition);
        }
        Ok(())
    }

    fn fetch_latest_frame(&self, handle: CameraHandle) -> Result<LatestFrame, SdkError> {
        Counters::bump(&self.counters.fetch_calls);
        let queue = match lock(&self.sessions).get(&handle) {
            Some(session) => Arc::clone(&session.queue),
            None => return Err(self.unknown_handle(handle)),
        };

        let mut queue = lock(&queue);
        let latest = match queue.latest {
            Some(latest) if queue.pending > 0 => latest,
            _ => {
                drop(queue);
                return Err(self.fail(NO_NEW_FRAME, "No new frame available"));
            }
        };
        if self.behavior.fail_fetch_on.contains(&latest.info.frame_nr) {
            drop(queue);
            return Err(self.fail(
                FETCH_FAILED,
                format!("Injected fetch failure on frame {}", latest.info.frame_nr),
            ));
        }
        queue.pending = 0;
        Ok(latest)
    }

    fn last_error(&self) -> SdkError {
        lock(&self.last_error).clone()
    }
}

fn stop_acquisition(acquisition: Acquisition) {
    let _ = acquisition.stop.send(());
    if acquisition.thread.join().is_err() {
        tracing::warn!("Mock notification thread panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Mock driver mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// State owned by the simulated driver's notification thread.
struct NotificationThread {
    camera: i16,
    buffer: usize,
    frame_bytes: usize,
    slots: usize,
    behavior: MockBehavior,
    registration: Arc<Mutex<Option<Registration>>>,
    queue: Arc<Mutex<ReadyQueue>>,
    counters: Arc<Counters>,
}

impl NotificationThread {
    fn run(self, stop: mpsc::Receiver<()>) {
        let started = Instant::now();
        let mut frame_nr: i32 = 0;

        loop {
            match stop.recv_timeout(self.behavior.frame_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Some(limit) = self.behavior.stop_after {
                if u32::try_from(frame_nr).is_ok_and(|n| n >= limit) {
                    continue;
                }
            }

            let info = {
                let mut queue = lock(&self.queue);
                if queue.pending >= self.behavior.ready_queue_depth {
                    Counters::bump(&self.counters.frames_blocked);
                    continue;
                }
                frame_nr += 1;
                if self.behavior.drop_frames.contains(&frame_nr) {
                    continue;
                }
                let info = FrameInfo {
                    camera: self.camera,
                    frame_nr,
                    timestamp: i64::try_from(started.elapsed().as_nanos() / 100)
                        .unwrap_or(i64::MAX),
                    ..FrameInfo::default()
                };
                let address = self.write_stamp(frame_nr);
                queue.pending += 1;
                queue.latest = Some(LatestFrame { address, info });
                info
            };

            // Held across the call so deregistration waits for it.
            let guard = lock(&self.registration);
            Counters::bump(&self.counters.frames_delivered);
            if let Some(registration) = *guard {
                let info_ptr: *const FrameInfo = if self.behavior.null_info_on.contains(&frame_nr) {
                    ptr::null()
                } else {
                    &info
                };
                // SAFETY: the registrant guarantees the callback and context stay valid
                // until deregistration, which cannot complete while we hold the lock.
                #[allow(unsafe_code)]
                unsafe {
                    (registration.callback)(info_ptr, registration.context as *mut c_void)
                };
            }
        }
    }

    /// Write the frame number at the start of its slot and return the slot address.
    fn write_stamp(&self, frame_nr: i32) -> usize {
        let slot = usize::try_from(frame_nr - 1).unwrap_or(0) % self.slots.max(1);
        let address = self.buffer + slot * self.frame_bytes;
        if self.frame_bytes >= std::mem::size_of::<i32>() {
            // SAFETY: start_continuous's contract keeps the buffer valid until abort has
            // joined this thread, and the slot lies inside it.
            #[allow(unsafe_code)]
            unsafe {
                ptr::write_unaligned(address as *mut i32, frame_nr)
            };
        }
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circ_buffer::CircularBuffer;
    use std::sync::atomic::AtomicUsize;

    unsafe extern "C" fn count_frames(info: *const FrameInfo, context: *mut c_void) {
        if info.is_null() || context.is_null() {
            return;
        }
        let counter = unsafe { &*(context as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn configured(sdk: &MockCameraSdk) -> CameraHandle {
        let handle = sdk.open("PMUSBCam00").unwrap();
        let mode = sdk
            .select_exposure_mode(handle, ExposureMode::CameraDefault)
            .unwrap();
        sdk.setup_continuous(handle, &Region::square(64), mode, 10, BufferPolicy::Overwrite)
            .unwrap();
        handle
    }

    #[test]
    fn open_rejects_unknown_camera() {
        let sdk = MockCameraSdk::default();
        let err = sdk.open("NoSuchCam").unwrap_err();
        assert_eq!(err.code, INVALID_ARGUMENT);
        assert_eq!(sdk.last_error(), err);
    }

    #[test]
    fn camera_default_mode_resolves_to_configured_raw_value() {
        let sdk = MockCameraSdk::default();
        let handle = sdk.open("PMUSBCam00").unwrap();
        let mode = sdk
            .select_exposure_mode(handle, ExposureMode::CameraDefault)
            .unwrap();
        assert_eq!(mode.raw, EXT_TRIG_INTERNAL);
    }

    #[test]
    fn frame_size_follows_region() {
        let sdk = MockCameraSdk::default();
        let handle = sdk.open("PMUSBCam00").unwrap();
        let mode = sdk.select_exposure_mode(handle, ExposureMode::Timed).unwrap();
        let bytes = sdk
            .setup_continuous(handle, &Region::square(512), mode, 10, BufferPolicy::Overwrite)
            .unwrap();
        assert_eq!(bytes, 512 * 512 * 2);
    }

    #[test]
    fn injected_stage_failure_is_reported() {
        let sdk = MockCameraSdk::new(MockBehavior {
            fail_stage: Some(SetupStage::SetupAcquisition),
            ..MockBehavior::default()
        });
        let handle = sdk.open("PMUSBCam00").unwrap();
        let mode = sdk.select_exposure_mode(handle, ExposureMode::Timed).unwrap();
        let err = sdk
            .setup_continuous(handle, &Region::default(), mode, 10, BufferPolicy::Overwrite)
            .unwrap_err();
        assert_eq!(err.code, INJECTED_FAILURE);
    }

    #[test]
    fn start_without_setup_is_rejected() {
        let sdk = MockCameraSdk::default();
        let handle = sdk.open("PMUSBCam00").unwrap();
        let mut buffer = CircularBuffer::allocate(4096, 2, None).unwrap();
        let err = unsafe { sdk.start_continuous(handle, buffer.as_mut_ptr(), buffer.len()) }
            .unwrap_err();
        assert_eq!(err.code, INVALID_STATE);
    }

    #[test]
    fn undrained_ready_queue_stops_notifications() {
        let sdk = MockCameraSdk::new(MockBehavior {
            frame_interval: Duration::from_millis(2),
            ready_queue_depth: 3,
            ..MockBehavior::default()
        });
        let handle = configured(&sdk);
        let counter = AtomicUsize::new(0);
        let mut buffer = CircularBuffer::allocate(64 * 64 * 2, 4, None).unwrap();

        unsafe {
            sdk.register_eof_callback(handle, count_frames, &counter as *const _ as *mut c_void)
                .unwrap();
            sdk.start_continuous(handle, buffer.as_mut_ptr(), buffer.len())
                .unwrap();
        }
        thread::sleep(Duration::from_millis(100));
        sdk.abort(handle).unwrap();
        sdk.deregister_eof_callback(handle).unwrap();

        // The callback never fetches, so only the queue depth gets through.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(sdk.stats().frames_blocked > 0);
        buffer.release();
    }

    #[test]
    fn frames_are_stamped_into_buffer_slots() {
        let sdk = MockCameraSdk::new(MockBehavior {
            frame_interval: Duration::from_millis(2),
            stop_after: Some(2),
            ..MockBehavior::default()
        });
        let handle = configured(&sdk);
        let mut buffer = CircularBuffer::allocate(64 * 64 * 2, 4, None).unwrap();

        unsafe {
            sdk.start_continuous(handle, buffer.as_mut_ptr(), buffer.len())
                .unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        sdk.abort(handle).unwrap();

        let latest = sdk.fetch_latest_frame(handle).unwrap();
        assert_eq!(latest.info.frame_nr, 2);
        assert_eq!(buffer.offset_of(latest.address), Some(64 * 64 * 2));

        let stamp = unsafe { ptr::read_unaligned(latest.address as *const i32) };
        assert_eq!(stamp, 2);

        // Drained: nothing new until the next frame.
        assert_eq!(sdk.fetch_latest_frame(handle).unwrap_err().code, NO_NEW_FRAME);
    }

    #[test]
    fn abort_is_idempotent_and_counted() {
        let sdk = MockCameraSdk::default();
        let handle = configured(&sdk);
        let mut buffer = CircularBuffer::allocate(64 * 64 * 2, 2, None).unwrap();
        unsafe {
            sdk.start_continuous(handle, buffer.as_mut_ptr(), buffer.len())
                .unwrap();
        }
        assert!(sdk.is_acquiring(handle));

        sdk.abort(handle).unwrap();
        sdk.abort(handle).unwrap();
        assert!(!sdk.is_acquiring(handle));
        assert_eq!(sdk.stats().abort_calls, 2);

        sdk.close(handle).unwrap();
        assert!(sdk.close(handle).is_err());
    }

    #[test]
    fn behavior_deserializes_with_humantime_interval() {
        let behavior: MockBehavior =
            serde_json::from_str(r#"{"frame_interval": "25ms", "stop_after": 84}"#).unwrap();
        assert_eq!(behavior.frame_interval, Duration::from_millis(25));
        assert_eq!(behavior.stop_after, Some(84));
        assert_eq!(behavior.ready_queue_depth, 4);
    }
}
