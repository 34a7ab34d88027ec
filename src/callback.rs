//! End-of-frame callback handler.
//!
//! [`on_end_of_frame`] is registered with the SDK and runs on the driver's own
//! notification thread, once per completed frame. It must be short, must not block,
//! and must never unwind into the driver. All it does:
//!
//! 1. ignore the call if either argument is null (the driver may invoke it spuriously);
//! 2. drain the device's ready slot with a latest-frame fetch. Skipping this backs up
//!    the device's internal queue and it stops notifying, which is exactly the stall
//!    this probe looks for;
//! 3. copy frame metadata into a [`FrameDescriptor`];
//! 4. signal the shared [`FrameEvent`].
//!
//! A failed fetch is not reported to the driver (its callback contract has no error
//! path). The frame is still signalled, with `degraded` set, so the control loop can
//! see it.
//!
//! Every handled notification is also checked against the previous hardware frame
//! number. A jump of more than one means the driver dropped frames before they ever
//! reached us; those are counted as gap events and lost frames in
//! [`CallbackCounters`]. Gaps are only visible here: the consumer sees coalesced
//! signals as jumps too.
//!
//! The handler does not log: formatting and writing a log line is I/O on a thread we
//! do not own.

use crate::circ_buffer::{offset_in, CircularBuffer};
use crate::frame_event::{FrameDescriptor, FrameEvent};
use crate::sdk::{CameraHandle, CameraSdk, FrameInfo};
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// State reachable from the callback through its opaque context pointer.
///
/// Owned by the acquisition session and kept alive (boxed, never moved) until the
/// callback has been deregistered.
pub struct CallbackContext {
    sdk: Arc<dyn CameraSdk>,
    handle: CameraHandle,
    event: Arc<FrameEvent>,
    buffer_base: usize,
    buffer_len: usize,
    handled: AtomicU64,
    degraded: AtomicU64,
    last_frame_nr: AtomicI32,
    gap_events: AtomicU64,
    lost_frames: AtomicU64,
}

/// Snapshot of a context's notification counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackCounters {
    /// Notifications handled (non-null arguments).
    pub handled: u64,
    /// Notifications whose latest-frame fetch failed.
    pub degraded: u64,
    /// Discontinuities in the hardware frame number.
    pub gap_events: u64,
    /// Frame numbers skipped across all gaps.
    pub lost_frames: u64,
}

impl CallbackContext {
    /// Build the context for one session. `buffer` is only used for its address
    /// range, to turn fetched frame addresses into offsets.
    pub fn new(
        sdk: Arc<dyn CameraSdk>,
        handle: CameraHandle,
        event: Arc<FrameEvent>,
        buffer: &CircularBuffer,
    ) -> Self {
        Self {
            sdk,
            handle,
            event,
            buffer_base: buffer.base_address(),
            buffer_len: buffer.len(),
            handled: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            last_frame_nr: AtomicI32::new(0),
            gap_events: AtomicU64::new(0),
            lost_frames: AtomicU64::new(0),
        }
    }

    /// Opaque pointer to pass at callback registration.
    pub fn as_context_ptr(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    /// Notifications handled (non-null arguments).
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Notifications whose latest-frame fetch failed.
    pub fn degraded(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Snapshot of all counters.
    pub fn counters(&self) -> CallbackCounters {
        CallbackCounters {
            handled: self.handled(),
            degraded: self.degraded(),
            gap_events: self.gap_events.load(Ordering::Relaxed),
            lost_frames: self.lost_frames.load(Ordering::Relaxed),
        }
    }

    /// Safe body of the callback: fetch, describe, signal.
    pub fn handle_frame(&self, info: &FrameInfo) {
        let count = self.handled.fetch_add(1, Ordering::Relaxed);

        // The first frame has no predecessor to compare against.
        let last_nr = self.last_frame_nr.swap(info.frame_nr, Ordering::Relaxed);
        if count > 0 && info.frame_nr > last_nr.saturating_add(1) {
            let gap = i64::from(info.frame_nr) - i64::from(last_nr) - 1;
            self.gap_events.fetch_add(1, Ordering::Relaxed);
            self.lost_frames
                .fetch_add(u64::try_from(gap).unwrap_or(0), Ordering::Relaxed);
        }

        let descriptor = match self.sdk.fetch_latest_frame(self.handle) {
            Ok(latest) => FrameDescriptor {
                sequence: info.frame_nr,
                timestamp: info.timestamp,
                buffer_offset: offset_in(self.buffer_base, self.buffer_len, latest.address),
                degraded: false,
            },
            Err(_) => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
                FrameDescriptor {
                    sequence: info.frame_nr,
                    timestamp: info.timestamp,
                    buffer_offset: None,
                    degraded: true,
                }
            }
        };

        self.event.signal(descriptor);
    }
}

/// End-of-frame entry point registered with the SDK.
///
/// # Safety
///
/// `context` must be null or the pointer returned by
/// [`CallbackContext::as_context_ptr`] for a context that is still alive.
/// `frame_info` must be null or point to a readable [`FrameInfo`] for the duration
/// of the call.
#[allow(unsafe_code)]
pub unsafe extern "C" fn on_end_of_frame(frame_info: *const FrameInfo, context: *mut c_void) {
    if frame_info.is_null() || context.is_null() {
        return;
    }

    // SAFETY: both pointers are non-null and valid per the function contract.
    let (info, ctx) = unsafe { (*frame_info, &*(context as *const CallbackContext)) };

    // Unwinding across the driver's stack is undefined behavior; a panic in the
    // body is dropped here and the frame simply goes unsignalled.
    let _ = catch_unwind(AssertUnwindSafe(|| ctx.handle_frame(&info)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_event::WaitOutcome;
    use crate::sdk::mock::{MockBehavior, MockCameraSdk};
    use crate::sdk::{BufferPolicy, ExposureMode, Region};
    use std::ptr;
    use std::time::{Duration, Instant};

    fn context_for(sdk: Arc<MockCameraSdk>, buffer: &CircularBuffer) -> (CallbackContext, Arc<FrameEvent>) {
        let handle = sdk.open("PMUSBCam00").unwrap();
        let event = Arc::new(FrameEvent::new());
        let ctx = CallbackContext::new(sdk, handle, Arc::clone(&event), buffer);
        (ctx, event)
    }

    fn frame(frame_nr: i32) -> FrameInfo {
        FrameInfo {
            camera: 0,
            frame_nr,
            timestamp: i64::from(frame_nr) * 1_000,
            ..FrameInfo::default()
        }
    }

    #[test]
    fn null_frame_info_is_ignored() {
        let sdk = Arc::new(MockCameraSdk::new(MockBehavior::default()));
        let buffer = CircularBuffer::allocate(4096, 2, None).unwrap();
        let (ctx, event) = context_for(Arc::clone(&sdk), &buffer);

        unsafe { on_end_of_frame(ptr::null(), ctx.as_context_ptr()) };

        assert!(!event.is_fired());
        assert_eq!(event.stats().signals, 0);
        assert_eq!(ctx.handled(), 0);
        assert_eq!(sdk.stats().fetch_calls, 0);
    }

    #[test]
    fn null_context_is_ignored() {
        let info = frame(1);
        unsafe { on_end_of_frame(&info, ptr::null_mut()) };
    }

    #[test]
    fn valid_notification_fetches_and_signals() {
        let sdk = Arc::new(MockCameraSdk::new(MockBehavior {
            frame_interval: Duration::from_millis(2),
            ..MockBehavior::default()
        }));
        let region = Region::square(32);
        let handle = sdk.open("PMUSBCam00").unwrap();
        let mode = sdk.select_exposure_mode(handle, ExposureMode::Timed).unwrap();
        let frame_bytes = sdk
            .setup_continuous(handle, &region, mode, 1, BufferPolicy::Overwrite)
            .unwrap();
        let mut buffer = CircularBuffer::allocate(frame_bytes, 2, None).unwrap();

        // Nothing is registered, so the driver only fills its ready slot.
        unsafe { sdk.start_continuous(handle, buffer.as_mut_ptr(), buffer.len()) }.unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while sdk.stats().frames_delivered == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        sdk.abort(handle).unwrap();

        let event = Arc::new(FrameEvent::new());
        let ctx = CallbackContext::new(sdk.clone(), handle, Arc::clone(&event), &buffer);
        let info = frame(1);
        unsafe { on_end_of_frame(&info, ctx.as_context_ptr()) };

        match event.wait_or_timeout(Duration::from_millis(10)) {
            WaitOutcome::Fired(d) => {
                assert_eq!(d.sequence, 1);
                assert_eq!(d.timestamp, 1_000);
                assert!(!d.degraded);
                assert!(d.buffer_offset.is_some());
            }
            WaitOutcome::TimedOut => panic!("callback did not signal"),
        }
        assert_eq!(ctx.handled(), 1);
        assert_eq!(ctx.degraded(), 0);
        assert_eq!(sdk.stats().fetch_calls, 1);
    }

    #[test]
    fn frame_number_jumps_count_as_gaps() {
        let sdk = Arc::new(MockCameraSdk::new(MockBehavior::default()));
        let buffer = CircularBuffer::allocate(4096, 2, None).unwrap();
        let (ctx, _event) = context_for(sdk, &buffer);

        for frame_nr in [1, 2, 5, 6, 9] {
            ctx.handle_frame(&frame(frame_nr));
        }

        let counters = ctx.counters();
        assert_eq!(counters.handled, 5);
        assert_eq!(counters.gap_events, 2);
        assert_eq!(counters.lost_frames, 4);
    }

    #[test]
    fn first_frame_is_never_a_gap() {
        let sdk = Arc::new(MockCameraSdk::new(MockBehavior::default()));
        let buffer = CircularBuffer::allocate(4096, 2, None).unwrap();
        let (ctx, _event) = context_for(sdk, &buffer);

        ctx.handle_frame(&frame(40));
        ctx.handle_frame(&frame(41));

        assert_eq!(ctx.counters().gap_events, 0);
        assert_eq!(ctx.counters().lost_frames, 0);
    }

    #[test]
    fn failed_fetch_still_signals_as_degraded() {
        let behavior = MockBehavior {
            fail_fetch_on: vec![1],
            ..MockBehavior::default()
        };
        let sdk = Arc::new(MockCameraSdk::new(behavior));
        let buffer = CircularBuffer::allocate(4096, 2, None).unwrap();
        let (ctx, event) = context_for(Arc::clone(&sdk), &buffer);

        let info = frame(1);
        unsafe { on_end_of_frame(&info, ctx.as_context_ptr()) };

        match event.wait_or_timeout(Duration::from_millis(10)) {
            WaitOutcome::Fired(d) => {
                assert!(d.degraded);
                assert_eq!(d.buffer_offset, None);
            }
            WaitOutcome::TimedOut => panic!("degraded frame was not signalled"),
        }
        assert_eq!(ctx.degraded(), 1);
    }
}
