//! Acquisition control loop.
//!
//! One run drives a camera through
//!
//! ```text
//! Idle -> Configured -> Acquiring -> { Completed | Stalled | SetupFailed } -> Stopped
//! ```
//!
//! Setup opens the camera, resolves the exposure mode and negotiates continuous
//! acquisition (giving the frame size), then allocates the circular buffer, registers
//! the end-of-frame callback and starts the camera. The loop then waits on the shared
//! [`FrameEvent`] with a per-frame deadline until the target frame count is reached
//! (`Completed`) or a deadline passes with no frame (`Stalled`).
//!
//! Every run ends in [`Session::teardown`], which runs exactly once whatever the exit
//! path: abort, deregister the callback, drop the callback context, release the buffer,
//! close the camera.

use crate::callback::{on_end_of_frame, CallbackContext, CallbackCounters};
use crate::circ_buffer::CircularBuffer;
use crate::error::{ProbeError, ProbeResult, SdkError, SetupCause, SetupError, SetupStage};
use crate::frame_event::{FrameDescriptor, FrameEvent, FrameEventStats, WaitOutcome};
use crate::sdk::{BufferPolicy, CameraHandle, CameraSdk, ExposureMode, Region};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default per-frame deadline.
pub const DEFAULT_FRAME_DEADLINE: Duration = Duration::from_millis(2000);
/// Default number of frames for a successful run.
pub const DEFAULT_TARGET_FRAMES: u32 = 200;
/// Default frames retained in the circular buffer.
pub const DEFAULT_BUFFER_FRAMES: usize = 20;
/// Default progress log cadence, in frames.
pub const DEFAULT_PROGRESS_EVERY: u32 = 50;

/// Everything one run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionSettings {
    /// Camera name passed to `open`.
    pub camera: String,
    /// Region of interest.
    pub region: Region,
    /// Requested exposure mode.
    pub exposure_mode: ExposureMode,
    /// Exposure time in milliseconds.
    pub exposure_ms: u32,
    /// Circular buffer full behavior.
    pub buffer_policy: BufferPolicy,
    /// Frames retained in the circular buffer.
    pub buffer_frames: usize,
    /// Byte ceiling for the circular buffer.
    pub buffer_limit_bytes: Option<usize>,
    /// Frames to acquire before declaring success.
    pub target_frames: u32,
    /// Longest acceptable wait for any single frame.
    pub frame_deadline: Duration,
    /// Log progress every this many frames; 0 disables.
    pub progress_every: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            camera: "PMUSBCam00".to_string(),
            region: Region::default(),
            exposure_mode: ExposureMode::CameraDefault,
            exposure_ms: 10,
            buffer_policy: BufferPolicy::Overwrite,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            buffer_limit_bytes: None,
            target_frames: DEFAULT_TARGET_FRAMES,
            frame_deadline: DEFAULT_FRAME_DEADLINE,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Nothing opened yet.
    Idle,
    /// Camera open and continuous acquisition negotiated.
    Configured,
    /// Buffer allocated, callback registered, camera started.
    Acquiring,
    /// Target frame count reached.
    Completed,
    /// A frame deadline passed with no frame.
    Stalled,
    /// A setup step failed.
    SetupFailed,
    /// Torn down.
    Stopped,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    /// The target frame count was reached.
    Completed,
    /// No frame arrived within the deadline.
    Stalled {
        /// 1-based index of the frame that never arrived.
        frame_index: u32,
    },
    /// Setup failed before acquisition was running.
    SetupFailed {
        /// The stage and cause.
        error: SetupError,
        /// The SDK's own diagnostic for the failure, if it had one.
        diagnostic: Option<SdkError>,
    },
}

/// Min / max / mean of inter-frame intervals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalStats {
    count: u32,
    min: Option<Duration>,
    max: Option<Duration>,
    total: Duration,
}

impl IntervalStats {
    /// Add one interval.
    pub fn record(&mut self, interval: Duration) {
        self.count += 1;
        self.total = self.total.saturating_add(interval);
        self.min = Some(self.min.map_or(interval, |m| m.min(interval)));
        self.max = Some(self.max.map_or(interval, |m| m.max(interval)));
    }

    /// Intervals recorded.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Shortest interval.
    pub fn min(&self) -> Option<Duration> {
        self.min
    }

    /// Longest interval.
    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Mean interval.
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count)
    }
}

/// Everything the control loop observed during one run.
#[derive(Debug, Clone)]
pub struct AcquisitionOutcome {
    /// 1-based run number.
    pub run: u32,
    /// Camera that was driven.
    pub camera: String,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Total run time, setup and teardown included.
    pub elapsed: Duration,
    /// How the run ended.
    pub terminal: TerminalState,
    /// Frames consumed from the frame event.
    pub frames_acquired: u32,
    /// Consumed frames whose latest-frame fetch failed.
    pub degraded_frames: u32,
    /// Target the run was aiming for.
    pub target_frames: u32,
    /// Per-frame deadline in force.
    pub frame_deadline: Duration,
    /// Interval between the last two consumed frames.
    pub last_interval: Option<Duration>,
    /// All consumed intervals.
    pub intervals: IntervalStats,
    /// Descriptor of the last consumed frame.
    pub last_frame: Option<FrameDescriptor>,
    /// Frame event counters at the end of the run.
    pub event_stats: FrameEventStats,
    /// Notifications the callback handled.
    pub callback_invocations: u64,
    /// Discontinuities in the hardware frame number seen by the callback.
    pub gap_events: u64,
    /// Frames the driver skipped, summed over all gaps.
    pub lost_frames: u64,
    /// Resources teardown could not safely free.
    pub teardown: TeardownSummary,
}

/// Resources teardown had to leak instead of freeing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    /// Abort failed, so the circular buffer was leaked.
    pub buffer_leaked: bool,
    /// Deregistration failed, so the callback context was leaked.
    pub context_leaked: bool,
}

impl TeardownSummary {
    /// Whether everything acquired during setup was released.
    pub fn is_clean(&self) -> bool {
        !self.buffer_leaked && !self.context_leaked
    }
}

impl AcquisitionOutcome {
    /// Whether the run reached its target.
    pub fn is_completed(&self) -> bool {
        matches!(self.terminal, TerminalState::Completed)
    }

    /// Turn a non-completed run into the matching [`ProbeError`].
    pub fn into_result(self) -> ProbeResult<Self> {
        let error = match &self.terminal {
            TerminalState::Completed => None,
            TerminalState::Stalled { frame_index } => Some(ProbeError::Stall {
                frame_index: *frame_index,
                frames_acquired: self.frames_acquired,
                deadline: self.frame_deadline,
            }),
            TerminalState::SetupFailed { error, .. } => Some(ProbeError::Setup(error.clone())),
        };
        match error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Drives runs against one SDK.
pub struct AcquisitionRunner {
    sdk: Arc<dyn CameraSdk>,
    settings: AcquisitionSettings,
    event: Arc<FrameEvent>,
}

impl AcquisitionRunner {
    /// Create a runner. The frame event is owned by the runner and reset every run.
    pub fn new(sdk: Arc<dyn CameraSdk>, settings: AcquisitionSettings) -> Self {
        Self {
            sdk,
            settings,
            event: Arc::new(FrameEvent::new()),
        }
    }

    /// Settings in force.
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Execute one run to completion. Blocks the calling thread.
    pub fn run(&self, run: u32) -> AcquisitionOutcome {
        let span = tracing::info_span!("acquisition", camera = %self.settings.camera, run);
        let _enter = span.enter();

        let started_at = Utc::now();
        let clock = Instant::now();
        self.event.reset();

        let mut session = Session::new(Arc::clone(&self.sdk));
        let mut state = AcquisitionState::Idle;
        let mut progress = Progress::default();

        let terminal = match self.setup(&mut session, &mut state) {
            Ok(acquisition_start) => {
                transition(&mut state, AcquisitionState::Acquiring);
                let terminal = self.consume(acquisition_start, &mut progress);
                match terminal {
                    TerminalState::Completed => {
                        transition(&mut state, AcquisitionState::Completed)
                    }
                    _ => transition(&mut state, AcquisitionState::Stalled),
                }
                terminal
            }
            Err(error) => {
                let diagnostic = match error.cause {
                    SetupCause::Sdk(_) => Some(self.sdk.last_error()).filter(|e| e.code != 0),
                    SetupCause::Allocation(_) => None,
                };
                tracing::error!(
                    stage = %error.stage,
                    error = %error,
                    "Acquisition setup failed"
                );
                transition(&mut state, AcquisitionState::SetupFailed);
                TerminalState::SetupFailed { error, diagnostic }
            }
        };

        let (callback, teardown) = session.teardown();
        transition(&mut state, AcquisitionState::Stopped);

        if callback.lost_frames > 0 {
            tracing::warn!(
                gap_events = callback.gap_events,
                lost_frames = callback.lost_frames,
                "Frame gaps detected"
            );
        }

        AcquisitionOutcome {
            run,
            camera: self.settings.camera.clone(),
            started_at,
            elapsed: clock.elapsed(),
            terminal,
            frames_acquired: progress.frames,
            degraded_frames: progress.degraded,
            target_frames: self.settings.target_frames,
            frame_deadline: self.settings.frame_deadline,
            last_interval: progress.last_interval,
            intervals: progress.intervals,
            last_frame: progress.last_frame,
            event_stats: self.event.stats(),
            callback_invocations: callback.handled,
            gap_events: callback.gap_events,
            lost_frames: callback.lost_frames,
            teardown,
        }
    }

    /// Idle -> Configured -> ready to acquire. Returns the acquisition start instant.
    fn setup(
        &self,
        session: &mut Session,
        state: &mut AcquisitionState,
    ) -> Result<Instant, SetupError> {
        let settings = &self.settings;
        let sdk = &self.sdk;

        let handle = sdk
            .open(&settings.camera)
            .map_err(|e| SetupError::new(SetupStage::OpenDevice, e))?;
        session.handle = Some(handle);

        let mode = sdk
            .select_exposure_mode(handle, settings.exposure_mode)
            .map_err(|e| SetupError::new(SetupStage::SelectExposureMode, e))?;

        let frame_bytes = sdk
            .setup_continuous(
                handle,
                &settings.region,
                mode,
                settings.exposure_ms,
                settings.buffer_policy,
            )
            .map_err(|e| SetupError::new(SetupStage::SetupAcquisition, e))?;
        tracing::info!(
            mode = %mode.requested,
            raw_mode = mode.raw,
            frame_bytes,
            "Continuous acquisition configured"
        );
        transition(state, AcquisitionState::Configured);

        let buffer = CircularBuffer::allocate(
            frame_bytes,
            settings.buffer_frames,
            settings.buffer_limit_bytes,
        )
        .map_err(|e| SetupError::new(SetupStage::AllocateBuffer, e))?;

        let context = Box::new(CallbackContext::new(
            Arc::clone(sdk),
            handle,
            Arc::clone(&self.event),
            &buffer,
        ));
        let context_ptr = context.as_context_ptr();
        session.context = Some(context);
        let buffer = session.buffer.insert(buffer);
        let (buffer_ptr, buffer_len) = (buffer.as_mut_ptr(), buffer.len());

        // SAFETY: the context is boxed in the session and only dropped after
        // deregistration in `Session::teardown`.
        #[allow(unsafe_code)]
        unsafe { sdk.register_eof_callback(handle, on_end_of_frame, context_ptr) }
            .map_err(|e| SetupError::new(SetupStage::RegisterCallback, e))?;
        session.registered = true;

        let acquisition_start = Instant::now();
        // SAFETY: the buffer is owned by the session and only released after abort
        // in `Session::teardown`.
        #[allow(unsafe_code)]
        unsafe { sdk.start_continuous(handle, buffer_ptr, buffer_len) }
            .map_err(|e| SetupError::new(SetupStage::StartAcquisition, e))?;

        tracing::info!(
            target_frames = settings.target_frames,
            deadline = ?settings.frame_deadline,
            buffer_bytes = buffer_len,
            "Continuous acquisition started"
        );
        Ok(acquisition_start)
    }

    /// The Acquiring state: wait, count, time, until target or stall.
    fn consume(&self, acquisition_start: Instant, progress: &mut Progress) -> TerminalState {
        let settings = &self.settings;
        let mut last_frame_time = acquisition_start;

        while progress.frames < settings.target_frames {
            match self.event.wait_or_timeout(settings.frame_deadline) {
                WaitOutcome::Fired(descriptor) => {
                    let now = Instant::now();
                    let interval = now.duration_since(last_frame_time);
                    last_frame_time = now;
                    progress.record(descriptor, interval);

                    if descriptor.degraded {
                        tracing::warn!(
                            frame = progress.frames,
                            sequence = descriptor.sequence,
                            "Latest-frame fetch failed in callback"
                        );
                    }
                    if settings.progress_every > 0 && progress.frames % settings.progress_every == 0
                    {
                        tracing::info!(
                            frames = progress.frames,
                            target = settings.target_frames,
                            interval_ms = interval.as_secs_f64() * 1000.0,
                            "Acquisition progress"
                        );
                    }
                }
                WaitOutcome::TimedOut => {
                    let frame_index = progress.frames + 1;
                    tracing::error!(
                        frame_index,
                        frames_acquired = progress.frames,
                        deadline = ?settings.frame_deadline,
                        since_last_frame = ?last_frame_time.elapsed(),
                        "Frame deadline missed, acquisition stalled"
                    );
                    return TerminalState::Stalled { frame_index };
                }
            }
        }

        tracing::info!(frames = progress.frames, "Target frame count reached");
        TerminalState::Completed
    }
}

#[derive(Debug, Default)]
struct Progress {
    frames: u32,
    degraded: u32,
    last_interval: Option<Duration>,
    intervals: IntervalStats,
    last_frame: Option<FrameDescriptor>,
}

impl Progress {
    fn record(&mut self, descriptor: FrameDescriptor, interval: Duration) {
        self.frames += 1;
        if descriptor.degraded {
            self.degraded += 1;
        }
        self.last_interval = Some(interval);
        self.intervals.record(interval);
        self.last_frame = Some(descriptor);
    }
}

fn transition(state: &mut AcquisitionState, next: AcquisitionState) {
    tracing::debug!(from = %state, to = %next, "State transition");
    *state = next;
}

/// Resources acquired during setup, released in reverse on every exit path.
struct Session {
    sdk: Arc<dyn CameraSdk>,
    handle: Option<CameraHandle>,
    registered: bool,
    context: Option<Box<CallbackContext>>,
    buffer: Option<CircularBuffer>,
    torn_down: bool,
}

impl Session {
    fn new(sdk: Arc<dyn CameraSdk>) -> Self {
        Self {
            sdk,
            handle: None,
            registered: false,
            context: None,
            buffer: None,
            torn_down: false,
        }
    }

    /// Abort, deregister, drop context, release buffer, close. Runs once; later calls
    /// are no-ops. Returns the callback's counters and what could be released.
    ///
    /// Nothing is aborted when the camera never opened, since there is no handle.
    /// If abort fails the driver may still be writing, so the buffer is leaked rather
    /// than freed. If deregistration fails the driver may still call back, so the
    /// context is leaked too.
    fn teardown(&mut self) -> (CallbackCounters, TeardownSummary) {
        if self.torn_down {
            return (CallbackCounters::default(), TeardownSummary::default());
        }
        self.torn_down = true;

        let mut aborted = true;
        let mut deregistered = true;
        if let Some(handle) = self.handle {
            if let Err(e) = self.sdk.abort(handle) {
                tracing::error!(error = %e, "Abort failed during teardown");
                aborted = false;
            }
            if self.registered {
                if let Err(e) = self.sdk.deregister_eof_callback(handle) {
                    tracing::error!(
                        error = %e,
                        "Callback deregistration failed during teardown"
                    );
                    deregistered = false;
                }
                self.registered = false;
            }
        }

        let mut summary = TeardownSummary::default();
        let counters = match self.context.take() {
            Some(context) => {
                let counters = context.counters();
                if !deregistered {
                    tracing::error!("Callback context leaked: the driver may still call it");
                    let _ = Box::leak(context);
                    summary.context_leaked = true;
                }
                counters
            }
            None => CallbackCounters::default(),
        };

        if let Some(buffer) = self.buffer.take() {
            if aborted {
                buffer.release();
            } else {
                buffer.leak();
                summary.buffer_leaked = true;
            }
        }

        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.sdk.close(handle) {
                tracing::warn!(error = %e, "Camera close failed during teardown");
            }
        }

        tracing::debug!(?summary, "Session torn down");
        (counters, summary)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::{MockBehavior, MockCameraSdk};

    fn settings(target_frames: u32, frame_deadline: Duration) -> AcquisitionSettings {
        AcquisitionSettings {
            region: Region::square(64),
            target_frames,
            frame_deadline,
            buffer_frames: 4,
            ..AcquisitionSettings::default()
        }
    }

    #[test]
    fn interval_stats_track_extremes_and_mean() {
        let mut stats = IntervalStats::default();
        assert_eq!(stats.mean(), None);
        for ms in [10, 30, 20] {
            stats.record(Duration::from_millis(ms));
        }
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.min(), Some(Duration::from_millis(10)));
        assert_eq!(stats.max(), Some(Duration::from_millis(30)));
        assert_eq!(stats.mean(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn short_run_completes_and_tears_down() {
        let sdk = Arc::new(MockCameraSdk::new(MockBehavior {
            frame_interval: Duration::from_millis(2),
            ..MockBehavior::default()
        }));
        let runner = AcquisitionRunner::new(sdk.clone(), settings(20, Duration::from_secs(1)));

        let outcome = runner.run(1);

        assert!(outcome.is_completed(), "{:?}", outcome.terminal);
        assert_eq!(outcome.frames_acquired, 20);
        assert_eq!(outcome.intervals.count(), 20);
        assert!(outcome.last_interval.is_some());

        let stats = sdk.stats();
        assert_eq!(stats.abort_calls, 1);
        assert_eq!(stats.deregister_calls, 1);
        assert_eq!(stats.close_calls, 1);
    }

    #[test]
    fn zero_target_completes_without_waiting() {
        let sdk = Arc::new(MockCameraSdk::default());
        let runner = AcquisitionRunner::new(sdk, settings(0, Duration::from_secs(5)));
        let outcome = runner.run(1);
        assert!(outcome.is_completed());
        assert_eq!(outcome.frames_acquired, 0);
        assert!(outcome.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn stall_maps_to_stall_error() {
        let sdk = Arc::new(MockCameraSdk::new(MockBehavior {
            frame_interval: Duration::from_millis(10),
            stop_after: Some(5),
            ..MockBehavior::default()
        }));
        let runner = AcquisitionRunner::new(sdk, settings(50, Duration::from_millis(100)));

        let outcome = runner.run(1);
        assert_eq!(outcome.terminal, TerminalState::Stalled { frame_index: 6 });

        match outcome.into_result() {
            Err(ProbeError::Stall {
                frame_index,
                frames_acquired,
                ..
            }) => {
                assert_eq!(frame_index, 6);
                assert_eq!(frames_acquired, 5);
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[test]
    fn teardown_runs_once_even_when_dropped_after() {
        let sdk = Arc::new(MockCameraSdk::default());
        let mut session = Session::new(sdk.clone());
        session.handle = Some(sdk.open("PMUSBCam00").unwrap());
        session.teardown();
        drop(session);

        let stats = sdk.stats();
        assert_eq!(stats.abort_calls, 1);
        assert_eq!(stats.close_calls, 1);
        assert_eq!(stats.deregister_calls, 0);
    }
}
