//! Camera SDK abstraction.
//!
//! The probe never talks to the PVCAM SDK directly. Everything it needs from the
//! device (open/close, exposure mode, continuous setup, start/abort, the end-of-frame
//! callback and the latest-frame fetch) goes through [`CameraSdk`], so the same
//! acquisition loop runs against [`mock::MockCameraSdk`] in tests and against
//! `pvcam::PvcamSdk` on a real camera.

pub mod mock;
#[cfg(feature = "pvcam_hardware")]
pub mod pvcam;

use crate::config::Backend;
use crate::error::{ProbeError, ProbeResult, SdkError};
use mock::{MockBehavior, MockCameraSdk};
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;

/// Represents a handle to an opened camera.
/// Wraps the raw `i16` handle the SDK hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraHandle(pub i16);

/// Region of interest in sensor coordinates (inclusive bounds), with binning.
///
/// Same layout as PVCAM's `rgn_type`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// First serial (x) pixel.
    pub s1: u16,
    /// Last serial (x) pixel, inclusive.
    pub s2: u16,
    /// Serial binning.
    pub sbin: u16,
    /// First parallel (y) pixel.
    pub p1: u16,
    /// Last parallel (y) pixel, inclusive.
    pub p2: u16,
    /// Parallel binning.
    pub pbin: u16,
}

impl Region {
    /// Full-resolution square region starting at the origin.
    pub fn square(size: u16) -> Self {
        Self {
            s1: 0,
            s2: size.saturating_sub(1),
            sbin: 1,
            p1: 0,
            p2: size.saturating_sub(1),
            pbin: 1,
        }
    }

    /// Binned width in pixels.
    pub fn width(&self) -> u32 {
        (u32::from(self.s2) + 1).saturating_sub(u32::from(self.s1)) / u32::from(self.sbin.max(1))
    }

    /// Binned height in pixels.
    pub fn height(&self) -> u32 {
        (u32::from(self.p2) + 1).saturating_sub(u32::from(self.p1)) / u32::from(self.pbin.max(1))
    }

    /// Whether the bounds are ordered and binning is non-zero.
    pub fn is_valid(&self) -> bool {
        self.s2 >= self.s1 && self.p2 >= self.p1 && self.sbin > 0 && self.pbin > 0
    }
}

impl Default for Region {
    fn default() -> Self {
        Region::square(512)
    }
}

/// Exposure / trigger mode requested for continuous acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureMode {
    /// Whatever the camera reports as its default mode. On Prime-series cameras
    /// this is the only mode that accepts an overwriting circular buffer.
    CameraDefault,
    /// Legacy free-running `TIMED_MODE`.
    Timed,
    /// Extended trigger mode: internal trigger, expose-out on first row.
    InternalFirstRow,
    /// Extended trigger mode: internal trigger, rolling-shutter expose-out.
    InternalRollingShutter,
}

/// PVCAM `EXT_TRIG_INTERNAL` extended trigger mode.
pub const EXT_TRIG_INTERNAL: i16 = 7 << 8;
/// PVCAM `EXPOSE_OUT_ROLLING_SHUTTER` expose-out mode, OR-ed onto the trigger mode.
pub const EXPOSE_OUT_ROLLING_SHUTTER: i16 = 3;

impl ExposureMode {
    /// Raw SDK value for explicit modes; `None` for [`ExposureMode::CameraDefault`],
    /// which has to be queried from the camera.
    pub fn raw_value(&self) -> Option<i16> {
        match self {
            ExposureMode::CameraDefault => None,
            ExposureMode::Timed => Some(0),
            ExposureMode::InternalFirstRow => Some(EXT_TRIG_INTERNAL),
            ExposureMode::InternalRollingShutter => {
                Some(EXT_TRIG_INTERNAL | EXPOSE_OUT_ROLLING_SHUTTER)
            }
        }
    }
}

impl fmt::Display for ExposureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExposureMode::CameraDefault => "camera_default",
            ExposureMode::Timed => "timed",
            ExposureMode::InternalFirstRow => "internal_first_row",
            ExposureMode::InternalRollingShutter => "internal_rolling_shutter",
        };
        f.write_str(name)
    }
}

/// Mode actually negotiated with the camera, as the raw SDK value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedMode {
    /// What was asked for.
    pub requested: ExposureMode,
    /// The raw value that will be passed to continuous setup.
    pub raw: i16,
}

/// What the device does when the circular buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferPolicy {
    /// Oldest frames are overwritten (`CIRC_OVERWRITE`).
    Overwrite,
    /// Acquisition halts until frames are released (`CIRC_NO_OVERWRITE`).
    NoOverwrite,
}

/// Per-frame metadata handed to the end-of-frame callback.
///
/// The SDK-facing subset of PVCAM's `FRAME_INFO`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Camera the frame came from.
    pub camera: i16,
    /// Hardware frame number, 1-based and monotonic within one acquisition.
    pub frame_nr: i32,
    /// End-of-frame timestamp in the driver's time base (100 ns ticks for PVCAM).
    pub timestamp: i64,
    /// Readout time in the same units as `timestamp`.
    pub readout_time: i32,
    /// Beginning-of-frame timestamp.
    pub timestamp_bof: i64,
}

/// Result of a successful latest-frame fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestFrame {
    /// Address of the frame inside the caller's circular buffer.
    pub address: usize,
    /// Metadata of the fetched frame.
    pub info: FrameInfo,
}

/// End-of-frame notification entry point.
///
/// Invoked on a thread owned by the driver, with the frame metadata and the context
/// pointer supplied at registration. Either pointer may be null.
pub type EofCallback = unsafe extern "C" fn(frame_info: *const FrameInfo, context: *mut c_void);

/// Contract the acquisition loop needs from a camera SDK.
///
/// All methods take `&self` so the SDK can be shared as `Arc<dyn CameraSdk>` between
/// the control thread and the callback context. Implementations must use interior
/// mutability and must tolerate `fetch_latest_frame` being called from the
/// driver's own notification thread.
#[allow(unsafe_code)]
pub trait CameraSdk: Send + Sync {
    /// Lists the names of cameras that can be opened.
    fn enumerate_cameras(&self) -> Result<Vec<String>, SdkError>;

    /// Opens a camera by name.
    fn open(&self, name: &str) -> Result<CameraHandle, SdkError>;

    /// Closes an opened camera.
    fn close(&self, handle: CameraHandle) -> Result<(), SdkError>;

    /// Resolves `mode` to the raw value the camera will accept.
    fn select_exposure_mode(
        &self,
        handle: CameraHandle,
        mode: ExposureMode,
    ) -> Result<NegotiatedMode, SdkError>;

    /// Prepares continuous acquisition and returns the size of one frame in bytes.
    fn setup_continuous(
        &self,
        handle: CameraHandle,
        region: &Region,
        mode: NegotiatedMode,
        exposure_ms: u32,
        policy: BufferPolicy,
    ) -> Result<usize, SdkError>;

    /// Registers the single end-of-frame callback for this session.
    ///
    /// # Safety
    ///
    /// `context` must remain valid until [`CameraSdk::deregister_eof_callback`] has
    /// returned, and `callback` must be safe to call with it from any thread.
    unsafe fn register_eof_callback(
        &self,
        handle: CameraHandle,
        callback: EofCallback,
        context: *mut c_void,
    ) -> Result<(), SdkError>;

    /// Removes the end-of-frame callback. After this returns the callback is never
    /// invoked again.
    fn deregister_eof_callback(&self, handle: CameraHandle) -> Result<(), SdkError>;

    /// Starts continuous acquisition into a caller-owned buffer.
    ///
    /// # Safety
    ///
    /// `buffer` must point to `len` writable bytes that stay valid and unmoved until
    /// [`CameraSdk::abort`] has returned.
    unsafe fn start_continuous(
        &self,
        handle: CameraHandle,
        buffer: *mut u8,
        len: usize,
    ) -> Result<(), SdkError>;

    /// Aborts acquisition. Safe in any state, including already stopped.
    fn abort(&self, handle: CameraHandle) -> Result<(), SdkError>;

    /// Drains the device's ready-frame slot and returns the newest frame.
    /// Non-blocking; intended to be called from inside the callback.
    fn fetch_latest_frame(&self, handle: CameraHandle) -> Result<LatestFrame, SdkError>;

    /// Error code and message of the most recent failing call.
    fn last_error(&self) -> SdkError;
}

/// Instantiate the selected backend.
///
/// `mock` is only used by [`Backend::Mock`]. Selecting [`Backend::Pvcam`] in a build
/// without the `pvcam_hardware` feature is an error.
pub fn connect(backend: Backend, mock: &MockBehavior) -> ProbeResult<Arc<dyn CameraSdk>> {
    match backend {
        Backend::Mock => Ok(Arc::new(MockCameraSdk::new(mock.clone()))),
        #[cfg(feature = "pvcam_hardware")]
        Backend::Pvcam => Ok(Arc::new(pvcam::PvcamSdk::init().map_err(ProbeError::Sdk)?)),
        #[cfg(not(feature = "pvcam_hardware"))]
        Backend::Pvcam => Err(ProbeError::BackendUnavailable(
            "pvcam (rebuild with --features pvcam_hardware)".to_string(),
        )),
    }
}
