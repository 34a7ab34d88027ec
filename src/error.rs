//! Error types for the stall probe.
//!
//! The taxonomy mirrors how a run can end badly:
//!
//! - **`SdkError`**: a collaborator call failed. Carries the SDK's own error code and
//!   message, fetched from its "last error" query.
//! - **`AllocationError`**: the circular buffer could not be allocated.
//! - **`SetupError`**: any failure before frames start flowing, tagged with the
//!   [`SetupStage`] that failed. Always fatal to the run.
//! - **`ProbeError`**: crate-level error. Wraps configuration and logging failures,
//!   setup failures, and the stall condition itself (`ProbeError::Stall`), which is
//!   the primary thing this crate exists to surface.
//!
//! Degraded frames (a failed latest-frame fetch inside the callback) are deliberately
//! not an error type: they are swallowed at the callback boundary and surfaced through
//! `FrameDescriptor::degraded`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the probe error type.
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Failure reported by the camera SDK (real or simulated).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SDK error {code}: {message}")]
pub struct SdkError {
    /// Numeric error code as returned by the SDK's error query.
    pub code: i32,
    /// Human readable message for `code`.
    pub message: String,
}

impl SdkError {
    /// Create an error from a code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Why the circular buffer could not be allocated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocationError {
    /// Frame size or frame count was zero.
    #[error("circular buffer size must be non-zero")]
    ZeroSize,

    /// Frame size times frame count does not fit in `usize`.
    #[error("{frames} frames of {frame_bytes} bytes overflows usize")]
    SizeOverflow {
        /// Bytes per frame.
        frame_bytes: usize,
        /// Frames requested.
        frames: usize,
    },

    /// The total is above the configured byte ceiling.
    #[error("requested {requested} bytes exceeds the {limit} byte buffer ceiling")]
    ExceedsLimit {
        /// Total bytes requested.
        requested: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// `Layout` rejected the size and alignment.
    #[error("no valid {alignment}-byte aligned layout for {requested} bytes")]
    InvalidLayout {
        /// Total bytes requested.
        requested: usize,
        /// Required alignment.
        alignment: usize,
    },

    /// The allocator returned null.
    #[error("allocator could not provide {requested} bytes")]
    OutOfMemory {
        /// Total bytes requested.
        requested: usize,
    },
}

/// The setup step during which a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    /// Opening the device session.
    OpenDevice,
    /// Selecting the exposure / trigger mode.
    SelectExposureMode,
    /// Negotiating continuous-acquisition parameters (yields the frame size).
    SetupAcquisition,
    /// Allocating the circular buffer.
    AllocateBuffer,
    /// Registering the end-of-frame callback.
    RegisterCallback,
    /// Starting continuous acquisition.
    StartAcquisition,
}

impl SetupStage {
    /// Stable snake_case name, used in reports and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStage::OpenDevice => "open_device",
            SetupStage::SelectExposureMode => "select_exposure_mode",
            SetupStage::SetupAcquisition => "setup_acquisition",
            SetupStage::AllocateBuffer => "allocate_buffer",
            SetupStage::RegisterCallback => "register_callback",
            SetupStage::StartAcquisition => "start_acquisition",
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of a [`SetupError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupCause {
    /// A camera SDK call failed.
    #[error(transparent)]
    Sdk(#[from] SdkError),

    /// The circular buffer could not be allocated.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// A failure before acquisition was running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("setup stage '{stage}' failed: {cause}")]
pub struct SetupError {
    /// Which step failed.
    pub stage: SetupStage,
    /// What the collaborator or allocator reported.
    #[source]
    pub cause: SetupCause,
}

impl SetupError {
    /// Tag `cause` with the stage it happened in.
    pub fn new(stage: SetupStage, cause: impl Into<SetupCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Loading or extracting the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// The configuration loaded but holds an unusable value.
    #[error("Configuration validation error: {0}")]
    InvalidConfig(String),

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    /// A run failed during setup.
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// A run missed its per-frame deadline.
    #[error(
        "Stall: no frame within {deadline:?} while waiting for frame {frame_index} \
         ({frames_acquired} frames acquired)"
    )]
    Stall {
        /// 1-based index of the frame whose deadline was missed.
        frame_index: u32,
        /// Frames consumed before the missed deadline.
        frames_acquired: u32,
        /// The per-frame deadline that elapsed.
        deadline: Duration,
    },

    /// A camera SDK call outside a run failed (initialization, enumeration).
    #[error("Camera SDK error: {0}")]
    Sdk(#[from] SdkError),

    /// The selected backend was not compiled in.
    #[error("Backend '{0}' is not available in this build")]
    BackendUnavailable(String),
}

impl From<figment::Error> for ProbeError {
    fn from(err: figment::Error) -> Self {
        ProbeError::Config(Box::new(err))
    }
}
