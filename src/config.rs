//! Probe configuration using Figment
//!
//! Configuration is layered from:
//! 1. built-in defaults (every field has one, so no file is required)
//! 2. a TOML file (`config/stall_probe.toml` unless another path is given)
//! 3. environment variables prefixed with `STALL_PROBE_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use pvcam_stall_probe::config::ProbeConfig;
//!
//! // STALL_PROBE_ACQUISITION__FRAME_DEADLINE=500ms overrides the file
//! let config = ProbeConfig::load()?;
//! config.validate()?;
//! println!("Target: {} frames", config.acquisition.target_frames);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::acquisition::{
    AcquisitionSettings, DEFAULT_BUFFER_FRAMES, DEFAULT_FRAME_DEADLINE, DEFAULT_PROGRESS_EVERY,
    DEFAULT_TARGET_FRAMES,
};
use crate::error::{ProbeError, ProbeResult};
use crate::sdk::mock::MockBehavior;
use crate::sdk::{BufferPolicy, ExposureMode, Region};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/stall_probe.toml";
/// Environment variable prefix.
pub const ENV_PREFIX: &str = "STALL_PROBE_";

/// Top-level probe configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Which camera and how it is set up
    pub camera: CameraConfig,
    /// Run length, deadline and buffer sizing
    pub acquisition: AcquisitionConfig,
    /// Report output
    pub report: ReportConfig,
    /// Simulated driver behavior (mock backend only)
    pub mock: MockBehavior,
}

/// Application-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "PVCAM Stall Probe".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// Single-line
    Compact,
    /// Structured JSON lines
    Json,
}

/// Which driver implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process simulated camera
    Mock,
    /// PVCAM SDK (needs the `pvcam_hardware` feature)
    Pvcam,
}

/// Camera selection and setup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Driver implementation
    pub backend: Backend,
    /// Camera name as reported by enumeration
    pub name: String,
    /// Sensor region of interest and binning
    pub region: Region,
    /// Exposure / trigger mode to request
    pub exposure_mode: ExposureMode,
    /// Exposure time in milliseconds
    pub exposure_ms: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Mock,
            name: "PMUSBCam00".to_string(),
            region: Region::default(),
            exposure_mode: ExposureMode::CameraDefault,
            exposure_ms: 10,
        }
    }
}

/// Acquisition run parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Frames needed for a successful run
    pub target_frames: u32,
    /// Longest wait for any single frame
    #[serde(with = "humantime_serde")]
    pub frame_deadline: Duration,
    /// Frames retained in the circular buffer
    pub buffer_frames: usize,
    /// Optional byte ceiling for the circular buffer
    pub buffer_limit_bytes: Option<usize>,
    /// Behavior when the circular buffer is full
    pub buffer_policy: BufferPolicy,
    /// Progress log cadence in frames (0 = off)
    pub progress_every: u32,
    /// Consecutive runs; stops at the first run that does not complete
    pub runs: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            target_frames: DEFAULT_TARGET_FRAMES,
            frame_deadline: DEFAULT_FRAME_DEADLINE,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            buffer_limit_bytes: None,
            buffer_policy: BufferPolicy::Overwrite,
            progress_every: DEFAULT_PROGRESS_EVERY,
            runs: 1,
        }
    }
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human readable lines
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Report settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Output format of the final report
    pub format: ReportFormat,
}

impl ProbeConfig {
    /// Load from the default file location and the environment.
    pub fn load() -> ProbeResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults fill in.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ProbeResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// The provider stack, for callers that want to merge more on top.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ProbeResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.camera.name.trim().is_empty() {
            return Err(invalid("camera.name must not be empty"));
        }

        if !self.camera.region.is_valid() {
            return Err(invalid(format!(
                "Invalid camera.region {:?}: bounds must be ordered and binning non-zero",
                self.camera.region
            )));
        }

        let acq = &self.acquisition;
        if acq.target_frames == 0 {
            return Err(invalid("acquisition.target_frames must be at least 1"));
        }
        if acq.frame_deadline.is_zero() {
            return Err(invalid("acquisition.frame_deadline must be non-zero"));
        }
        if acq.buffer_frames == 0 {
            return Err(invalid("acquisition.buffer_frames must be at least 1"));
        }
        if acq.buffer_limit_bytes == Some(0) {
            return Err(invalid("acquisition.buffer_limit_bytes must be non-zero when set"));
        }
        if acq.runs == 0 {
            return Err(invalid("acquisition.runs must be at least 1"));
        }

        if self.camera.backend == Backend::Mock {
            if self.mock.frame_interval.is_zero() {
                return Err(invalid("mock.frame_interval must be non-zero"));
            }
            if self.mock.ready_queue_depth == 0 {
                return Err(invalid("mock.ready_queue_depth must be at least 1"));
            }
            if !self.mock.cameras.iter().any(|c| c == &self.camera.name) {
                return Err(invalid(format!(
                    "camera.name '{}' is not one of the mock cameras: {}",
                    self.camera.name,
                    self.mock.cameras.join(", ")
                )));
            }
        }

        Ok(())
    }

    /// Settings for one acquisition run.
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            camera: self.camera.name.clone(),
            region: self.camera.region,
            exposure_mode: self.camera.exposure_mode,
            exposure_ms: self.camera.exposure_ms,
            buffer_policy: self.acquisition.buffer_policy,
            buffer_frames: self.acquisition.buffer_frames,
            buffer_limit_bytes: self.acquisition.buffer_limit_bytes,
            target_frames: self.acquisition.target_frames,
            frame_deadline: self.acquisition.frame_deadline,
            progress_every: self.acquisition.progress_every,
        }
    }
}

fn invalid(message: impl Into<String>) -> ProbeError {
    ProbeError::InvalidConfig(message.into())
}
