//! # PVCAM Stall Probe
//!
//! Drives a PVCAM camera (or a simulated one) in continuous circular-buffer
//! acquisition and detects silent stalls: the camera or driver stops signalling new
//! frames without reporting an error.
//!
//! ## Crate Structure
//!
//! - **`frame_event`**: the single-slot mailbox the end-of-frame callback signals and
//!   the control loop waits on. The only state both threads touch.
//! - **`callback`**: the `extern "C"` end-of-frame handler, run on the driver's thread.
//! - **`circ_buffer`**: the page-aligned circular buffer handed to the driver.
//! - **`acquisition`**: setup, the control loop with its per-frame deadline, and
//!   teardown on every exit path.
//! - **`report`**: turns a finished run into a verdict, text or JSON.
//! - **`sdk`**: the `CameraSdk` contract, the simulated driver and (with the
//!   `pvcam_hardware` feature) the PVCAM implementation.
//! - **`config`**, **`logging`**, **`error`**: configuration, tracing setup, errors.

pub mod acquisition;
pub mod callback;
pub mod circ_buffer;
pub mod config;
pub mod error;
pub mod frame_event;
pub mod logging;
pub mod report;
pub mod sdk;

pub use acquisition::{AcquisitionOutcome, AcquisitionRunner, AcquisitionSettings, TerminalState};
pub use error::{ProbeError, ProbeResult};
pub use report::Report;
