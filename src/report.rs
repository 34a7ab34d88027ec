//! Final run report.
//!
//! [`Report::from_outcome`] is a pure function of an [`AcquisitionOutcome`]: it
//! classifies the run, picks the exit code, and carries the numbers worth printing.
//! Rendering is text for a terminal or JSON for scripts.

use crate::acquisition::{AcquisitionOutcome, TerminalState};
use crate::error::SetupStage;
use chrono::{DateTime, Utc};
use humantime_serde::re::humantime;
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;

/// Classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Target frame count reached.
    Completed,
    /// A frame deadline was missed.
    Stalled,
    /// Acquisition never started.
    SetupFailed,
}

impl RunStatus {
    /// Process exit code for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::Stalled => 1,
            RunStatus::SetupFailed => 2,
        }
    }
}

/// SDK error code and message, as reported by the camera driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SdkDiagnostic {
    /// Driver error code.
    pub code: i32,
    /// Driver error message.
    pub message: String,
}

/// Inter-frame timing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalSummary {
    /// Shortest interval.
    pub min_ms: f64,
    /// Longest interval.
    pub max_ms: f64,
    /// Mean interval.
    pub mean_ms: f64,
    /// Interval before the last consumed frame.
    pub last_ms: f64,
}

/// Everything printed at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// 1-based run number.
    pub run: u32,
    /// Camera name.
    pub camera: String,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Total run time.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Classification.
    pub status: RunStatus,
    /// Frames consumed.
    pub frames_acquired: u32,
    /// Frames needed for success.
    pub target_frames: u32,
    /// Per-frame deadline in force.
    #[serde(with = "humantime_serde")]
    pub frame_deadline: Duration,
    /// Frame whose deadline was missed, for stalled runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stalled_at_frame: Option<u32>,
    /// Setup stage that failed, for setup failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<SetupStage>,
    /// Failure description, for runs that did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Driver diagnostic for SDK setup failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_error: Option<SdkDiagnostic>,
    /// Frames whose latest-frame fetch failed.
    pub degraded_frames: u32,
    /// Signals that overwrote an unconsumed one.
    pub coalesced_signals: u64,
    /// Notifications the callback handled.
    pub callback_invocations: u64,
    /// Discontinuities in the hardware frame number.
    pub gap_events: u64,
    /// Frames the driver skipped across all gaps.
    pub lost_frames: u64,
    /// Inter-frame timing, when at least one frame arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervals: Option<IntervalSummary>,
    /// Resources teardown had to leak because the driver could not be stopped.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub leaked: Vec<&'static str>,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl Report {
    /// Build the report for a finished run.
    pub fn from_outcome(outcome: &AcquisitionOutcome) -> Self {
        let (status, stalled_at_frame, failed_stage, error, sdk_error) = match &outcome.terminal
        {
            TerminalState::Completed => (RunStatus::Completed, None, None, None, None),
            TerminalState::Stalled { frame_index } => (
                RunStatus::Stalled,
                Some(*frame_index),
                None,
                Some(format!(
                    "no frame within {} while waiting for frame {frame_index}",
                    humantime::format_duration(outcome.frame_deadline)
                )),
                None,
            ),
            TerminalState::SetupFailed { error, diagnostic } => (
                RunStatus::SetupFailed,
                None,
                Some(error.stage),
                Some(error.to_string()),
                diagnostic.as_ref().map(|d| SdkDiagnostic {
                    code: d.code,
                    message: d.message.clone(),
                }),
            ),
        };

        let stats = &outcome.intervals;
        let intervals = match (stats.min(), stats.max(), stats.mean(), outcome.last_interval) {
            (Some(min), Some(max), Some(mean), Some(last)) => Some(IntervalSummary {
                min_ms: millis(min),
                max_ms: millis(max),
                mean_ms: millis(mean),
                last_ms: millis(last),
            }),
            _ => None,
        };

        let mut leaked = Vec::new();
        if outcome.teardown.buffer_leaked {
            leaked.push("circular_buffer");
        }
        if outcome.teardown.context_leaked {
            leaked.push("callback_context");
        }

        Self {
            run: outcome.run,
            camera: outcome.camera.clone(),
            started_at: outcome.started_at,
            elapsed: outcome.elapsed,
            status,
            frames_acquired: outcome.frames_acquired,
            target_frames: outcome.target_frames,
            frame_deadline: outcome.frame_deadline,
            stalled_at_frame,
            failed_stage,
            error,
            sdk_error,
            degraded_frames: outcome.degraded_frames,
            coalesced_signals: outcome.event_stats.overwritten,
            callback_invocations: outcome.callback_invocations,
            gap_events: outcome.gap_events,
            lost_frames: outcome.lost_frames,
            intervals,
            leaked,
        }
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// One-line verdict.
    pub fn headline(&self) -> String {
        match self.status {
            RunStatus::Completed => format!(
                "COMPLETED: {}/{} frames acquired",
                self.frames_acquired, self.target_frames
            ),
            RunStatus::Stalled => format!(
                "STALLED at frame {} ({} frames acquired, deadline {})",
                self.stalled_at_frame.unwrap_or(self.frames_acquired + 1),
                self.frames_acquired,
                humantime::format_duration(self.frame_deadline)
            ),
            RunStatus::SetupFailed => format!(
                "SETUP FAILED at stage {}",
                self.failed_stage
                    .map_or_else(|| "unknown".to_string(), |s| s.to_string())
            ),
        }
    }

    /// Multi-line human readable rendering.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run {} on {}: {}", self.run, self.camera, self.headline());
        let _ = writeln!(
            out,
            "  started {}, took {:.3} s",
            self.started_at.to_rfc3339(),
            self.elapsed.as_secs_f64()
        );
        if let Some(error) = &self.error {
            let _ = writeln!(out, "  error: {error}");
        }
        if let Some(sdk) = &self.sdk_error {
            let _ = writeln!(out, "  sdk error {}: {}", sdk.code, sdk.message);
        }
        if let Some(iv) = &self.intervals {
            let _ = writeln!(
                out,
                "  intervals: min {:.2} ms, mean {:.2} ms, max {:.2} ms, last {:.2} ms",
                iv.min_ms, iv.mean_ms, iv.max_ms, iv.last_ms
            );
        }
        let _ = writeln!(
            out,
            "  degraded frames: {}, coalesced signals: {}, callbacks: {}",
            self.degraded_frames, self.coalesced_signals, self.callback_invocations
        );
        if self.gap_events > 0 {
            let _ = writeln!(
                out,
                "  frame gaps: {} ({} frames lost by the driver)",
                self.gap_events, self.lost_frames
            );
        }
        if !self.leaked.is_empty() {
            let _ = writeln!(
                out,
                "  teardown leaked: {} (acquisition could not be stopped)",
                self.leaked.join(", ")
            );
        }
        out
    }

    /// JSON rendering.
    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
