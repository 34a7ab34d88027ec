//! Shared helpers for the stall probe integration tests.
//!
//! Everything here drives `MockCameraSdk`, so the tests run without a camera.

#![allow(dead_code)] // Not every test file uses every helper

use pvcam_stall_probe::acquisition::{AcquisitionRunner, AcquisitionSettings};
use pvcam_stall_probe::sdk::mock::{MockBehavior, MockCameraSdk};
use pvcam_stall_probe::sdk::Region;
use std::sync::Arc;
use std::time::Duration;

/// Frame period used by the timing scenarios.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(10);

/// Small frames keep allocation out of the picture.
pub fn test_settings(target_frames: u32, frame_deadline: Duration) -> AcquisitionSettings {
    AcquisitionSettings {
        region: Region::square(64),
        buffer_frames: 8,
        target_frames,
        frame_deadline,
        progress_every: 0,
        ..AcquisitionSettings::default()
    }
}

/// A mock camera emitting a frame every [`FRAME_INTERVAL`], with overrides applied.
pub fn behavior(overrides: impl FnOnce(&mut MockBehavior)) -> MockBehavior {
    let mut behavior = MockBehavior {
        frame_interval: FRAME_INTERVAL,
        ..MockBehavior::default()
    };
    overrides(&mut behavior);
    behavior
}

/// Runner over a fresh mock SDK. The SDK is returned for call-count assertions.
pub fn mock_runner(
    behavior: MockBehavior,
    settings: AcquisitionSettings,
) -> (Arc<MockCameraSdk>, AcquisitionRunner) {
    let sdk = Arc::new(MockCameraSdk::new(behavior));
    let runner = AcquisitionRunner::new(sdk.clone(), settings);
    (sdk, runner)
}

/// Abort, deregister and close each happened exactly `times` times.
pub fn assert_torn_down(sdk: &MockCameraSdk, times: u64, registered: bool) {
    let stats = sdk.stats();
    assert_eq!(stats.abort_calls, times, "abort calls: {stats:?}");
    assert_eq!(stats.close_calls, times, "close calls: {stats:?}");
    let expected_deregister = if registered { times } else { 0 };
    assert_eq!(
        stats.deregister_calls, expected_deregister,
        "deregister calls: {stats:?}"
    );
}
