//! Setup failures end the run as `SetupFailed` at the right stage, before any frame
//! wait, and still tear down exactly once.

mod common;

use common::{assert_torn_down, behavior, mock_runner, test_settings};
use pvcam_stall_probe::error::{AllocationError, SetupCause, SetupStage};
use pvcam_stall_probe::report::RunStatus;
use pvcam_stall_probe::sdk::mock::INJECTED_FAILURE;
use pvcam_stall_probe::{ProbeError, Report, TerminalState};
use std::time::Duration;

const LONG_DEADLINE: Duration = Duration::from_secs(5);

#[test]
fn buffer_over_ceiling_fails_before_any_wait() {
    let mut settings = test_settings(200, LONG_DEADLINE);
    settings.buffer_limit_bytes = Some(1024);
    let (sdk, runner) = mock_runner(behavior(|_| {}), settings);

    let outcome = runner.run(1);

    match &outcome.terminal {
        TerminalState::SetupFailed { error, diagnostic } => {
            assert_eq!(error.stage, SetupStage::AllocateBuffer);
            assert!(matches!(
                error.cause,
                SetupCause::Allocation(AllocationError::ExceedsLimit { limit: 1024, .. })
            ));
            assert!(diagnostic.is_none());
        }
        other => panic!("expected setup failure, got {other:?}"),
    }
    assert_eq!(outcome.frames_acquired, 0);
    assert_eq!(outcome.event_stats.consumed, 0);
    assert!(outcome.elapsed < LONG_DEADLINE);

    let stats = sdk.stats();
    assert_eq!(stats.register_calls, 0);
    assert_eq!(stats.start_calls, 0);
    assert_torn_down(&sdk, 1, false);

    let report = Report::from_outcome(&outcome);
    assert_eq!(report.status, RunStatus::SetupFailed);
    assert_eq!(report.failed_stage, Some(SetupStage::AllocateBuffer));
    assert_eq!(report.exit_code(), 2);
}

#[test]
fn zero_frame_size_fails_allocation() {
    let (_sdk, runner) = mock_runner(
        behavior(|b| b.frame_bytes = Some(0)),
        test_settings(10, LONG_DEADLINE),
    );

    let outcome = runner.run(1);

    assert!(matches!(
        &outcome.terminal,
        TerminalState::SetupFailed { error, .. }
            if error.cause == SetupCause::Allocation(AllocationError::ZeroSize)
    ));
}

#[test]
fn injected_failure_at_each_stage_is_reported() {
    let stages = [
        SetupStage::OpenDevice,
        SetupStage::SelectExposureMode,
        SetupStage::SetupAcquisition,
        SetupStage::RegisterCallback,
        SetupStage::StartAcquisition,
    ];

    for stage in stages {
        let (sdk, runner) = mock_runner(
            behavior(|b| b.fail_stage = Some(stage)),
            test_settings(10, LONG_DEADLINE),
        );

        let outcome = runner.run(1);

        match &outcome.terminal {
            TerminalState::SetupFailed { error, diagnostic } => {
                assert_eq!(error.stage, stage);
                let diagnostic = diagnostic.as_ref().expect("SDK diagnostic");
                assert_eq!(diagnostic.code, INJECTED_FAILURE);
            }
            other => panic!("{stage}: expected setup failure, got {other:?}"),
        }
        assert!(outcome.elapsed < LONG_DEADLINE, "{stage} waited for frames");

        // No handle means nothing to abort or close.
        let opened = stage != SetupStage::OpenDevice;
        let registered = stage == SetupStage::StartAcquisition;
        let expected = u64::from(opened);
        let stats = sdk.stats();
        assert_eq!(stats.abort_calls, expected, "{stage}: {stats:?}");
        assert_eq!(stats.close_calls, expected, "{stage}: {stats:?}");
        assert_eq!(
            stats.deregister_calls,
            u64::from(registered),
            "{stage}: {stats:?}"
        );
    }
}

#[test]
fn unknown_camera_fails_at_open() {
    let mut settings = test_settings(10, LONG_DEADLINE);
    settings.camera = "Prime95B".to_string();
    let (sdk, runner) = mock_runner(behavior(|_| {}), settings);

    let outcome = runner.run(1);

    let report = Report::from_outcome(&outcome);
    assert_eq!(report.failed_stage, Some(SetupStage::OpenDevice));
    assert!(report.sdk_error.is_some());
    assert_torn_down(&sdk, 0, false);
}

#[test]
fn setup_failure_maps_to_setup_error() {
    let (_sdk, runner) = mock_runner(
        behavior(|b| b.fail_stage = Some(SetupStage::StartAcquisition)),
        test_settings(10, LONG_DEADLINE),
    );

    match runner.run(1).into_result() {
        Err(ProbeError::Setup(err)) => assert_eq!(err.stage, SetupStage::StartAcquisition),
        other => panic!("expected setup error, got {other:?}"),
    }
}
