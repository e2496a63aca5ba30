//! Detection loop integration tests
//!
//! Drive the full engine with scripted match results: hold/countdown to
//! submission, grace-period tolerance, candidate switching, the unknown
//! signal, the explicit-confirmation flow, and watchdog recovery.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use odk_common::events::{CheckinSource, FaceStatus, KioskEvent};

use odk_ck::clients::{AttendanceService, MatchResolver};
use odk_ck::engine::camera::{CaptureDevice, TestPatternDevice};
use odk_ck::engine::detector::{DetectionLoop, DetectorGate};
use odk_ck::engine::hold::HoldState;
use odk_ck::engine::presence::CenterWeightedDetector;
use odk_ck::engine::submit::SubmissionCoordinator;
use odk_ck::engine::watchdog::spawn_watchdog;
use odk_ck::state::{Session, SharedState};

use helpers::{create_test_db, fast_tuning, wait_for_event, FakeAttendance, ScriptedResolver, TestRig};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn double_match_countdown_submits_exactly_once() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(77);
    rig.resolver.set_steady_subject(subject, "Alex Kim");
    let mut rx = rig.state.subscribe_events();

    rig.start_session().await;

    // Confirmations build, countdown reaches zero, submission fires once
    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::CheckinAccepted { .. })
    })
    .await;
    let KioskEvent::CheckinAccepted {
        subject_id,
        already_checked_in,
        source,
        ..
    } = event
    else {
        unreachable!()
    };
    assert_eq!(subject_id, subject);
    assert!(!already_checked_in);
    assert_eq!(source, CheckinSource::Face);

    // Attendance count increased by exactly 1 and the hold reset to Idle
    assert_eq!(rig.state.attendance_count(), 1);
    assert_eq!(rig.attendance.calls_for(subject), 1);

    // Detection resumes after the dismiss delay; the same subject is still
    // in front of the camera, so the re-scan classifies as duplicate and
    // the count does not move
    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::CheckinAccepted { .. })
    })
    .await;
    assert!(matches!(
        event,
        KioskEvent::CheckinAccepted {
            already_checked_in: true,
            ..
        }
    ));
    assert_eq!(rig.state.attendance_count(), 1);
}

#[tokio::test]
async fn hold_progress_events_count_down() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(5);
    rig.resolver.set_steady_subject(subject, "Sam Lee");
    let mut rx = rig.state.subscribe_events();

    rig.start_session().await;

    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::HoldStarted { .. })
    })
    .await;
    let KioskEvent::HoldStarted {
        countdown_seconds, ..
    } = event
    else {
        unreachable!()
    };
    assert_eq!(countdown_seconds, rig.tuning.hold_countdown_seconds);

    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::HoldProgress { .. })
    })
    .await;
    assert!(matches!(
        event,
        KioskEvent::HoldProgress {
            remaining_seconds: 0,
            ..
        }
    ));
}

#[tokio::test]
async fn grace_misses_do_not_cancel_an_active_hold() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(8);
    // One clean match, then two resolver failures (grace threshold is 3),
    // then the subject matches steadily again
    rig.resolver.push_found(subject, "Rowan Park", 0.30);
    rig.resolver.push_error();
    rig.resolver.push_error();
    rig.resolver.set_steady_subject(subject, "Rowan Park");
    let mut rx = rig.state.subscribe_events();

    rig.start_session().await;

    // The hold must survive the misses and complete its countdown
    loop {
        let event = wait_for_event(&mut rx, WAIT, |e| {
            matches!(
                e,
                KioskEvent::HoldCanceled { .. } | KioskEvent::CheckinAccepted { .. }
            )
        })
        .await;
        match event {
            KioskEvent::HoldCanceled { reason, .. } => {
                panic!("hold canceled ({}) despite grace window", reason);
            }
            KioskEvent::CheckinAccepted { subject_id, .. } => {
                assert_eq!(subject_id, subject);
                break;
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn grace_exhaustion_cancels_the_hold() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(8);
    // One match, then nothing but not-found: misses exhaust the grace
    // window before the countdown can finish
    rig.resolver.push_found(subject, "Rowan Park", 0.30);
    let mut rx = rig.state.subscribe_events();

    rig.start_session().await;

    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::HoldCanceled { .. })
    })
    .await;
    let KioskEvent::HoldCanceled {
        subject_id, reason, ..
    } = event
    else {
        unreachable!()
    };
    assert_eq!(subject_id, subject);
    assert_eq!(reason, "grace_exhausted");

    // No submission ever happened
    assert_eq!(rig.attendance.call_count(), 0);
}

#[tokio::test]
async fn different_subject_restarts_the_hold() {
    let rig = TestRig::new().await;
    let first = Uuid::from_u128(1);
    let second = Uuid::from_u128(2);
    rig.resolver.push_found(first, "First", 0.30);
    rig.resolver.set_steady_subject(second, "Second");
    let mut rx = rig.state.subscribe_events();

    rig.start_session().await;

    // The first hold cancels in favor of the new subject
    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::HoldCanceled { .. })
    })
    .await;
    let KioskEvent::HoldCanceled {
        subject_id, reason, ..
    } = event
    else {
        unreachable!()
    };
    assert_eq!(subject_id, first);
    assert_eq!(reason, "switched_candidate");

    // The new subject completes a full countdown and checks in
    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::CheckinAccepted { .. })
    })
    .await;
    let KioskEvent::CheckinAccepted { subject_id, .. } = event else {
        unreachable!()
    };
    assert_eq!(subject_id, second);
    assert_eq!(rig.attendance.calls_for(first), 0);
}

#[tokio::test]
async fn empty_scene_surfaces_unknown_after_delay() {
    let rig = TestRig::new().await;
    rig.device.set_subject_present(false);
    let mut rx = rig.state.subscribe_events();

    rig.start_session().await;

    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(
            e,
            KioskEvent::FaceStatusChanged {
                new_status: FaceStatus::Unknown,
                ..
            }
        )
    })
    .await;
    assert!(matches!(event, KioskEvent::FaceStatusChanged { .. }));

    // No resolver traffic for an empty scene: local presence detection
    // filtered every frame
    assert_eq!(
        rig.resolver
            .match_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn matches_above_distance_ceiling_are_misses() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(3);
    // Distance above the 0.6 ceiling: never held
    rig.resolver.push_found(subject, "Too Far", 0.95);
    let mut rx = rig.state.subscribe_events();

    rig.start_session().await;

    // Give the loop time to process the scripted response
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(rig.attendance.call_count(), 0);
    // No hold ever started
    while let Ok(event) = rx.try_recv() {
        assert!(
            !matches!(event, KioskEvent::HoldStarted { .. }),
            "weak match must not start a hold"
        );
    }
}

// ============================================================================
// Explicit-confirmation flow
// ============================================================================

#[tokio::test]
async fn confirmation_mode_waits_for_staff() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(21);
    rig.resolver.set_steady_subject(subject, "Jo March");
    let mut rx = rig.state.subscribe_events();

    rig.start_session_with(true).await;

    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::AwaitingConfirmation { .. })
    })
    .await;
    let KioskEvent::AwaitingConfirmation { subject_id, .. } = event else {
        unreachable!()
    };
    assert_eq!(subject_id, subject);
    assert_eq!(rig.attendance.call_count(), 0);

    // Staff confirm commits the check-in
    let result = rig.engine.confirm_hold().await.unwrap();
    assert!(matches!(
        result,
        odk_ck::engine::submit::SubmitResult::Accepted {
            already_checked_in: false
        }
    ));
    assert_eq!(rig.attendance.calls_for(subject), 1);
}

#[tokio::test]
async fn confirmation_decline_returns_to_idle() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(22);
    rig.resolver.set_steady_subject(subject, "Kai Chen");
    let mut rx = rig.state.subscribe_events();

    rig.start_session_with(true).await;

    wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::AwaitingConfirmation { .. })
    })
    .await;

    rig.engine.cancel_hold().await.unwrap();
    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::HoldCanceled { .. })
    })
    .await;
    let KioskEvent::HoldCanceled { reason, .. } = event else {
        unreachable!()
    };
    assert_eq!(reason, "confirmation_declined");
    assert_eq!(rig.attendance.call_count(), 0);

    // With nothing pending, another cancel is an invalid-state error
    assert!(rig.engine.cancel_hold().await.is_err());
}

#[tokio::test]
async fn unconfirmed_hold_times_out() {
    let rig = TestRig::new().await;
    let subject = Uuid::from_u128(23);
    // Only the initial match; the subject walks away while the kiosk waits
    // for staff
    rig.resolver.push_found(subject, "Ash Gray", 0.30);
    let mut rx = rig.state.subscribe_events();

    rig.start_session_with(true).await;

    // The grace window expires first (the subject is gone), or the
    // confirmation deadline does; either way the kiosk returns to Idle
    // without a submission
    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::HoldCanceled { .. })
    })
    .await;
    let KioskEvent::HoldCanceled { reason, .. } = event else {
        unreachable!()
    };
    assert!(
        reason == "confirmation_timeout" || reason == "grace_exhausted",
        "unexpected cancel reason {}",
        reason
    );
    assert_eq!(rig.attendance.call_count(), 0);
}

// ============================================================================
// Watchdog
// ============================================================================

#[tokio::test]
async fn watchdog_restarts_an_absent_loop() {
    let tuning = fast_tuning();
    let pool = create_test_db().await;
    let state = Arc::new(SharedState::new());
    let device = Arc::new(TestPatternDevice::new());
    let resolver = Arc::new(ScriptedResolver::new());
    let attendance = Arc::new(FakeAttendance::new());
    let hold = Arc::new(std::sync::Mutex::new(HoldState::new()));
    let gate = Arc::new(DetectorGate::new());

    let coordinator = Arc::new(SubmissionCoordinator::new(
        Arc::clone(&attendance) as Arc<dyn AttendanceService>,
        Arc::clone(&resolver) as Arc<dyn MatchResolver>,
        pool,
        Arc::clone(&state),
        Arc::clone(&hold),
        Arc::clone(&gate),
        tuning.clone(),
        "test-tenant".to_string(),
    ));
    let detector = Arc::new(DetectionLoop::new(
        Arc::clone(&device) as Arc<dyn CaptureDevice>,
        Arc::new(CenterWeightedDetector::default()),
        Arc::clone(&resolver) as Arc<dyn MatchResolver>,
        Arc::clone(&coordinator),
        hold,
        gate,
        Arc::clone(&state),
        tuning.clone(),
    ));

    // Conditions say detection should be live, but nobody started the loop
    state
        .set_session(Some(Session {
            event_id: Uuid::from_u128(9),
            event_name: "Test Event".to_string(),
            staff_token: "staff".to_string(),
            require_confirmation: false,
            started_at: chrono::Utc::now(),
        }))
        .await;
    state.set_camera_active(true);
    device.start().unwrap();
    assert!(!detector.is_running());

    let mut rx = state.subscribe_events();
    let watchdog = spawn_watchdog(
        Arc::clone(&detector),
        coordinator,
        Arc::clone(&state),
        tuning,
    );

    let event = wait_for_event(&mut rx, WAIT, |e| {
        matches!(e, KioskEvent::DetectorRestarted { .. })
    })
    .await;
    assert!(matches!(
        event,
        KioskEvent::DetectorRestarted {
            restart_count: 1,
            ..
        }
    ));
    assert!(detector.is_running());
    assert_eq!(state.watchdog_restarts(), 1);

    watchdog.abort();
    detector.stop().await;
}
