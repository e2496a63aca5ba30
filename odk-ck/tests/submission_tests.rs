//! Submission coordinator tests
//!
//! Covers the at-most-one-in-flight guarantee, duplicate classification,
//! failure classification, and the offline queue's FIFO drain with
//! drop-on-failure.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use odk_common::events::{CheckinSource, KioskEvent};

use odk_ck::clients::{AttendanceService, MatchResolver};
use odk_ck::config::TuningConfig;
use odk_ck::db::offline_queue;
use odk_ck::engine::camera::{CaptureDevice, TestPatternDevice};
use odk_ck::engine::detector::DetectorGate;
use odk_ck::engine::hold::HoldState;
use odk_ck::engine::submit::{CheckinAttempt, SubmissionCoordinator, SubmitResult};
use odk_ck::state::SharedState;

use helpers::{
    create_test_db, fast_tuning, wait_for_event, AttendanceMode, FakeAttendance, ScriptedResolver,
};

struct CoordinatorRig {
    coordinator: Arc<SubmissionCoordinator>,
    state: Arc<SharedState>,
    attendance: Arc<FakeAttendance>,
    resolver: Arc<ScriptedResolver>,
    hold: Arc<std::sync::Mutex<HoldState>>,
    gate: Arc<DetectorGate>,
    pool: sqlx::Pool<sqlx::Sqlite>,
}

async fn build_coordinator(tuning: TuningConfig) -> CoordinatorRig {
    let pool = create_test_db().await;
    let state = Arc::new(SharedState::new());
    let attendance = Arc::new(FakeAttendance::new());
    let resolver = Arc::new(ScriptedResolver::new());
    let hold = Arc::new(std::sync::Mutex::new(HoldState::new()));
    let gate = Arc::new(DetectorGate::new());

    let coordinator = Arc::new(SubmissionCoordinator::new(
        Arc::clone(&attendance) as Arc<dyn AttendanceService>,
        Arc::clone(&resolver) as Arc<dyn MatchResolver>,
        pool.clone(),
        Arc::clone(&state),
        Arc::clone(&hold),
        Arc::clone(&gate),
        tuning,
        "test-tenant".to_string(),
    ));

    CoordinatorRig {
        coordinator,
        state,
        attendance,
        resolver,
        hold,
        gate,
        pool,
    }
}

fn attempt(subject: u128, source: CheckinSource) -> CheckinAttempt {
    CheckinAttempt {
        subject_id: Uuid::from_u128(subject),
        event_id: Uuid::from_u128(9),
        display_name: format!("Subject {}", subject),
        source,
        confidence_tag: None,
    }
}

fn test_frame() -> odk_ck::engine::camera::Frame {
    let device = TestPatternDevice::new();
    device.start().unwrap();
    device.grab_frame().unwrap()
}

#[tokio::test]
async fn at_most_one_submission_in_flight() {
    let rig = build_coordinator(fast_tuning()).await;
    // Slow service so the two triggers overlap
    rig.attendance.set_delay(Duration::from_millis(150));

    // Optical and face streams fire near-simultaneously
    let optical = {
        let coordinator = Arc::clone(&rig.coordinator);
        tokio::spawn(async move {
            coordinator
                .submit(attempt(1, CheckinSource::Optical), None)
                .await
                .unwrap()
        })
    };
    let face = {
        let coordinator = Arc::clone(&rig.coordinator);
        tokio::spawn(async move {
            // Give the optical trigger a head start so the race is decided
            tokio::time::sleep(Duration::from_millis(20)).await;
            coordinator
                .submit(attempt(1, CheckinSource::Face), None)
                .await
                .unwrap()
        })
    };

    let (optical_result, face_result) = (optical.await.unwrap(), face.await.unwrap());

    // Exactly one call reached the service; the loser no-oped
    assert_eq!(rig.attendance.call_count(), 1);
    assert!(matches!(optical_result, SubmitResult::Accepted { .. }));
    assert_eq!(face_result, SubmitResult::AlreadyInFlight);
}

#[tokio::test]
async fn duplicate_checkin_suppresses_side_effects() {
    let rig = build_coordinator(fast_tuning()).await;

    // First check-in: celebratory side effects fire
    let result = rig
        .coordinator
        .submit(attempt(1, CheckinSource::Face), Some(test_frame()))
        .await
        .unwrap();
    assert_eq!(
        result,
        SubmitResult::Accepted {
            already_checked_in: false
        }
    );
    assert_eq!(rig.state.attendance_count(), 1);

    // The enrollment capture is fire-and-forget; give it a beat
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        rig.resolver
            .enroll_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    // Second check-in for the same subject: reported as duplicate, no
    // count bump, no second enrollment capture
    let result = rig
        .coordinator
        .submit(attempt(1, CheckinSource::Face), Some(test_frame()))
        .await
        .unwrap();
    assert_eq!(
        result,
        SubmitResult::Accepted {
            already_checked_in: true
        }
    );
    assert_eq!(rig.state.attendance_count(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        rig.resolver
            .enroll_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn duplicate_and_new_emit_distinct_events() {
    let rig = build_coordinator(fast_tuning()).await;
    let mut rx = rig.state.subscribe_events();

    rig.coordinator
        .submit(attempt(1, CheckinSource::Optical), None)
        .await
        .unwrap();
    let event = wait_for_event(&mut rx, Duration::from_secs(1), |e| {
        matches!(e, KioskEvent::CheckinAccepted { .. })
    })
    .await;
    assert!(matches!(
        event,
        KioskEvent::CheckinAccepted {
            already_checked_in: false,
            source: CheckinSource::Optical,
            ..
        }
    ));

    rig.coordinator
        .submit(attempt(1, CheckinSource::Optical), None)
        .await
        .unwrap();
    let event = wait_for_event(&mut rx, Duration::from_secs(1), |e| {
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
}

#[tokio::test]
async fn rejection_surfaces_user_facing_message() {
    let rig = build_coordinator(fast_tuning()).await;
    rig.attendance
        .set_mode(AttendanceMode::Reject("event is closed".to_string()));
    let mut rx = rig.state.subscribe_events();

    let result = rig
        .coordinator
        .submit(attempt(1, CheckinSource::Face), None)
        .await
        .unwrap();
    assert_eq!(
        result,
        SubmitResult::Failed {
            message: "event is closed".to_string()
        }
    );

    let event = wait_for_event(&mut rx, Duration::from_secs(1), |e| {
        matches!(e, KioskEvent::CheckinFailed { .. })
    })
    .await;
    let KioskEvent::CheckinFailed { message, .. } = event else {
        unreachable!()
    };
    assert_eq!(message, "event is closed");
}

#[tokio::test]
async fn every_outcome_resets_hold_and_rearms() {
    let rig = build_coordinator(fast_tuning()).await;
    rig.attendance
        .set_mode(AttendanceMode::Reject("nope".to_string()));

    rig.coordinator
        .submit(attempt(1, CheckinSource::Face), None)
        .await
        .unwrap();

    assert!(rig.hold.lock().unwrap().is_idle());
    assert!(!rig.coordinator.in_flight());
    // Detection stays suppressed for the failure dismiss window
    assert!(rig.gate.is_suppressed());
    tokio::time::sleep(Duration::from_millis(fast_tuning().failure_dismiss_ms + 30)).await;
    assert!(!rig.gate.is_suppressed());
}

#[tokio::test]
async fn offline_attempt_is_queued_not_failed() {
    let rig = build_coordinator(fast_tuning()).await;
    rig.attendance.set_mode(AttendanceMode::Offline);

    let result = rig
        .coordinator
        .submit(attempt(1, CheckinSource::Optical), None)
        .await
        .unwrap();
    assert_eq!(result, SubmitResult::Queued);
    assert_eq!(offline_queue::depth(&rig.pool).await.unwrap(), 1);
    assert_eq!(rig.attendance.call_count(), 1);

    // Once the coordinator knows it is offline, later attempts skip the
    // network entirely
    let result = rig
        .coordinator
        .submit(attempt(2, CheckinSource::Face), None)
        .await
        .unwrap();
    assert_eq!(result, SubmitResult::Queued);
    assert_eq!(offline_queue::depth(&rig.pool).await.unwrap(), 2);
    assert_eq!(rig.attendance.call_count(), 1);
}

#[tokio::test]
async fn drain_is_fifo_and_drops_failures() {
    let rig = build_coordinator(fast_tuning()).await;

    // Queue three attempts while offline; subject 2 is poisoned
    for n in 1..=3u128 {
        offline_queue::enqueue(&rig.pool, &attempt(n, CheckinSource::Face))
            .await
            .unwrap();
    }
    rig.attendance.reject_subject(Uuid::from_u128(2));
    let mut rx = rig.state.subscribe_events();

    let (submitted, dropped) = rig.coordinator.drain_offline_queue().await.unwrap();
    assert_eq!(submitted, 2);
    assert_eq!(dropped, 1);
    assert_eq!(offline_queue::depth(&rig.pool).await.unwrap(), 0);

    // Strict FIFO: the failing item was attempted in order and did not
    // block the one behind it
    let calls = rig.attendance.calls.lock().unwrap().clone();
    let order: Vec<Uuid> = calls.iter().map(|c| c.subject_id).collect();
    assert_eq!(
        order,
        vec![Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3)]
    );

    let event = wait_for_event(&mut rx, Duration::from_secs(1), |e| {
        matches!(e, KioskEvent::OfflineQueueDrained { .. })
    })
    .await;
    assert!(matches!(
        event,
        KioskEvent::OfflineQueueDrained {
            submitted: 2,
            dropped: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn drain_pauses_while_still_offline() {
    let rig = build_coordinator(fast_tuning()).await;
    for n in 1..=2u128 {
        offline_queue::enqueue(&rig.pool, &attempt(n, CheckinSource::Face))
            .await
            .unwrap();
    }
    rig.attendance.set_mode(AttendanceMode::Offline);

    let (submitted, dropped) = rig.coordinator.drain_offline_queue().await.unwrap();
    assert_eq!((submitted, dropped), (0, 0));
    assert_eq!(offline_queue::depth(&rig.pool).await.unwrap(), 2);
    assert!(!rig.coordinator.is_online());

    // Connectivity returns: the queue empties in order
    rig.attendance.set_mode(AttendanceMode::AcceptOnce);
    let (submitted, dropped) = rig.coordinator.drain_offline_queue().await.unwrap();
    assert_eq!((submitted, dropped), (2, 0));
    assert_eq!(offline_queue::depth(&rig.pool).await.unwrap(), 0);
    assert!(rig.coordinator.is_online());
}
