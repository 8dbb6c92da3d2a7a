//! Tracking state machine behavior, tick by tick

mod common;

use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use common::*;
use sentry::callback::{AimRejection, TransitionReason};
use sentry::{HardwareCommand, ModeKind, SentryCallbackEvent, SentryMode};
use shared::{BoundingBox, Detection, DetectionClass};

fn has_laser(commands: &[HardwareCommand], on: bool) -> bool {
    commands.contains(&HardwareCommand::SetLaser(on))
}

fn has_move(commands: &[HardwareCommand]) -> bool {
    commands
        .iter()
        .any(|c| matches!(c, HardwareCommand::MoveAbsolute(_)))
}

#[test]
fn test_calibration_reference_midpoint() {
    let model = scenario_calibration();
    assert_relative_eq!(model.query(ROW_7_5_FT), 7.5, epsilon = 1e-9);
    assert_relative_eq!(model.query(ROW_35_FT), 35.0, epsilon = 1e-9);
}

#[test]
fn test_three_birds_enter_track_and_fire_on_third_tick() {
    init_tracing();
    let mut orch = orchestrator();

    let first = orch.tick(Some(bird(0.6)));
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 1 });
    assert!(has_laser(&first, false));

    let second = orch.tick(Some(bird(0.6)));
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 2 });
    assert!(has_laser(&second, false));
    assert!(!orch.laser_commanded_on());

    let third = orch.tick(Some(bird(0.6)));
    assert_eq!(orch.mode().kind(), ModeKind::Track);
    assert!(orch.laser_commanded_on());
    assert!(has_laser(&third, true));
    assert!(has_move(&third));
    assert!(third
        .iter()
        .any(|c| matches!(c, HardwareCommand::StartPattern { .. })));
}

#[test]
fn test_confirmation_needs_consecutive_birds() {
    let mut orch = orchestrator();
    orch.tick(Some(bird(0.6)));
    orch.tick(Some(bird(0.6)));
    orch.tick(None);
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 0 });

    orch.tick(Some(bird(0.6)));
    orch.tick(Some(bird(0.6)));
    assert_eq!(orch.mode().kind(), ModeKind::Search);
}

#[test]
fn test_person_resets_confirmation() {
    let mut orch = orchestrator();
    orch.tick(Some(bird(0.9)));
    orch.tick(Some(bird(0.9)));
    let commands = orch.tick(Some(person(0.5)));
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 0 });
    assert!(has_laser(&commands, false));

    orch.tick(Some(bird(0.9)));
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 1 });
}

#[test]
fn test_low_confidence_bird_does_not_count() {
    let mut orch = orchestrator();
    for _ in 0..5 {
        orch.tick(Some(bird(0.2)));
    }
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 0 });
}

#[test]
fn test_person_in_track_forces_search_with_laser_off() {
    init_tracing();
    let mut orch = tracking_orchestrator();

    let commands = orch.tick(Some(person(0.45)));
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 0 });
    assert!(!orch.laser_commanded_on());
    assert_eq!(
        commands,
        vec![HardwareCommand::SetLaser(false), HardwareCommand::StopPattern]
    );
}

#[test]
fn test_low_confidence_person_does_not_trip_interlock() {
    let mut orch = tracking_orchestrator();
    // Below the person threshold this is not a qualifying detection at all
    orch.tick(Some(person(0.3)));
    assert_eq!(orch.mode().kind(), ModeKind::Track);
}

#[test]
fn test_eight_lost_ticks_return_to_search() {
    let mut orch = tracking_orchestrator();

    let held = orch.aiming().solve(10.0).unwrap();
    for i in 1..8 {
        let commands = orch.tick(None);
        // Holding re-asserts the last valid aim
        assert_eq!(
            commands.first(),
            Some(&HardwareCommand::MoveAbsolute(held)),
            "tick {i} should hold on the 10 ft aim"
        );
        assert!(has_laser(&commands, true));
        assert_eq!(orch.mode().kind(), ModeKind::Track);
        assert!(orch.laser_commanded_on());
    }

    let commands = orch.tick(None);
    assert_eq!(orch.mode(), &SentryMode::Search { confirm_frames: 0 });
    assert!(has_laser(&commands, false));
    assert!(!orch.laser_commanded_on());
}

#[test]
fn test_hold_after_out_of_range_reaims_last_valid_distance() {
    let mut orch = tracking_orchestrator();

    let commands = orch.tick(Some(bird_at_row(ROW_35_FT, 0.9)));
    assert!(commands.is_empty());

    // Nothing in view: back to re-asserting the 10 ft aim, not 35 ft
    let commands = orch.tick(None);
    let expected = orch.aiming().solve(10.0).unwrap();
    assert!(commands.contains(&HardwareCommand::MoveAbsolute(expected)));
    assert!(commands.contains(&HardwareCommand::StartPattern {
        center: expected,
        size_mm: orch.config().pattern.size_mm,
    }));
    match orch.mode() {
        SentryMode::Track { lost_frames, .. } => assert_eq!(*lost_frames, 2),
        other => panic!("expected TRACK, got {other:?}"),
    }
}

#[test]
fn test_hold_without_valid_distance_stays_dark() {
    let mut orch = orchestrator();
    for _ in 0..3 {
        orch.tick(Some(bird_at_row(ROW_35_FT, 0.9)));
    }
    assert_eq!(orch.mode().kind(), ModeKind::Track);

    let commands = orch.tick(None);
    assert!(commands.is_empty());
    assert!(!orch.laser_commanded_on());
}

#[test]
fn test_bird_resets_lost_counter() {
    let mut orch = tracking_orchestrator();
    for _ in 0..7 {
        orch.tick(None);
    }
    orch.tick(Some(bird(0.9)));
    match orch.mode() {
        SentryMode::Track { lost_frames, .. } => assert_eq!(*lost_frames, 0),
        other => panic!("expected TRACK, got {other:?}"),
    }
    for _ in 0..7 {
        orch.tick(None);
    }
    assert_eq!(orch.mode().kind(), ModeKind::Track);
}

#[test]
fn test_out_of_range_distance_counts_as_lost() {
    let mut orch = tracking_orchestrator();

    let commands = orch.tick(Some(bird_at_row(ROW_35_FT, 0.9)));
    assert!(!has_move(&commands));
    assert!(!has_laser(&commands, true));
    match orch.mode() {
        SentryMode::Track {
            lost_frames,
            last_distance_ft,
        } => {
            assert_eq!(*lost_frames, 1);
            // Still the last valid distance, not 35 ft
            assert_relative_eq!(last_distance_ft.unwrap(), 10.0, epsilon = 1e-9);
        }
        other => panic!("expected TRACK, got {other:?}"),
    }

    for _ in 0..7 {
        let commands = orch.tick(Some(bird_at_row(ROW_35_FT, 0.9)));
        assert!(!has_move(&commands));
    }
    assert_eq!(orch.mode().kind(), ModeKind::Search);
}

#[test]
fn test_nan_row_counts_as_lost() {
    let mut orch = tracking_orchestrator();
    let broken = Detection::new(
        DetectionClass::Bird,
        BoundingBox::new(300.0, f64::NAN, 360.0, f64::NAN),
        0.9,
    );
    let commands = orch.tick(Some(broken));
    assert!(commands.is_empty());
    match orch.mode() {
        SentryMode::Track { lost_frames, .. } => assert_eq!(*lost_frames, 1),
        other => panic!("expected TRACK, got {other:?}"),
    }
}

#[test]
fn test_out_of_range_on_confirming_tick_never_fires() {
    let mut orch = orchestrator();
    for _ in 0..3 {
        let commands = orch.tick(Some(bird_at_row(ROW_35_FT, 0.9)));
        assert!(!has_laser(&commands, true));
        assert!(!has_move(&commands));
    }
    assert_eq!(orch.mode().kind(), ModeKind::Track);
    assert!(!orch.laser_commanded_on());
}

#[test]
fn test_aim_follows_target_distance() {
    let mut orch = tracking_orchestrator();
    let commands = orch.tick(Some(bird_at_row(ROW_7_5_FT, 0.9)));

    let aim = commands
        .iter()
        .find_map(|c| match c {
            HardwareCommand::MoveAbsolute(aim) => Some(*aim),
            _ => None,
        })
        .unwrap();
    let expected = orch.aiming().solve(7.5).unwrap();
    assert_relative_eq!(aim.motor_y_mm, expected.motor_y_mm, epsilon = 1e-9);
    assert_eq!(aim.motor_x_mm, 108.5);

    match orch.mode() {
        SentryMode::Track {
            last_distance_ft, ..
        } => assert_relative_eq!(last_distance_ft.unwrap(), 7.5, epsilon = 1e-9),
        other => panic!("expected TRACK, got {other:?}"),
    }
}

#[test]
fn test_out_of_envelope_suppresses_motion_without_mode_change() {
    let mut config = sentry::SentryConfig::default();
    // 10 ft aims near Y=50.8, 5 ft near Y=34.7
    config.aim.envelope.y_min = 48.0;
    let mut orch = sentry::Orchestrator::new(config, scenario_calibration());

    for _ in 0..3 {
        orch.tick(Some(bird(0.9)));
    }
    assert!(orch.laser_commanded_on());

    // 5 ft needs more depression than the narrowed envelope allows
    let commands = orch.tick(Some(bird_at_row(600.0, 0.9)));
    assert!(commands.is_empty());
    assert_eq!(orch.mode().kind(), ModeKind::Track);
    match orch.mode() {
        SentryMode::Track { lost_frames, .. } => assert_eq!(*lost_frames, 0),
        other => panic!("expected TRACK, got {other:?}"),
    }
}

#[test]
fn test_laser_on_only_in_track() {
    let mut orch = orchestrator();
    let script = [
        Some(bird(0.9)),
        Some(bird(0.9)),
        Some(bird(0.9)),
        None,
        Some(person(0.9)),
        Some(bird(0.9)),
        None,
    ];
    for detection in script {
        let commands = orch.tick(detection);
        if has_laser(&commands, true) {
            assert_eq!(orch.mode().kind(), ModeKind::Track);
        }
        if orch.laser_commanded_on() {
            assert_eq!(orch.mode().kind(), ModeKind::Track);
            assert!(!detection.is_some_and(|d| d.is_person()));
        }
    }
}

#[test]
fn test_callbacks_report_transitions() {
    let mut orch = orchestrator();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    orch.register_callback(move |e| sink.lock().unwrap().push(e.clone()));

    for _ in 0..3 {
        orch.tick(Some(bird(0.9)));
    }
    orch.tick(Some(bird_at_row(ROW_35_FT, 0.9)));
    orch.tick(Some(person(0.9)));

    let events = events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        SentryCallbackEvent::ModeChanged {
            from: ModeKind::Search,
            to: ModeKind::Track,
            reason: TransitionReason::BirdConfirmed
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, SentryCallbackEvent::Aimed { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SentryCallbackEvent::AimRejected {
            reason: AimRejection::DistanceOutOfRange { .. },
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, SentryCallbackEvent::PersonInterlock { .. })));
    assert!(matches!(
        events.last(),
        Some(SentryCallbackEvent::ModeChanged {
            from: ModeKind::Track,
            to: ModeKind::Search,
            reason: TransitionReason::PersonInView
        })
    ));
}
