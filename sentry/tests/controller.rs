//! Command application and shutdown against in-memory gateways

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::*;
use hardware::mock::{MockLaser, MockMotion, MotionCall};
use hardware::{MotionStreamer, MotorPosition};
use sentry::aim::AimSolution;
use sentry::controller::HardwareController;
use sentry::HardwareCommand;

const AIM: AimSolution = AimSolution {
    motor_x_mm: 108.5,
    motor_y_mm: 50.0,
};

/// Move, laser on and pattern start, as a tracking tick emits them
fn aim_commands() -> Vec<HardwareCommand> {
    vec![
        HardwareCommand::MoveAbsolute(AIM),
        HardwareCommand::SetLaser(true),
        HardwareCommand::StartPattern {
            center: AIM,
            size_mm: 2.0,
        },
    ]
}

fn controller() -> (HardwareController<MockLaser, MockMotion>, MockLaser, MockMotion) {
    let laser = MockLaser::new();
    let motion = MockMotion::new();
    let controller = HardwareController::new(laser.clone(), motion.clone(), Duration::from_millis(300))
        .with_laser_retry_interval(Duration::from_millis(20));
    (controller, laser, motion)
}

#[tokio::test]
async fn test_track_commands_reach_gateways_in_order() {
    init_tracing();
    let (mut ctl, laser, motion) = controller();
    let mut orch = orchestrator();

    for _ in 0..3 {
        let commands = orch.tick(Some(bird(0.9)));
        let report = ctl.apply(&commands).await;
        assert_eq!(report.laser_failures, 0);
        assert_eq!(report.motion_failures, 0);
    }

    assert_eq!(laser.requests(), vec![false, false, true]);
    assert_eq!(laser.is_on(), Some(true));

    let aim = orch.aiming().solve(10.0).unwrap().position();
    assert_eq!(
        motion.calls(),
        vec![
            MotionCall::Move(aim),
            MotionCall::StartPattern {
                center: aim,
                size_mm: orch.config().pattern.size_mm
            },
        ]
    );
}

#[tokio::test]
async fn test_person_stops_laser_and_pattern() {
    let (mut ctl, laser, motion) = controller();
    let mut orch = tracking_orchestrator();
    ctl.apply(&orch.tick(Some(bird(0.9)))).await;
    assert!(motion.pattern_running());

    ctl.apply(&orch.tick(Some(person(0.9)))).await;
    assert_eq!(laser.is_on(), Some(false));
    assert_eq!(motion.calls().last(), Some(&MotionCall::StopPattern));
}

#[tokio::test]
async fn test_failed_aim_withholds_laser() {
    init_tracing();
    let (mut ctl, laser, motion) = controller();
    motion.set_failing(true);
    let mut orch = orchestrator();

    for _ in 0..3 {
        ctl.apply(&orch.tick(Some(bird(0.9)))).await;
    }
    assert!(orch.laser_commanded_on());

    // The stage never left its level park position, so the beam stays off
    assert!(motion.moves().is_empty());
    assert!(!ctl.is_aimed());
    assert_eq!(laser.requests(), vec![false, false]);
    assert_eq!(laser.is_on(), Some(false));

    let report = ctl.apply(&aim_commands()).await;
    assert!(report.laser_withheld);
    assert_eq!(report.motion_failures, 1);
    assert_eq!(report.laser_failures, 0);
    assert!(motion.calls().is_empty());

    // Once the stage answers the next tick fires
    motion.set_failing(false);
    let report = ctl.apply(&aim_commands()).await;
    assert!(!report.laser_withheld);
    assert!(ctl.is_aimed());
    assert_eq!(laser.is_on(), Some(true));
    assert!(motion.pattern_running());
}

#[tokio::test]
async fn test_motion_failure_is_not_fatal() {
    let (mut ctl, laser, motion) = controller();
    ctl.apply(&aim_commands()).await;
    assert_eq!(laser.is_on(), Some(true));

    motion.set_failing(true);
    let moved = AimSolution {
        motor_x_mm: 108.5,
        motor_y_mm: 55.0,
    };
    let report = ctl
        .apply(&[
            HardwareCommand::MoveAbsolute(moved),
            HardwareCommand::SetLaser(true),
            HardwareCommand::StartPattern {
                center: moved,
                size_mm: 2.0,
            },
        ])
        .await;

    assert_eq!(report.motion_failures, 1);
    assert!(report.laser_withheld);
    assert_eq!(report.laser_failures, 0);
    // Nothing turned the laser off; it stays on the last acknowledged aim
    assert_eq!(laser.is_on(), Some(true));
    assert_eq!(motion.moves(), vec![AIM.position()]);
}

#[tokio::test]
async fn test_laser_off_clears_aim() {
    let (mut ctl, laser, _motion) = controller();
    ctl.apply(&aim_commands()).await;
    assert!(ctl.is_aimed());

    ctl.apply(&[HardwareCommand::SetLaser(false), HardwareCommand::StopPattern])
        .await;
    assert!(!ctl.is_aimed());

    let report = ctl.apply(&[HardwareCommand::SetLaser(true)]).await;
    assert!(report.laser_withheld);
    assert_eq!(laser.is_on(), Some(false));
}

#[tokio::test]
async fn test_stalled_stage_costs_one_budget_per_tick() {
    init_tracing();
    let laser = MockLaser::new();
    let motion = MockMotion::new();
    motion.set_delay(Duration::from_secs(10));
    let mut ctl = HardwareController::new(laser.clone(), motion.clone(), Duration::from_millis(300))
        .with_command_budget(Duration::from_millis(50));
    let mut orch = orchestrator();

    for _ in 0..3 {
        let started = Instant::now();
        ctl.apply(&orch.tick(Some(bird(0.9)))).await;
        assert!(started.elapsed() < Duration::from_millis(500), "took {:?}", started.elapsed());
    }
    assert_eq!(laser.is_on(), Some(false));

    let started = Instant::now();
    let report = ctl.apply(&orch.tick(Some(person(0.9)))).await;
    assert!(started.elapsed() < Duration::from_millis(500), "took {:?}", started.elapsed());
    assert_eq!(laser.is_on(), Some(false));
    assert_eq!(report.laser_failures, 0);
    assert_eq!(report.motion_failures, 1);
}

#[tokio::test]
async fn test_unconfirmed_laser_off_is_retried() {
    init_tracing();
    let (mut ctl, laser, _motion) = controller();
    ctl.apply(&aim_commands()).await;

    laser.fail_next(2);
    let report = ctl.apply(&[HardwareCommand::SetLaser(false)]).await;
    assert_eq!(report.laser_failures, 1);
    assert!(report.laser_off_unconfirmed);
    assert!(ctl.laser_off_unconfirmed());

    // A tick with no laser command still re-sends OFF
    let report = ctl.apply(&[]).await;
    assert!(report.laser_off_unconfirmed);
    assert_eq!(laser.requests(), vec![true, false, false]);

    let report = ctl.apply(&[]).await;
    assert!(!report.laser_off_unconfirmed);
    assert_eq!(laser.is_on(), Some(false));
    assert_eq!(laser.requests(), vec![true, false, false, false]);

    // Once acknowledged nothing more is sent
    ctl.apply(&[]).await;
    assert_eq!(laser.requests().len(), 4);
}

#[tokio::test]
async fn test_withheld_laser_on_still_retries_pending_off() {
    let (mut ctl, laser, motion) = controller();
    ctl.apply(&aim_commands()).await;

    laser.fail_next(1);
    ctl.apply(&[HardwareCommand::SetLaser(false)]).await;
    assert!(ctl.laser_off_unconfirmed());

    motion.set_failing(true);
    let report = ctl.apply(&aim_commands()).await;
    assert!(report.laser_withheld);
    assert!(!report.laser_off_unconfirmed);
    assert_eq!(laser.requests(), vec![true, false, false]);
    assert_eq!(laser.is_on(), Some(false));
}

#[tokio::test]
async fn test_laser_on_failure_does_not_latch() {
    let (mut ctl, laser, _motion) = controller();
    laser.fail_next(1);
    let report = ctl.apply(&aim_commands()).await;
    assert_eq!(report.laser_failures, 1);
    assert!(!report.laser_off_unconfirmed);

    ctl.apply(&[]).await;
    assert_eq!(laser.requests(), vec![true]);
}

#[tokio::test]
async fn test_teardown_order() {
    let (mut ctl, laser, motion) = controller();
    let mut orch = tracking_orchestrator();
    ctl.apply(&orch.tick(Some(bird(0.9)))).await;

    let seen = Arc::new(Mutex::new(None));
    let record = seen.clone();
    let (seen_laser, seen_motion) = (laser.clone(), motion.clone());
    let report = ctl
        .teardown(move || {
            *record.lock().unwrap() = Some((seen_laser.is_on(), seen_motion.calls()));
        })
        .await;

    assert!(report.pattern_stopped);
    assert!(report.laser_off_confirmed);
    assert!(report.motion_released);

    // Acquisition stops after outputs are safe but before motion is released
    let (laser_at_stop, calls_at_stop) = seen.lock().unwrap().take().unwrap();
    assert_eq!(laser_at_stop, Some(false));
    assert_eq!(calls_at_stop.last(), Some(&MotionCall::StopPattern));
    assert!(!calls_at_stop.contains(&MotionCall::Close));

    assert_eq!(motion.calls().last(), Some(&MotionCall::Close));
    assert!(motion.is_closed());
}

#[tokio::test]
async fn test_teardown_twice_is_harmless() {
    let (mut ctl, laser, motion) = controller();
    ctl.apply(&aim_commands()).await;
    assert_eq!(laser.is_on(), Some(true));

    let first = ctl.teardown(|| {}).await;
    let second = ctl.teardown(|| {}).await;
    assert!(first.laser_off_confirmed);
    assert!(second.laser_off_confirmed);
    assert!(second.motion_released);

    let closes = motion
        .calls()
        .iter()
        .filter(|c| **c == MotionCall::Close)
        .count();
    assert_eq!(closes, 1);
    assert_eq!(laser.is_on(), Some(false));
}

#[tokio::test]
async fn test_teardown_respects_deadline_when_laser_unreachable() {
    let (mut ctl, laser, motion) = controller();
    laser.set_failing(true);

    let started = Instant::now();
    let report = ctl.teardown(|| {}).await;
    let elapsed = started.elapsed();

    assert!(!report.laser_off_confirmed);
    assert!(report.motion_released);
    assert!(ctl.laser_off_unconfirmed());
    assert!(laser.requests().len() > 1, "OFF should be retried");
    assert!(laser.requests().iter().all(|on| !on));
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert!(motion.is_closed());
}

#[tokio::test]
async fn test_teardown_deadline_cuts_hung_request() {
    let laser = MockLaser::new();
    laser.set_delay(Duration::from_secs(10));
    let mut ctl = HardwareController::new(laser.clone(), MockMotion::new(), Duration::from_millis(200));

    let started = Instant::now();
    let report = ctl.teardown(|| {}).await;
    assert!(!report.laser_off_confirmed);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_teardown_with_stalled_stage_still_turns_laser_off() {
    let laser = MockLaser::new();
    let motion = MockMotion::new();
    let mut ctl = HardwareController::new(laser.clone(), motion.clone(), Duration::from_millis(200));
    ctl.apply(&aim_commands()).await;
    motion.set_delay(Duration::from_secs(10));

    let started = Instant::now();
    let report = ctl.teardown(|| {}).await;
    assert!(!report.pattern_stopped);
    assert!(report.laser_off_confirmed);
    assert_eq!(laser.is_on(), Some(false));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_moves_follow_target() {
    let (mut ctl, _laser, motion) = controller();
    let mut orch = tracking_orchestrator();
    ctl.apply(&orch.tick(Some(bird_at_row(ROW_7_5_FT, 0.9)))).await;
    ctl.apply(&orch.tick(Some(bird_at_row(ROW_10_FT, 0.9)))).await;

    let moves: Vec<MotorPosition> = motion.moves();
    assert_eq!(moves.len(), 2);
    // Closer target needs more depression, so lower Y with the default sign
    assert!(moves[0].y_mm < moves[1].y_mm);
}
