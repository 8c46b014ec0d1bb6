//! 采集状态机集成测试
//!
//! 在进程内虚拟探测器上跑完整的 configure → start → wait → collect 流程。

mod common;

use common::{fast_config, virtual_group};
use sls_client::{
    AcquisitionController, AcquisitionParams, ControlError, ControllerState, DrainReason,
    RunOutcome, RunState,
};
use sls_protocol::{Direction, ErrorMask, Frame, ModuleKind, Opcode, Payload};
use sls_transport::Transport;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_two_modules_ten_frames_success() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
    let controller = AcquisitionController::new(group, fast_config());

    let run = controller
        .acquire(AcquisitionParams::new(10, Duration::from_millis(10)))
        .unwrap();

    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.frames_caught, vec![Some(10), Some(10)]);
    assert_eq!(run.total_frames(), 20);
    assert!(run.elapsed >= Duration::from_millis(90));
    assert_eq!(run.detector_id, "it-detector");
    assert_eq!(controller.state(), ControllerState::Idle);

    // 采集结束标记已清除
    assert!(detector.module(0).error_mask().is_empty());
    assert!(detector.module(1).error_mask().is_empty());
    assert!(!detector.receiver(0).is_listening());
}

#[test]
fn test_receivers_listen_before_any_module_starts() {
    let (detector, group) = virtual_group(ModuleKind::Jungfrau, 3);
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(AcquisitionParams::new(2, Duration::from_millis(1)))
        .unwrap();
    controller.start().unwrap();

    let events = detector.events();
    let last_rx_start = events
        .last_position(|e| e.opcode == Opcode::RxStart && e.direction == Direction::Response)
        .unwrap();
    let first_module_start = events
        .position(|e| e.opcode == Opcode::StartAcquisition && e.direction == Direction::Request)
        .unwrap();
    assert!(last_rx_start < first_module_start);
    assert_eq!(events.count_requests(Opcode::RxStart), 3);
    assert_eq!(events.count_requests(Opcode::StartAcquisition), 3);

    assert_eq!(controller.wait().unwrap(), RunState::Draining(DrainReason::Completed));
    assert!(controller.collect().unwrap().outcome.is_success());
}

#[test]
fn test_foreign_lock_after_configure_blocks_start() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(AcquisitionParams::new(1, Duration::from_millis(1)))
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Armed);

    detector.module(1).set_lock_owner(Some("other-host:77"));
    match controller.start() {
        Err(ControlError::NotReady(report)) => {
            assert_eq!(report.blocked_indices(), vec![1]);
        },
        other => panic!("expected NotReady, got {other:?}"),
    }
    assert_eq!(controller.state(), ControllerState::Armed);
    assert_eq!(detector.events().count_requests(Opcode::StartAcquisition), 0);
    assert_eq!(detector.events().count_requests(Opcode::RxStart), 0);

    // 锁释放后可以正常启动
    detector.module(1).set_lock_owner(None);
    controller.start().unwrap();
    assert_eq!(controller.state(), ControllerState::Running);
}

#[test]
fn test_double_abort_equals_single_abort() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(AcquisitionParams::new(1000, Duration::from_millis(10)))
        .unwrap();
    controller.start().unwrap();

    controller.abort();
    let stops = detector.events().count_requests(Opcode::StopAcquisition);
    let rx_stops = detector.events().count_requests(Opcode::RxStop);
    assert_eq!(stops, 2);
    assert_eq!(rx_stops, 2);

    controller.abort();
    assert_eq!(detector.events().count_requests(Opcode::StopAcquisition), stops);
    assert_eq!(detector.events().count_requests(Opcode::RxStop), rx_stops);
    assert_eq!(controller.state(), ControllerState::Draining);

    let run = controller.collect().unwrap();
    assert_eq!(run.outcome, RunOutcome::Aborted);
    // 收尾不会重复停止
    assert_eq!(detector.events().count_requests(Opcode::StopAcquisition), stops);
    assert!(!detector.module(0).is_running());
}

#[test]
fn test_abort_from_another_thread_wakes_wait() {
    let (_detector, group) = virtual_group(ModuleKind::Jungfrau, 2);
    let config = sls_client::ControllerConfig {
        poll_interval: Duration::from_millis(500),
        ..fast_config()
    };
    let controller = Arc::new(AcquisitionController::new(group, config));
    controller
        .configure(AcquisitionParams::new(1000, Duration::from_millis(10)))
        .unwrap();
    controller.start().unwrap();

    let aborter = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            controller.abort();
        })
    };

    let started = Instant::now();
    assert_eq!(controller.wait().unwrap(), RunState::Draining(DrainReason::Aborted));
    // 没有等满一个轮询间隔
    assert!(started.elapsed() < Duration::from_millis(450));
    aborter.join().unwrap();

    let run = controller.collect().unwrap();
    assert_eq!(run.outcome, RunOutcome::Aborted);
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_module_unreachable_mid_run_is_partial_failure() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(AcquisitionParams::new(10, Duration::from_millis(10)))
        .unwrap();
    controller.start().unwrap();

    thread::sleep(Duration::from_millis(20));
    detector.module(1).set_unreachable(true);

    assert_eq!(controller.wait().unwrap(), RunState::Draining(DrainReason::Completed));
    let run = controller.collect().unwrap();
    assert_eq!(run.outcome, RunOutcome::PartialFailure(vec![1]));
    assert_eq!(run.frames_caught[0], Some(10));
    assert!(run.issues.iter().any(|issue| issue.starts_with("module 1")));
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_poll_checks_receivers_every_tick() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(AcquisitionParams::new(1000, Duration::from_millis(1)))
        .unwrap();
    controller.start().unwrap();

    detector.receiver(1).set_unreachable(true);
    let before = detector.events().count_requests(Opcode::RxGetStatus);
    for _ in 0..5 {
        assert!(controller.poll().unwrap().is_running());
    }
    // 每次轮询都询问两个接收器
    assert!(detector.events().count_requests(Opcode::RxGetStatus) >= before + 10);

    controller.abort();
    let run = controller.collect().unwrap();
    assert_eq!(run.outcome, RunOutcome::Aborted);
    assert!(run.issues.iter().any(|issue| issue.starts_with("module 1: receiver:")));
    assert!(!run.issues.iter().any(|issue| issue.starts_with("module 0: receiver")));
}

#[test]
fn test_receiver_stopping_mid_run_is_partial_failure() {
    let (detector, group) = virtual_group(ModuleKind::Jungfrau, 2);
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(AcquisitionParams::new(10, Duration::from_millis(10)))
        .unwrap();
    controller.start().unwrap();

    thread::sleep(Duration::from_millis(20));
    let mut receiver = detector.receiver_transport(1);
    receiver
        .exchange(
            &Frame::request(1, 1, Opcode::RxStop, Payload::Empty),
            Duration::from_millis(100),
        )
        .unwrap();

    assert_eq!(controller.wait().unwrap(), RunState::Draining(DrainReason::Completed));
    let run = controller.collect().unwrap();
    assert_eq!(run.outcome, RunOutcome::PartialFailure(vec![1]));
    assert_eq!(run.frames_caught[0], Some(10));
    assert!(
        run.issues
            .iter()
            .any(|issue| issue == "module 1: receiver stopped listening")
    );
}

#[test]
fn test_stuck_modules_time_out() {
    let (detector, group) = virtual_group(ModuleKind::Jungfrau, 2);
    detector.module(0).set_stuck_running(true);
    detector.module(1).set_stuck_running(true);
    let controller = AcquisitionController::new(group, fast_config());

    let params = AcquisitionParams::new(1, Duration::from_millis(1)).timeout(Duration::from_millis(150));
    let started = Instant::now();
    controller.configure(params).unwrap();
    controller.start().unwrap();
    assert_eq!(controller.wait().unwrap(), RunState::Draining(DrainReason::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(150));

    let run = controller.collect().unwrap();
    assert_eq!(run.outcome, RunOutcome::Timeout);
    assert!(run.issues.iter().any(|issue| issue.contains("after stop")));
    assert_eq!(detector.events().count_requests(Opcode::StopAcquisition), 2);
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_dropped_frames_fail_the_module() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
    detector.receiver(0).set_dropped_frames(3);
    let controller = AcquisitionController::new(group, fast_config());

    let run = controller
        .acquire(AcquisitionParams::new(10, Duration::from_millis(2)))
        .unwrap();
    assert_eq!(run.outcome, RunOutcome::PartialFailure(vec![0]));
    assert_eq!(run.frames_caught, vec![Some(7), Some(10)]);
}

#[test]
fn test_persistent_error_mask_is_kept_and_reported() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 2);
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(AcquisitionParams::new(3, Duration::from_millis(2)))
        .unwrap();
    controller.start().unwrap();
    detector.module(1).inject_error_mask(ErrorMask::OVER_TEMPERATURE);
    controller.wait().unwrap();

    let run = controller.collect().unwrap();
    assert_eq!(run.outcome, RunOutcome::PartialFailure(vec![1]));
    // 持久位没有被清除
    assert!(detector.module(1).error_mask().contains(ErrorMask::OVER_TEMPERATURE));
    assert!(detector.module(0).error_mask().is_empty());
}

#[test]
fn test_divergent_dynamic_range_detected_after_configure() {
    let (detector, group) = virtual_group(ModuleKind::Eiger, 3);
    detector
        .module(1)
        .set_reported_dynamic_range(Some(sls_protocol::DynamicRange::Bit8));
    let controller = AcquisitionController::new(group, fast_config());
    controller
        .configure(
            AcquisitionParams::new(1, Duration::from_millis(1))
                .dynamic_range(sls_protocol::DynamicRange::Bit32),
        )
        .unwrap();

    assert!(matches!(
        controller.group().dynamic_range(),
        Err(ControlError::InconsistentState {
            parameter: "dynamic_range",
            ..
        })
    ));
    assert_eq!(
        detector.module(1).actual_dynamic_range(),
        sls_protocol::DynamicRange::Bit32
    );
}

#[test]
fn test_controller_reusable_after_failed_acquire() {
    let (detector, group) = virtual_group(ModuleKind::Jungfrau, 2);
    detector.receiver(1).set_never_listening(true);
    let controller = AcquisitionController::new(group, fast_config());

    assert!(matches!(
        controller.acquire(AcquisitionParams::new(2, Duration::from_millis(1))),
        Err(ControlError::Start { .. })
    ));
    assert_eq!(controller.state(), ControllerState::Idle);

    detector.receiver(1).set_never_listening(false);
    let run = controller
        .acquire(AcquisitionParams::new(2, Duration::from_millis(1)))
        .unwrap();
    assert_eq!(run.outcome, RunOutcome::Success);
}
