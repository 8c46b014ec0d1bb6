//! TCP 端到端测试
//!
//! 每个虚拟模块和接收器各监听一个本地端口，客户端通过真实的 TCP 传输访问。

use serial_test::serial;
use sls_sdk::prelude::*;
use sls_sdk::transport::{SimDevice, SimServer, VirtualDetector};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct TcpDetector {
    detector: VirtualDetector,
    servers: Vec<(SimServer, SimServer)>,
    session_dir: TempDir,
}

impl TcpDetector {
    fn spawn(kind: ModuleKind, count: usize) -> Self {
        let detector = VirtualDetector::new(kind, count);
        let servers = (0..count)
            .map(|i| {
                let module: Arc<dyn SimDevice> = detector.module(i).clone();
                let receiver: Arc<dyn SimDevice> = detector.receiver(i).clone();
                (
                    SimServer::spawn("127.0.0.1:0", module).unwrap(),
                    SimServer::spawn("127.0.0.1:0", receiver).unwrap(),
                )
            })
            .collect();
        Self {
            detector,
            servers,
            session_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn setup(&self) -> DetectorSetup {
        let mut text = format!(
            "detector_id = \"tcp-e2e\"\nkind = \"{}\"\nrequest_timeout_ms = 200\nsession_dir = {:?}\n\n[geometry]\nrows = 1\ncols = {}\n\n[acquisition]\npoll_interval_ms = 5\nreceiver_ready_timeout_ms = 500\nstop_grace_ms = 20\n",
            self.detector.kind().to_string().to_lowercase(),
            self.session_dir.path().display().to_string(),
            self.servers.len()
        );
        for (module, receiver) in &self.servers {
            write!(
                text,
                "\n[[modules]]\nhostname = \"127.0.0.1\"\nport = {}\nreceiver = {{ hostname = \"127.0.0.1\", port = {} }}\n",
                module.local_addr().port(),
                receiver.local_addr().port()
            )
            .unwrap();
        }
        DetectorSetup::from_toml_str(&text).unwrap()
    }
}

#[test]
#[serial]
fn test_acquire_over_tcp() {
    let fixture = TcpDetector::spawn(ModuleKind::Eiger, 2);
    let setup = fixture.setup();
    let group = ModuleGroupBuilder::from_setup(&setup).build().unwrap();
    assert!(group.session_path().unwrap().starts_with(fixture.session_dir.path()));

    let mut config = ControllerConfig::from_setup(&setup);
    config.temperature_interval = None;
    let controller = AcquisitionController::new(group, config);

    let run = controller
        .acquire(AcquisitionParams::new(5, Duration::from_millis(5)))
        .unwrap();
    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.frames_caught, vec![Some(5), Some(5)]);
    assert_eq!(run.detector_id, "tcp-e2e");

    let summary = RunSummary::from(&run);
    let json = summary.to_json_pretty().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["outcome"], "success");
    assert_eq!(parsed["frames_requested"], 5);
}

#[test]
#[serial]
fn test_unreachable_module_blocks_start_over_tcp() {
    let fixture = TcpDetector::spawn(ModuleKind::Jungfrau, 2);
    let group = ModuleGroupBuilder::from_setup(&fixture.setup()).build().unwrap();
    let config = ControllerConfig {
        poll_interval: Duration::from_millis(5),
        temperature_interval: None,
        ..ControllerConfig::default()
    };
    let controller = AcquisitionController::new(group, config);

    fixture.detector.module(1).set_unreachable(true);
    match controller.configure(AcquisitionParams::new(1, Duration::from_millis(1))) {
        Err(ControlError::NotReady(report)) => assert_eq!(report.unreachable(), vec![1]),
        other => panic!("expected NotReady, got {other:?}"),
    }
    assert_eq!(controller.state(), ControllerState::Idle);

    // 恢复后连接自动重建
    fixture.detector.module(1).set_unreachable(false);
    controller
        .configure(AcquisitionParams::new(1, Duration::from_millis(1)))
        .unwrap();
    assert_eq!(controller.state(), ControllerState::Armed);
}

#[test]
#[serial]
fn test_diagnostics_over_tcp() {
    let fixture = TcpDetector::spawn(ModuleKind::Jungfrau, 1);
    let group = ModuleGroupBuilder::from_setup(&fixture.setup()).build().unwrap();
    fixture
        .detector
        .module(0)
        .set_temperature(TemperatureSensor::Fpga, 51_500);

    let report = DetectorReport::collect(&group);
    assert!(report.is_healthy());
    let module = &report.modules[0];
    assert_eq!(module.status, Some(RunStatus::Idle));
    assert!(
        module
            .temperatures
            .iter()
            .any(|(sensor, c)| *sensor == TemperatureSensor::Fpga && (*c - 51.5).abs() < 1e-9)
    );
    assert!(module.firmware_version.is_some());
}
