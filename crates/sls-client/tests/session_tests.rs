//! 会话锁集成测试
//!
//! 使用系统临时目录中的默认锁文件，因此串行执行。

use serial_test::serial;
use sls_client::{ControlError, ModuleGroupBuilder, SessionLock};
use sls_protocol::ModuleKind;
use sls_transport::VirtualDetector;

fn locked_builder(detector: &VirtualDetector, id: &str) -> ModuleGroupBuilder {
    let mut builder = ModuleGroupBuilder::new(detector.kind()).detector_id(id);
    for i in 0..detector.len() {
        builder = builder.add_endpoints(
            sls_driver::EndpointBuilder::new(format!("sim-module-{i}"))
                .index(i as u16)
                .kind(detector.kind())
                .transport(detector.module_transport(i))
                .build_module()
                .unwrap(),
            sls_driver::EndpointBuilder::new(format!("sim-receiver-{i}"))
                .index(i as u16)
                .transport(detector.receiver_transport(i))
                .build_receiver()
                .unwrap(),
        );
    }
    builder
}

#[test]
#[serial]
fn test_default_session_dir_excludes_second_group() {
    let detector = VirtualDetector::new(ModuleKind::Eiger, 2);
    let first = locked_builder(&detector, "it-session").build().unwrap();
    let path = first.session_path().unwrap().to_path_buf();
    assert_eq!(
        path,
        SessionLock::lock_path(&std::env::temp_dir(), "it-session")
    );

    match locked_builder(&detector, "it-session").build() {
        Err(ControlError::SessionBusy { id, .. }) => assert_eq!(id, "it-session"),
        other => panic!("expected SessionBusy, got {other:?}"),
    }

    // 不同编号的探测器互不影响
    let other = locked_builder(&detector, "it-session-b").build().unwrap();
    drop(other);

    drop(first);
    let again = locked_builder(&detector, "it-session").build().unwrap();
    assert!(again.session_path().is_some());
}

#[test]
#[serial]
fn test_lock_file_records_owner() {
    let detector = VirtualDetector::new(ModuleKind::Jungfrau, 1);
    let group = locked_builder(&detector, "it-session-owner").build().unwrap();
    let content = std::fs::read_to_string(group.session_path().unwrap()).unwrap();
    assert!(content.trim().ends_with(&format!(":{}", std::process::id())));
}
