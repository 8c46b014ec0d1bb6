//! 集成测试公共工具

#![allow(dead_code)]

use sls_client::{ClientId, ControllerConfig, ModuleGroup, ModuleGroupBuilder};
use sls_driver::EndpointBuilder;
use sls_protocol::ModuleKind;
use sls_transport::VirtualDetector;
use std::time::Duration;

pub fn group_builder(detector: &VirtualDetector) -> ModuleGroupBuilder {
    let kind = detector.kind();
    let mut builder = ModuleGroupBuilder::new(kind)
        .detector_id("it-detector")
        .without_session_lock();
    for i in 0..detector.len() {
        let module = EndpointBuilder::new(format!("sim-module-{i}"))
            .index(i as u16)
            .kind(kind)
            .timeout(Duration::from_millis(50))
            .transport(detector.module_transport(i))
            .build_module()
            .unwrap();
        let receiver = EndpointBuilder::new(format!("sim-receiver-{i}"))
            .index(i as u16)
            .kind(kind)
            .timeout(Duration::from_millis(50))
            .transport(detector.receiver_transport(i))
            .build_receiver()
            .unwrap();
        builder = builder.add_endpoints(module, receiver);
    }
    builder
}

pub fn virtual_group(kind: ModuleKind, count: usize) -> (VirtualDetector, ModuleGroup) {
    let detector = VirtualDetector::new(kind, count);
    let group = group_builder(&detector).build().unwrap();
    (detector, group)
}

pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        poll_interval: Duration::from_millis(5),
        receiver_ready_timeout: Duration::from_millis(200),
        stop_grace: Duration::from_millis(20),
        temperature_interval: None,
        client: ClientId::new("it:1"),
        ..ControllerConfig::default()
    }
}
