//! # SLS Client
//!
//! 多模块探测器的协同控制层，包括：
//! - [`ModuleGroup`]：一组模块/接收器组成一台逻辑探测器，并行扇出、屏障汇总
//! - [`AcquisitionController`]：采集状态机（Idle → Configuring → Armed → Running → Draining）
//! - [`HealthMonitor`]：就绪检查与温度监视
//! - [`DetectorReport`]：一次性诊断快照
//!
//! # 使用场景
//!
//! 这是大多数用户应该使用的层。单独操作某个端点请使用 `sls-driver`。
//!
//! ```rust,no_run
//! use sls_client::{AcquisitionController, AcquisitionParams, ControllerConfig, ModuleGroup};
//! use sls_protocol::ModuleKind;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let group = ModuleGroup::builder(ModuleKind::Eiger)
//!     .detector_id("eiger-500k")
//!     .add_module("beb031", "pc1875:1954")
//!     .add_module("beb032", "pc1875:1955")
//!     .build()?;
//!
//! let controller = AcquisitionController::new(group, ControllerConfig::default());
//! let run = controller.acquire(AcquisitionParams::new(100, Duration::from_millis(1)))?;
//! println!("{run}");
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod group;
pub mod health;
pub mod outcome;
pub mod run;
pub mod session;

pub use controller::{AcquisitionController, ControllerConfig, ControllerState};
pub use diagnostics::{DetectorReport, ModuleReport, ReceiverReport};
pub use error::{ControlError, Result, StartPhase};
pub use geometry::Geometry;
pub use group::{ModuleGroup, ModuleGroupBuilder};
pub use health::{HealthEvent, HealthMonitor, ModuleReadiness, ReadinessReport};
pub use outcome::GroupOutcome;
pub use run::{AcquisitionParams, AcquisitionRun, DrainReason, RunOutcome, RunState};
pub use session::{ClientId, SessionLock};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::controller::ControllerConfig;
    use crate::group::{ModuleGroup, ModuleGroupBuilder};
    use crate::session::ClientId;
    use sls_driver::EndpointBuilder;
    use sls_protocol::ModuleKind;
    use sls_transport::VirtualDetector;
    use std::time::Duration;

    /// 连接到虚拟探测器的组构造器（不加会话锁）
    pub fn virtual_group_builder(detector: &VirtualDetector) -> ModuleGroupBuilder {
        let kind = detector.kind();
        let mut builder = ModuleGroupBuilder::new(kind).without_session_lock();
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
        let group = virtual_group_builder(&detector).build().unwrap();
        (detector, group)
    }

    pub fn fast_config() -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_millis(5),
            receiver_ready_timeout: Duration::from_millis(200),
            stop_grace: Duration::from_millis(20),
            temperature_interval: None,
            client: ClientId::new("test:1"),
            ..ControllerConfig::default()
        }
    }
}
