//! SLS SDK - 多模块 X 射线探测器采集协调
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): 消息格式、操作码、设备枚举
//! - **传输层** (`transport`): TCP 以及进程内虚拟设备
//! - **驱动层** (`driver`): 单个模块/接收器端点
//! - **客户端层** (`client`): 模块组、采集状态机、健康检查
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use sls_sdk::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! sls_sdk::init_logging();
//! let setup = DetectorSetup::load("eiger-500k.toml")?;
//! let group = ModuleGroupBuilder::from_setup(&setup).build()?;
//! let controller = AcquisitionController::new(group, ControllerConfig::from_setup(&setup));
//! let run = controller.acquire(AcquisitionParams::new(100, Duration::from_millis(1)))?;
//! println!("{run}");
//! # Ok(())
//! # }
//! ```

pub use sls_client as client;
pub use sls_driver as driver;
pub use sls_protocol as protocol;
pub use sls_tools as tools;
pub use sls_transport as transport;

mod logging;
pub mod prelude;

pub use logging::{init_logging, init_logging_with};

// 客户端层（推荐入口）
pub use sls_client::{
    AcquisitionController, AcquisitionParams, AcquisitionRun, ControlError, ControllerConfig,
    ControllerState, DetectorReport, HealthEvent, HealthMonitor, ModuleGroup, ModuleGroupBuilder,
    RunOutcome, RunState,
};

// 驱动层（单端点操作）
pub use sls_driver::{DriverError, EndpointBuilder, ModuleEndpoint, ReceiverEndpoint};

// 协议层
pub use sls_protocol::{DynamicRange, ModuleKind, ProtocolError, RunStatus, TimingMode};

// 配置与记录
pub use sls_tools::{DetectorSetup, RunSummary};
