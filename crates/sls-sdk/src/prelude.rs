//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use sls_sdk::prelude::*;
//! ```

// 客户端层
pub use sls_client::{
    AcquisitionController, AcquisitionParams, AcquisitionRun, ClientId, ControllerConfig,
    ControllerState, DetectorReport, DrainReason, Geometry, HealthEvent, ModuleGroup,
    ModuleGroupBuilder, RunOutcome, RunState,
};

// 驱动层
pub use sls_driver::{EndpointBuilder, ModuleEndpoint, ReceiverEndpoint};

// 协议层
pub use sls_protocol::{
    DetectorSettings, DynamicRange, ErrorMask, ModuleKind, ReadoutSpeed, ReceiverStatus,
    RunStatus, StreamDestination, TemperatureSensor, TimingMode,
};

// 配置与记录
pub use sls_tools::{DetectorSetup, RunSummary};

// 错误类型
pub use sls_client::ControlError;
pub use sls_driver::DriverError;
pub use sls_protocol::ProtocolError;
