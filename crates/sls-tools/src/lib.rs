//! # SLS Tools - 共享配置与记录结构
//!
//! **依赖原则**: 只依赖 `sls-protocol`，避免依赖 `sls-client`
//!
//! ## 包含模块
//!
//! - `params` - 参数文件解析（`key value` 文本格式）
//! - `setup` - 探测器安装文件（TOML：型号、拓扑、地址、超时、健康阈值）
//! - `summary` - 采集结果记录（JSON）

pub mod params;
pub mod setup;
pub mod summary;

// 重新导出常用类型
pub use params::{ParamEntry, ParseError, parse_params, read_params};
pub use setup::{
    AcquisitionPolicy, DetectorSetup, GeometrySetup, HealthThresholds, ModuleSetup,
    ReceiverSetup, SetupError, StreamSetup,
};
pub use summary::RunSummary;
