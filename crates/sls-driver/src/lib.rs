//! # SLS Driver
//!
//! 探测器模块与接收器的端点驱动，包括：
//! - 同步请求/响应（每个端点同一时刻只有一个在途请求）
//! - 状态快照（ArcSwap 无锁读取最后一次已知状态）
//! - 连接监控与请求指标
//! - 配置参数表（名称 → 类型、校验、适用型号、应用函数）
//!
//! # 使用场景
//!
//! 适用于单独操作某个模块或接收器的场景。
//! 多模块协同采集请使用 `sls-client` 提供的 `ModuleGroup` 和 `AcquisitionController`。

mod builder;
mod error;
mod link;
pub mod metrics;
pub mod module;
pub mod monitor;
pub mod receiver;
pub mod schema;

pub use builder::{DEFAULT_MODULE_PORT, DEFAULT_RECEIVER_PORT, DEFAULT_TIMEOUT, EndpointBuilder};
pub use error::DriverError;
pub use metrics::{EndpointMetrics, MetricsSnapshot};
pub use module::{ModuleEndpoint, ModuleSnapshot};
pub use monitor::ConnectionMonitor;
pub use receiver::{ReceiverEndpoint, ReceiverSnapshot};
pub use schema::{ParameterSpec, ValueKind};
