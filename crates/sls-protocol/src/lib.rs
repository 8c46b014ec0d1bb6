//! # SLS Protocol
//!
//! 探测器模块与接收器控制协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `opcode`: 请求操作码（模块 0x01xx，接收器 0x02xx）
//! - `codec`: 16 字节消息头 + 负载的编解码
//! - `types`: 动态范围、运行状态、触发模式等设备枚举
//! - `kind`: 探测器型号相关的静态表（DAC、温度传感器、图像尺寸）
//! - `mask`: 错误掩码位定义
//! - `util`: 寄存器/时间换算工具函数
//!
//! ## 字节序
//!
//! 所有多字节字段均为小端字节序（Little Endian）。

pub mod codec;
pub mod kind;
pub mod mask;
pub mod opcode;
pub mod types;
pub mod util;

// 重新导出常用类型
pub use codec::{Direction, Frame, HEADER_LEN, Header, MAX_PAYLOAD_LEN, PROTOCOL_VERSION, Payload, Status};
pub use kind::{DacSpec, ModuleKind, TemperatureSensor};
pub use mask::ErrorMask;
pub use opcode::Opcode;
pub use types::{
    DetectorSettings, DynamicRange, MacAddr, ReadoutSpeed, ReceiverStatus, RunStatus,
    StreamDestination, TimerKind, TimingMode,
};

use thiserror::Error;

/// 设备上报的故障码
///
/// 响应状态为 [`Status::DeviceError`] 时，负载为 `Payload::Int(code)`。
pub mod fault {
    /// 参数超出范围或类型不符
    pub const INVALID_ARGUMENT: i32 = 1;
    /// 采集进行中，拒绝修改配置
    pub const BUSY: i32 = 2;
    /// 设备已被其他客户端锁定
    pub const LOCKED: i32 = 3;
    /// 该型号不支持此操作
    pub const UNSUPPORTED: i32 = 4;
    /// 启动采集失败
    pub const START_FAILED: i32 = 5;
    /// 文件路径不存在
    pub const PATH_NOT_FOUND: i32 = 6;
}

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown opcode: 0x{0:04X}")]
    UnknownOpcode(u16),

    #[error("Invalid direction byte: {0}")]
    InvalidDirection(u8),

    #[error("Invalid status byte: {0}")]
    InvalidStatus(u8),

    #[error("Invalid payload tag: {0}")]
    InvalidPayloadTag(u8),

    #[error("Payload length {len} exceeds limit {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Payload length mismatch for {tag}: expected {expected}, got {actual}")]
    PayloadLength {
        tag: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Payload is not valid UTF-8")]
    InvalidText,

    #[error("Unexpected payload: expected {expected}, got {actual}")]
    UnexpectedPayload {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl ProtocolError {
    /// 构造 `InvalidValue` 的便捷函数
    pub fn invalid(field: &'static str, value: impl ToString) -> Self {
        ProtocolError::InvalidValue {
            field,
            value: value.to_string(),
        }
    }
}
