//! 驱动层错误类型定义

use sls_protocol::{ModuleKind, ProtocolError};
use sls_transport::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 请求在超时时间内没有得到响应（或连接失败）
    #[error("{endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// 设备返回故障码
    #[error("{endpoint} reported device error code {code}")]
    Device { endpoint: String, code: i32 },

    /// 对端有响应但内容无法使用（协议或序列号错误）
    #[error("Transport error on {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 响应与请求不匹配
    #[error("Unexpected response from {endpoint}: {detail}")]
    UnexpectedResponse { endpoint: String, detail: String },

    /// 当前型号不支持
    #[error("{what} is not supported by {kind}")]
    Unsupported { kind: ModuleKind, what: String },

    /// 参数值非法（发送前的本地校验）
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    /// 配置只部分生效
    ///
    /// `applied` 个参数已经写入设备，不会回滚。
    #[error(
        "Configuration incomplete: {applied} applied, unknown keys {unknown:?}, rejected {rejected:?}"
    )]
    Config {
        applied: usize,
        unknown: Vec<String>,
        rejected: Vec<String>,
    },
}

impl DriverError {
    /// 是否为连接层面的失败
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DriverError::Unreachable { .. })
    }

    /// 设备故障码（如果是设备报告的错误）
    pub fn device_code(&self) -> Option<i32> {
        match self {
            DriverError::Device { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        DriverError::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// 测试 DriverError 的 Display 实现
    #[test]
    fn test_driver_error_display() {
        let err = DriverError::Unreachable {
            endpoint: "beb031:1952".into(),
            source: TransportError::Timeout(Duration::from_millis(500)),
        };
        assert_eq!(
            err.to_string(),
            "beb031:1952 unreachable: No response within 500ms"
        );

        let err = DriverError::Device {
            endpoint: "beb031:1952".into(),
            code: 5,
        };
        assert_eq!(err.to_string(), "beb031:1952 reported device error code 5");

        let err = DriverError::Unsupported {
            kind: ModuleKind::Jungfrau,
            what: "sub exposure time".into(),
        };
        assert_eq!(
            err.to_string(),
            "sub exposure time is not supported by Jungfrau"
        );

        let err = DriverError::Config {
            applied: 3,
            unknown: vec!["bogus".into()],
            rejected: vec![],
        };
        assert!(err.to_string().contains("3 applied"));
        assert!(err.to_string().contains("bogus"));
    }

    /// 测试 From<ProtocolError> 转换
    #[test]
    fn test_from_protocol_error() {
        let err: DriverError = ProtocolError::UnknownOpcode(0x7).into();
        assert!(matches!(
            err,
            DriverError::Protocol(ProtocolError::UnknownOpcode(0x7))
        ));
    }

    #[test]
    fn test_classification() {
        let err = DriverError::Unreachable {
            endpoint: "x".into(),
            source: TransportError::Disconnected,
        };
        assert!(err.is_unreachable());
        assert_eq!(err.device_code(), None);

        let err = DriverError::Device {
            endpoint: "x".into(),
            code: 3,
        };
        assert!(!err.is_unreachable());
        assert_eq!(err.device_code(), Some(3));
    }
}
