//! 控制层错误类型定义

use crate::controller::ControllerState;
use crate::health::ReadinessReport;
use sls_driver::DriverError;
use sls_tools::ParseError;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 启动失败发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    /// 接收器拒绝启动或不可达
    Receivers,
    /// 接收器在超时内没有进入监听
    ReceiverReadiness,
    /// 模块启动失败（已回滚接收器）
    Modules,
}

impl fmt::Display for StartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartPhase::Receivers => "receiver start",
            StartPhase::ReceiverReadiness => "waiting for receivers",
            StartPhase::Modules => "module start",
        };
        f.write_str(name)
    }
}

fn indices(failed: &BTreeMap<usize, DriverError>) -> Vec<usize> {
    failed.keys().copied().collect()
}

fn format_values(values: &[(usize, String)]) -> String {
    values
        .iter()
        .map(|(index, value)| format!("{index}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControlError {
    /// 模块（或其接收器）无响应
    #[error("Module {index} ({endpoint}) unreachable")]
    Unreachable { index: usize, endpoint: String },

    /// 模块返回故障码
    #[error("Module {index} reported device error code {code}")]
    Device { index: usize, code: i32 },

    /// 其他端点错误
    #[error("Module {index}: {source}")]
    Endpoint {
        index: usize,
        #[source]
        source: DriverError,
    },

    /// 要求一致的参数在模块之间不一致
    #[error("Inconsistent {parameter} across modules: {}", format_values(.values))]
    InconsistentState {
        parameter: &'static str,
        values: Vec<(usize, String)>,
    },

    /// 配置只部分生效（已生效的不会回滚）
    #[error(
        "Configuration incomplete: {applied} applied, unknown keys {unknown:?}, rejected {rejected:?}"
    )]
    Config {
        applied: usize,
        unknown: Vec<String>,
        rejected: Vec<String>,
    },

    /// 参数文件无法读取或格式错误
    #[error("Cannot load parameters: {0}")]
    Params(#[from] ParseError),

    /// 健康检查未通过
    #[error("Detector not ready: {0}")]
    NotReady(ReadinessReport),

    /// 启动失败（已执行补偿回滚）
    #[error("Start failed during {phase}: modules {failed:?}")]
    Start { phase: StartPhase, failed: Vec<usize> },

    /// 组操作中部分模块失败
    #[error("Operation failed on modules {:?}", indices(.failed))]
    PartialFailure { failed: BTreeMap<usize, DriverError> },

    /// 当前状态不允许该操作
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: ControllerState,
        action: &'static str,
    },

    #[error("Geometry {rows}x{cols} does not match {modules} modules")]
    Geometry {
        rows: usize,
        cols: usize,
        modules: usize,
    },

    #[error("Invalid detector setup: {0}")]
    Setup(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// 探测器已被另一个会话占用
    #[error("Detector {id} is in use by another session (lock file {path})")]
    SessionBusy { id: String, path: PathBuf },

    #[error("Cannot create session lock {path}: {source}")]
    Session {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ControlError {
    /// 把某个模块的驱动层错误提升为控制层错误
    pub fn from_driver(index: usize, error: DriverError) -> Self {
        match error {
            DriverError::Unreachable { endpoint, .. } => ControlError::Unreachable { index, endpoint },
            DriverError::Device { code, .. } => ControlError::Device { index, code },
            source => ControlError::Endpoint { index, source },
        }
    }

    /// 失败的模块编号（升序）
    pub fn failed_indices(&self) -> Vec<usize> {
        match self {
            ControlError::Unreachable { index, .. }
            | ControlError::Device { index, .. }
            | ControlError::Endpoint { index, .. } => vec![*index],
            ControlError::PartialFailure { failed } => indices(failed),
            ControlError::Start { failed, .. } => failed.clone(),
            ControlError::NotReady(report) => report.blocked_indices(),
            _ => Vec::new(),
        }
    }
}

/// 控制层 Result 类型别名
pub type Result<T> = std::result::Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sls_transport::TransportError;
    use std::time::Duration;

    #[test]
    fn test_from_driver_mapping() {
        let err = ControlError::from_driver(
            2,
            DriverError::Unreachable {
                endpoint: "beb033:1952".into(),
                source: TransportError::Timeout(Duration::from_secs(1)),
            },
        );
        assert_eq!(err.to_string(), "Module 2 (beb033:1952) unreachable");
        assert_eq!(err.failed_indices(), vec![2]);

        let err = ControlError::from_driver(
            0,
            DriverError::Device {
                endpoint: "beb031:1952".into(),
                code: 5,
            },
        );
        assert!(matches!(err, ControlError::Device { index: 0, code: 5 }));
    }

    #[test]
    fn test_display() {
        let err = ControlError::InconsistentState {
            parameter: "dynamic_range",
            values: vec![(0, "16".into()), (1, "16".into()), (2, "8".into())],
        };
        assert_eq!(
            err.to_string(),
            "Inconsistent dynamic_range across modules: 0=16, 1=16, 2=8"
        );

        let mut failed = BTreeMap::new();
        failed.insert(
            3,
            DriverError::Device {
                endpoint: "x".into(),
                code: 2,
            },
        );
        failed.insert(
            1,
            DriverError::Device {
                endpoint: "y".into(),
                code: 2,
            },
        );
        let err = ControlError::PartialFailure { failed };
        assert_eq!(err.to_string(), "Operation failed on modules [1, 3]");
        assert_eq!(err.failed_indices(), vec![1, 3]);

        let err = ControlError::InvalidTransition {
            state: ControllerState::Running,
            action: "configure",
        };
        assert_eq!(err.to_string(), "Cannot configure while running");
    }
}
