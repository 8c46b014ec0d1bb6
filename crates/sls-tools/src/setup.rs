//! # 探测器安装文件
//!
//! 描述一台探测器的静态信息：型号、模块拓扑、模块与接收器地址、
//! 数据流目的地、请求超时、健康阈值以及采集流程的时间参数。
//!
//! ```toml
//! detector_id = "eiger-500k"
//! kind = "eiger"
//!
//! [geometry]
//! rows = 1
//! cols = 2
//!
//! [[modules]]
//! hostname = "beb031"
//! receiver = { hostname = "pc1875", port = 1954 }
//!
//! [[modules]]
//! hostname = "beb032"
//! receiver = { hostname = "pc1875", port = 1955 }
//!
//! [health]
//! temperature_warning_c = 60.0
//! ```

use serde::{Deserialize, Serialize};
use sls_protocol::{MacAddr, ModuleKind};
use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid setup file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize setup: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid setup: {0}")]
    Invalid(String),
}

/// 探测器安装描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSetup {
    /// 会话锁使用的探测器编号
    #[serde(default = "default_detector_id")]
    pub detector_id: String,

    pub kind: ModuleKind,

    pub geometry: GeometrySetup,

    /// 按编号排列的模块
    pub modules: Vec<ModuleSetup>,

    /// 单个请求的超时（毫秒）
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// 会话锁文件目录（默认使用系统临时目录）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_dir: Option<PathBuf>,

    #[serde(default)]
    pub health: HealthThresholds,

    #[serde(default)]
    pub acquisition: AcquisitionPolicy,
}

fn default_detector_id() -> String {
    "0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    1000
}

/// 模块拓扑（行 × 列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometrySetup {
    pub rows: usize,
    pub cols: usize,
}

/// 单个模块
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSetup {
    pub hostname: String,
    /// 默认 1952
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub receiver: ReceiverSetup,
}

/// 与模块配对的接收器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverSetup {
    pub hostname: String,
    /// 默认 1954
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// 数据流目的地（启动时下发给接收器）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamSetup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSetup {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: u16,
}

/// 温度报警阈值（摄氏度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub temperature_warning_c: f64,
    pub temperature_critical_c: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            temperature_warning_c: 65.0,
            temperature_critical_c: 75.0,
        }
    }
}

/// 采集流程的时间参数（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionPolicy {
    /// 运行状态轮询间隔
    pub poll_interval_ms: u64,
    /// 等待所有接收器进入监听的上限
    pub receiver_ready_timeout_ms: u64,
    /// 停止命令之后、重新检查卡住模块之前的宽限期
    pub stop_grace_ms: u64,
}

impl Default for AcquisitionPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            receiver_ready_timeout_ms: 2000,
            stop_grace_ms: 500,
        }
    }
}

impl AcquisitionPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receiver_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.receiver_ready_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl DetectorSetup {
    /// 从 TOML 文本解析并校验
    pub fn from_toml_str(text: &str) -> Result<Self, SetupError> {
        let setup: DetectorSetup = toml::from_str(text)?;
        setup.validate()?;
        Ok(setup)
    }

    /// 从文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, SetupError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// 保存到文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SetupError> {
        let path = path.as_ref();
        let text = self.to_toml_string()?;
        fs::write(path, text).map_err(|source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 检查拓扑、地址和阈值
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.modules.is_empty() {
            return Err(SetupError::Invalid("no modules".to_string()));
        }
        let cells = self.geometry.rows * self.geometry.cols;
        if cells != self.modules.len() {
            return Err(SetupError::Invalid(format!(
                "geometry {}x{} does not match {} modules",
                self.geometry.rows,
                self.geometry.cols,
                self.modules.len()
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(SetupError::Invalid("request_timeout_ms must be > 0".to_string()));
        }

        let mut modules = HashSet::new();
        let mut receivers = HashSet::new();
        for (index, module) in self.modules.iter().enumerate() {
            if !modules.insert((module.hostname.as_str(), module.port)) {
                return Err(SetupError::Invalid(format!(
                    "module {index}: duplicate address {}",
                    module.hostname
                )));
            }
            let receiver = &module.receiver;
            if !receivers.insert((receiver.hostname.as_str(), receiver.port)) {
                return Err(SetupError::Invalid(format!(
                    "module {index}: duplicate receiver address {}:{}",
                    receiver.hostname,
                    receiver.port.map_or("default".to_string(), |p| p.to_string())
                )));
            }
        }

        let health = &self.health;
        if health.temperature_warning_c >= health.temperature_critical_c {
            return Err(SetupError::Invalid(format!(
                "temperature warning {} must be below critical {}",
                health.temperature_warning_c, health.temperature_critical_c
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
