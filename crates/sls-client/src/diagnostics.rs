//! 诊断报告
//!
//! 一次性读取每个模块和接收器的状态、错误掩码、温度、版本和请求指标，
//! 用于命令行 `status` 输出和故障排查。读取失败的字段为 `None`，不会中断整个报告。
//!
//! # 示例
//!
//! ```rust,no_run
//! use sls_client::{DetectorReport, ModuleGroupBuilder};
//! use sls_protocol::ModuleKind;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let group = ModuleGroupBuilder::new(ModuleKind::Eiger)
//!     .add_module("beb031", "pc1875")
//!     .build()?;
//! let report = DetectorReport::collect(&group);
//! print!("{report}");
//! # Ok(())
//! # }
//! ```

use crate::group::ModuleGroup;
use sls_driver::{DriverError, MetricsSnapshot, ModuleEndpoint, ReceiverEndpoint};
use sls_protocol::{ErrorMask, ReceiverStatus, RunStatus, TemperatureSensor};
use std::fmt;

/// 单个模块的诊断信息
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleReport {
    pub index: usize,
    pub endpoint: String,
    pub reachable: bool,
    pub status: Option<RunStatus>,
    pub error_mask: Option<ErrorMask>,
    pub temperatures: Vec<(TemperatureSensor, f64)>,
    pub firmware_version: Option<i64>,
    pub lock_owner: Option<String>,
    pub metrics: MetricsSnapshot,
    pub receiver: ReceiverReport,
}

/// 单个接收器的诊断信息
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverReport {
    pub endpoint: String,
    pub reachable: bool,
    pub status: Option<ReceiverStatus>,
    pub frames_caught: Option<u64>,
    pub metrics: MetricsSnapshot,
}

/// 整台探测器的诊断报告
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorReport {
    pub detector_id: String,
    pub geometry: String,
    pub image_size: (u32, u32),
    pub modules: Vec<ModuleReport>,
}

fn reachable<T>(result: &Result<T, DriverError>) -> bool {
    !matches!(result, Err(e) if e.is_unreachable())
}

fn module_report(module: &ModuleEndpoint) -> (bool, ModuleReport) {
    let status = module.status();
    let alive = reachable(&status);
    // 不可达时不再发送其余请求
    let (error_mask, temperatures, firmware_version, lock_owner) = if alive {
        (
            module.error_mask().ok(),
            module.temperatures().unwrap_or_default(),
            module.firmware_version().ok(),
            module.lock_owner().ok().flatten(),
        )
    } else {
        (None, Vec::new(), None, None)
    };
    let report = ModuleReport {
        index: module.index(),
        endpoint: module.hostname().to_string(),
        reachable: alive,
        status: status.ok(),
        error_mask,
        temperatures,
        firmware_version,
        lock_owner,
        metrics: MetricsSnapshot::default(),
        receiver: ReceiverReport {
            endpoint: String::new(),
            reachable: false,
            status: None,
            frames_caught: None,
            metrics: MetricsSnapshot::default(),
        },
    };
    (alive, report)
}

fn receiver_report(receiver: &ReceiverEndpoint) -> ReceiverReport {
    let status = receiver.status();
    let alive = reachable(&status);
    ReceiverReport {
        endpoint: receiver.hostname().to_string(),
        reachable: alive,
        status: status.ok(),
        frames_caught: if alive { receiver.frames_caught().ok() } else { None },
        metrics: receiver.metrics(),
    }
}

impl DetectorReport {
    /// 并行读取所有模块和接收器
    pub fn collect(group: &ModuleGroup) -> Self {
        let all: Vec<usize> = (0..group.len()).collect();
        let mut receivers: Vec<ReceiverReport> = group
            .apply_to_receivers_at(&all, receiver_report)
            .into_iter()
            .map(|(_, report)| report)
            .collect();

        let modules = group
            .apply_to_each(module_report)
            .into_iter()
            .zip(group.modules())
            .zip(receivers.drain(..))
            .map(|(((_, mut report), module), receiver)| {
                // 指标在所有请求完成后读取
                report.metrics = module.metrics();
                report.receiver = receiver;
                report
            })
            .collect();

        Self {
            detector_id: group.detector_id().to_string(),
            geometry: group.geometry().to_string(),
            image_size: group.image_size(),
            modules,
        }
    }

    /// 不可达的模块编号
    pub fn unreachable(&self) -> Vec<usize> {
        self.modules
            .iter()
            .filter(|m| !m.reachable)
            .map(|m| m.index)
            .collect()
    }

    /// 所有模块和接收器都可达且没有持久错误位
    pub fn is_healthy(&self) -> bool {
        self.modules.iter().all(|m| {
            m.reachable
                && m.receiver.reachable
                && m.error_mask.is_some_and(|mask| mask.persistent().is_empty())
        })
    }
}

fn or_dash<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string)
}

impl fmt::Display for DetectorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Detector {} ({}, image {}x{})",
            self.detector_id, self.geometry, self.image_size.0, self.image_size.1
        )?;
        for m in &self.modules {
            let temps = m
                .temperatures
                .iter()
                .map(|(sensor, c)| format!("{sensor}={c:.1}C"))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(
                f,
                "  [{}] {:<24} {:<12} mask={:<20} fw={} lock={} {}",
                m.index,
                m.endpoint,
                if m.reachable { or_dash(&m.status) } else { "unreachable".to_string() },
                or_dash(&m.error_mask),
                m.firmware_version
                    .map_or_else(|| "-".to_string(), |v| format!("0x{v:06x}")),
                m.lock_owner.as_deref().unwrap_or("-"),
                temps
            )?;
            writeln!(
                f,
                "      rx {:<21} {:<12} frames={} latency={}us",
                m.receiver.endpoint,
                if m.receiver.reachable {
                    or_dash(&m.receiver.status)
                } else {
                    "unreachable".to_string()
                },
                or_dash(&m.receiver.frames_caught),
                m.metrics.avg_latency_us()
            )?;
        }
        Ok(())
    }
}
