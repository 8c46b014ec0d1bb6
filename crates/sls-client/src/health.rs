//! 健康检查
//!
//! - 就绪检查：连通性、错误掩码、锁持有者。任何模块不可达或被其他客户端锁定时拒绝采集；
//!   非零错误掩码只作为警告。
//! - 温度采样：超过阈值时在订阅通道上发布 [`HealthEvent`]，仅作提示，不会中止采集。

use crate::group::ModuleGroup;
use crate::session::ClientId;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use sls_driver::DriverError;
use sls_protocol::{ErrorMask, TemperatureSensor};
use sls_tools::HealthThresholds;
use std::fmt;
use tracing::{debug, warn};

/// 单个模块的就绪检查结果
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleReadiness {
    pub index: usize,
    pub endpoint: String,
    pub reachable: bool,
    pub error_mask: Option<ErrorMask>,
    pub lock_owner: Option<String>,
    /// 查询失败但端点可达时的错误描述
    pub query_error: Option<String>,
}

/// 就绪检查报告
#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessReport {
    pub client: ClientId,
    pub modules: Vec<ModuleReadiness>,
}

impl ReadinessReport {
    fn is_blocked(&self, module: &ModuleReadiness) -> bool {
        !module.reachable || self.foreign_owner(module).is_some()
    }

    fn foreign_owner<'a>(&self, module: &'a ModuleReadiness) -> Option<&'a str> {
        module
            .lock_owner
            .as_deref()
            .filter(|owner| *owner != self.client.as_str())
    }

    pub fn is_ready(&self) -> bool {
        !self.modules.iter().any(|m| self.is_blocked(m))
    }

    /// 阻止采集的模块编号（升序）
    pub fn blocked_indices(&self) -> Vec<usize> {
        self.modules
            .iter()
            .filter(|m| self.is_blocked(m))
            .map(|m| m.index)
            .collect()
    }

    pub fn unreachable(&self) -> Vec<usize> {
        self.modules
            .iter()
            .filter(|m| !m.reachable)
            .map(|m| m.index)
            .collect()
    }

    /// 阻止采集的原因
    pub fn blockers(&self) -> Vec<String> {
        let mut blockers = Vec::new();
        for module in &self.modules {
            if !module.reachable {
                blockers.push(format!("module {} ({}) unreachable", module.index, module.endpoint));
            } else if let Some(owner) = self.foreign_owner(module) {
                blockers.push(format!("module {} locked by {}", module.index, owner));
            }
        }
        blockers
    }

    /// 不阻止采集的问题
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for module in &self.modules {
            if let Some(mask) = module.error_mask.filter(|mask| !mask.is_empty()) {
                warnings.push(format!("module {} error mask: {}", module.index, mask));
            }
            if let Some(error) = &module.query_error {
                warnings.push(format!("module {}: {}", module.index, error));
            }
        }
        warnings
    }
}

impl fmt::Display for ReadinessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let blockers = self.blockers();
        if blockers.is_empty() {
            f.write_str("ready")
        } else {
            f.write_str(&blockers.join("; "))
        }
    }
}

/// 健康事件（仅提示）
#[derive(Debug, Clone, PartialEq)]
pub enum HealthEvent {
    TemperatureWarning {
        index: usize,
        sensor: TemperatureSensor,
        celsius: f64,
    },
    TemperatureCritical {
        index: usize,
        sensor: TemperatureSensor,
        celsius: f64,
    },
    /// 采样时模块无响应
    Unreachable { index: usize },
}

impl HealthEvent {
    pub fn index(&self) -> usize {
        match self {
            HealthEvent::TemperatureWarning { index, .. }
            | HealthEvent::TemperatureCritical { index, .. }
            | HealthEvent::Unreachable { index } => *index,
        }
    }
}

/// 健康监视器
pub struct HealthMonitor {
    client: ClientId,
    thresholds: HealthThresholds,
    subscribers: Mutex<Vec<Sender<HealthEvent>>>,
}

impl HealthMonitor {
    pub fn new(client: ClientId, thresholds: HealthThresholds) -> Self {
        Self {
            client,
            thresholds,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// 订阅健康事件
    ///
    /// 接收端被丢弃后自动取消订阅。
    pub fn subscribe(&self) -> Receiver<HealthEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: HealthEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// 就绪检查：每个模块读取错误掩码和锁持有者
    pub fn check_ready(&self, group: &ModuleGroup) -> ReadinessReport {
        let results = group.apply_to_each(|module| {
            let mask = module.error_mask();
            let owner = module.lock_owner();
            (mask, owner)
        });

        let modules = results
            .into_iter()
            .enumerate()
            .map(|(index, (mask, owner))| {
                let endpoint = group
                    .module(index)
                    .map(|m| m.hostname().to_string())
                    .unwrap_or_default();
                let reachable = !matches!(&mask, Err(e) if e.is_unreachable())
                    && !matches!(&owner, Err(e) if e.is_unreachable());
                let query_error = [mask.as_ref().err(), owner.as_ref().err()]
                    .into_iter()
                    .flatten()
                    .find(|e| !e.is_unreachable())
                    .map(DriverError::to_string);
                ModuleReadiness {
                    index,
                    endpoint,
                    reachable,
                    error_mask: mask.ok(),
                    lock_owner: owner.ok().flatten(),
                    query_error,
                }
            })
            .collect();

        let report = ReadinessReport {
            client: self.client.clone(),
            modules,
        };
        for warning in report.warnings() {
            warn!("Health: {}", warning);
        }
        if !report.is_ready() {
            warn!("Detector not ready: {}", report);
        }
        report
    }

    /// 采样所有模块温度，发布并返回超过阈值的事件
    pub fn sample_temperatures(&self, group: &ModuleGroup) -> Vec<HealthEvent> {
        let mut events = Vec::new();
        for (index, result) in group.apply_to_each(|m| m.temperatures()).into_iter().enumerate() {
            match result {
                Ok(readings) => {
                    for (sensor, celsius) in readings {
                        if celsius >= self.thresholds.temperature_critical_c {
                            warn!("Module {} {} at {:.1} °C (critical)", index, sensor, celsius);
                            events.push(HealthEvent::TemperatureCritical {
                                index,
                                sensor,
                                celsius,
                            });
                        } else if celsius >= self.thresholds.temperature_warning_c {
                            warn!("Module {} {} at {:.1} °C", index, sensor, celsius);
                            events.push(HealthEvent::TemperatureWarning {
                                index,
                                sensor,
                                celsius,
                            });
                        }
                    }
                },
                Err(e) if e.is_unreachable() => {
                    events.push(HealthEvent::Unreachable { index });
                },
                Err(e) => debug!("Module {} temperature query failed: {}", index, e),
            }
        }
        for event in &events {
            self.publish(event.clone());
        }
        events
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(ClientId::current(), HealthThresholds::default())
    }
}
