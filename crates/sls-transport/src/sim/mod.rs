//! 进程内虚拟探测器
//!
//! 用于测试和模拟器进程：
//! - [`SimModule`]：模拟一个探测器模块的固件，按 `frames × max(period, exposure)`
//!   推进采集进度
//! - [`SimReceiver`]：模拟接收器进程，帧计数来自配对的模块
//! - [`VirtualDetector`]：按模块数量批量创建模块/接收器对
//!
//! 所有虚拟设备都提供故障注入开关（不可达、卡在运行态、启动失败、
//! 静默偏离的动态范围、丢帧等）。

mod module;
mod receiver;

pub use module::SimModule;
pub use receiver::SimReceiver;

use crate::mock::{EventLog, MockTransport};
use sls_protocol::{Frame, ModuleKind};
use std::sync::Arc;

/// 虚拟设备
pub trait SimDevice: Send + Sync {
    /// 设备名称（用于日志和事件记录）
    fn name(&self) -> &str;

    /// 是否能够响应请求
    fn is_reachable(&self) -> bool;

    /// 处理一个请求并生成响应
    fn handle(&self, request: &Frame) -> Frame;
}

/// 一组虚拟模块及其配对的接收器
pub struct VirtualDetector {
    kind: ModuleKind,
    modules: Vec<Arc<SimModule>>,
    receivers: Vec<Arc<SimReceiver>>,
    events: EventLog,
}

impl VirtualDetector {
    /// 创建 `count` 个模块/接收器对
    pub fn new(kind: ModuleKind, count: usize) -> Self {
        let modules: Vec<Arc<SimModule>> = (0..count)
            .map(|index| Arc::new(SimModule::new(format!("sim-module-{index}"), kind)))
            .collect();
        let receivers = modules
            .iter()
            .enumerate()
            .map(|(index, module)| {
                Arc::new(SimReceiver::new(
                    format!("sim-receiver-{index}"),
                    Arc::clone(module),
                ))
            })
            .collect();

        Self {
            kind,
            modules,
            receivers,
            events: EventLog::default(),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 第 `index` 个模块
    ///
    /// # Panics
    /// `index` 越界时 panic
    pub fn module(&self, index: usize) -> &Arc<SimModule> {
        &self.modules[index]
    }

    /// 第 `index` 个接收器
    ///
    /// # Panics
    /// `index` 越界时 panic
    pub fn receiver(&self, index: usize) -> &Arc<SimReceiver> {
        &self.receivers[index]
    }

    pub fn modules(&self) -> &[Arc<SimModule>] {
        &self.modules
    }

    pub fn receivers(&self) -> &[Arc<SimReceiver>] {
        &self.receivers
    }

    /// 连接到第 `index` 个模块的传输（共享事件记录）
    pub fn module_transport(&self, index: usize) -> MockTransport {
        MockTransport::new(self.module(index).clone()).with_event_log(self.events.clone())
    }

    /// 连接到第 `index` 个接收器的传输（共享事件记录）
    pub fn receiver_transport(&self, index: usize) -> MockTransport {
        MockTransport::new(self.receiver(index).clone()).with_event_log(self.events.clone())
    }

    /// 所有传输共享的请求/响应事件记录
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// 把所有模块的时间流速放大 `scale` 倍
    pub fn set_time_scale(&self, scale: f64) {
        for module in &self.modules {
            module.set_time_scale(scale);
        }
    }
}
