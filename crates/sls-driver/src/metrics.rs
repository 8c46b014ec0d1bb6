//! 端点请求指标
//!
//! 原子计数器，任何线程都可以无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 单个端点的请求指标
///
/// # 使用示例
///
/// ```rust
/// use sls_driver::EndpointMetrics;
/// use std::time::Duration;
///
/// let metrics = EndpointMetrics::default();
/// metrics.record_response(Duration::from_micros(250));
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.responses, 1);
/// assert_eq!(snapshot.max_latency_us, 250);
/// ```
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    /// 发出的请求总数
    pub requests: AtomicU64,

    /// 收到的响应总数（含设备故障响应）
    pub responses: AtomicU64,

    /// 设备故障响应次数
    pub device_errors: AtomicU64,

    /// 超时/连接失败次数
    pub unreachable: AtomicU64,

    /// 协议或序列号错误次数
    pub transport_errors: AtomicU64,

    /// 响应延迟累计（微秒）
    pub total_latency_us: AtomicU64,

    /// 最大响应延迟（微秒）
    pub max_latency_us: AtomicU64,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, latency: Duration) {
        let us = latency.as_micros().min(u64::MAX as u128) as u64;
        self.responses.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(us, Ordering::Relaxed);
        self.max_latency_us.fetch_max(us, Ordering::Relaxed);
    }

    /// 获取指标快照
    ///
    /// 各计数器分别原子读取，之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            unreachable: self.unreachable.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            total_latency_us: self.total_latency_us.load(Ordering::Relaxed),
            max_latency_us: self.max_latency_us.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub responses: u64,
    pub device_errors: u64,
    pub unreachable: u64,
    pub transport_errors: u64,
    pub total_latency_us: u64,
    pub max_latency_us: u64,
}

impl MetricsSnapshot {
    /// 平均响应延迟（微秒），无响应时为 0
    pub fn avg_latency_us(&self) -> u64 {
        self.total_latency_us
            .checked_div(self.responses)
            .unwrap_or(0)
    }

    /// 请求失败率（0.0 ~ 1.0）
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.unreachable + self.transport_errors) as f64 / self.requests as f64
    }
}
