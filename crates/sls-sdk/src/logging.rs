//! 日志初始化
//!
//! 使用 `RUST_LOG` 过滤（未设置时为 `info`），同时把 `log` crate 的记录转发到 tracing。

use tracing_subscriber::EnvFilter;

/// 默认过滤规则初始化日志
///
/// 重复调用是安全的：已有全局订阅者时什么都不做。
pub fn init_logging() {
    init_logging_with("info");
}

/// 以 `default_directive` 作为 `RUST_LOG` 未设置时的过滤规则
pub fn init_logging_with(default_directive: &str) {
    let _ = tracing_log::LogTracer::init();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
