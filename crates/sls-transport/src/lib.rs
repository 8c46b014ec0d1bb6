//! # SLS Transport
//!
//! 控制协议的传输层抽象：一次请求对应一次响应。
//!
//! - [`TcpTransport`]：通过 TCP 连接真实设备或模拟器进程
//! - `mock` feature：进程内虚拟模块/接收器（[`sim`]）及 [`MockTransport`]，
//!   支持故障注入，测试无需硬件
//!
//! 上层（`sls-driver`）负责把传输错误映射为 `Unreachable`，
//! 把设备故障响应映射为 `DeviceError`。

use sls_protocol::{Frame, ProtocolError};
use std::time::Duration;
use thiserror::Error;

pub mod tcp;

#[cfg(feature = "mock")]
pub mod mock;
#[cfg(feature = "mock")]
pub mod server;
#[cfg(feature = "mock")]
pub mod sim;

pub use tcp::{TcpTransport, read_frame, write_frame};

#[cfg(feature = "mock")]
pub use mock::{EventLog, MockTransport, TraceEvent};
#[cfg(feature = "mock")]
pub use server::SimServer;
#[cfg(feature = "mock")]
pub use sim::{SimDevice, SimModule, SimReceiver, VirtualDetector};

/// 传输层错误
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by peer")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Response sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u32, actual: u32 },
}

impl TransportError {
    /// 对端是否不可达（无响应、连接失败或断开）
    ///
    /// 协议错误和序列号错误说明对端有响应，只是内容不对。
    pub fn is_unreachable(&self) -> bool {
        !matches!(
            self,
            TransportError::Protocol(_) | TransportError::SequenceMismatch { .. }
        )
    }
}

/// 请求/响应传输
///
/// 实现者保证一次 `exchange` 只产生一个请求，并返回与之序列号匹配的响应。
/// 调用方（端点）负责串行化同一传输上的调用。
pub trait Transport: Send {
    /// 发送请求并在 `timeout` 内等待响应
    fn exchange(&mut self, request: &Frame, timeout: Duration) -> Result<Frame, TransportError>;

    /// 对端描述（主机名:端口 或 虚拟设备名）
    fn peer(&self) -> String;

    /// 丢弃当前连接，下次调用时重新建立
    fn reset(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(&mut self, request: &Frame, timeout: Duration) -> Result<Frame, TransportError> {
        (**self).exchange(request, timeout)
    }

    fn peer(&self) -> String {
        (**self).peer()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}
