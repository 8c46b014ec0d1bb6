//! Builder 模式实现
//!
//! 提供链式构造 `ModuleEndpoint` / `ReceiverEndpoint` 的便捷方式。

use crate::error::DriverError;
use crate::link::Link;
use crate::module::ModuleEndpoint;
use crate::receiver::ReceiverEndpoint;
use sls_protocol::{ModuleKind, Opcode, Payload};
use sls_transport::{TcpTransport, Transport};
use std::time::Duration;
use tracing::debug;

/// 模块控制服务默认端口
pub const DEFAULT_MODULE_PORT: u16 = 1952;
/// 接收器控制服务默认端口
pub const DEFAULT_RECEIVER_PORT: u16 = 1954;
/// 默认请求超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// 端点 Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use sls_driver::EndpointBuilder;
/// use sls_protocol::ModuleKind;
/// use std::time::Duration;
///
/// // 型号未指定时，连接后查询设备型号
/// let module = EndpointBuilder::new("beb031")
///     .index(0)
///     .build_module()
///     .unwrap();
///
/// let receiver = EndpointBuilder::new("pc1875")
///     .port(1954)
///     .index(0)
///     .timeout(Duration::from_millis(500))
///     .build_receiver()
///     .unwrap();
/// ```
pub struct EndpointBuilder {
    /// 主机名，可以带 `:port`
    hostname: String,
    port: Option<u16>,
    index: u16,
    timeout: Duration,
    kind: Option<ModuleKind>,
    /// 自定义传输（默认 TCP）
    transport: Option<Box<dyn Transport>>,
}

impl EndpointBuilder {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: None,
            index: 0,
            timeout: DEFAULT_TIMEOUT,
            kind: None,
            transport: None,
        }
    }

    /// 设置端口（可选，默认按端点类型取 1952 / 1954）
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// 在探测器中的编号（默认 0）
    pub fn index(mut self, index: u16) -> Self {
        self.index = index;
        self
    }

    /// 单个请求的超时（默认 1s）
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 指定模块型号（可选，默认向设备查询）
    pub fn kind(mut self, kind: ModuleKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// 使用自定义传输代替 TCP
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    fn into_link(self, default_port: u16) -> (Link, Option<ModuleKind>) {
        let endpoint = if self.hostname.contains(':') {
            self.hostname
        } else {
            format!("{}:{}", self.hostname, self.port.unwrap_or(default_port))
        };
        let transport = self.transport.unwrap_or_else(|| {
            Box::new(TcpTransport::new(endpoint.clone()).with_connect_timeout(self.timeout))
        });
        (
            Link::new(endpoint, self.index, self.timeout, transport),
            self.kind,
        )
    }

    /// 构造模块端点
    ///
    /// 未指定型号时发送一次 `GetDetectorType`，设备不可达则返回错误。
    pub fn build_module(self) -> Result<ModuleEndpoint, DriverError> {
        let (link, kind) = self.into_link(DEFAULT_MODULE_PORT);
        let kind = match kind {
            Some(kind) => kind,
            None => {
                let raw = link.call_int(Opcode::GetDetectorType, Payload::Empty)?;
                let kind = ModuleKind::from_wire(raw)?;
                debug!("{}: detected {}", link.endpoint(), kind);
                kind
            },
        };
        Ok(ModuleEndpoint::new(link, kind))
    }

    /// 构造接收器端点（不发送任何请求）
    pub fn build_receiver(self) -> Result<ReceiverEndpoint, DriverError> {
        let (link, _) = self.into_link(DEFAULT_RECEIVER_PORT);
        Ok(ReceiverEndpoint::new(link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sls_transport::VirtualDetector;

    #[test]
    fn test_default_ports() {
        let detector = VirtualDetector::new(ModuleKind::Mythen, 1);
        let module = EndpointBuilder::new("beb031")
            .transport(detector.module_transport(0))
            .build_module()
            .unwrap();
        assert_eq!(module.hostname(), "beb031:1952");

        let receiver = EndpointBuilder::new("pc1875")
            .transport(detector.receiver_transport(0))
            .build_receiver()
            .unwrap();
        assert_eq!(receiver.hostname(), "pc1875:1954");

        let receiver = EndpointBuilder::new("pc1875:2000")
            .transport(detector.receiver_transport(0))
            .build_receiver()
            .unwrap();
        assert_eq!(receiver.hostname(), "pc1875:2000");
    }

    #[test]
    fn test_kind_detected_from_device() {
        let detector = VirtualDetector::new(ModuleKind::Mythen, 2);
        let module = EndpointBuilder::new("m1")
            .index(1)
            .transport(detector.module_transport(1))
            .build_module()
            .unwrap();
        assert_eq!(module.kind(), ModuleKind::Mythen);
        assert_eq!(module.index(), 1);
        assert_eq!(
            detector
                .events()
                .count_requests(Opcode::GetDetectorType),
            1
        );
    }

    #[test]
    fn test_detection_fails_when_unreachable() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        detector.module(0).set_unreachable(true);
        let err = EndpointBuilder::new("m0")
            .timeout(Duration::from_millis(20))
            .transport(detector.module_transport(0))
            .build_module()
            .unwrap_err();
        assert!(err.is_unreachable());
    }

    #[test]
    fn test_explicit_kind_skips_detection() {
        let detector = VirtualDetector::new(ModuleKind::Eiger, 1);
        detector.module(0).set_unreachable(true);
        let module = EndpointBuilder::new("m0")
            .kind(ModuleKind::Eiger)
            .transport(detector.module_transport(0))
            .build_module()
            .unwrap();
        assert_eq!(module.kind(), ModuleKind::Eiger);
        assert!(detector.events().is_empty());
    }
}
