//! 单个端点的请求通道
//!
//! 模块和接收器共用：互斥锁保证同一端点同一时刻只有一个在途请求，
//! 不同端点之间互不阻塞。

use crate::error::DriverError;
use crate::metrics::EndpointMetrics;
use crate::monitor::ConnectionMonitor;
use parking_lot::Mutex;
use sls_protocol::{Frame, Opcode, Payload};
use sls_transport::Transport;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub(crate) struct Link {
    endpoint: String,
    module_index: u16,
    timeout: Duration,
    seq: AtomicU32,
    transport: Mutex<Box<dyn Transport>>,
    monitor: ConnectionMonitor,
    metrics: EndpointMetrics,
}

impl Link {
    pub(crate) fn new(
        endpoint: String,
        module_index: u16,
        timeout: Duration,
        transport: Box<dyn Transport>,
    ) -> Self {
        Self {
            endpoint,
            module_index,
            timeout,
            seq: AtomicU32::new(1),
            transport: Mutex::new(transport),
            monitor: ConnectionMonitor::new(timeout.saturating_mul(10).max(Duration::from_secs(5))),
            metrics: EndpointMetrics::new(),
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn module_index(&self) -> u16 {
        self.module_index
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub(crate) fn metrics(&self) -> &EndpointMetrics {
        &self.metrics
    }

    /// 发送一个请求并等待响应
    ///
    /// - 无响应 → `Unreachable`
    /// - 设备故障 → `Device { code }`
    pub(crate) fn call(&self, opcode: Opcode, payload: Payload) -> Result<Payload, DriverError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let request = Frame::request(seq, self.module_index, opcode, payload);

        self.metrics.record_request();
        let started = Instant::now();
        let result = self.transport.lock().exchange(&request, self.timeout);

        let response = match result {
            Ok(response) => response,
            Err(source) if source.is_unreachable() => {
                self.monitor.register_failure();
                self.metrics.unreachable.fetch_add(1, Ordering::Relaxed);
                debug!("{} {:?}: {}", self.endpoint, opcode, source);
                return Err(DriverError::Unreachable {
                    endpoint: self.endpoint.clone(),
                    source,
                });
            },
            Err(source) => {
                self.monitor.register_failure();
                self.metrics.transport_errors.fetch_add(1, Ordering::Relaxed);
                warn!("{} {:?}: {}", self.endpoint, opcode, source);
                return Err(DriverError::Transport {
                    endpoint: self.endpoint.clone(),
                    source,
                });
            },
        };

        self.monitor.register_response();
        self.metrics.record_response(started.elapsed());

        if response.opcode != opcode {
            return Err(DriverError::UnexpectedResponse {
                endpoint: self.endpoint.clone(),
                detail: format!("expected {:?}, got {:?}", opcode, response.opcode),
            });
        }
        if let Some(code) = response.fault_code() {
            self.metrics.device_errors.fetch_add(1, Ordering::Relaxed);
            debug!("{} {:?}: device error {}", self.endpoint, opcode, code);
            return Err(DriverError::Device {
                endpoint: self.endpoint.clone(),
                code,
            });
        }

        trace!("{} {:?} ok in {:?}", self.endpoint, opcode, started.elapsed());
        Ok(response.payload)
    }

    pub(crate) fn call_int(&self, opcode: Opcode, payload: Payload) -> Result<i64, DriverError> {
        Ok(self.call(opcode, payload)?.as_int()?)
    }

    pub(crate) fn call_text(&self, opcode: Opcode, payload: Payload) -> Result<String, DriverError> {
        Ok(self.call(opcode, payload)?.into_text()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sls_protocol::{ModuleKind, fault};
    use sls_transport::{MockTransport, SimModule, TransportError};
    use std::sync::Arc;

    fn link_to(module: &Arc<SimModule>) -> Link {
        Link::new(
            "sim".into(),
            0,
            Duration::from_millis(50),
            Box::new(MockTransport::new(module.clone())),
        )
    }

    #[test]
    fn test_call_maps_outcomes() {
        let module = Arc::new(SimModule::new("m", ModuleKind::Eiger));
        let link = link_to(&module);

        assert_eq!(
            link.call_int(Opcode::GetDetectorType, Payload::Empty).unwrap(),
            0
        );

        let err = link
            .call(Opcode::SetAllTrimbits, Payload::Int(99))
            .unwrap_err();
        assert_eq!(err.device_code(), Some(fault::INVALID_ARGUMENT));
        assert!(link.monitor().is_alive(), "device errors still prove liveness");

        module.set_unreachable(true);
        let err = link.call(Opcode::GetStatus, Payload::Empty).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Unreachable {
                source: TransportError::Timeout(_),
                ..
            }
        ));
        assert!(!link.monitor().is_alive());

        let metrics = link.metrics().snapshot();
        assert_eq!(metrics.requests, 3);
        assert_eq!(metrics.responses, 2);
        assert_eq!(metrics.device_errors, 1);
        assert_eq!(metrics.unreachable, 1);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let module = Arc::new(SimModule::new("m", ModuleKind::Eiger));
        let link = link_to(&module);
        let before = link.seq.load(Ordering::Relaxed);
        link.call(Opcode::Ping, Payload::Empty).unwrap();
        link.call(Opcode::Ping, Payload::Empty).unwrap();
        assert_eq!(link.seq.load(Ordering::Relaxed), before + 2);
    }
}
