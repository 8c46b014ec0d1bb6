//! Mock 传输
//!
//! 把请求直接交给进程内虚拟设备处理。请求和响应都会完整地编码再解码一次，
//! 保证测试覆盖真实的线上格式。

use crate::sim::SimDevice;
use crate::{Transport, TransportError};
use parking_lot::Mutex;
use sls_protocol::{Direction, Frame, Opcode, Status};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// 一条请求或响应记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// 设备名称
    pub endpoint: String,
    pub opcode: Opcode,
    pub direction: Direction,
    pub status: Status,
}

/// 跨端点共享的事件记录
///
/// 记录顺序即全局发生顺序，可用于断言跨设备的调用次序。
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: TraceEvent) {
        self.events.lock().push(event);
    }

    /// 所有事件的快照
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// 某操作码的请求次数
    pub fn count_requests(&self, opcode: Opcode) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.opcode == opcode && e.direction == Direction::Request)
            .count()
    }

    /// 第一个满足条件的事件的位置
    pub fn position(&self, predicate: impl Fn(&TraceEvent) -> bool) -> Option<usize> {
        self.events.lock().iter().position(predicate)
    }

    /// 最后一个满足条件的事件的位置
    pub fn last_position(&self, predicate: impl Fn(&TraceEvent) -> bool) -> Option<usize> {
        self.events.lock().iter().rposition(predicate)
    }
}

/// 连接到虚拟设备的传输
pub struct MockTransport {
    device: Arc<dyn SimDevice>,
    events: Option<EventLog>,
}

impl MockTransport {
    pub fn new(device: Arc<dyn SimDevice>) -> Self {
        Self {
            device,
            events: None,
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    fn record(&self, frame: &Frame) {
        if let Some(events) = &self.events {
            events.push(TraceEvent {
                endpoint: self.device.name().to_string(),
                opcode: frame.opcode,
                direction: frame.direction,
                status: frame.status,
            });
        }
    }
}

impl Transport for MockTransport {
    fn exchange(&mut self, request: &Frame, timeout: Duration) -> Result<Frame, TransportError> {
        let request = Frame::decode(&request.encode()?)?;
        self.record(&request);

        if !self.device.is_reachable() {
            trace!("{}: unreachable, {:?} dropped", self.device.name(), request.opcode);
            return Err(TransportError::Timeout(timeout));
        }

        let response = self.device.handle(&request);
        let response = Frame::decode(&response.encode()?)?;
        self.record(&response);
        Ok(response)
    }

    fn peer(&self) -> String {
        self.device.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimModule;
    use sls_protocol::{ModuleKind, Payload};

    #[test]
    fn test_unreachable_device_times_out() {
        let module = Arc::new(SimModule::new("m0", ModuleKind::Eiger));
        let events = EventLog::new();
        let mut transport = MockTransport::new(module.clone()).with_event_log(events.clone());

        module.set_unreachable(true);
        let request = Frame::request(1, 0, Opcode::GetStatus, Payload::Empty);
        let err = transport
            .exchange(&request, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));

        // 只记录了请求
        assert_eq!(events.len(), 1);
        assert_eq!(events.count_requests(Opcode::GetStatus), 1);
    }

    #[test]
    fn test_event_order() {
        let module = Arc::new(SimModule::new("m0", ModuleKind::Eiger));
        let events = EventLog::new();
        let mut transport = MockTransport::new(module).with_event_log(events.clone());

        for opcode in [Opcode::Ping, Opcode::GetStatus] {
            transport
                .exchange(
                    &Frame::request(1, 0, opcode, Payload::Empty),
                    Duration::from_millis(10),
                )
                .unwrap();
        }
        let recorded = events.events();
        assert_eq!(recorded.len(), 4);
        assert_eq!(recorded[0].direction, Direction::Request);
        assert_eq!(recorded[1].direction, Direction::Response);
        assert_eq!(recorded[2].opcode, Opcode::GetStatus);
        assert_eq!(
            events.position(|e| e.opcode == Opcode::GetStatus),
            Some(2)
        );
    }
}
