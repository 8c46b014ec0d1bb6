//! 接收器端点
//!
//! 接收器是与模块配对的数据采集进程：采集开始前必须处于监听状态，
//! 采集结束后报告收到的帧数。

use crate::error::DriverError;
use crate::link::Link;
use crate::metrics::MetricsSnapshot;
use crate::schema;
use arc_swap::ArcSwap;
use sls_protocol::{MacAddr, Opcode, Payload, ReceiverStatus, StreamDestination};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 接收器最后一次已知状态
#[derive(Debug, Clone, Default)]
pub struct ReceiverSnapshot {
    pub status: Option<ReceiverStatus>,
    pub frames_caught: Option<u64>,
    pub destination: Option<StreamDestination>,
    pub updated_at: Option<Instant>,
}

/// 单个接收器进程
pub struct ReceiverEndpoint {
    link: Link,
    snapshot: ArcSwap<ReceiverSnapshot>,
}

impl ReceiverEndpoint {
    pub(crate) fn new(link: Link) -> Self {
        Self {
            link,
            snapshot: ArcSwap::from_pointee(ReceiverSnapshot::default()),
        }
    }

    pub fn hostname(&self) -> &str {
        self.link.endpoint()
    }

    /// 配对模块的编号
    pub fn index(&self) -> usize {
        self.link.module_index() as usize
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.link.metrics().snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.link.monitor().is_alive()
    }

    pub fn snapshot(&self) -> Arc<ReceiverSnapshot> {
        self.snapshot.load_full()
    }

    fn update(&self, f: impl Fn(&mut ReceiverSnapshot)) {
        self.snapshot.rcu(|current| {
            let mut next = ReceiverSnapshot::clone(current);
            f(&mut next);
            next.updated_at = Some(Instant::now());
            next
        });
    }

    pub fn ping(&self) -> Result<(), DriverError> {
        self.link.call(Opcode::Ping, Payload::Empty).map(|_| ())
    }

    pub fn status(&self) -> Result<ReceiverStatus, DriverError> {
        let raw = self.link.call_int(Opcode::RxGetStatus, Payload::Empty)?;
        let status = ReceiverStatus::from_wire(raw)?;
        self.update(|s| s.status = Some(status));
        Ok(status)
    }

    /// 开始监听
    ///
    /// 返回成功只表示命令被接受；是否真正进入监听要用
    /// [`wait_listening`](Self::wait_listening) 确认。
    pub fn start(&self) -> Result<(), DriverError> {
        self.link.call(Opcode::RxStart, Payload::Empty)?;
        self.update(|s| s.frames_caught = None);
        debug!("{}: receiver started", self.hostname());
        Ok(())
    }

    /// 停止监听，冻结帧计数
    pub fn stop(&self) -> Result<(), DriverError> {
        let result = self.link.call(Opcode::RxStop, Payload::Empty);
        match &result {
            Ok(_) => self.update(|s| s.status = Some(ReceiverStatus::Idle)),
            Err(e) => warn!("{}: receiver stop failed: {}", self.hostname(), e),
        }
        result.map(|_| ())
    }

    /// 在 `timeout` 内轮询，直到状态为 `Listening`
    ///
    /// 超时返回 `Ok(false)`；请求失败立即返回错误。
    pub fn wait_listening(
        &self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<bool, DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.status()? == ReceiverStatus::Listening {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("{}: not listening after {:?}", self.hostname(), timeout);
                return Ok(false);
            }
            thread::sleep(poll_interval.min(deadline - now));
        }
    }

    /// 本次监听期间收到的帧数
    pub fn frames_caught(&self) -> Result<u64, DriverError> {
        let caught = self
            .link
            .call_int(Opcode::RxFramesCaught, Payload::Empty)?;
        let caught = u64::try_from(caught).map_err(|_| self.unexpected(format!("frames caught {caught}")))?;
        self.update(|s| s.frames_caught = Some(caught));
        Ok(caught)
    }

    /// 最后收到的帧序号（从未收到时为 `None`）
    pub fn last_frame_index(&self) -> Result<Option<u64>, DriverError> {
        let index = self
            .link
            .call_int(Opcode::RxLastFrameIndex, Payload::Empty)?;
        Ok(u64::try_from(index).ok())
    }

    /// 设置数据流目的地
    pub fn configure_destination(
        &self,
        ip: Ipv4Addr,
        mac: MacAddr,
        port: u16,
    ) -> Result<(), DriverError> {
        if port == 0 {
            return Err(DriverError::invalid("port", "must be non-zero"));
        }
        let destination = StreamDestination::new(ip, mac, port);
        self.link
            .call(Opcode::RxSetDestination, Payload::Destination(destination))?;
        self.update(|s| s.destination = Some(destination));
        Ok(())
    }

    pub fn destination(&self) -> Result<StreamDestination, DriverError> {
        let destination = self
            .link
            .call(Opcode::RxGetDestination, Payload::Empty)?
            .as_destination()?;
        self.update(|s| s.destination = Some(destination));
        Ok(destination)
    }

    // ------------------------------------------------------------------
    // 文件输出
    // ------------------------------------------------------------------

    pub fn file_path(&self) -> Result<PathBuf, DriverError> {
        let path = self.link.call_text(Opcode::RxGetFilePath, Payload::Empty)?;
        Ok(PathBuf::from(path))
    }

    /// 设置输出目录（目录必须在接收器所在主机上存在）
    pub fn set_file_path(&self, path: &Path) -> Result<(), DriverError> {
        let text = path
            .to_str()
            .ok_or_else(|| DriverError::invalid("file_path", "not valid UTF-8"))?;
        self.link
            .call(Opcode::RxSetFilePath, Payload::Text(text.to_string()))?;
        Ok(())
    }

    pub fn file_name(&self) -> Result<String, DriverError> {
        self.link.call_text(Opcode::RxGetFileName, Payload::Empty)
    }

    pub fn set_file_name(&self, name: &str) -> Result<(), DriverError> {
        if name.is_empty() || name.contains('/') {
            return Err(DriverError::invalid("file_name", format!("'{name}'")));
        }
        self.link
            .call(Opcode::RxSetFileName, Payload::Text(name.to_string()))?;
        Ok(())
    }

    pub fn file_index(&self) -> Result<u64, DriverError> {
        let index = self.link.call_int(Opcode::RxGetFileIndex, Payload::Empty)?;
        u64::try_from(index).map_err(|_| self.unexpected(format!("file index {index}")))
    }

    pub fn set_file_index(&self, index: u64) -> Result<(), DriverError> {
        let index = i64::try_from(index).map_err(|_| DriverError::invalid("file_index", "too large"))?;
        self.link
            .call(Opcode::RxSetFileIndex, Payload::Int(index))?;
        Ok(())
    }

    pub fn file_write(&self) -> Result<bool, DriverError> {
        Ok(self.link.call_int(Opcode::RxGetFileWrite, Payload::Empty)? != 0)
    }

    pub fn set_file_write(&self, enabled: bool) -> Result<(), DriverError> {
        self.link
            .call(Opcode::RxSetFileWrite, Payload::Int(enabled as i64))?;
        Ok(())
    }

    /// 是否向下游发布数据流
    pub fn streaming(&self) -> Result<bool, DriverError> {
        Ok(self.link.call_int(Opcode::RxGetStreaming, Payload::Empty)? != 0)
    }

    pub fn set_streaming(&self, enabled: bool) -> Result<(), DriverError> {
        self.link
            .call(Opcode::RxSetStreaming, Payload::Int(enabled as i64))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // 锁
    // ------------------------------------------------------------------

    pub fn lock_owner(&self) -> Result<Option<String>, DriverError> {
        let owner = self
            .link
            .call_text(Opcode::RxGetLockOwner, Payload::Empty)?;
        Ok((!owner.is_empty()).then_some(owner))
    }

    pub fn lock(&self, owner: &str) -> Result<(), DriverError> {
        self.link
            .call(Opcode::RxSetLock, Payload::Text(owner.to_string()))?;
        Ok(())
    }

    pub fn unlock(&self) -> Result<(), DriverError> {
        self.link.call(Opcode::RxSetLock, Payload::Empty)?;
        Ok(())
    }

    /// 按顺序应用接收器参数（`fpath`、`fname`、`findex`、`fwrite`、`rx_datastream`）
    ///
    /// 语义与 [`ModuleEndpoint::load_configuration`](crate::ModuleEndpoint::load_configuration) 相同。
    pub fn load_configuration<'a, I>(&self, entries: I) -> Result<usize, DriverError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut applied = 0;
        let mut unknown = Vec::new();
        let mut rejected = Vec::new();

        for (key, value) in entries {
            let Some(apply) = schema::receiver_setter(key) else {
                unknown.push(key.to_string());
                continue;
            };
            match apply(self, value) {
                Ok(()) => applied += 1,
                Err(e) if e.is_unreachable() => return Err(e),
                Err(e) => rejected.push(format!("{key}: {e}")),
            }
        }

        if unknown.is_empty() && rejected.is_empty() {
            Ok(applied)
        } else {
            Err(DriverError::Config {
                applied,
                unknown,
                rejected,
            })
        }
    }

    fn unexpected(&self, detail: String) -> DriverError {
        DriverError::UnexpectedResponse {
            endpoint: self.hostname().to_string(),
            detail,
        }
    }
}

impl std::fmt::Debug for ReceiverEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverEndpoint")
            .field("hostname", &self.hostname())
            .field("index", &self.index())
            .finish()
    }
}
